// src/views.rs
//! Minimal HTML pages for each route.

use crate::models::{Position, Quote, Transaction};
use rust_decimal::Decimal;
use warp::http::StatusCode;

/// Formats an amount as US dollars, e.g. `$1,234.50`.
pub fn usd(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    let text = rounded.abs().to_string();
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}${}.{}", sign, grouped, cents)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, signed_in: bool, body: &str) -> String {
    let nav = if signed_in {
        r#"<a href="/quote">Quote</a> <a href="/buy">Buy</a> <a href="/sell">Sell</a> <a href="/history">History</a> <a href="/logout">Log Out</a>"#
    } else {
        r#"<a href="/register">Register</a> <a href="/login">Log In</a>"#
    };
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\"><title>C$50 Finance: {}</title></head>\
         <body><nav>{}</nav><main>{}</main></body></html>",
        escape(title),
        nav,
        body
    )
}

pub fn index(positions: &[Position], cash: Decimal, grand_total: Decimal) -> String {
    let rows: String = positions
        .iter()
        .map(|p| {
            let price = p.price.map_or_else(|| "n/a".to_string(), usd);
            let total = p.total.map_or_else(|| "n/a".to_string(), usd);
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&p.symbol),
                p.shares,
                price,
                total
            )
        })
        .collect();
    let body = format!(
        "<table><thead><tr><th>Symbol</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr></thead>\
         <tbody>{}</tbody><tfoot><tr><td colspan=\"3\">Cash</td><td>{}</td></tr>\
         <tr><td colspan=\"3\">TOTAL</td><td>{}</td></tr></tfoot></table>",
        rows,
        usd(cash),
        usd(grand_total)
    );
    layout("Portfolio", true, &body)
}

pub fn buy_form() -> String {
    layout(
        "Buy",
        true,
        r#"<form action="/buy" method="post"><input name="symbol" placeholder="Symbol" autofocus>
<input name="shares" type="number" min="1" placeholder="Shares"><button type="submit">Buy</button></form>"#,
    )
}

pub fn sell_form(symbols: &[String]) -> String {
    let options: String = symbols
        .iter()
        .map(|s| format!("<option value=\"{0}\">{0}</option>", escape(s)))
        .collect();
    let body = format!(
        "<form action=\"/sell\" method=\"post\"><select name=\"symbol\"><option disabled selected>Symbol</option>{}</select>\
         <input name=\"shares\" type=\"number\" min=\"1\" placeholder=\"Shares\"><button type=\"submit\">Sell</button></form>",
        options
    );
    layout("Sell", true, &body)
}

pub fn history(transactions: &[Transaction]) -> String {
    let rows: String = transactions
        .iter()
        .map(|t| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                t.id,
                escape(&t.symbol),
                t.shares,
                usd(t.amount.abs()),
                t.time.format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect();
    let body = format!(
        "<table><thead><tr><th>#</th><th>Symbol</th><th>Shares</th><th>Amount</th><th>Transacted</th></tr></thead>\
         <tbody>{}</tbody></table>",
        rows
    );
    layout("History", true, &body)
}

pub fn quote_form() -> String {
    layout(
        "Quote",
        true,
        r#"<form action="/quote" method="post"><input name="symbol" placeholder="Symbol" autofocus><button type="submit">Quote</button></form>"#,
    )
}

pub fn quoted(quote: &Quote) -> String {
    let body = format!(
        "<p>A share of {} ({}) costs {}.</p>",
        escape(&quote.name),
        escape(&quote.symbol),
        usd(quote.price)
    );
    layout("Quoted", true, &body)
}

pub fn login_form() -> String {
    layout(
        "Log In",
        false,
        r#"<form action="/login" method="post"><input name="username" placeholder="Username" autofocus>
<input name="password" type="password" placeholder="Password"><button type="submit">Log In</button></form>"#,
    )
}

pub fn register_form() -> String {
    layout(
        "Register",
        false,
        r#"<form action="/register" method="post"><input name="username" placeholder="Username" autofocus>
<input name="password" type="password" placeholder="Password">
<input name="confirmation" type="password" placeholder="Password (again)"><button type="submit">Register</button></form>"#,
    )
}

pub fn apology(status: StatusCode, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1><p>{}</p>",
        status.as_u16(),
        escape(message)
    );
    layout("Apology", false, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn formats_dollars() {
        assert_eq!(usd(dec!(9740)), "$9,740.00");
        assert_eq!(usd(dec!(1234567.891)), "$1,234,567.89");
        assert_eq!(usd(dec!(0.5)), "$0.50");
        assert_eq!(usd(dec!(999)), "$999.00");
        assert_eq!(usd(dec!(-500)), "-$500.00");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape("<b>&\"'"), "&lt;b&gt;&amp;&quot;&#x27;");
    }

    #[test]
    fn history_shows_unsigned_amounts() {
        let page = history(&[Transaction {
            id: 1,
            user_id: 1,
            symbol: "NFLX".to_string(),
            shares: 10,
            amount: dec!(-500),
            time: chrono::Utc::now(),
        }]);
        assert!(page.contains("$500.00"));
        assert!(!page.contains("-$500.00"));
    }
}
