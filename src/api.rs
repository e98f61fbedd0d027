// src/api.rs
use crate::auth::{clear_session_cookie, Accounts, SessionKeys, SESSION_COOKIE};
use crate::db::Store;
use crate::error::{FinanceError, Unauthenticated};
use crate::models::{LoginForm, Position, QuoteForm, RegisterForm, TradeForm};
use crate::quote::QuoteProvider;
use crate::views;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Everything a handler needs, built once in `main` and shared by reference.
pub struct App {
    pub store: Store,
    pub accounts: Accounts,
    pub quotes: Arc<dyn QuoteProvider>,
    pub sessions: SessionKeys,
}

#[derive(Clone, Copy)]
enum Side {
    Buy,
    Sell,
}

pub fn routes(app: Arc<App>) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and_then(index_handler);

    let buy_page = warp::path!("buy")
        .and(warp::get())
        .and(with_user(app.clone()))
        .map(|_user_id: i64| page(views::buy_form()));

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and(form_body::<TradeForm>())
        .and_then(|user_id: i64, app: Arc<App>, form: TradeForm| {
            trade_handler(Side::Buy, user_id, app, form)
        });

    let sell_page = warp::path!("sell")
        .and(warp::get())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and_then(sell_page_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and(form_body::<TradeForm>())
        .and_then(|user_id: i64, app: Arc<App>, form: TradeForm| {
            trade_handler(Side::Sell, user_id, app, form)
        });

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and_then(history_handler);

    let quote_page = warp::path!("quote")
        .and(warp::get())
        .and(with_user(app.clone()))
        .map(|_user_id: i64| page(views::quote_form()));

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(with_user(app.clone()))
        .and(with_app(app.clone()))
        .and(form_body::<QuoteForm>())
        .and_then(quote_handler);

    // Visiting the login page forgets any current session.
    let login_page = warp::path!("login")
        .and(warp::get())
        .map(|| with_cookie(page(views::login_form()), clear_session_cookie()));

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_app(app.clone()))
        .and(form_body::<LoginForm>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .map(|| with_cookie(redirect_to("/"), clear_session_cookie()));

    let register_page = warp::path!("register")
        .and(warp::get())
        .map(|| page(views::register_form()));

    let register = warp::path!("register")
        .and(warp::post())
        .and(with_app(app))
        .and(form_body::<RegisterForm>())
        .and_then(register_handler);

    index
        .or(buy_page)
        .or(buy)
        .or(sell_page)
        .or(sell)
        .or(history)
        .or(quote_page)
        .or(quote)
        .or(login_page)
        .or(login)
        .or(logout)
        .or(register_page)
        .or(register)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache_headers()))
}

fn with_app(app: Arc<App>) -> impl Filter<Extract = (Arc<App>,), Error = Infallible> + Clone {
    warp::any().map(move || app.clone())
}

/// Extracts the signed-in user id from the session cookie or rejects with
/// `Unauthenticated`.
fn with_user(app: Arc<App>) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE).and_then(move |token: Option<String>| {
        let app = app.clone();
        async move {
            token
                .and_then(|token| app.sessions.user_id(&token))
                .ok_or_else(|| warp::reject::custom(Unauthenticated))
        }
    })
}

fn form_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(16 * 1024).and(warp::body::form())
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn page(html: String) -> Response {
    warp::reply::html(html).into_response()
}

fn redirect_to(path: &'static str) -> Response {
    warp::redirect::see_other(Uri::from_static(path)).into_response()
}

fn with_cookie(mut response: Response, cookie: String) -> Response {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(SET_COOKIE, value);
        }
        Err(e) => error!("Refusing to send malformed cookie: {}", e),
    }
    response
}

fn reject(e: FinanceError) -> Rejection {
    warp::reject::custom(e)
}

fn symbol_field(form_symbol: &Option<String>) -> Result<&str, FinanceError> {
    form_symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FinanceError::invalid("Please enter stock symbol."))
}

fn parse_shares(field: Option<&str>, side: Side) -> Result<i64, FinanceError> {
    let shares: i64 = field
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FinanceError::invalid("Invalid number of shares."))?;
    if shares < 1 {
        return Err(FinanceError::invalid(match side {
            Side::Buy => "Must buy at least 1 share.",
            Side::Sell => "Must sell at least 1 share.",
        }));
    }
    Ok(shares)
}

async fn index_handler(user_id: i64, app: Arc<App>) -> Result<Response, Rejection> {
    let holdings = app.store.current_holdings(user_id).await.map_err(reject)?;
    let cash = app.store.current_cash(user_id).await.map_err(reject)?;

    let mut positions = Vec::with_capacity(holdings.len());
    let mut grand_total = cash;
    for (symbol, shares) in holdings {
        let price = match app.quotes.lookup(&symbol).await {
            Some(quote) => Some(quote.price),
            None => {
                warn!("No price for held symbol {}; leaving it out of the total.", symbol);
                None
            }
        };
        let total = price.map(|p| p * Decimal::from(shares));
        if let Some(total) = total {
            grand_total += total;
        }
        positions.push(Position {
            symbol,
            shares,
            price,
            total,
        });
    }
    Ok(page(views::index(&positions, cash, grand_total)))
}

async fn trade_handler(
    side: Side,
    user_id: i64,
    app: Arc<App>,
    form: TradeForm,
) -> Result<Response, Rejection> {
    let symbol = symbol_field(&form.symbol).map_err(reject)?;
    let quote = app
        .quotes
        .lookup(symbol)
        .await
        .ok_or_else(|| reject(FinanceError::InvalidSymbol))?;
    let shares = parse_shares(form.shares.as_deref(), side).map_err(reject)?;

    let result = match side {
        Side::Buy => app.store.buy(user_id, &quote.symbol, shares, quote.price).await,
        Side::Sell => app.store.sell(user_id, &quote.symbol, shares, quote.price).await,
    };
    match result {
        Ok(_) => Ok(redirect_to("/")),
        Err(e) => {
            if let FinanceError::Store(ref cause) = e {
                error!("Trade for user {} aborted: {}", user_id, cause);
            }
            Err(reject(e))
        }
    }
}

async fn sell_page_handler(user_id: i64, app: Arc<App>) -> Result<Response, Rejection> {
    let holdings = app.store.current_holdings(user_id).await.map_err(reject)?;
    let symbols: Vec<String> = holdings.into_keys().collect();
    Ok(page(views::sell_form(&symbols)))
}

async fn history_handler(user_id: i64, app: Arc<App>) -> Result<Response, Rejection> {
    let transactions = app.store.history(user_id).await.map_err(reject)?;
    Ok(page(views::history(&transactions)))
}

async fn quote_handler(_user_id: i64, app: Arc<App>, form: QuoteForm) -> Result<Response, Rejection> {
    let symbol = symbol_field(&form.symbol).map_err(reject)?;
    match app.quotes.lookup(symbol).await {
        Some(quote) => Ok(page(views::quoted(&quote))),
        None => Err(reject(FinanceError::InvalidSymbol)),
    }
}

async fn login_handler(app: Arc<App>, form: LoginForm) -> Result<Response, Rejection> {
    let user = app.accounts.login(&form).await.map_err(reject)?;
    start_session(&app, user.id)
}

async fn register_handler(app: Arc<App>, form: RegisterForm) -> Result<Response, Rejection> {
    let user = app.accounts.register(&form).await.map_err(reject)?;
    start_session(&app, user.id)
}

fn start_session(app: &App, user_id: i64) -> Result<Response, Rejection> {
    let token = app.sessions.create_token(user_id).map_err(reject)?;
    Ok(with_cookie(redirect_to("/"), app.sessions.set_cookie(&token)))
}

/// Turns rejections into apology pages. Requests without a session are sent
/// to the login form instead.
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.find::<Unauthenticated>().is_some() {
        return Ok(redirect_to("/login"));
    }

    let (status, message) = if let Some(e) = err.find::<FinanceError>() {
        if e.status().is_server_error() {
            error!("Request failed: {}", e);
        } else {
            info!("Request refused: {}", e);
        }
        (e.status(), e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "page not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else if err.find::<warp::body::BodyDeserializeError>().is_some()
        || err.find::<warp::reject::PayloadTooLarge>().is_some()
    {
        (StatusCode::BAD_REQUEST, "malformed form".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };

    let response = warp::reply::with_status(warp::reply::html(views::apology(status, &message)), status)
        .into_response();
    if status == StatusCode::FORBIDDEN {
        return Ok(with_cookie(response, clear_session_cookie()));
    }
    Ok(response)
}
