//! Login, logout and session status endpoints.

pub mod login;
pub mod logout;
pub mod session;

use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};

fn cookie_headers(cookies: Vec<HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        headers.append(SET_COOKIE, cookie);
    }
    headers
}
