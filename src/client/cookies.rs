//! Request cookie lookup and the sticky-session cookie.

use std::time::Duration;

use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};

use crate::origin::{AppId, OriginId};

/// Name of the cookie pinning a client to an origin of `app_id`.
pub fn sticky_session_cookie_name(app_id: &AppId) -> String {
    format!("styx_origin_{app_id}")
}

/// Value of the first request cookie called `name`.
pub fn request_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}

/// `Set-Cookie` value pinning the client to `origin_id` for `max_age`.
pub fn sticky_session_cookie(
    app_id: &AppId,
    origin_id: &OriginId,
    max_age: Duration,
) -> Result<HeaderValue, http::header::InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly",
        sticky_session_cookie_name(app_id),
        origin_id,
        max_age.as_secs()
    ))
}
