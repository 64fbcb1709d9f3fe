//! HTTP API.
pub mod login;
pub mod status;
pub mod users;

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header};
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::token::{TOKEN_DURATION_HEADER, TokenData};
use crate::{AppState, ServerError};

pub const SESSION_TOKEN_HEADER: &str = "x-tidepool-session-token";
pub const SERVER_NAME_HEADER: &str = "x-tidepool-server-name";
pub const SERVER_SECRET_HEADER: &str = "x-tidepool-server-secret";

const BASIC: &str = "Basic ";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Extract `username:password` of a basic `Authorization` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BASIC)?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;

    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some((username.to_owned(), password.to_owned()))
}

/// Requested token duration in seconds, zero when absent or unreadable.
pub fn token_duration(headers: &HeaderMap) -> i64 {
    header_str(headers, TOKEN_DURATION_HEADER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or_default()
}

/// Identity behind the session token of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub TokenData);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = header_str(&parts.headers, SESSION_TOKEN_HEADER)
            .filter(|token| !token.is_empty())
            .ok_or(ServerError::Unauthorized)?;

        Ok(Caller(state.auth.check_token(token)?))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let encoded = STANDARD.encode("a@b.com:abcd:1234");
        let parsed = basic_credentials(&headers("authorization", &format!("Basic {encoded}")));
        // only the first colon separates the password.
        assert_eq!(parsed, Some(("a@b.com".into(), "abcd:1234".into())));

        assert_eq!(basic_credentials(&HeaderMap::new()), None);
        assert_eq!(
            basic_credentials(&headers("authorization", "Bearer abc")),
            None
        );
        assert_eq!(
            basic_credentials(&headers("authorization", "Basic !!!")),
            None
        );
        let encoded = STANDARD.encode("a@b.com:");
        assert_eq!(
            basic_credentials(&headers("authorization", &format!("Basic {encoded}"))),
            None
        );
    }

    #[test]
    fn test_token_duration() {
        assert_eq!(token_duration(&HeaderMap::new()), 0);
        assert_eq!(token_duration(&headers(TOKEN_DURATION_HEADER, "600")), 600);
        assert_eq!(token_duration(&headers(TOKEN_DURATION_HEADER, "-5")), -5);
        assert_eq!(token_duration(&headers(TOKEN_DURATION_HEADER, "soon")), 0);
    }
}
