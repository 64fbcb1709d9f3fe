//! Log users and servers in, check their tokens.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use super::{
    Caller, SERVER_NAME_HEADER, SERVER_SECRET_HEADER, SESSION_TOKEN_HEADER,
    basic_credentials, header_str, token_duration,
};
use crate::error::{AuthError, Result};
use crate::token::TokenData;
use crate::{AppState, ServerError};

/// `POST /login` with basic credentials.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let (username, password) =
        basic_credentials(&headers).ok_or(ServerError::MissingCredentials)?;

    let (token, user) = state
        .auth
        .login(&username, &password, token_duration(&headers))
        .await?;

    Ok((
        StatusCode::OK,
        [(SESSION_TOKEN_HEADER, token.token)],
        Json(user.to_serializable(false)),
    ))
}

/// `POST /serverlogin` with the server name and its secret as headers.
pub async fn server_login(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let name = header_str(&headers, SERVER_NAME_HEADER).unwrap_or_default();
    let secret = header_str(&headers, SERVER_SECRET_HEADER).unwrap_or_default();
    if name.is_empty() || secret.is_empty() {
        return Err(ServerError::MissingCredentials);
    }

    let token = state
        .auth
        .server_login(name, secret, token_duration(&headers))
        .await?;

    Ok((StatusCode::OK, [(SESSION_TOKEN_HEADER, token.token)]))
}

/// `GET /token/{token}`, decode a token on behalf of a server.
pub async fn check_token(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(token): Path<String>,
) -> Result<Json<TokenData>> {
    if !caller.is_server {
        return Err(AuthError::Forbidden.into());
    }

    Ok(Json(state.auth.check_token(&token)?))
}
