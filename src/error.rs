//! Error handler for shoreline.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::gate::Denial;
use crate::token::TokenError;
use crate::user::{Field, StoreError, UserError, ValidationError};

pub type Result<T> = std::result::Result<T, ServerError>;

/// Outcome of a failed authentication or account operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("account is temporarily locked")]
    AccountLocked,
    #[error("email is not verified")]
    EmailNotVerified,
    #[error("too many concurrent logins")]
    TooManyConcurrentLogins,

    #[error("session token is expired")]
    TokenExpired,
    #[error("session token is invalid")]
    TokenInvalid,

    #[error("user not found")]
    UserNotFound,
    #[error("user already exists")]
    UserExists,
    #[error("caller is not allowed to perform this action")]
    Forbidden,

    #[error("user store is unavailable")]
    StoreUnavailable(#[source] StoreError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AuthError {
    pub fn internal<E>(details: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.to_owned(),
            source: Some(Box::new(err)),
        }
    }

    /// Short stable name, used as metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::EmailNotVerified => "email_not_verified",
            AuthError::TooManyConcurrentLogins => "too_many_concurrent_logins",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "token_invalid",
            AuthError::UserNotFound => "user_not_found",
            AuthError::UserExists => "user_exists",
            AuthError::Forbidden => "forbidden",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Internal { .. } => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::UserNotFound,
            err => AuthError::StoreUnavailable(err),
        }
    }
}

impl From<UserError> for AuthError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Validation(err) => AuthError::Validation(err),
            UserError::Credential(err) => {
                AuthError::internal("cannot derive credentials", err)
            },
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::ExpiredToken => AuthError::TokenExpired,
            TokenError::InvalidDuration(_) => {
                ValidationError::invalid(Field::TokenDuration).into()
            },
            TokenError::InvalidSubject
            | TokenError::EmptySubject
            | TokenError::MalformedToken => AuthError::TokenInvalid,
            err @ TokenError::Signing(_) => {
                AuthError::internal("cannot sign session token", err)
            },
        }
    }
}

impl From<Denial> for AuthError {
    fn from(_: Denial) -> Self {
        AuthError::TooManyConcurrentLogins
    }
}

/// Enum representing errors returned over HTTP.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("missing or invalid 'Authorization' header")]
    MissingCredentials,

    #[error("missing or invalid session token")]
    Unauthorized,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Point at the offending field.
    pub fn error(mut self, error: &ValidationError) -> Self {
        self.errors = Some(vec![FieldError {
            field: error.field.to_string(),
            message: error.to_string(),
        }]);
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn auth_response(err: &AuthError) -> ResponseError {
    let response = ResponseError::default().details(&err.to_string());

    match err {
        AuthError::Validation(validation) => response
            .title("There were validation errors with your request.")
            .status(StatusCode::BAD_REQUEST)
            .error(validation),

        // never tell which of the two happened.
        AuthError::InvalidCredentials | AuthError::AccountLocked => {
            tracing::info!(kind = err.kind(), "login refused");

            ResponseError::default()
                .title("Authentication failed.")
                .details("Invalid username or password.")
                .status(StatusCode::UNAUTHORIZED)
        },

        AuthError::EmailNotVerified => response
            .title("Email address must be verified.")
            .status(StatusCode::FORBIDDEN),

        AuthError::TooManyConcurrentLogins => response
            .title("Too many logins in progress.")
            .status(StatusCode::TOO_MANY_REQUESTS),

        AuthError::TokenExpired | AuthError::TokenInvalid => response
            .title("Invalid session token.")
            .status(StatusCode::UNAUTHORIZED),

        AuthError::UserNotFound => response
            .title("User not found.")
            .status(StatusCode::NOT_FOUND),

        AuthError::UserExists => response
            .title("User already exists.")
            .status(StatusCode::CONFLICT),

        AuthError::Forbidden => response
            .title("Forbidden.")
            .status(StatusCode::FORBIDDEN),

        AuthError::StoreUnavailable(source) => {
            tracing::error!(error = %source, "user store unavailable");

            response
                .title("Service unavailable.")
                .details("User store is unavailable, retry later.")
                .status(StatusCode::SERVICE_UNAVAILABLE)
        },

        AuthError::Internal { details, source } => {
            tracing::error!(err = source, %details, "server returned 500 status");

            ResponseError::default()
        },
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = match &self {
            ServerError::Auth(err) => auth_response(err),

            ServerError::MissingCredentials => ResponseError::default()
                .title("Missing or invalid 'Authorization' header.")
                .details(&self.to_string())
                .status(StatusCode::BAD_REQUEST),

            ServerError::Unauthorized => ResponseError::default()
                .title("Missing or invalid session token.")
                .details(&self.to_string())
                .status(StatusCode::UNAUTHORIZED),
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    let body = serde_json::json!({
        "type": null,
        "title": "Internal server error.",
        "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        "detail": null,
        "instance": null,
        "errors": null,
    });

    let mut response = Response::new(body.to_string().into());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
