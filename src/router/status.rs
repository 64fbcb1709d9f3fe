//! Service health and metrics.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;
use crate::error::Result;

/// Structured status.
#[derive(Debug, Serialize)]
pub struct Status {
    status: &'static str,
    version: String,
    name: String,
}

/// Public server status. Fails when the store does not answer.
pub async fn status(State(state): State<AppState>) -> Result<Json<Status>> {
    state.auth.ping().await?;

    Ok(Json(Status {
        status: "OK",
        version: state.config.version().to_owned(),
        name: state.config.name.clone(),
    }))
}

/// Prometheus exposition of the recorded metrics.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use http_body_util::BodyExt;

    use super::*;
    use crate::*;

    #[tokio::test]
    async fn test_status_handler() {
        let (state, store) = test_state();
        let app = app(state);

        let response =
            make_request(app.clone(), Method::GET, "/status", &[], String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "OK");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        store.set_available(false);
        let response =
            make_request(app.clone(), Method::GET, "/status", &[], String::default()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // no recorder installed.
        let response = make_request(app, Method::GET, "/metrics", &[], String::default()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
