//! Users-related HTTP API.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use super::{Caller, SESSION_TOKEN_HEADER};
use crate::AppState;
use crate::auth::UserQuery;
use crate::error::{AuthError, Result};
use crate::user::{
    Field, NewCustodialUserDetails, NewUserDetails, Role, SerializableUser,
    UpdateUserDetails, ValidationError,
};

/// `POST /user`, sign up and receive a session token.
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let details = NewUserDetails::from_json(&body).map_err(AuthError::from)?;
    let (token, user) = state.auth.create_user(&details).await?;

    Ok((
        StatusCode::CREATED,
        [(SESSION_TOKEN_HEADER, token.token)],
        Json(user.to_serializable(false)),
    ))
}

/// `POST /user/{user_id}/user`, create a custodial user for `user_id`.
pub async fn create_custodial(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(custodian_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let details = NewCustodialUserDetails::from_json(&body).map_err(AuthError::from)?;
    let user = state
        .auth
        .create_custodial_user(&caller, &custodian_id, &details)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(user.to_serializable(caller.is_server)),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
) -> Result<Json<SerializableUser>> {
    let user = state.auth.get_user(&caller, &user_id).await?;
    Ok(Json(user.to_serializable(caller.is_server)))
}

/// `PUT /user/{user_id}` with a `{"updates": {..}}` body.
pub async fn update(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<SerializableUser>> {
    let details = UpdateUserDetails::from_json(&body).map_err(AuthError::from)?;
    let user = state.auth.update_user(&caller, &user_id, &details).await?;

    Ok(Json(user.to_serializable(caller.is_server)))
}

pub async fn delete(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    state.auth.delete_user(&caller, &user_id).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Default, Deserialize)]
pub struct FindParams {
    role: Option<String>,
    /// Comma separated ids.
    id: Option<String>,
}

impl FindParams {
    fn into_query(self) -> std::result::Result<UserQuery, ValidationError> {
        match (self.role, self.id) {
            (Some(role), None) => role
                .parse::<Role>()
                .map(UserQuery::Role)
                .map_err(|_| ValidationError::invalid(Field::Roles)),
            (None, Some(ids)) => {
                let ids: Vec<String> = ids
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned)
                    .collect();
                if ids.is_empty() {
                    Err(ValidationError::missing(Field::Details))
                } else {
                    Ok(UserQuery::Ids(ids))
                }
            },
            (None, None) => Err(ValidationError::missing(Field::Details)),
            (Some(_), Some(_)) => Err(ValidationError::invalid(Field::Details)),
        }
    }
}

/// `GET /users?role=` or `GET /users?id=`. Servers only.
pub async fn find(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(params): Query<FindParams>,
) -> Result<Json<Vec<SerializableUser>>> {
    if !caller.is_server {
        return Err(AuthError::Forbidden.into());
    }

    let query = params.into_query().map_err(AuthError::from)?;
    let users = state.auth.find_users(&caller, &query).await?;

    Ok(Json(
        users
            .iter()
            .map(|user| user.to_serializable(true))
            .collect(),
    ))
}
