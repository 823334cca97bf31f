//! Fake OAuth surface — mints and verifies the opaque bearer tokens the
//! pipeline's auth stage accepts. No real IdP round trip; a subject string
//! supplied by the caller is the entire "grant".

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use emulator_core::error::Error as CoreError;
use emulator_core::iam::Principal;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::wire::{TokenResponseDto, UserInfoDto};

const DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Deserialize)]
pub struct TokenRequest {
    subject: String,
    #[serde(default = "default_ttl")]
    ttl_secs: i64,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_SECS
}

/// POST /token — mints an opaque bearer token bound to `subject` (an email
/// or service-account identifier the caller asserts; this emulator trusts
/// it outright, matching the "no real OAuth flow" contract).
pub async fn issue_token(State(state): State<AppState>, Json(body): Json<TokenRequest>) -> ApiResult<impl IntoResponse> {
    let access_token = state.iam.issue_bearer_token(&body.subject, body.ttl_secs);
    Ok(Json(TokenResponseDto { access_token, token_type: "Bearer", expires_in: body.ttl_secs }))
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    token: String,
}

/// POST /token/revoke — marks a previously-issued token invalid for the
/// rest of this process's lifetime.
pub async fn revoke_token(State(state): State<AppState>, Json(body): Json<RevokeRequest>) -> ApiResult<impl IntoResponse> {
    state.iam.revoke_bearer_token(&body.token).map_err(ApiError::Core)?;
    Ok(axum::http::StatusCode::OK)
}

/// GET /oauth2/v1/userinfo — echoes the identity bound to the caller's
/// bearer token. Requires the auth stage to have resolved a non-anonymous
/// principal; an API key or anonymous caller has no subject to echo.
pub async fn userinfo(Extension(principal): Extension<Principal>) -> ApiResult<impl IntoResponse> {
    match principal {
        Principal::User(email) | Principal::ServiceAccount(email) => {
            Ok(Json(UserInfoDto { sub: email.clone(), email }))
        }
        Principal::ApiKey(_) | Principal::Anonymous => {
            Err(ApiError::Core(CoreError::Unauthenticated("no bearer-token identity on this request".to_string())))
        }
    }
}
