//! Pipeline — request-scoped middleware: correlation-id propagation and
//! principal extraction. Both run as `axum::middleware::from_fn[_with_state]`
//! layers; `main.rs` stacks them so correlation wraps auth wraps the
//! handler (the last `.layer()` call ends up outermost).

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::info_span;
use tracing::Instrument;
use uuid::Uuid;

use emulator_core::config::AuthMode;
use emulator_core::iam::Principal;

use crate::error::ApiError;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct RequestId(pub String);

/// Generates (or forwards) a request id, opens a tracing span around the
/// rest of the pipeline, and stamps the response header so a caller can
/// cross-reference their request against server logs.
pub async fn trace_pipeline(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", request_id = %request_id, method = %method, path = %path, stage = "entry");

    let start = std::time::Instant::now();
    let mut response = async move { next.run(req).await }.instrument(span.clone()).await;

    let elapsed_ms = start.elapsed().as_millis();
    let _entered = span.enter();
    tracing::info!(stage = "response_formatter", status = response.status().as_u16(), elapsed_ms, "request complete");

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Resolves a `Principal` from `X-Api-Key` or `Authorization: Bearer ...`
/// and inserts it into request extensions. Honors `AuthMode`: `Disabled`
/// always yields `Principal::Anonymous` without even looking at headers;
/// `Optional` falls back to anonymous on a missing/invalid credential;
/// `Required` rejects the request outright.
pub async fn auth_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_mode = state.config.emulator.auth_mode;

    if auth_mode == AuthMode::Disabled {
        req.extensions_mut().insert(Principal::Anonymous);
        return Ok(next.run(req).await);
    }

    let principal = resolve_principal(&state, &req).await;

    let principal = match (principal, auth_mode) {
        (Some(p), _) => p,
        (None, AuthMode::Optional) => Principal::Anonymous,
        (None, AuthMode::Required) => {
            return Err(ApiError::Core(emulator_core::error::Error::Unauthenticated(
                "missing or invalid credential".to_string(),
            )))
        }
        (None, AuthMode::Disabled) => unreachable!("handled above"),
    };

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

async fn resolve_principal(state: &AppState, req: &Request) -> Option<Principal> {
    if let Some(api_key) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        if let Ok(key) = state.iam.verify_api_key(api_key).await {
            return Some(Principal::ApiKey(key.id));
        }
        return None;
    }

    if let Some(auth) = req.headers().get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            if let Ok(claims) = state.iam.verify_bearer_token(token) {
                return Some(Principal::User(claims.sub));
            }
        }
        return None;
    }

    None
}

/// Enforces the rate limiter, keyed by the authenticated principal (or
/// `"anonymous"` — a deliberate simplification; distinguishing anonymous
/// callers would need a client IP, which this emulator's loopback-only
/// deployment model makes meaningless) and the request path. A no-op when
/// `rate_limiting_enabled` is false.
pub async fn rate_limit_mw(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.config.emulator.rate_limiting_enabled {
        return next.run(req).await;
    }

    let client_key = match req.extensions().get::<Principal>() {
        Some(Principal::ApiKey(id)) => format!("apiKey:{id}"),
        Some(Principal::User(email)) => format!("user:{email}"),
        Some(Principal::ServiceAccount(email)) => format!("sa:{email}"),
        Some(Principal::Anonymous) | None => "anonymous".to_string(),
    };
    let endpoint = req.uri().path().to_string();

    match state.rate_limiter.check(&client_key, &endpoint) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => rate_limited_response(retry_after).await,
    }
}

async fn rate_limited_response(retry_after_secs: u64) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": 429,
            "message": format!("rate limit exceeded, retry after {retry_after_secs}s"),
            "status": "RESOURCE_EXHAUSTED",
        }
    });
    let mut response = axum::response::IntoResponse::into_response((StatusCode::TOO_MANY_REQUESTS, axum::Json(body)));
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}
