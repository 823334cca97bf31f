mod config;
mod error;
mod handlers;
mod pipeline;
mod rate_limit;
mod state;
mod validation;
mod wire;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::config::{GatewayConfig, LogFormat, LogOutput};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: basic tracing so config loading itself gets logged.
    let _basic_tracing = init_tracing_basic();

    info!("starting emulator gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    // Phase 2: replace with the configured format/level, now that we have one.
    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("configuration loaded");
    info!("server will bind to {}", config.server.bind_address);

    let bind_address = config.server.bind_address.clone();
    let state = AppState::new(config).await.context("failed to initialize application state")?;

    let (lifecycle_handle, lifecycle_token) = state.cancellation();
    let lifecycle_interval = state.config.emulator.lifecycle_interval();
    let lifecycle_service = state.object_store.clone();
    tokio::spawn(async move {
        emulator_core::workers::lifecycle_loop(lifecycle_service, lifecycle_interval, lifecycle_token).await;
    });

    let (reconcile_handle, reconcile_token) = state.cancellation();
    let reconcile_interval = state.config.emulator.reconcile_interval();
    let reconcile_service = state.compute.clone();
    tokio::spawn(async move {
        emulator_core::workers::reconcile_loop(reconcile_service, reconcile_interval, reconcile_token).await;
    });

    let app = build_router(state.clone());

    let addr: SocketAddr = bind_address.parse().context("invalid bind_address")?;

    info!("starting HTTP server...");
    info!("  - storage:   http://{addr}/storage/v1/b");
    info!("  - compute:   http://{addr}/compute/v1/projects");
    info!("  - iam/oauth: http://{addr}/v1/projects, http://{addr}/token");
    info!("  - health:    http://{addr}/health");

    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("server error")?;

    lifecycle_handle.cancel();
    reconcile_handle.cancel();
    state.shutdown();

    info!("server shut down gracefully");
    Ok(())
}

fn build_router(state: AppState) -> Router {
    let cors = if state.config.server.enable_cors {
        let origins: Vec<_> =
            state.config.server.cors_origins.iter().filter_map(|s| s.parse::<axum::http::HeaderValue>().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, "x-api-key".parse().unwrap(), "x-goog-api-key".parse().unwrap()])
    } else {
        CorsLayer::new()
    };

    let request_timeout = Duration::from_secs(state.config.server.write_timeout_secs);
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/", get(root_handler))
        .merge(storage_routes())
        .merge(compute_routes())
        .merge(vpc_routes())
        .merge(iam_routes())
        .merge(oauth_routes())
        .merge(project_routes())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(pipeline::rate_limit_mw))
                .layer(axum::middleware::from_fn_with_state(state.clone(), pipeline::auth_mw))
                .layer(axum::middleware::from_fn(pipeline::trace_pipeline))
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(cors),
        )
        .with_state(state)
}

fn storage_routes() -> Router<AppState> {
    Router::new()
        .route("/storage/v1/b", get(handlers::storage::list_buckets).post(handlers::storage::create_bucket))
        .route(
            "/storage/v1/b/{bucket}",
            get(handlers::storage::get_bucket).delete(handlers::storage::delete_bucket).patch(handlers::storage::patch_bucket),
        )
        .route("/storage/v1/b/{bucket}/notificationConfigs", put(handlers::storage::set_notifications))
        .route("/storage/v1/b/{bucket}/o", get(handlers::storage::list_objects))
        .route(
            "/storage/v1/b/{bucket}/o/{object}",
            get(get_or_download_object).delete(handlers::storage::delete_object).patch(handlers::storage::patch_object_metadata),
        )
        .route("/storage/v1/b/{bucket}/o/{object}/sign", post(handlers::storage::sign_object_url))
        .route(
            "/storage/v1/b/{src_bucket}/o/{src_name}/copyTo/b/{dst_bucket}/o/{dst_name}",
            post(handlers::storage::copy_object),
        )
        .route("/signed/{bucket}/{object}", get(handlers::storage::download_via_signed_url))
        .route("/upload/storage/v1/b/{bucket}/o", post(upload_or_initiate_resumable).put(handlers::storage::put_resumable_chunk))
}

#[derive(Deserialize)]
struct AltQuery {
    alt: Option<String>,
}

/// GET /storage/v1/b/{bucket}/o/{object} — plain metadata unless
/// `alt=media`, which is the wire convention for "give me the bytes".
async fn get_or_download_object(
    state: State<AppState>,
    path: axum::extract::Path<(String, String)>,
    Query(alt): Query<AltQuery>,
    query: Query<crate::handlers::storage::ObjectGenerationQuery>,
) -> axum::response::Response {
    if alt.alt.as_deref() == Some("media") {
        handlers::storage::download_object(state, path, query).await.into_response()
    } else {
        handlers::storage::get_object_metadata(state, path, query).await.into_response()
    }
}

/// POST /upload/storage/v1/b/{bucket}/o — `uploadType=resumable` initiates
/// a session instead of writing a payload; `media`/`multipart` (the
/// default) upload inline.
async fn upload_or_initiate_resumable(
    state: State<AppState>,
    path: axum::extract::Path<String>,
    full_query: Query<handlers::storage::UploadQuery>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<axum::response::Response, error::ApiError> {
    if full_query.is_resumable() {
        let parsed: handlers::storage::InitiateResumableBody =
            serde_json::from_slice(&body).map_err(|e| error::ApiError::BadRequest(e.to_string()))?;
        Ok(handlers::storage::initiate_resumable_upload(state, path, full_query, axum::Json(parsed)).await.into_response())
    } else {
        Ok(handlers::storage::upload_object(state, path, full_query, headers, body).await.into_response())
    }
}

fn compute_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances",
            get(handlers::compute::list_instances).post(handlers::compute::run_instance),
        )
        .route("/compute/v1/projects/{project}/zones/{zone}/instances/{name}", get(handlers::compute::get_instance).delete(handlers::compute::delete_instance))
        .route("/compute/v1/projects/{project}/zones/{zone}/instances/{name}/start", post(handlers::compute::start_instance))
        .route("/compute/v1/projects/{project}/zones/{zone}/instances/{name}/stop", post(handlers::compute::stop_instance))
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/addAccessConfig",
            post(handlers::compute::add_access_config),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/deleteAccessConfig",
            post(handlers::compute::delete_access_config),
        )
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{name}/networkInterfaces",
            get(handlers::vpc::list_nics),
        )
}

fn vpc_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/compute/v1/projects/{project}/global/networks",
            get(handlers::vpc::list_networks).post(handlers::vpc::create_network),
        )
        .route("/compute/v1/projects/{project}/global/networks/{name}", get(handlers::vpc::get_network).delete(handlers::vpc::delete_network))
        .route("/compute/v1/projects/{project}/global/networks/{name}/addPeering", post(handlers::vpc::add_peering))
        .route("/compute/v1/projects/{project}/global/networks/{name}/removePeering", post(handlers::vpc::remove_peering))
        .route("/compute/v1/projects/{project}/global/networks/{name}/peerings", get(handlers::vpc::list_peerings))
        .route(
            "/compute/v1/projects/{project}/regions/{region}/subnetworks",
            get(handlers::vpc::list_subnetworks).post(handlers::vpc::create_subnetwork),
        )
        .route("/compute/v1/projects/{project}/regions/{region}/subnetworks/{name}", get(handlers::vpc::get_subnetwork))
        .route(
            "/compute/v1/projects/{project}/global/firewalls",
            get(handlers::vpc::list_firewalls).post(handlers::vpc::create_firewall),
        )
        .route("/compute/v1/projects/{project}/global/firewalls/{name}", get(handlers::vpc::get_firewall).delete(handlers::vpc::delete_firewall))
        .route("/compute/v1/projects/{project}/global/routes", get(handlers::vpc::list_routes).post(handlers::vpc::create_route))
        .route("/compute/v1/projects/{project}/global/routes/{name}", get(handlers::vpc::get_route).delete(handlers::vpc::delete_route))
        .route(
            "/compute/v1/projects/{project}/regions/{region}/addresses",
            get(handlers::vpc::list_addresses).post(handlers::vpc::reserve_address),
        )
        .route("/compute/v1/projects/{project}/regions/{region}/addresses/{name}", get(handlers::vpc::get_address).delete(handlers::vpc::delete_address))
        .route(
            "/compute/v1/projects/{project}/regions/{region}/routers",
            get(handlers::vpc::list_routers).post(handlers::vpc::create_router),
        )
        .route("/compute/v1/projects/{project}/regions/{region}/routers/{name}", get(handlers::vpc::get_router).delete(handlers::vpc::delete_router))
        .route(
            "/compute/v1/projects/{project}/regions/{region}/vpnTunnels",
            get(handlers::vpc::list_vpn_tunnels).post(handlers::vpc::create_vpn_tunnel),
        )
        .route("/compute/v1/projects/{project}/regions/{region}/vpnTunnels/{name}", delete(handlers::vpc::delete_vpn_tunnel))
}

fn iam_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/projects/{project}/serviceAccounts",
            get(handlers::iam::list_service_accounts).post(handlers::iam::create_service_account),
        )
        .route("/v1/projects/{project}/serviceAccounts/{email}", get(handlers::iam::get_service_account).delete(handlers::iam::delete_service_account))
        .route(
            "/v1/projects/{project}/serviceAccounts/{email}/keys",
            get(handlers::iam::list_service_account_keys).post(handlers::iam::create_service_account_key),
        )
        .route(
            "/v1/projects/{project}/serviceAccounts/{email}/keys/{key_id}",
            delete(handlers::iam::delete_service_account_key),
        )
        .route(
            "/v1/{resource_type}/{resource_id}/iam",
            get(handlers::iam::get_iam_policy).post(handlers::iam::set_iam_policy),
        )
        .route("/v1/{resource_type}/{resource_id}/iam/test", post(handlers::iam::test_iam_permissions))
}

fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(handlers::oauth::issue_token))
        .route("/token/revoke", post(handlers::oauth::revoke_token))
        .route("/oauth2/v1/userinfo", get(handlers::oauth::userinfo))
}

fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/projects", post(handlers::projects::create_project))
        .route("/v1/projects/{project}", get(handlers::projects::get_project).delete(handlers::projects::delete_project))
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "cloud-control-plane-emulator",
        "version": env!("CARGO_PKG_VERSION"),
        "surfaces": ["storage", "compute", "vpc", "iam", "oauth", "projects"],
    }))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

async fn readiness_handler(State(_state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "ready": true })))
}

fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,emulator=debug"));

    let subscriber = fmt().with_env_filter(filter).with_target(true).with_thread_ids(false).with_file(false).with_line_number(false).finish();

    tracing::subscriber::set_default(subscriber)
}

fn init_tracing_from_config(config: &GatewayConfig) {
    use std::sync::Arc;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match (&config.logging.format, &config.logging.output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Json, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file '{path}': {e}"));
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true).with_ansi(false).with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            let layer = fmt::layer().with_target(true).with_thread_ids(false).with_file(false).with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file '{path}': {e}"));
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => warn!("received SIGTERM, initiating graceful shutdown..."),
    }
}
