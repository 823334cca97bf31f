//! Storage handlers — buckets and objects under `/storage/v1`, plus the
//! `/upload/storage/v1` simple/multipart/resumable upload surface.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use emulator_core::events::NotificationConfig;
use emulator_core::objectstore::objects::Preconditions;
use emulator_core::objectstore::resumable::InitiateResumableRequest;
use emulator_core::objectstore::resumable::ChunkOutcome;
use emulator_core::objectstore::{multipart, BucketAcl};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{is_rfc1035_label, within_length, Validator};
use crate::wire::{BucketDto, ObjectDto, ObjectListDto};

#[derive(Deserialize)]
pub struct CreateBucketRequest {
    name: String,
    #[serde(default = "default_location")]
    location: String,
    #[serde(default = "default_storage_class", rename = "storageClass")]
    storage_class: String,
    #[serde(default)]
    versioning: Option<VersioningBody>,
}

#[derive(Deserialize)]
pub struct VersioningBody {
    enabled: bool,
}

fn default_location() -> String {
    "US".to_string()
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

#[derive(Deserialize)]
pub struct ProjectQuery {
    project: String,
}

pub async fn create_bucket(
    State(state): State<AppState>,
    Query(q): Query<ProjectQuery>,
    Json(body): Json<CreateBucketRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new()
        .check("name", is_rfc1035_label(&body.name) || body.name.contains('.'), "must be a valid bucket name")
        .finish()?;

    let bucket = state
        .object_store
        .create_bucket(
            &q.project,
            &body.name,
            &body.location,
            &body.storage_class,
            body.versioning.map(|v| v.enabled).unwrap_or(false),
            BucketAcl::Private,
        )
        .await
        .map_err(ApiError::Core)?;

    Ok((StatusCode::OK, Json(BucketDto::from(bucket))))
}

pub async fn get_bucket(State(state): State<AppState>, Path(bucket): Path<String>) -> ApiResult<impl IntoResponse> {
    let bucket = state.object_store.get_bucket(&bucket).await.map_err(ApiError::Core)?;
    Ok(Json(BucketDto::from(bucket)))
}

pub async fn list_buckets(State(state): State<AppState>, Query(q): Query<ProjectQuery>) -> ApiResult<impl IntoResponse> {
    let buckets = state.object_store.list_buckets(&q.project).await.map_err(ApiError::Core)?;
    Ok(Json(json!({
        "kind": "storage#buckets",
        "items": buckets.into_iter().map(BucketDto::from).collect::<Vec<_>>(),
    })))
}

pub async fn delete_bucket(State(state): State<AppState>, Path(bucket): Path<String>) -> ApiResult<impl IntoResponse> {
    state.object_store.delete_bucket(&bucket).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct PatchBucketRequest {
    versioning: Option<VersioningBody>,
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "lifecycle")]
    lifecycle: Option<emulator_core::objectstore::LifecycleConfig>,
}

pub async fn patch_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(body): Json<PatchBucketRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(v) = body.versioning {
        state.object_store.set_versioning(&bucket, v.enabled).await.map_err(ApiError::Core)?;
    }
    if let Some(labels) = body.labels {
        state.object_store.set_labels(&bucket, labels).await.map_err(ApiError::Core)?;
    }
    if body.lifecycle.is_some() {
        state.object_store.set_lifecycle(&bucket, body.lifecycle).await.map_err(ApiError::Core)?;
    }
    let updated = state.object_store.get_bucket(&bucket).await.map_err(ApiError::Core)?;
    Ok(Json(BucketDto::from(updated)))
}

#[derive(Deserialize)]
pub struct NotificationRequest {
    topic: String,
    #[serde(default)]
    event_types: Option<Vec<String>>,
    #[serde(default)]
    object_name_prefix: Option<String>,
    #[serde(default = "default_payload_format")]
    payload_format: String,
}

fn default_payload_format() -> String {
    "JSON_API_V1".to_string()
}

pub async fn set_notifications(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(body): Json<Vec<NotificationRequest>>,
) -> ApiResult<impl IntoResponse> {
    let configs = body
        .into_iter()
        .map(|n| NotificationConfig {
            webhook_url: n.topic,
            event_types: n.event_types,
            object_name_prefix: n.object_name_prefix,
            payload_format: n.payload_format,
        })
        .collect();
    let updated = state.object_store.set_notifications(&bucket, configs).await.map_err(ApiError::Core)?;
    Ok(Json(BucketDto::from(updated)))
}

#[derive(Deserialize)]
pub struct ListObjectsQuery {
    prefix: Option<String>,
    delimiter: Option<String>,
    #[serde(default)]
    versions: bool,
}

pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .object_store
        .list(&bucket, q.prefix.as_deref(), q.delimiter.as_deref(), q.versions)
        .await
        .map_err(ApiError::Core)?;

    let mut items: Vec<ObjectDto> = result.items.into_iter().map(|h| ObjectDto::from_head(&bucket, h)).collect();
    items.extend(result.versions.into_iter().map(|v| ObjectDto::from_version(&bucket, v)));

    Ok(Json(ObjectListDto { kind: "storage#objects", items, prefixes: result.prefixes }))
}

#[derive(Deserialize)]
pub struct ObjectGenerationQuery {
    generation: Option<i64>,
}

pub async fn get_object_metadata(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<ObjectGenerationQuery>,
) -> ApiResult<impl IntoResponse> {
    let head = state.object_store.stat(&bucket, &name, q.generation).await.map_err(ApiError::Core)?;
    Ok(Json(ObjectDto::from_head(&bucket, head)))
}

pub async fn download_object(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<ObjectGenerationQuery>,
) -> ApiResult<impl IntoResponse> {
    let downloaded = state.object_store.download(&bucket, &name, q.generation).await.map_err(ApiError::Core)?;
    let mut headers = HeaderMap::new();
    if let Ok(v) = downloaded.content_type.parse() {
        headers.insert(axum::http::header::CONTENT_TYPE, v);
    }
    Ok((headers, downloaded.bytes))
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<ObjectGenerationQuery>,
) -> ApiResult<impl IntoResponse> {
    state.object_store.delete(&bucket, &name, q.generation).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct UploadQuery {
    name: Option<String>,
    #[serde(rename = "uploadType")]
    upload_type: Option<String>,
    #[serde(rename = "ifGenerationMatch")]
    if_generation_match: Option<i64>,
    #[serde(rename = "ifGenerationNotMatch")]
    if_generation_not_match: Option<i64>,
    #[serde(rename = "ifMetagenerationMatch")]
    if_metageneration_match: Option<i64>,
    #[serde(rename = "ifMetagenerationNotMatch")]
    if_metageneration_not_match: Option<i64>,
}

impl UploadQuery {
    pub fn is_resumable(&self) -> bool {
        self.upload_type.as_deref() == Some("resumable")
    }
}

fn preconditions_from(q: &UploadQuery) -> Preconditions {
    Preconditions {
        if_gen_match: q.if_generation_match,
        if_gen_not_match: q.if_generation_not_match,
        if_meta_match: q.if_metageneration_match,
        if_meta_not_match: q.if_metageneration_not_match,
    }
}

/// POST /upload/storage/v1/b/{bucket}/o — dispatches on `uploadType`:
/// `media` (simple, whole body is the payload), `multipart` (JSON
/// metadata + payload in one `multipart/related` body), or `resumable`
/// (initiates a session and returns its location, handled separately by
/// `initiate_resumable_upload`).
pub async fn upload_object(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let preconditions = preconditions_from(&q);

    match q.upload_type.as_deref() {
        Some("multipart") => {
            let content_type = headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::BadRequest("missing content-type".to_string()))?;
            let parsed = multipart::parse_multipart_related(content_type, &body)
                .map_err(ApiError::Core)?;

            Validator::new().check("name", within_length(&parsed.name, 1024), "object name too long").finish()?;

            let head = state
                .object_store
                .upload(
                    &bucket,
                    &parsed.name,
                    &parsed.payload,
                    parsed.content_type.as_deref().unwrap_or(&parsed.payload_content_type),
                    parsed.custom_metadata,
                    preconditions,
                )
                .await
                .map_err(ApiError::Core)?;
            Ok((StatusCode::OK, Json(ObjectDto::from_head(&bucket, head))))
        }
        _ => {
            let name = q.name.clone().ok_or_else(|| ApiError::BadRequest("missing name parameter".to_string()))?;
            Validator::new().check("name", within_length(&name, 1024), "object name too long").finish()?;

            let content_type = headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/octet-stream")
                .to_string();

            let head = state
                .object_store
                .upload(&bucket, &name, &body, &content_type, HashMap::new(), preconditions)
                .await
                .map_err(ApiError::Core)?;
            Ok((StatusCode::OK, Json(ObjectDto::from_head(&bucket, head))))
        }
    }
}

#[derive(Deserialize)]
pub struct InitiateResumableBody {
    name: String,
    #[serde(default, rename = "contentType")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

pub async fn initiate_resumable_upload(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<UploadQuery>,
    Json(body): Json<InitiateResumableBody>,
) -> ApiResult<impl IntoResponse> {
    let req = InitiateResumableRequest {
        content_type: body.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        custom_metadata: body.metadata,
        total_size: None,
        preconditions: preconditions_from(&q),
    };

    let session_id = state.object_store.initiate_resumable(&bucket, &body.name, req).await.map_err(ApiError::Core)?;

    let location = format!(
        "{}/upload/storage/v1/b/{bucket}/o?uploadType=resumable&upload_id={session_id}",
        state.config.emulator.storage_emulator_host,
    );
    let mut headers = HeaderMap::new();
    if let Ok(v) = location.parse() {
        headers.insert(axum::http::header::LOCATION, v);
    }
    Ok((StatusCode::OK, headers))
}

#[derive(Deserialize)]
pub struct ResumableChunkQuery {
    upload_id: String,
}

/// PUT /upload/storage/v1/b/{bucket}/o?uploadType=resumable&upload_id=...
/// — one chunk, with `Content-Range: bytes {start}-{end}/{total|*}`
/// locating it in the session.
pub async fn put_resumable_chunk(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ResumableChunkQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let content_range = headers
        .get(axum::http::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Content-Range header".to_string()))?;

    let (range_start, is_final) = parse_content_range(content_range)?;

    let outcome =
        state.object_store.put_chunk(&q.upload_id, range_start, &body, is_final).await.map_err(ApiError::Core)?;

    match outcome {
        ChunkOutcome::Incomplete { next_offset } => {
            let mut headers = HeaderMap::new();
            headers.insert(axum::http::header::RANGE, format!("bytes=0-{}", next_offset - 1).parse().unwrap());
            Ok((StatusCode::PERMANENT_REDIRECT, headers, Json(json!({}))))
        }
        ChunkOutcome::Complete(head) => {
            Ok((StatusCode::OK, HeaderMap::new(), Json(serde_json::to_value(ObjectDto::from_head(&bucket, head)).unwrap())))
        }
    }
}

/// Parses `bytes {start}-{end}/{total}` (or `bytes {start}-{end}/*` for a
/// non-final chunk), returning `(start, is_final)`.
fn parse_content_range(header: &str) -> ApiResult<(i64, bool)> {
    let rest = header
        .strip_prefix("bytes ")
        .ok_or_else(|| ApiError::BadRequest("malformed Content-Range".to_string()))?;
    let (range, total) = rest.split_once('/').ok_or_else(|| ApiError::BadRequest("malformed Content-Range".to_string()))?;
    let (start, _end) = range.split_once('-').ok_or_else(|| ApiError::BadRequest("malformed Content-Range".to_string()))?;
    let start: i64 = start.parse().map_err(|_| ApiError::BadRequest("malformed Content-Range start".to_string()))?;
    Ok((start, total != "*"))
}

#[derive(Deserialize)]
pub struct SignedUrlQuery {
    method: String,
    expires_in: i64,
}

pub async fn sign_object_url(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<SignedUrlQuery>,
) -> ApiResult<impl IntoResponse> {
    let path = format!("/storage/v1/b/{bucket}/o/{name}");
    let signed = state.object_store.sign_url(&q.method, &path, q.expires_in).map_err(ApiError::Core)?;
    Ok(Json(json!({ "signedUrl": signed.url, "expiresAt": signed.expires_at })))
}

#[derive(Deserialize)]
pub struct VerifySignedUrlQuery {
    #[serde(rename = "X-Goog-Algorithm")]
    #[allow(dead_code)]
    algorithm: Option<String>,
    #[serde(rename = "X-Goog-Expires")]
    expires: i64,
    #[serde(rename = "X-Goog-Signature")]
    signature: String,
}

pub async fn download_via_signed_url(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<VerifySignedUrlQuery>,
) -> ApiResult<impl IntoResponse> {
    let path = format!("/storage/v1/b/{bucket}/o/{name}");
    state.object_store.verify_signed_url("GET", &path, q.expires, &q.signature).map_err(ApiError::Core)?;

    let downloaded = state.object_store.download(&bucket, &name, None).await.map_err(ApiError::Core)?;
    let mut headers = HeaderMap::new();
    if let Ok(v) = downloaded.content_type.parse() {
        headers.insert(axum::http::header::CONTENT_TYPE, v);
    }
    Ok((headers, downloaded.bytes))
}

#[derive(Deserialize)]
pub struct PatchObjectRequest {
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
pub struct PatchObjectQuery {
    #[serde(rename = "ifMetagenerationMatch")]
    if_metageneration_match: Option<i64>,
}

pub async fn patch_object_metadata(
    State(state): State<AppState>,
    Path((bucket, name)): Path<(String, String)>,
    Query(q): Query<PatchObjectQuery>,
    Json(body): Json<PatchObjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let head = state
        .object_store
        .update_metadata(&bucket, &name, body.metadata, q.if_metageneration_match)
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(ObjectDto::from_head(&bucket, head)))
}

pub async fn copy_object(
    State(state): State<AppState>,
    Path((src_bucket, src_name, dst_bucket, dst_name)): Path<(String, String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let copied = state
        .object_store
        .copy(&src_bucket, &src_name, &dst_bucket, &dst_name)
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(ObjectDto::from_head(&dst_bucket, copied)))
}
