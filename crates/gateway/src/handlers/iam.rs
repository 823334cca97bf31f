//! Service accounts, service-account keys, and generic resource IAM
//! policies — getIamPolicy/setIamPolicy/testIamPermissions work the same
//! way regardless of which resource type they're mounted under.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use emulator_core::iam::Principal;
use emulator_core::repo::iam::Binding;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{is_email, is_rfc1035_label, Validator};
use crate::wire::{ApiKeyDto, PolicyDto, ServiceAccountDto, ServiceAccountKeyDto};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceAccountRequest {
    account_id: String,
    display_name: String,
}

pub async fn create_service_account(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<CreateServiceAccountRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new()
        .check("accountId", is_rfc1035_label(&body.account_id), "must be a valid account id")
        .finish()?;
    let sa = state
        .iam
        .create_service_account(&project_id, &body.account_id, &body.display_name)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(ServiceAccountDto::from(sa))))
}

pub async fn get_service_account(
    State(state): State<AppState>,
    Path((_project_id, email)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let sa = state.iam.get_service_account(&email).await.map_err(ApiError::Core)?;
    Ok(Json(ServiceAccountDto::from(sa)))
}

pub async fn list_service_accounts(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let accounts = state.iam.list_service_accounts(&project_id).await.map_err(ApiError::Core)?;
    let items: Vec<ServiceAccountDto> = accounts.into_iter().map(ServiceAccountDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "iam#serviceAccountList", "accounts": items })))
}

pub async fn delete_service_account(
    State(state): State<AppState>,
    Path((_project_id, email)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.iam.delete_service_account(&email).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_service_account_key(
    State(state): State<AppState>,
    Path((_project_id, email)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Validator::new().check("email", is_email(&email), "must be a valid email").finish()?;
    let key = state.iam.create_service_account_key(&email).await.map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(ServiceAccountKeyDto::from(key))))
}

pub async fn list_service_account_keys(
    State(state): State<AppState>,
    Path((_project_id, email)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let keys = state.iam.list_service_account_keys(&email).await.map_err(ApiError::Core)?;
    let items: Vec<ServiceAccountKeyDto> = keys.into_iter().map(ServiceAccountKeyDto::from).collect();
    Ok(Json(serde_json::json!({ "kind": "iam#serviceAccountKeyList", "keys": items })))
}

pub async fn delete_service_account_key(
    State(state): State<AppState>,
    Path((_project_id, _email, key_id)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.iam.delete_service_account_key(&key_id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_iam_policy(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let policy = state.iam.get_iam_policy(&resource_type, &resource_id).await.map_err(ApiError::Core)?;
    Ok(Json(PolicyDto::from(policy)))
}

#[derive(Deserialize)]
pub struct BindingRequest {
    role: String,
    members: Vec<String>,
}

#[derive(Deserialize)]
pub struct SetIamPolicyRequest {
    bindings: Vec<BindingRequest>,
    #[serde(default)]
    etag: Option<String>,
}

pub async fn set_iam_policy(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    Json(body): Json<SetIamPolicyRequest>,
) -> ApiResult<impl IntoResponse> {
    let bindings = body.bindings.into_iter().map(|b| Binding { role: b.role, members: b.members }).collect();
    let policy = state
        .iam
        .set_iam_policy(&resource_type, &resource_id, bindings, body.etag.as_deref())
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(PolicyDto::from(policy)))
}

#[derive(Deserialize)]
pub struct TestIamPermissionsRequest {
    permissions: Vec<String>,
}

#[derive(serde::Serialize)]
pub struct TestIamPermissionsResponse {
    permissions: Vec<String>,
}

pub async fn test_iam_permissions(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, String)>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<TestIamPermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let granted = state
        .iam
        .test_iam_permissions(&resource_type, &resource_id, &principal, &body.permissions)
        .await
        .map_err(ApiError::Core)?;
    Ok(Json(TestIamPermissionsResponse { permissions: granted }))
}
