//! Instance lifecycle — create/get/list/delete plus the start/stop and
//! access-config mutators, mirrored on the same FSM `ComputeService` enforces.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use emulator_core::compute::orchestrator::{NetworkInterfaceSpec, RunInstanceRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{is_rfc1035_label, Validator};
use crate::wire::InstanceDto;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceRequest {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    subnetwork: Option<String>,
    #[serde(default)]
    access_configs: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    name: String,
    machine_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterfaceRequest>,
    #[serde(default)]
    image: Option<String>,
}

pub async fn run_instance(
    State(state): State<AppState>,
    Path((project_id, zone)): Path<(String, String)>,
    Json(body): Json<CreateInstanceRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new().check("name", is_rfc1035_label(&body.name), "must be a valid instance name").finish()?;

    let network_interfaces = body
        .network_interfaces
        .into_iter()
        .map(|nic| NetworkInterfaceSpec {
            network_name: nic.network,
            subnet_name: nic.subnetwork,
            allocate_external: !nic.access_configs.is_empty(),
        })
        .collect();

    let req = RunInstanceRequest {
        image: body.image,
        metadata: body.metadata,
        labels: body.labels,
        tags: body.tags,
        network_interfaces,
    };

    let instance = state
        .compute
        .run_instance(&project_id, &body.name, &zone, &body.machine_type, req)
        .await
        .map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(InstanceDto::from_instance(&project_id, instance))))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    Ok(Json(InstanceDto::from_instance(&project_id, instance)))
}

pub async fn list_instances(
    State(state): State<AppState>,
    Path((project_id, zone)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instances = state.compute.list_instances(&project_id, Some(&zone)).await.map_err(ApiError::Core)?;
    let items: Vec<InstanceDto> =
        instances.into_iter().map(|i| InstanceDto::from_instance(&project_id, i)).collect();
    Ok(Json(serde_json::json!({ "kind": "compute#instanceList", "items": items })))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    state.compute.delete_instance(&instance.id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_instance(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    let started = state.compute.start_instance(&instance.id).await.map_err(ApiError::Core)?;
    Ok(Json(InstanceDto::from_instance(&project_id, started)))
}

pub async fn stop_instance(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    let stopped = state.compute.stop_instance(&instance.id).await.map_err(ApiError::Core)?;
    Ok(Json(InstanceDto::from_instance(&project_id, stopped)))
}

pub async fn add_access_config(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    let updated = state.compute.add_access_config(&instance.id).await.map_err(ApiError::Core)?;
    Ok(Json(InstanceDto::from_instance(&project_id, updated)))
}

pub async fn delete_access_config(
    State(state): State<AppState>,
    Path((project_id, zone, name)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let instance = state.compute.get_instance(&project_id, &zone, &name).await.map_err(ApiError::Core)?;
    let updated = state.compute.delete_access_config(&instance.id).await.map_err(ApiError::Core)?;
    Ok(Json(InstanceDto::from_instance(&project_id, updated)))
}
