//! Resource-manager projects — the root of ownership every other handler
//! family scopes its resources under.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{is_rfc1035_label, Validator};
use crate::wire::ProjectDto;

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    project_id: String,
    display_name: String,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    Validator::new()
        .check("projectId", is_rfc1035_label(&body.project_id), "must be a valid project id")
        .finish()?;

    let project = state.projects.create(&body.project_id, &body.display_name).await.map_err(ApiError::Core)?;
    Ok((StatusCode::OK, Json(ProjectDto::from(project))))
}

pub async fn get_project(State(state): State<AppState>, Path(project_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let project = state.projects.get(&project_id).await.map_err(ApiError::Core)?;
    Ok(Json(ProjectDto::from(project)))
}

pub async fn delete_project(State(state): State<AppState>, Path(project_id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.projects.delete(&project_id).await.map_err(ApiError::Core)?;
    Ok(StatusCode::NO_CONTENT)
}
