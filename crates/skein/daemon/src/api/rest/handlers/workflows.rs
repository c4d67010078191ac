//! Workflow submission, inspection and cancellation

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_bulk::BulkInput;
use skein_query::{CloudAccountView, QueryInput};
use skein_runtime::{Workflow, WorkflowRuntime};
use skein_types::{
    ResultPage, SkeinError, TaskFailure, TaskStage, WorkflowInstance, WorkflowInstanceId, WorkflowKind,
};

/// Response to a finished query
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub instance_id: String,
    pub document_count: u64,
    pub results: ResultPage<CloudAccountView>,
}

/// Response to an accepted asynchronous submission
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub instance_id: String,
}

/// Externally visible state of one instance
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceView {
    pub id: String,
    pub kind: String,
    pub stage: TaskStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl<K: WorkflowKind> From<WorkflowInstance<K>> for InstanceView {
    fn from(instance: WorkflowInstance<K>) -> Self {
        Self {
            id: instance.id.to_string(),
            kind: instance.kind,
            stage: instance.stage,
            sub_stage: instance
                .sub_stage
                .and_then(|s| serde_json::to_value(s).ok()),
            failure: instance.failure,
            result: instance.result.and_then(|r| serde_json::to_value(r).ok()),
            expires_at: instance.expires_at,
            version: instance.version,
        }
    }
}

/// Run a query and return its first page
pub async fn submit_query(
    State(state): State<AppState>,
    Json(input): Json<QueryInput>,
) -> ApiResult<Json<QueryResponse>> {
    let instance = state.query.submit_and_wait(input).await?;
    let instance_id = instance.id.to_string();

    match instance.stage {
        TaskStage::Finished => {
            let output = instance.result.ok_or_else(|| {
                SkeinError::Terminal(format!("query {} finished without a result", instance_id))
            })?;
            tracing::debug!(instance_id = %instance_id, document_count = output.document_count, "Query answered");
            Ok(Json(QueryResponse {
                instance_id,
                document_count: output.document_count,
                results: output.results,
            }))
        }
        TaskStage::Cancelled => Err(ApiError::Cancelled(instance_id)),
        _ => Err(ApiError::WorkflowFailed {
            instance_id,
            failure: instance
                .failure
                .unwrap_or_else(|| TaskFailure::new("UNKNOWN", "workflow failed")),
        }),
    }
}

/// Accept a bulk import; it runs in the background
pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(input): Json<BulkInput>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let items = input.worklist.len();
    let id = state.bulk.submit(input).await?;
    tracing::info!(instance_id = %id, items, "Bulk import accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            instance_id: id.to_string(),
        }),
    ))
}

async fn view<W: Workflow>(runtime: &WorkflowRuntime<W>, id: String) -> ApiResult<Json<InstanceView>> {
    let instance = runtime.get(&WorkflowInstanceId::new(id)).await?;
    Ok(Json(instance.into()))
}

async fn cancel<W: Workflow>(runtime: &WorkflowRuntime<W>, id: String) -> ApiResult<Json<InstanceView>> {
    let instance = runtime
        .cancel(&WorkflowInstanceId::new(id), "Cancelled by request")
        .await?;
    Ok(Json(instance.into()))
}

pub async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceView>> {
    view(&state.query, id).await
}

pub async fn get_bulk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceView>> {
    view(&state.bulk, id).await
}

pub async fn cancel_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceView>> {
    cancel(&state.query, id).await
}

pub async fn cancel_bulk(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceView>> {
    cancel(&state.bulk, id).await
}
