use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use brio_core::models::ApprovalDecision;
use brio_core::{AppState, EngineError};

pub fn campaign_router() -> Router<AppState> {
    Router::new().route("/{id}/execute", post(execute_campaign))
}

pub fn workflow_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows))
        .route("/{id}", get(get_workflow))
        .route("/{id}/approval", post(resolve_approval))
        .route("/{id}/cancel", post(cancel_workflow))
        .route("/{id}/deliverables", get(list_deliverables))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteCampaignRequest {
    organization_id: String,
    brief: String,
}

async fn execute_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(body): Json<ExecuteCampaignRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let workflow = state
        .engine
        .start_workflow(&campaign_id, &body.organization_id, &body.brief)
        .await?;
    Ok(Json(serde_json::json!({
        "workflowId": workflow.id,
        "status": "queued",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListWorkflowsQuery {
    campaign_id: String,
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let workflows = state
        .workflow_store
        .list_by_campaign(&query.campaign_id)
        .await?;
    Ok(Json(serde_json::json!({ "workflows": workflows })))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let status = state.engine.get_status(&id).await?;
    Ok(Json(serde_json::json!({ "workflow": status })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveApprovalRequest {
    decision: String,
    feedback: Option<String>,
}

async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveApprovalRequest>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let decision = ApprovalDecision::from_str(&body.decision)
        .ok_or_else(|| EngineError::BadRequest(format!("Invalid decision: {}", body.decision)))?;
    state
        .engine
        .resolve_approval(&id, decision, body.feedback)
        .await?;
    Ok(Json(serde_json::json!({ "resolved": true })))
}

async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    state.engine.cancel_workflow(&id).await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

async fn list_deliverables(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let deliverables = state.deliverable_store.list_by_workflow(&id).await?;
    Ok(Json(serde_json::json!({ "deliverables": deliverables })))
}
