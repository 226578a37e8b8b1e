//! Request handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::event::Event;
use crate::model::*;
use crate::schedule::{Ingestion, PlanStatus, ReadingRequest, SweepReport};
use crate::store::{AlertStore, AssetRegistry, EventLog, ReadingLog, WorkOrderStore};

type ApiResult<T> = Result<T, ApiError>;

fn asset_id(raw: &str) -> ApiResult<AssetId> {
    Ok(raw.parse::<AssetId>()?)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn record_reading(
    State(state): State<AppState>,
    payload: Result<Json<ReadingRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Ingestion>)> {
    let Json(request) = payload?;
    let ingestion = state.scheduler.record_reading(request).await?;
    Ok((StatusCode::CREATED, Json(ingestion)))
}

pub async fn create_asset(
    State(state): State<AppState>,
    payload: Result<Json<NewAsset>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Asset>)> {
    let Json(new) = payload?;
    let asset = state.scheduler.register_asset(new).await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

pub async fn list_assets(State(state): State<AppState>) -> ApiResult<Json<Vec<Asset>>> {
    Ok(Json(state.scheduler.store().list_assets().await?))
}

#[derive(Debug, Serialize)]
pub struct AssetView {
    pub asset: Asset,
    pub plans: Vec<PlanStatus>,
}

pub async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AssetView>> {
    let (asset, plans) = state.scheduler.asset_status(asset_id(&id)?).await?;
    Ok(Json(AssetView { asset, plans }))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<NewPlan>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MaintenancePlan>)> {
    let asset_id = asset_id(&id)?;
    let Json(new) = payload?;
    let plan = state.scheduler.register_plan(asset_id, new).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_work_orders(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<WorkOrder>>> {
    let asset_id = asset_id(&id)?;
    let store = state.scheduler.store();
    store.get_asset(asset_id).await?;
    Ok(Json(store.list_work_orders(asset_id).await?))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<MaintenanceAlert>>> {
    let asset_id = asset_id(&id)?;
    let store = state.scheduler.store();
    store.get_asset(asset_id).await?;
    Ok(Json(store.list_alerts(asset_id).await?))
}

pub async fn list_readings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<UsageReading>>> {
    let asset_id = asset_id(&id)?;
    let store = state.scheduler.store();
    store.get_asset(asset_id).await?;
    Ok(Json(store.list_readings(asset_id).await?))
}

pub async fn reconcile(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(state.scheduler.reconcile_all().await?))
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default = "default_event_limit")]
    pub limit: i64,
}

fn default_event_limit() -> i64 {
    100
}

pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let limit = query.limit.clamp(1, 1000);
    Ok(Json(state.scheduler.store().recent_events(limit).await?))
}
