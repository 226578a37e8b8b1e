//! HTTP surface.

pub mod error;
pub mod idempotency;
pub mod routes;
pub mod sync;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::IdempotencySettings;
use crate::schedule::Scheduler;
use crate::store::IdempotencyStore;

use idempotency::{IdempotencyGuard, idempotency_middleware};

/// State shared by handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}

/// Build the application router.
///
/// Every `/api/` route, bulk sync included, sits behind the idempotency
/// guard. Bulk items are dispatched through the guarded API router so they
/// get the same treatment as direct calls.
pub fn router(
    scheduler: Scheduler,
    idempotency: Arc<dyn IdempotencyStore>,
    settings: IdempotencySettings,
) -> Router {
    let guard = IdempotencyGuard::new(idempotency, settings);
    let state = AppState { scheduler };

    let api = Router::new()
        .route("/api/readings", post(routes::record_reading))
        .route("/api/assets", post(routes::create_asset).get(routes::list_assets))
        .route("/api/assets/:id", get(routes::get_asset))
        .route("/api/assets/:id/plans", post(routes::create_plan))
        .route("/api/assets/:id/work-orders", get(routes::list_work_orders))
        .route("/api/assets/:id/alerts", get(routes::list_alerts))
        .route("/api/assets/:id/readings", get(routes::list_readings))
        .route("/api/reconcile", post(routes::reconcile))
        .route("/api/events", get(routes::recent_events))
        .with_state(state)
        .layer(middleware::from_fn_with_state(guard.clone(), idempotency_middleware));

    let bulk = Router::new()
        .route("/api/sync/bulk", post(sync::bulk_sync))
        .with_state(sync::SyncState { inner: api.clone() })
        .layer(middleware::from_fn_with_state(guard, idempotency_middleware));

    api.merge(bulk)
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
}
