//! Persistence seams.
//!
//! The scheduler talks to its collaborators through these traits. Two
//! backends implement them: [`crate::db::Db`] on Postgres and
//! [`memory::MemoryStore`] in process. Uniqueness guarantees (one work order
//! per milestone, one open alert per threshold, one record per request
//! fingerprint) live here, not in callers.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::config::secrets::{ExposeSecret, redact_url};
use crate::db::Db;
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::model::*;

/// An accepted reading, ready to be applied.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub asset_id: AssetId,
    pub new_value: f64,
    pub recorded_by: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait AssetRegistry: Send + Sync {
    async fn insert_asset(&self, new: NewAsset) -> Result<Asset>;

    /// `Error::NotFound` when the id is unknown.
    async fn get_asset(&self, id: AssetId) -> Result<Asset>;

    async fn list_assets(&self) -> Result<Vec<Asset>>;

    /// Advance the asset's counter and append the reading atomically.
    ///
    /// Fails with `Error::InvalidReading` (and changes nothing) unless
    /// `new_value` is strictly above the counter at the moment of writing.
    async fn apply_reading(&self, reading: NewReading) -> Result<(Asset, UsageReading)>;
}

#[async_trait]
pub trait ReadingLog: Send + Sync {
    /// Readings for an asset, oldest first.
    async fn list_readings(&self, asset_id: AssetId) -> Result<Vec<UsageReading>>;
}

#[async_trait]
pub trait PlanRegistry: Send + Sync {
    async fn insert_plan(&self, asset_id: AssetId, new: NewPlan) -> Result<MaintenancePlan>;

    async fn get_plan(&self, id: PlanId) -> Result<MaintenancePlan>;

    async fn active_plans(&self, asset_id: AssetId) -> Result<Vec<MaintenancePlan>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The unacknowledged alert for (asset, plan, cycle), if any.
    async fn find_open_alert(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
    ) -> Result<Option<MaintenanceAlert>>;

    /// Insert unless an unacknowledged alert already targets the same
    /// (asset, plan, cycle). Returns `None` when one does.
    async fn insert_alert(&self, new: NewAlert) -> Result<Option<MaintenanceAlert>>;

    /// Acknowledge every open alert for (asset, plan, cycle).
    async fn acknowledge_alerts(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceAlert>>;

    async fn list_alerts(&self, asset_id: AssetId) -> Result<Vec<MaintenanceAlert>>;
}

#[async_trait]
pub trait WorkOrderStore: Send + Sync {
    /// Work orders already opened for one plan, by milestone.
    async fn plan_work_orders(&self, asset_id: AssetId, plan_id: PlanId) -> Result<Vec<WorkOrder>>;

    /// Create the order for (asset, plan, milestone) with the next number
    /// from the global sequence. Returns `None` if it already exists.
    async fn create_work_order(&self, new: NewWorkOrder) -> Result<Option<WorkOrder>>;

    /// Work orders for an asset, by number.
    async fn list_work_orders(&self, asset_id: AssetId) -> Result<Vec<WorkOrder>>;

    async fn insert_material_notice(&self, notice: MaterialNotice) -> Result<()>;

    async fn material_notices(&self, work_order_id: WorkOrderId) -> Result<Vec<MaterialNotice>>;
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append_event(&self, kind: EventKind) -> Result<Event>;

    /// Most recent events, newest first.
    async fn recent_events(&self, limit: i64) -> Result<Vec<Event>>;
}

/// Read-only view of warehouse stock.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Current stock for a material, `None` if the material is unknown.
    async fn current_stock(&self, material_id: MaterialId) -> Result<Option<f64>>;
}

/// Everything the scheduler persists through.
pub trait MaintenanceStore:
    AssetRegistry + PlanRegistry + ReadingLog + AlertStore + WorkOrderStore + EventLog
{
}

impl<T> MaintenanceStore for T where
    T: AssetRegistry + PlanRegistry + ReadingLog + AlertStore + WorkOrderStore + EventLog
{
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

/// What the store holds for a request fingerprint.
#[derive(Debug, Clone)]
pub enum StoredResponse {
    /// Another request holds the claim and has not finished.
    Pending { claimed_at: DateTime<Utc> },
    /// The first execution finished; replay this.
    Complete(IdempotencyRecord),
}

/// Result of trying to claim a fingerprint for execution.
#[derive(Debug, Clone)]
pub enum Claim {
    /// This caller owns execution.
    Acquired,
    /// Someone else got there first.
    Held(StoredResponse),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, fingerprint: &RequestFingerprint) -> Result<Option<StoredResponse>>;

    /// Unique insert of a pending claim. A pending claim older than
    /// `stale_after` is taken over.
    async fn claim(
        &self,
        fingerprint: &RequestFingerprint,
        stale_after: Duration,
    ) -> Result<Claim>;

    /// Store the response for a claimed fingerprint. Written once.
    async fn complete(
        &self,
        fingerprint: &RequestFingerprint,
        status_code: u16,
        body: &[u8],
    ) -> Result<IdempotencyRecord>;

    /// Drop a pending claim so the request can run again.
    async fn release(&self, fingerprint: &RequestFingerprint) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Handles onto one storage backend, one per concern.
#[derive(Clone)]
pub struct Backend {
    pub maintenance: Arc<dyn MaintenanceStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub inventory: Arc<dyn Inventory>,
}

impl Backend {
    /// Wrap a single store that implements every concern.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: MaintenanceStore + IdempotencyStore + Inventory + 'static,
    {
        Self {
            maintenance: store.clone(),
            idempotency: store.clone(),
            inventory: store,
        }
    }

    /// Postgres when `DATABASE_URL` is set, otherwise an in-memory store.
    pub async fn open(config: &Config) -> Result<Self> {
        match &config.database_url {
            Some(url) => {
                tracing::info!(database = %redact_url(url), "connecting to postgres");
                let db = Db::open(url.expose_secret()).await?;
                Ok(Self::from_store(Arc::new(db)))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store (state is lost on exit)");
                Ok(Self::from_store(Arc::new(memory::MemoryStore::new())))
            }
        }
    }
}
