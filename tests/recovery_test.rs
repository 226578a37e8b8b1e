//! Reconciliation after transient store failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meterwatch::config::SchedulerConfig;
use meterwatch::error::{Error, Result};
use meterwatch::event::{Event, EventKind};
use meterwatch::model::*;
use meterwatch::notify::LogNotifier;
use meterwatch::schedule::{ReadingRequest, Scheduler};
use meterwatch::store::memory::MemoryStore;
use meterwatch::store::*;
use std::sync::{Arc, Mutex};

/// Memory store whose next acknowledgement for one plan fails.
struct FlakyAcks {
    inner: MemoryStore,
    fail_next_ack_for: Mutex<Option<PlanId>>,
}

impl FlakyAcks {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_next_ack_for: Mutex::new(None),
        }
    }

    fn fail_next_ack(&self, plan_id: PlanId) {
        *self.fail_next_ack_for.lock().unwrap() = Some(plan_id);
    }
}

#[async_trait]
impl AssetRegistry for FlakyAcks {
    async fn insert_asset(&self, new: NewAsset) -> Result<Asset> {
        self.inner.insert_asset(new).await
    }

    async fn get_asset(&self, id: AssetId) -> Result<Asset> {
        self.inner.get_asset(id).await
    }

    async fn list_assets(&self) -> Result<Vec<Asset>> {
        self.inner.list_assets().await
    }

    async fn apply_reading(&self, reading: NewReading) -> Result<(Asset, UsageReading)> {
        self.inner.apply_reading(reading).await
    }
}

#[async_trait]
impl ReadingLog for FlakyAcks {
    async fn list_readings(&self, asset_id: AssetId) -> Result<Vec<UsageReading>> {
        self.inner.list_readings(asset_id).await
    }
}

#[async_trait]
impl PlanRegistry for FlakyAcks {
    async fn insert_plan(&self, asset_id: AssetId, new: NewPlan) -> Result<MaintenancePlan> {
        self.inner.insert_plan(asset_id, new).await
    }

    async fn get_plan(&self, id: PlanId) -> Result<MaintenancePlan> {
        self.inner.get_plan(id).await
    }

    async fn active_plans(&self, asset_id: AssetId) -> Result<Vec<MaintenancePlan>> {
        self.inner.active_plans(asset_id).await
    }
}

#[async_trait]
impl AlertStore for FlakyAcks {
    async fn find_open_alert(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
    ) -> Result<Option<MaintenanceAlert>> {
        self.inner.find_open_alert(asset_id, plan_id, cycle).await
    }

    async fn insert_alert(&self, new: NewAlert) -> Result<Option<MaintenanceAlert>> {
        self.inner.insert_alert(new).await
    }

    async fn acknowledge_alerts(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceAlert>> {
        {
            let mut failing = self.fail_next_ack_for.lock().unwrap();
            if *failing == Some(plan_id) {
                *failing = None;
                return Err(Error::Other("transient db error".into()));
            }
        }
        self.inner
            .acknowledge_alerts(asset_id, plan_id, cycle, by, at)
            .await
    }

    async fn list_alerts(&self, asset_id: AssetId) -> Result<Vec<MaintenanceAlert>> {
        self.inner.list_alerts(asset_id).await
    }
}

#[async_trait]
impl WorkOrderStore for FlakyAcks {
    async fn plan_work_orders(&self, asset_id: AssetId, plan_id: PlanId) -> Result<Vec<WorkOrder>> {
        self.inner.plan_work_orders(asset_id, plan_id).await
    }

    async fn create_work_order(&self, new: NewWorkOrder) -> Result<Option<WorkOrder>> {
        self.inner.create_work_order(new).await
    }

    async fn list_work_orders(&self, asset_id: AssetId) -> Result<Vec<WorkOrder>> {
        self.inner.list_work_orders(asset_id).await
    }

    async fn insert_material_notice(&self, notice: MaterialNotice) -> Result<()> {
        self.inner.insert_material_notice(notice).await
    }

    async fn material_notices(&self, work_order_id: WorkOrderId) -> Result<Vec<MaterialNotice>> {
        self.inner.material_notices(work_order_id).await
    }
}

#[async_trait]
impl EventLog for FlakyAcks {
    async fn append_event(&self, kind: EventKind) -> Result<Event> {
        self.inner.append_event(kind).await
    }

    async fn recent_events(&self, limit: i64) -> Result<Vec<Event>> {
        self.inner.recent_events(limit).await
    }
}

fn scheduler(store: &Arc<FlakyAcks>) -> Scheduler {
    Scheduler::new(
        store.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(LogNotifier),
        SchedulerConfig::default(),
    )
}

fn reading(asset_id: AssetId, value: f64) -> ReadingRequest {
    ReadingRequest {
        asset_id,
        new_value: value,
        recorded_by: None,
        notes: None,
    }
}

#[tokio::test]
async fn failed_acknowledgement_is_retried_on_the_next_pass() {
    let store = Arc::new(FlakyAcks::new());
    let scheduler = scheduler(&store);
    let asset = scheduler.register_asset(NewAsset::new("Loader 950")).await.unwrap();
    let plan = scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    let ingestion = scheduler.record_reading(reading(asset.id, 225.0)).await.unwrap();
    assert_eq!(ingestion.alerts_created, 1);

    store.fail_next_ack(plan.id);
    let ingestion = scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    let order_id = ingestion.orders[0].id;
    let err = ingestion.reconcile_error.expect("reconcile error reported");
    assert!(err.contains("transient db error"));
    assert!(!store.list_alerts(asset.id).await.unwrap()[0].acknowledged);

    let report = scheduler.reconcile_all().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.orders_created, 0);

    let alerts = store.list_alerts(asset.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].acknowledged);
    assert_eq!(alerts[0].acknowledged_by.as_deref(), Some("system"));
    assert_eq!(store.list_work_orders(asset.id).await.unwrap().len(), 1);

    let events = store.recent_events(100).await.unwrap();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::AlertAcknowledged { work_order_id, .. } if *work_order_id == order_id
    )));
}

#[tokio::test]
async fn next_reading_also_heals_an_unacknowledged_alert() {
    let store = Arc::new(FlakyAcks::new());
    let scheduler = scheduler(&store);
    let asset = scheduler.register_asset(NewAsset::new("Grader 140")).await.unwrap();
    let plan = scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    scheduler.record_reading(reading(asset.id, 230.0)).await.unwrap();
    store.fail_next_ack(plan.id);
    scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();

    let ingestion = scheduler.record_reading(reading(asset.id, 270.0)).await.unwrap();
    assert!(ingestion.reconcile_error.is_none());
    assert_eq!(ingestion.orders_created, 0);
    assert!(store.list_alerts(asset.id).await.unwrap()[0].acknowledged);
}

#[tokio::test]
async fn one_failing_plan_does_not_block_the_others() {
    let store = Arc::new(FlakyAcks::new());
    let scheduler = scheduler(&store);
    let asset = scheduler.register_asset(NewAsset::new("Truck 773")).await.unwrap();
    let every_250 = scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();
    let every_100 = scheduler
        .register_plan(asset.id, NewPlan::new("100h", 100.0))
        .await
        .unwrap();

    store.fail_next_ack(every_250.id);
    let ingestion = scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();

    // The failed plan's committed order is reported alongside the others.
    assert_eq!(ingestion.orders_created, 3);
    assert_eq!(store.list_work_orders(asset.id).await.unwrap().len(), 3);
    let from_100: Vec<i64> = ingestion
        .orders
        .iter()
        .filter(|o| o.plan_id == every_100.id)
        .map(|o| o.milestone)
        .collect();
    assert_eq!(from_100, vec![1, 2]);

    let err = ingestion.reconcile_error.expect("reconcile error reported");
    assert!(err.contains(&every_250.id.to_string()));
    assert!(!err.contains(&every_100.id.to_string()));
}

#[tokio::test]
async fn sweep_reports_plan_failures_per_asset() {
    let store = Arc::new(FlakyAcks::new());
    let scheduler = scheduler(&store);
    let asset = scheduler
        .register_asset(NewAsset::new("Roller CS56").cumulative(260.0))
        .await
        .unwrap();
    let plan = scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    store.fail_next_ack(plan.id);
    let report = scheduler.reconcile_all().await.unwrap();
    assert_eq!(report.orders_created, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, asset.id);

    let report = scheduler.reconcile_all().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(report.orders_created, 0);
}
