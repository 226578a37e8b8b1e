//! Scheduler behaviour against the in-memory store.

use async_trait::async_trait;
use meterwatch::config::SchedulerConfig;
use meterwatch::error::{Error, Result};
use meterwatch::event::EventKind;
use meterwatch::model::*;
use meterwatch::notify::{LogNotifier, Notification, Notifier};
use meterwatch::schedule::{ReadingRequest, Scheduler};
use meterwatch::store::memory::MemoryStore;
use meterwatch::store::*;
use std::sync::Arc;
use std::time::Duration;

fn scheduler(store: &Arc<MemoryStore>) -> Scheduler {
    Scheduler::new(
        store.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        SchedulerConfig::default(),
    )
}

async fn asset_with_plan(
    scheduler: &Scheduler,
    start: f64,
    plan: NewPlan,
) -> (Asset, MaintenancePlan) {
    let asset = scheduler
        .register_asset(NewAsset::new("Excavator 320").tag("EX-01").cumulative(start))
        .await
        .unwrap();
    let plan = scheduler.register_plan(asset.id, plan).await.unwrap();
    (asset, plan)
}

fn reading(asset_id: AssetId, value: f64) -> ReadingRequest {
    ReadingRequest {
        asset_id,
        new_value: value,
        recorded_by: Some("operator".into()),
        notes: None,
    }
}

#[tokio::test]
async fn counter_never_moves_backwards() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 100.0, NewPlan::new("250h", 250.0)).await;

    for value in [100.0, 90.0] {
        let err = scheduler.record_reading(reading(asset.id, value)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidReading { current, .. } if current == 100.0));
    }

    assert_eq!(store.get_asset(asset.id).await.unwrap().cumulative_usage, 100.0);
    assert!(store.list_readings(asset.id).await.unwrap().is_empty());
    assert!(store.recent_events(10).await.unwrap().is_empty());

    let ingestion = scheduler.record_reading(reading(asset.id, 150.0)).await.unwrap();
    assert_eq!(ingestion.reading.previous_value, 100.0);
    assert_eq!(ingestion.reading.delta, 50.0);
    assert_eq!(store.get_asset(asset.id).await.unwrap().cumulative_usage, 150.0);
}

#[tokio::test]
async fn non_finite_and_unknown_readings_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let err = scheduler
        .record_reading(reading(asset.id, f64::NAN))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = scheduler
        .record_reading(reading(AssetId::new(), 10.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn crossing_a_milestone_opens_one_work_order() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let plan = NewPlan::new("250h service", 250.0)
        .priority(Priority::High)
        .estimated_hours(4.0);
    let (asset, plan) = asset_with_plan(&scheduler, 0.0, plan).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    assert_eq!(ingestion.alerts_created, 0);

    let order = &ingestion.orders[0];
    assert_eq!(order.number, 100_000);
    assert_eq!(order.milestone, 1);
    assert_eq!(order.milestone_threshold, 250.0);
    assert_eq!(order.plan_id, plan.id);
    assert_eq!(order.priority, Priority::High);
    assert_eq!(order.estimated_hours, Some(4.0));
    assert_eq!(order.status, WorkOrderStatus::Open);
    assert!(order.title.contains("250h service"));
}

#[tokio::test]
async fn pre_alert_is_raised_once_and_acknowledged_by_the_order() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 225.0)).await.unwrap();
    assert_eq!(ingestion.alerts_created, 1);
    assert_eq!(ingestion.orders_created, 0);
    let alert = &ingestion.alerts[0];
    assert_eq!(alert.cycle, 1);
    assert_eq!(alert.target_threshold, 250.0);
    assert_eq!(alert.remaining_units, 25.0);
    assert!(!alert.acknowledged);

    let ingestion = scheduler.record_reading(reading(asset.id, 230.0)).await.unwrap();
    assert_eq!(ingestion.alerts_created, 0);
    assert_eq!(store.list_alerts(asset.id).await.unwrap().len(), 1);

    let ingestion = scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    let alerts = store.list_alerts(asset.id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].acknowledged);
    assert_eq!(alerts[0].acknowledged_by.as_deref(), Some("system"));
    assert!(alerts[0].acknowledged_at.is_some());
}

#[tokio::test]
async fn reconcile_is_idempotent_at_the_same_usage() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;
    scheduler.record_reading(reading(asset.id, 260.0)).await.unwrap();

    for _ in 0..3 {
        let outcome = scheduler.reconcile_asset(asset.id).await.unwrap();
        assert!(outcome.is_empty());
    }
    assert_eq!(store.list_work_orders(asset.id).await.unwrap().len(), 1);

    let report = scheduler.reconcile_all().await.unwrap();
    assert_eq!(report.assets, 1);
    assert_eq!(report.orders_created, 0);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn a_long_gap_fills_every_missed_milestone_in_order() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 1010.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 4);

    let milestones: Vec<i64> = ingestion.orders.iter().map(|o| o.milestone).collect();
    assert_eq!(milestones, vec![1, 2, 3, 4]);
    let numbers: Vec<i64> = ingestion.orders.iter().map(|o| o.number).collect();
    assert_eq!(numbers, vec![100_000, 100_001, 100_002, 100_003]);
    let thresholds: Vec<f64> = ingestion
        .orders
        .iter()
        .map(|o| o.milestone_threshold)
        .collect();
    assert_eq!(thresholds, vec![250.0, 500.0, 750.0, 1000.0]);
}

#[tokio::test]
async fn baseline_shifts_the_interval_grid() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let asset = scheduler
        .register_asset(NewAsset::new("Loader 950").baseline(1000.0))
        .await
        .unwrap();
    scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    let ingestion = scheduler.record_reading(reading(asset.id, 1240.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 0);
    assert_eq!(ingestion.alerts_created, 1);

    let ingestion = scheduler.record_reading(reading(asset.id, 1250.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    assert_eq!(ingestion.orders[0].milestone_threshold, 250.0);
}

#[tokio::test]
async fn counter_below_baseline_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let asset = scheduler
        .register_asset(NewAsset::new("Truck").baseline(5000.0).cumulative(100.0))
        .await
        .unwrap();
    scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    let ingestion = scheduler.record_reading(reading(asset.id, 900.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 0);
    assert_eq!(ingestion.alerts_created, 0);
}

#[tokio::test]
async fn inactive_plans_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) =
        asset_with_plan(&scheduler, 0.0, NewPlan::new("retired", 100.0).inactive()).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 1000.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 0);
    assert!(store.list_work_orders(asset.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn plans_are_checked_against_their_asset() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (_, plan) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;
    let other = scheduler.register_asset(NewAsset::new("Other")).await.unwrap();

    let err = scheduler.reconcile(&other, &plan).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn invalid_plans_are_rejected_at_registration() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let asset = scheduler.register_asset(NewAsset::new("Crane")).await.unwrap();

    let err = scheduler
        .register_plan(asset.id, NewPlan::new("broken", 0.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = scheduler
        .register_plan(AssetId::new(), NewPlan::new("orphan", 100.0))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn configured_window_fraction_moves_the_alert() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig {
        pre_alert_fraction: 0.2,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(store.clone(), store.clone(), Arc::new(LogNotifier), config);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 200.0)).await.unwrap();
    assert_eq!(ingestion.alerts_created, 1);
    assert_eq!(ingestion.alerts[0].remaining_units, 50.0);
}

#[tokio::test]
async fn huge_jump_opens_orders_a_batch_per_pass() {
    let store = Arc::new(MemoryStore::new());
    let config = SchedulerConfig {
        max_milestones_per_pass: 3,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(store.clone(), store.clone(), Arc::new(LogNotifier), config);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 2_600.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 3);
    assert!(ingestion.reconcile_error.is_none());

    let mut per_pass = Vec::new();
    for _ in 0..4 {
        per_pass.push(scheduler.reconcile_asset(asset.id).await.unwrap().orders.len());
    }
    assert_eq!(per_pass, vec![3, 3, 1, 0]);

    let milestones: Vec<i64> = store
        .list_work_orders(asset.id)
        .await
        .unwrap()
        .iter()
        .map(|o| o.milestone)
        .collect();
    assert_eq!(milestones, (1..=10).collect::<Vec<i64>>());
}

#[tokio::test]
async fn fat_fingered_reading_stays_bounded() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 1e15)).await.unwrap();
    assert_eq!(
        ingestion.orders_created,
        SchedulerConfig::default().max_milestones_per_pass
    );
    assert_eq!(ingestion.orders.last().unwrap().milestone, 50);
}

#[tokio::test]
async fn material_notice_snapshots_stock() {
    let store = Arc::new(MemoryStore::new());
    store.set_stock(7, 5.0);
    store.set_stock(8, 100.0);
    let scheduler = scheduler(&store);
    let plan = NewPlan::new("oil", 250.0)
        .material(7, 12.5, "l")
        .material(8, 2.0, "un")
        .material(99, 1.0, "un");
    let (asset, _) = asset_with_plan(&scheduler, 0.0, plan).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 251.0)).await.unwrap();
    let order = &ingestion.orders[0];

    let notices = store.material_notices(order.id).await.unwrap();
    assert_eq!(notices.len(), 1);
    let lines = &notices[0].lines;
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().any(|l| l.material_id == 7 && l.is_short()));
    assert!(lines.iter().any(|l| l.material_id == 8 && !l.is_short()));
    assert!(notices[0].message.contains(&order.number.to_string()));
}

struct BrokenInventory;

#[async_trait]
impl Inventory for BrokenInventory {
    async fn current_stock(&self, _material_id: MaterialId) -> Result<Option<f64>> {
        Err(Error::Other("warehouse offline".into()))
    }
}

struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn notify(&self, _notification: &Notification) -> Result<()> {
        Err(Error::Other("smtp unreachable".into()))
    }
}

async fn wait_for_failure(store: &MemoryStore, effect: &str) -> bool {
    for _ in 0..50 {
        let events = store.recent_events(100).await.unwrap();
        if events.iter().any(|e| {
            matches!(&e.kind, EventKind::SecondaryEffectFailed { effect: name, .. } if name == effect)
        }) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn failing_inventory_does_not_undo_the_work_order() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(BrokenInventory),
        Arc::new(LogNotifier),
        SchedulerConfig::default(),
    );
    let (asset, _) =
        asset_with_plan(&scheduler, 0.0, NewPlan::new("oil", 250.0).material(7, 1.0, "l")).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 300.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    assert!(ingestion.reconcile_error.is_none());
    assert_eq!(store.list_work_orders(asset.id).await.unwrap().len(), 1);
    assert!(wait_for_failure(&store, "material_notice").await);
}

#[tokio::test]
async fn failing_notifier_does_not_undo_the_work_order() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store).with_notifier(Arc::new(BrokenNotifier));
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    let ingestion = scheduler.record_reading(reading(asset.id, 300.0)).await.unwrap();
    assert_eq!(ingestion.orders_created, 1);
    assert_eq!(store.list_work_orders(asset.id).await.unwrap().len(), 1);
    assert!(wait_for_failure(&store, "notification").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reconciliation_creates_each_order_once() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let asset = scheduler
        .register_asset(NewAsset::new("Dozer D6").cumulative(780.0))
        .await
        .unwrap();
    scheduler
        .register_plan(asset.id, NewPlan::new("250h", 250.0))
        .await
        .unwrap();

    let asset_id = asset.id;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let scheduler = scheduler.clone();
        handles.push(tokio::spawn(async move {
            scheduler.reconcile_asset(asset_id).await
        }));
    }
    let mut created = 0;
    for handle in handles {
        created += handle.await.unwrap().unwrap().orders.len();
    }

    assert_eq!(created, 3);
    let orders = store.list_work_orders(asset.id).await.unwrap();
    let milestones: Vec<i64> = orders.iter().map(|o| o.milestone).collect();
    assert_eq!(milestones, vec![1, 2, 3]);
}

#[tokio::test]
async fn events_record_the_whole_flow() {
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler(&store);
    let (asset, _) = asset_with_plan(&scheduler, 0.0, NewPlan::new("250h", 250.0)).await;

    scheduler.record_reading(reading(asset.id, 230.0)).await.unwrap();
    scheduler.record_reading(reading(asset.id, 255.0)).await.unwrap();

    let mut names: Vec<&str> = store
        .recent_events(100)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind.name())
        .collect();
    names.reverse();
    assert_eq!(
        names,
        vec![
            "reading_recorded",
            "alert_raised",
            "reading_recorded",
            "work_order_opened",
            "alert_acknowledged",
        ]
    );
}
