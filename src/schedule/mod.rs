//! Usage-threshold maintenance scheduling.
//!
//! A reading moves an asset's counter forward ([`ingest`]), the cycle
//! evaluator places each active plan on its interval grid ([`cycle`]), and
//! the results feed the alert manager ([`alerts`]) and the work order
//! generator ([`orders`]). Everything runs inline on the caller's path;
//! there is no background loop.

pub mod alerts;
pub mod cycle;
pub mod effects;
pub mod ingest;
pub mod orders;

use serde::Serialize;
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::*;
use crate::notify::{LogNotifier, Notifier};
use crate::store::{AssetRegistry, Backend, EventLog, Inventory, MaintenanceStore, PlanRegistry};

pub use cycle::{CycleStatus, Milestone};
pub use ingest::{Ingestion, ReadingRequest};
pub use orders::SweepReport;

/// Application context for scheduling: persistence, collaborators and
/// settings, passed explicitly to every operation.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn MaintenanceStore>,
    inventory: Arc<dyn Inventory>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

/// What one reconciliation pass produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub orders: Vec<WorkOrder>,
    pub alerts: Vec<MaintenanceAlert>,
    pub acknowledged: Vec<AlertId>,
    /// Best-effort effects that failed. The orders above still stand.
    pub secondary_failures: usize,
    /// Plans whose pass stopped on a store error. Whatever was created
    /// before the error is listed above.
    pub failed: Vec<(PlanId, String)>,
}

impl ReconcileOutcome {
    pub fn merge(&mut self, other: ReconcileOutcome) {
        self.orders.extend(other.orders);
        self.alerts.extend(other.alerts);
        self.acknowledged.extend(other.acknowledged);
        self.secondary_failures += other.secondary_failures;
        self.failed.extend(other.failed);
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.alerts.is_empty()
    }

    /// One line naming every failed plan, if any failed.
    pub fn error_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .failed
            .iter()
            .map(|(plan, err)| format!("plan {plan}: {err}"))
            .collect();
        Some(parts.join("; "))
    }
}

/// An active plan with its current position on the interval grid.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStatus {
    pub plan: MaintenancePlan,
    /// `None` when the asset's counter sits below its baseline.
    pub cycle: Option<CycleStatus>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MaintenanceStore>,
        inventory: Arc<dyn Inventory>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            notifier,
            config,
        }
    }

    /// Scheduler over a backend, logging notifications only.
    pub fn from_backend(backend: &Backend, config: SchedulerConfig) -> Self {
        Self::new(
            backend.maintenance.clone(),
            backend.inventory.clone(),
            Arc::new(LogNotifier),
            config,
        )
    }

    /// Replace the notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &Arc<dyn MaintenanceStore> {
        &self.store
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Evaluate an asset against a plan with the configured alert window.
    pub fn evaluate(&self, asset: &Asset, plan: &MaintenancePlan) -> Option<CycleStatus> {
        cycle::evaluate_with(
            asset.usage_baseline,
            asset.cumulative_usage,
            plan.interval_value,
            self.config.pre_alert_fraction,
        )
    }

    /// Register a new asset after validating it.
    pub async fn register_asset(&self, new: NewAsset) -> Result<Asset> {
        new.validate()?;
        let asset = self.store.insert_asset(new).await?;
        tracing::info!(asset = %asset.id, name = %asset.name, "asset registered");
        Ok(asset)
    }

    /// Register a plan for an existing asset after validating it.
    pub async fn register_plan(&self, asset_id: AssetId, new: NewPlan) -> Result<MaintenancePlan> {
        new.validate()?;
        let plan = self.store.insert_plan(asset_id, new).await?;
        tracing::info!(
            asset = %asset_id,
            plan = %plan.id,
            interval = plan.interval_value,
            "maintenance plan registered"
        );
        Ok(plan)
    }

    /// Current cycle position of every active plan of an asset.
    pub async fn asset_status(&self, asset_id: AssetId) -> Result<(Asset, Vec<PlanStatus>)> {
        let asset = self.store.get_asset(asset_id).await?;
        let plans = self.store.active_plans(asset_id).await?;
        let statuses = plans
            .into_iter()
            .map(|plan| PlanStatus {
                cycle: self.evaluate(&asset, &plan),
                plan,
            })
            .collect();
        Ok((asset, statuses))
    }

    /// Append to the event log. Failure is logged and otherwise ignored.
    pub(crate) async fn record_event(&self, kind: EventKind) {
        let name = kind.name();
        if let Err(e) = self.store.append_event(kind).await {
            tracing::warn!(event = name, error = %e, "failed to append scheduler event");
            crate::telemetry::metrics::secondary_failures()
                .add(1, &[opentelemetry::KeyValue::new("effect", "event")]);
        }
    }
}
