//! Work order generation for reached milestones.

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::Instrument;

use super::{ReconcileOutcome, Scheduler};
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::store::{AlertStore, AssetRegistry, PlanRegistry, WorkOrderStore};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_reconcile_counts, start_reconcile_span};

/// Result of reconciling the whole fleet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub assets: usize,
    pub orders_created: usize,
    pub alerts_created: usize,
    pub secondary_failures: usize,
    /// Assets whose reconciliation failed, with the error text.
    pub failed: Vec<(AssetId, String)>,
}

impl Scheduler {
    /// Bring one (asset, plan) pair up to date with the asset's counter.
    ///
    /// Raises the pre-alert for the next milestone if due, then opens a work
    /// order for every reached milestone that has none, lowest first.
    /// Running it twice at the same usage creates nothing the second time.
    ///
    /// Only a plan that belongs to another asset is an error. A store
    /// failure mid-pass stops the pass and lands in `failed`, next to
    /// whatever was already created.
    pub async fn reconcile(&self, asset: &Asset, plan: &MaintenancePlan) -> Result<ReconcileOutcome> {
        if plan.asset_id != asset.id {
            return Err(Error::Validation(format!(
                "plan {} does not belong to asset {}",
                plan.id, asset.id
            )));
        }
        let mut outcome = ReconcileOutcome::default();
        if !plan.active {
            return Ok(outcome);
        }

        let span = start_reconcile_span(&asset.id, &plan.id, plan.interval_value);
        let started = Instant::now();
        let result = self
            .reconcile_plan(asset, plan, &mut outcome)
            .instrument(span.clone())
            .await;

        if let Err(e) = result {
            tracing::error!(
                asset = %asset.id,
                plan = %plan.id,
                error = %e,
                orders = outcome.orders.len(),
                "plan reconciliation stopped early"
            );
            outcome.failed.push((plan.id, e.to_string()));
        }
        record_reconcile_counts(&span, outcome.orders.len(), outcome.alerts.len());
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "plan.reconcile")],
        );
        Ok(outcome)
    }

    async fn reconcile_plan(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        outcome: &mut ReconcileOutcome,
    ) -> Result<()> {
        let Some(status) = self.evaluate(asset, plan) else {
            tracing::debug!(
                baseline = asset.usage_baseline,
                cumulative = asset.cumulative_usage,
                "counter below baseline, nothing to evaluate"
            );
            return Ok(());
        };

        if let Some(alert) = self.ensure_pre_alert(asset, plan, &status).await? {
            outcome.alerts.push(alert);
        }

        let opened: HashMap<i64, WorkOrderId> = self
            .store
            .plan_work_orders(asset.id, plan.id)
            .await?
            .into_iter()
            .map(|o| (o.milestone, o.id))
            .collect();

        // Alerts left open behind an existing order: an earlier pass opened
        // the order but failed before acknowledging.
        for alert in self.store.list_alerts(asset.id).await? {
            if alert.plan_id != plan.id || alert.acknowledged {
                continue;
            }
            if let Some(order_id) = opened.get(&alert.cycle) {
                self.acknowledge_milestone(asset, plan, alert.cycle, *order_id, outcome)
                    .await?;
            }
        }

        let cap = self.config.max_milestones_per_pass;
        let mut attempted = 0;
        for milestone in status.milestones() {
            if opened.contains_key(&milestone.index) {
                continue;
            }
            if attempted == cap {
                tracing::warn!(
                    cap,
                    next_milestone = milestone.index,
                    cycles_completed = status.cycles_completed,
                    "milestone cap reached, deferring the rest to the next pass"
                );
                break;
            }
            attempted += 1;

            let new = NewWorkOrder {
                asset_id: asset.id,
                plan_id: plan.id,
                milestone: milestone.index,
                milestone_threshold: milestone.threshold,
                title: format!("Preventive maintenance - {}", plan.name),
                description: format!(
                    "Automatic preventive maintenance on reaching {} units worked. \
                     Counter at {}. Plan: {}",
                    milestone.threshold, asset.cumulative_usage, plan.name
                ),
                priority: plan.priority,
                estimated_hours: plan.estimated_hours,
            };
            // None means a concurrent reconciliation created it first.
            let Some(order) = self.store.create_work_order(new).await? else {
                continue;
            };

            tracing::info!(
                work_order = order.number,
                milestone = milestone.index,
                threshold = milestone.threshold,
                "work order opened"
            );
            metrics::work_orders_created()
                .add(1, &[KeyValue::new("priority", order.priority.to_string())]);
            self.record_event(EventKind::WorkOrderOpened {
                id: order.id,
                number: order.number,
                asset_id: order.asset_id,
                plan_id: order.plan_id,
                milestone: order.milestone,
            })
            .await;
            outcome.orders.push(order.clone());

            self.acknowledge_milestone(asset, plan, milestone.index, order.id, outcome)
                .await?;

            let effects = [
                self.attach_material_notice(asset, plan, &order).await,
                self.dispatch_notification(asset, plan, &order),
            ];
            outcome.secondary_failures += effects.iter().filter(|e| e.is_failed()).count();
        }

        Ok(())
    }

    /// Acknowledge the open alerts for a milestone that now has an order.
    async fn acknowledge_milestone(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        milestone: i64,
        order_id: WorkOrderId,
        outcome: &mut ReconcileOutcome,
    ) -> Result<()> {
        let acknowledged = self
            .store
            .acknowledge_alerts(
                asset.id,
                plan.id,
                milestone,
                &self.config.system_actor,
                Utc::now(),
            )
            .await?;
        for alert in &acknowledged {
            self.record_event(EventKind::AlertAcknowledged {
                id: alert.id,
                work_order_id: order_id,
                by: self.config.system_actor.clone(),
            })
            .await;
        }
        if !acknowledged.is_empty() {
            metrics::alerts_acknowledged().add(acknowledged.len() as u64, &[]);
        }
        outcome.acknowledged.extend(acknowledged.iter().map(|a| a.id));
        Ok(())
    }

    /// Reconcile every active plan of an already loaded asset. A failing
    /// plan does not stop the others.
    pub(crate) async fn reconcile_loaded_asset(&self, asset: &Asset) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        for plan in self.store.active_plans(asset.id).await? {
            outcome.merge(self.reconcile(asset, &plan).await?);
        }
        Ok(outcome)
    }

    /// Reconcile every active plan of one asset.
    pub async fn reconcile_asset(&self, asset_id: AssetId) -> Result<ReconcileOutcome> {
        let asset = self.store.get_asset(asset_id).await?;
        self.reconcile_loaded_asset(&asset).await
    }

    /// Reconcile the whole fleet. A failing asset is logged and skipped so
    /// the rest still catch up.
    pub async fn reconcile_all(&self) -> Result<SweepReport> {
        let assets = self.store.list_assets().await?;
        let mut report = SweepReport {
            assets: assets.len(),
            ..SweepReport::default()
        };

        for asset in &assets {
            match self.reconcile_loaded_asset(asset).await {
                Ok(outcome) => {
                    report.orders_created += outcome.orders.len();
                    report.alerts_created += outcome.alerts.len();
                    report.secondary_failures += outcome.secondary_failures;
                    if let Some(summary) = outcome.error_summary() {
                        report.failed.push((asset.id, summary));
                    }
                }
                Err(e) => {
                    tracing::error!(asset = %asset.id, error = %e, "reconciliation failed");
                    report.failed.push((asset.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            assets = report.assets,
            orders = report.orders_created,
            alerts = report.alerts_created,
            failed = report.failed.len(),
            "reconciliation sweep finished"
        );
        Ok(report)
    }
}
