//! Best-effort side effects of work order generation.
//!
//! A material notice and an outbound notification follow each new work
//! order. Neither may undo or fail the order itself: each effect reports an
//! [`EffectOutcome`], and failures are logged, counted and written to the
//! event log.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;

use super::Scheduler;
use crate::error::Result;
use crate::event::EventKind;
use crate::model::*;
use crate::notify::{Notification, Notifier};
use crate::store::{EventLog, Inventory, MaintenanceStore, WorkOrderStore};
use crate::telemetry::metrics;

/// Result of one best-effort effect.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectOutcome {
    Done,
    /// Nothing to do (e.g. a plan without materials).
    Skipped,
    Failed(String),
}

impl EffectOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, EffectOutcome::Failed(_))
    }
}

impl Scheduler {
    /// Record a stock snapshot for the plan's materials against `order`.
    /// Unknown materials are left out of the notice.
    pub(crate) async fn attach_material_notice(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        order: &WorkOrder,
    ) -> EffectOutcome {
        if plan.materials.is_empty() {
            return EffectOutcome::Skipped;
        }
        match self.build_material_notice(asset, plan, order).await {
            Ok(notice) => {
                let short = notice.lines.iter().filter(|l| l.is_short()).count();
                match self.store.insert_material_notice(notice).await {
                    Ok(()) => {
                        if short > 0 {
                            tracing::warn!(
                                work_order = order.number,
                                short_lines = short,
                                "material stock below plan quantity"
                            );
                        }
                        EffectOutcome::Done
                    }
                    Err(e) => self.effect_failed("material_notice", order.id, e.to_string()).await,
                }
            }
            Err(e) => self.effect_failed("material_notice", order.id, e.to_string()).await,
        }
    }

    async fn build_material_notice(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        order: &WorkOrder,
    ) -> Result<MaterialNotice> {
        let mut lines = Vec::with_capacity(plan.materials.len());
        for material in &plan.materials {
            match self.inventory.current_stock(material.material_id).await? {
                Some(available) => lines.push(MaterialNoticeLine {
                    material_id: material.material_id,
                    quantity_needed: material.quantity,
                    unit: material.unit.clone(),
                    quantity_available: available,
                }),
                None => {
                    tracing::debug!(material = material.material_id, "material not in inventory");
                }
            }
        }

        let label = match &asset.tag {
            Some(tag) => format!("{} ({tag})", asset.name),
            None => asset.name.clone(),
        };
        Ok(MaterialNotice {
            work_order_id: order.id,
            asset_id: asset.id,
            plan_id: plan.id,
            priority: plan.priority,
            message: format!(
                "Materials for preventive maintenance on {label}. Work order {}",
                order.number
            ),
            lines,
            created_at: Utc::now(),
        })
    }

    /// Hand the notification to the runtime. The caller never waits on it.
    pub(crate) fn dispatch_notification(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        order: &WorkOrder,
    ) -> EffectOutcome {
        let notification = Notification {
            work_order_id: order.id,
            work_order_number: order.number,
            asset_id: asset.id,
            asset_name: asset.name.clone(),
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            milestone_threshold: order.milestone_threshold,
            priority: order.priority,
            subject: format!("Work order {} opened: {}", order.number, order.title),
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return EffectOutcome::Failed("no async runtime for notification".into());
        };
        handle.spawn(deliver(self.notifier.clone(), self.store.clone(), notification));
        EffectOutcome::Done
    }

    async fn effect_failed(
        &self,
        effect: &'static str,
        work_order_id: WorkOrderId,
        error: String,
    ) -> EffectOutcome {
        report_failure(self.store.as_ref(), effect, Some(work_order_id), &error).await;
        EffectOutcome::Failed(error)
    }
}

async fn deliver(
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn MaintenanceStore>,
    notification: Notification,
) {
    match notifier.notify(&notification).await {
        Ok(()) => tracing::debug!(
            notifier = notifier.name(),
            work_order = notification.work_order_number,
            "notification delivered"
        ),
        Err(e) => {
            report_failure(
                store.as_ref(),
                "notification",
                Some(notification.work_order_id),
                &e.to_string(),
            )
            .await;
        }
    }
}

async fn report_failure(
    store: &dyn MaintenanceStore,
    effect: &'static str,
    work_order_id: Option<WorkOrderId>,
    error: &str,
) {
    tracing::warn!(effect, work_order = ?work_order_id, error, "secondary effect failed");
    metrics::secondary_failures().add(1, &[KeyValue::new("effect", effect)]);
    let kind = EventKind::SecondaryEffectFailed {
        effect: effect.to_string(),
        work_order_id,
        error: error.to_string(),
    };
    if let Err(e) = store.append_event(kind).await {
        tracing::warn!(error = %e, "failed to record secondary effect failure");
    }
}
