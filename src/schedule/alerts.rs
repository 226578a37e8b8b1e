//! Pre-alerts ahead of the next milestone.

use opentelemetry::KeyValue;

use super::{CycleStatus, Scheduler};
use crate::error::Result;
use crate::event::EventKind;
use crate::model::*;
use crate::store::AlertStore;
use crate::telemetry::metrics;

impl Scheduler {
    /// Raise a pre-alert when usage sits inside the window before the next
    /// milestone and none is open for it yet.
    ///
    /// Returns the alert only if this call created it. The store's
    /// uniqueness on open alerts makes concurrent calls collapse to one.
    pub async fn ensure_pre_alert(
        &self,
        asset: &Asset,
        plan: &MaintenancePlan,
        status: &CycleStatus,
    ) -> Result<Option<MaintenanceAlert>> {
        if !status.in_pre_alert_window() {
            return Ok(None);
        }

        let cycle = status.next_cycle();
        if self
            .store
            .find_open_alert(asset.id, plan.id, cycle)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let new = NewAlert {
            asset_id: asset.id,
            plan_id: plan.id,
            cycle,
            target_threshold: status.next_due,
            usage_at_alert: asset.cumulative_usage,
            remaining_units: status.remaining,
            message: format!(
                "Preventive maintenance due soon for {}: {:.1} units left to reach {}",
                asset.name, status.remaining, status.next_due
            ),
        };

        let Some(alert) = self.store.insert_alert(new).await? else {
            tracing::debug!(cycle, "open alert already exists");
            return Ok(None);
        };

        tracing::info!(
            alert = %alert.id,
            cycle,
            target = alert.target_threshold,
            remaining = alert.remaining_units,
            "pre-alert raised"
        );
        metrics::alerts_created().add(1, &[KeyValue::new("priority", plan.priority.to_string())]);
        self.record_event(EventKind::AlertRaised {
            id: alert.id,
            asset_id: alert.asset_id,
            plan_id: alert.plan_id,
            target_threshold: alert.target_threshold,
            remaining_units: alert.remaining_units,
        })
        .await;

        Ok(Some(alert))
    }
}
