//! Structured events emitted by the scheduler.
//!
//! Every state change and every failed secondary effect lands here, so
//! best-effort work that was swallowed on the request path stays visible
//! to auditors and dashboards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlertId, AssetId, PlanId, ReadingId, WorkOrderId};

/// A structured event recorded by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: i64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ReadingRecorded {
        id: ReadingId,
        asset_id: AssetId,
        previous_value: f64,
        new_value: f64,
    },
    AlertRaised {
        id: AlertId,
        asset_id: AssetId,
        plan_id: PlanId,
        target_threshold: f64,
        remaining_units: f64,
    },
    AlertAcknowledged {
        id: AlertId,
        work_order_id: WorkOrderId,
        by: String,
    },
    WorkOrderOpened {
        id: WorkOrderId,
        number: i64,
        asset_id: AssetId,
        plan_id: PlanId,
        milestone: i64,
    },
    /// A best-effort side effect failed. The primary mutation still stands.
    SecondaryEffectFailed {
        effect: String,
        work_order_id: Option<WorkOrderId>,
        error: String,
    },
}

impl EventKind {
    /// Short name used as a metric label and log field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ReadingRecorded { .. } => "reading_recorded",
            EventKind::AlertRaised { .. } => "alert_raised",
            EventKind::AlertAcknowledged { .. } => "alert_acknowledged",
            EventKind::WorkOrderOpened { .. } => "work_order_opened",
            EventKind::SecondaryEffectFailed { .. } => "secondary_effect_failed",
        }
    }
}
