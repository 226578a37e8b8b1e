//! Core data model.
//!
//! An asset carries a monotonic usage counter. Maintenance plans attached to
//! it define a recurring interval in the same units. Readings move the
//! counter forward; crossing plan milestones produces alerts and work orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::Validation(format!("invalid id '{s}': {e}")))
            }
        }
    };
}

id_type!(
    /// Identifier of a tracked asset.
    AssetId
);
id_type!(
    /// Identifier of a maintenance plan.
    PlanId
);
id_type!(ReadingId);
id_type!(AlertId);
id_type!(WorkOrderId);

/// Identifier of a material in the external inventory.
pub type MaterialId = i64;

// ---------------------------------------------------------------------------
// Asset
// ---------------------------------------------------------------------------

/// An equipment unit tracked by a monotonic usage counter (e.g. operating hours).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub name: String,
    /// Short fleet prefix shown to operators.
    pub tag: Option<String>,
    /// Counter value at mobilization. Hours worked are measured from here.
    pub usage_baseline: f64,
    /// Current counter. Never decreases.
    pub cumulative_usage: f64,
    pub last_reading_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    /// Usage accumulated since mobilization.
    pub fn hours_worked(&self) -> f64 {
        self.cumulative_usage - self.usage_baseline
    }
}

/// Parameters for registering an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAsset {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub usage_baseline: f64,
    /// Starting counter. Defaults to the baseline.
    #[serde(default)]
    pub cumulative_usage: Option<f64>,
}

impl NewAsset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            usage_baseline: 0.0,
            cumulative_usage: None,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn baseline(mut self, baseline: f64) -> Self {
        self.usage_baseline = baseline;
        self
    }

    pub fn cumulative(mut self, value: f64) -> Self {
        self.cumulative_usage = Some(value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("asset name must not be empty".into()));
        }
        if !self.usage_baseline.is_finite() || self.usage_baseline < 0.0 {
            return Err(Error::Validation(
                "usage_baseline must be a non-negative number".into(),
            ));
        }
        if self
            .cumulative_usage
            .is_some_and(|current| !current.is_finite() || current < 0.0)
        {
            return Err(Error::Validation(
                "cumulative_usage must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn into_asset(self, now: DateTime<Utc>) -> Asset {
        Asset {
            id: AssetId::new(),
            cumulative_usage: self.cumulative_usage.unwrap_or(self.usage_baseline),
            name: self.name,
            tag: self.tag,
            usage_baseline: self.usage_baseline,
            last_reading_at: None,
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Maintenance Plan
// ---------------------------------------------------------------------------

/// Urgency assigned to a plan and copied onto its work orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(Error::Validation(format!("unknown priority: {other}"))),
        }
    }
}

/// A material consumed by each execution of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMaterial {
    pub material_id: MaterialId,
    pub quantity: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub critical: bool,
}

fn default_unit() -> String {
    "un".to_string()
}

/// A labor line: which role, how many hours, at what rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLabor {
    pub role: String,
    pub hours: f64,
    #[serde(default)]
    pub hourly_rate: f64,
}

/// Recurring-interval preventive maintenance policy for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenancePlan {
    pub id: PlanId,
    pub asset_id: AssetId,
    pub name: String,
    /// Usage units between cycles.
    pub interval_value: f64,
    pub active: bool,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
    pub materials: Vec<PlanMaterial>,
    pub labor: Vec<PlanLabor>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for registering a plan. Validated before it reaches a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub interval_value: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub materials: Vec<PlanMaterial>,
    #[serde(default)]
    pub labor: Vec<PlanLabor>,
}

fn default_active() -> bool {
    true
}

impl NewPlan {
    pub fn new(name: impl Into<String>, interval_value: f64) -> Self {
        Self {
            name: name.into(),
            interval_value,
            active: true,
            priority: Priority::Normal,
            estimated_hours: None,
            materials: Vec::new(),
            labor: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn estimated_hours(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn material(mut self, material_id: MaterialId, quantity: f64, unit: &str) -> Self {
        self.materials.push(PlanMaterial {
            material_id,
            quantity,
            unit: unit.to_string(),
            critical: false,
        });
        self
    }

    pub fn labor(mut self, role: &str, hours: f64, hourly_rate: f64) -> Self {
        self.labor.push(PlanLabor {
            role: role.to_string(),
            hours,
            hourly_rate,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("plan name must not be empty".into()));
        }
        if !self.interval_value.is_finite() || self.interval_value <= 0.0 {
            return Err(Error::Validation(
                "interval_value must be a positive number".into(),
            ));
        }
        if self
            .estimated_hours
            .is_some_and(|hours| !hours.is_finite() || hours < 0.0)
        {
            return Err(Error::Validation(
                "estimated_hours must be a non-negative number".into(),
            ));
        }
        for m in &self.materials {
            if !m.quantity.is_finite() || m.quantity <= 0.0 {
                return Err(Error::Validation(format!(
                    "material {} quantity must be positive",
                    m.material_id
                )));
            }
            if m.unit.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "material {} unit must not be empty",
                    m.material_id
                )));
            }
        }
        for l in &self.labor {
            if l.role.trim().is_empty() {
                return Err(Error::Validation("labor role must not be empty".into()));
            }
            if !l.hours.is_finite() || l.hours <= 0.0 {
                return Err(Error::Validation(format!(
                    "labor '{}' hours must be positive",
                    l.role
                )));
            }
            if !l.hourly_rate.is_finite() || l.hourly_rate < 0.0 {
                return Err(Error::Validation(format!(
                    "labor '{}' hourly_rate must not be negative",
                    l.role
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn into_plan(self, asset_id: AssetId, now: DateTime<Utc>) -> MaintenancePlan {
        MaintenancePlan {
            id: PlanId::new(),
            asset_id,
            name: self.name,
            interval_value: self.interval_value,
            active: self.active,
            priority: self.priority,
            estimated_hours: self.estimated_hours,
            materials: self.materials,
            labor: self.labor,
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Usage Reading
// ---------------------------------------------------------------------------

/// One accepted meter reading. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReading {
    pub id: ReadingId,
    pub asset_id: AssetId,
    pub previous_value: f64,
    pub new_value: f64,
    pub delta: f64,
    pub recorded_by: Option<String>,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Pre-alert raised when usage enters the window just before a milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub id: AlertId,
    pub asset_id: AssetId,
    pub plan_id: PlanId,
    /// Milestone index the alert points at (1 = first interval).
    pub cycle: i64,
    pub target_threshold: f64,
    pub usage_at_alert: f64,
    pub remaining_units: f64,
    pub message: String,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Alert about to be inserted.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub asset_id: AssetId,
    pub plan_id: PlanId,
    pub cycle: i64,
    pub target_threshold: f64,
    pub usage_at_alert: f64,
    pub remaining_units: f64,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Work Orders
// ---------------------------------------------------------------------------

/// Lifecycle of a work order. Only `Open` is set here; later states belong
/// to the workshop workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOrderStatus {
    Open,
    InProgress,
    Closed,
}

impl std::fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkOrderStatus::Open => "open",
            WorkOrderStatus::InProgress => "in_progress",
            WorkOrderStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkOrderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(WorkOrderStatus::Open),
            "in_progress" => Ok(WorkOrderStatus::InProgress),
            "closed" => Ok(WorkOrderStatus::Closed),
            other => Err(Error::Validation(format!("unknown work order status: {other}"))),
        }
    }
}

/// A maintenance task. Exactly one exists per (asset, plan, milestone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    /// Human-facing number from the global sequence.
    pub number: i64,
    pub asset_id: AssetId,
    pub plan_id: PlanId,
    pub milestone: i64,
    pub milestone_threshold: f64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
    pub status: WorkOrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Work order about to be inserted. The store assigns id and number.
#[derive(Debug, Clone)]
pub struct NewWorkOrder {
    pub asset_id: AssetId,
    pub plan_id: PlanId,
    pub milestone: i64,
    pub milestone_threshold: f64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
}

// ---------------------------------------------------------------------------
// Material Notices
// ---------------------------------------------------------------------------

/// Informational stock snapshot attached to a generated work order.
/// Does not reserve anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialNotice {
    pub work_order_id: WorkOrderId,
    pub asset_id: AssetId,
    pub plan_id: PlanId,
    pub priority: Priority,
    pub message: String,
    pub lines: Vec<MaterialNoticeLine>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialNoticeLine {
    pub material_id: MaterialId,
    pub quantity_needed: f64,
    pub unit: String,
    pub quantity_available: f64,
}

impl MaterialNoticeLine {
    pub fn is_short(&self) -> bool {
        self.quantity_available < self.quantity_needed
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

/// Identity of a mutating request for deduplication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub key: String,
    pub method: String,
    pub path: String,
    /// Hex SHA-256 of the raw request body.
    pub body_hash: String,
}

/// Stored response for a fingerprint. Written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: RequestFingerprint,
    pub status_code: u16,
    pub response_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_validation_rejects_non_positive_interval() {
        assert!(NewPlan::new("250h service", 0.0).validate().is_err());
        assert!(NewPlan::new("250h service", -5.0).validate().is_err());
        assert!(NewPlan::new("250h service", f64::NAN).validate().is_err());
        assert!(NewPlan::new("250h service", 250.0).validate().is_ok());
    }

    #[test]
    fn plan_validation_checks_typed_lines() {
        let plan = NewPlan::new("oil", 250.0).material(7, 0.0, "l");
        assert!(plan.validate().is_err());

        let plan = NewPlan::new("oil", 250.0).labor("mechanic", 2.0, -1.0);
        assert!(plan.validate().is_err());

        let plan = NewPlan::new("oil", 250.0)
            .material(7, 12.5, "l")
            .labor("mechanic", 2.0, 45.0);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn new_asset_defaults_counter_to_baseline() {
        let asset = NewAsset::new("Excavator 320").baseline(1200.0).into_asset(Utc::now());
        assert_eq!(asset.cumulative_usage, 1200.0);
        assert_eq!(asset.hours_worked(), 0.0);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            WorkOrderStatus::Open,
            WorkOrderStatus::InProgress,
            WorkOrderStatus::Closed,
        ] {
            assert_eq!(status.to_string().parse::<WorkOrderStatus>().unwrap(), status);
        }
    }
}
