//! Span helpers for the scheduler's call path.

use tracing::Span;

use crate::model::{AssetId, PlanId};

/// Span around one meter reading, from validation through reconciliation.
///
/// `reading.outcome` is declared empty and filled via [`record_outcome`].
pub fn start_reading_span(asset_id: &AssetId, new_value: f64) -> Span {
    tracing::info_span!(
        "reading.record",
        "asset.id" = %asset_id,
        "reading.value" = new_value,
        "reading.outcome" = tracing::field::Empty,
    )
}

/// Span around reconciliation of one (asset, plan) pair.
pub fn start_reconcile_span(asset_id: &AssetId, plan_id: &PlanId, interval: f64) -> Span {
    tracing::info_span!(
        "plan.reconcile",
        "asset.id" = %asset_id,
        "plan.id" = %plan_id,
        "plan.interval" = interval,
        "reconcile.orders" = tracing::field::Empty,
        "reconcile.alerts" = tracing::field::Empty,
    )
}

/// Record how a reading ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("reading.outcome", outcome);
}

/// Record reconciliation counts on its span.
pub fn record_reconcile_counts(span: &Span, orders: usize, alerts: usize) {
    span.record("reconcile.orders", orders as u64);
    span.record("reconcile.alerts", alerts as u64);
}
