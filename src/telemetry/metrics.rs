//! Metric instrument factories for meterwatch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"meterwatch"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for meterwatch instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::SERVICE_NAME)
}

/// Counter: meter readings handled.
/// Labels: `result` ("ok" | "rejected" | "not_found" | "error").
pub fn readings() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.readings")
        .with_description("Meter readings handled")
        .build()
}

/// Counter: pre-alerts created.
pub fn alerts_created() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.alerts.created")
        .with_description("Maintenance pre-alerts created")
        .build()
}

/// Counter: alerts acknowledged by work order generation.
pub fn alerts_acknowledged() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.alerts.acknowledged")
        .with_description("Maintenance alerts acknowledged")
        .build()
}

/// Counter: preventive work orders opened.
/// Labels: `priority`.
pub fn work_orders_created() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.work_orders.created")
        .with_description("Preventive work orders opened")
        .build()
}

/// Counter: best-effort side effects that failed.
/// Labels: `effect` ("material_notice" | "notification" | "event").
pub fn secondary_failures() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.secondary_effects.failed")
        .with_description("Best-effort side effects that failed")
        .build()
}

/// Counter: idempotency guard decisions.
/// Labels: `outcome` ("bypass" | "hit" | "miss" | "wait" | "in_flight").
pub fn idempotency() -> Counter<u64> {
    meter()
        .u64_counter("meterwatch.idempotency.requests")
        .with_description("Idempotency guard decisions")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("meterwatch.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
