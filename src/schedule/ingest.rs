//! Meter ingestion: accept a new cumulative reading and reconcile.

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::Instrument;

use super::{ReconcileOutcome, Scheduler};
use crate::error::{Error, Result};
use crate::event::EventKind;
use crate::model::*;
use crate::store::{AssetRegistry, NewReading};
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_outcome, start_reading_span};

/// A reading as submitted by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRequest {
    pub asset_id: AssetId,
    pub new_value: f64,
    #[serde(default)]
    pub recorded_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// The stored reading plus whatever reconciliation it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct Ingestion {
    pub reading: UsageReading,
    pub orders_created: usize,
    pub alerts_created: usize,
    pub orders: Vec<WorkOrder>,
    pub alerts: Vec<MaintenanceAlert>,
    /// Set when reconciliation failed after the reading was stored. Orders
    /// created before the failure are still listed; the next reading or
    /// sweep picks up the rest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_error: Option<String>,
}

impl Ingestion {
    fn new(reading: UsageReading, outcome: ReconcileOutcome) -> Self {
        Self {
            reading,
            orders_created: outcome.orders.len(),
            alerts_created: outcome.alerts.len(),
            reconcile_error: outcome.error_summary(),
            orders: outcome.orders,
            alerts: outcome.alerts,
        }
    }
}

impl Scheduler {
    /// Record a new cumulative reading for an asset.
    ///
    /// The value must be finite and strictly above the current counter.
    /// A rejected reading changes nothing and triggers no reconciliation.
    pub async fn record_reading(&self, request: ReadingRequest) -> Result<Ingestion> {
        let span = start_reading_span(&request.asset_id, request.new_value);
        let started = Instant::now();

        let result = self.record_reading_inner(request).instrument(span.clone()).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(Error::InvalidReading { .. }) | Err(Error::Validation(_)) => "rejected",
            Err(Error::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        record_outcome(&span, outcome);
        metrics::readings().add(1, &[KeyValue::new("result", outcome)]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "reading.record")],
        );
        result
    }

    async fn record_reading_inner(&self, request: ReadingRequest) -> Result<Ingestion> {
        if !request.new_value.is_finite() {
            return Err(Error::Validation("new_value must be a finite number".into()));
        }

        let asset = self.store.get_asset(request.asset_id).await?;
        if request.new_value <= asset.cumulative_usage {
            tracing::info!(
                current = asset.cumulative_usage,
                attempted = request.new_value,
                "reading rejected: value must exceed current"
            );
            return Err(Error::InvalidReading {
                current: asset.cumulative_usage,
                attempted: request.new_value,
            });
        }

        // The store re-checks under its own lock; a racing reading that got
        // in first turns this into InvalidReading with nothing written.
        let (asset, reading) = self
            .store
            .apply_reading(NewReading {
                asset_id: request.asset_id,
                new_value: request.new_value,
                recorded_by: request.recorded_by,
                notes: request.notes,
                recorded_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            reading = %reading.id,
            previous = reading.previous_value,
            new = reading.new_value,
            delta = reading.delta,
            "reading recorded"
        );
        self.record_event(EventKind::ReadingRecorded {
            id: reading.id,
            asset_id: reading.asset_id,
            previous_value: reading.previous_value,
            new_value: reading.new_value,
        })
        .await;

        let ingestion = match self.reconcile_loaded_asset(&asset).await {
            Ok(outcome) => Ingestion::new(reading, outcome),
            Err(e) => {
                let mut ingestion = Ingestion::new(reading, ReconcileOutcome::default());
                ingestion.reconcile_error = Some(e.to_string());
                ingestion
            }
        };
        if let Some(err) = &ingestion.reconcile_error {
            tracing::error!(error = %err, "reconciliation incomplete after reading was stored");
        }
        Ok(ingestion)
    }
}
