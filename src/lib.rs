//! # meterwatch
//!
//! Usage-threshold preventive maintenance scheduler.
//!
//! Assets report cumulative usage counters (operating hours, kilometres).
//! Each accepted reading is checked against the asset's interval plans:
//! pre-alerts open shortly before a milestone, and every reached milestone
//! gets exactly one work order. Mutating HTTP requests carry idempotency
//! keys so offline clients can retry safely.
//!
//! Persistence runs on Postgres (sqlx) or an in-memory store, behind the
//! traits in [`store`].

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod fleet;
pub mod model;
pub mod notify;
pub mod schedule;
pub mod store;
pub mod telemetry;
