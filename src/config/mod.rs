//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on malformed values.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;

/// Fraction of the interval before a milestone that opens the alert window.
pub const DEFAULT_PRE_ALERT_FRACTION: f64 = 0.1;

/// Work orders one reconciliation pass may open for a single plan.
pub const DEFAULT_MAX_MILESTONES_PER_PASS: usize = 50;

#[derive(Debug)]
pub struct Config {
    /// Postgres URL. When absent the service runs on the in-memory store.
    pub database_url: Option<SecretString>,
    pub bind_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
    pub idempotency: IdempotencySettings,
    pub notify_webhook_url: Option<String>,
}

/// Settings that shape scheduler decisions.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub pre_alert_fraction: f64,
    /// Reconcile every asset once when the service starts.
    pub startup_sweep: bool,
    /// Name recorded when the scheduler acknowledges alerts.
    pub system_actor: String,
    /// Cap on orders opened per plan in one pass. The rest wait for the
    /// next reading or sweep.
    pub max_milestones_per_pass: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pre_alert_fraction: DEFAULT_PRE_ALERT_FRACTION,
            startup_sweep: true,
            system_actor: "system".to_string(),
            max_milestones_per_pass: DEFAULT_MAX_MILESTONES_PER_PASS,
        }
    }
}

/// Timing knobs for the idempotency guard.
#[derive(Debug, Clone)]
pub struct IdempotencySettings {
    /// How long a duplicate waits for the in-flight original to finish.
    pub wait_timeout: Duration,
    /// Pending claims older than this are treated as abandoned.
    pub stale_after: Duration,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(5000),
            stale_after: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = match var("BIND_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::Config(format!("BIND_ADDR '{raw}' is not an address: {e}")))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let pre_alert_fraction = match var("PRE_ALERT_FRACTION") {
            Some(raw) => parse_var::<f64>("PRE_ALERT_FRACTION", &raw)?,
            None => DEFAULT_PRE_ALERT_FRACTION,
        };
        if !(pre_alert_fraction > 0.0 && pre_alert_fraction < 1.0) {
            return Err(Error::Config(format!(
                "PRE_ALERT_FRACTION must be between 0 and 1, got {pre_alert_fraction}"
            )));
        }

        let startup_sweep = match var("STARTUP_SWEEP") {
            Some(raw) => parse_bool("STARTUP_SWEEP", &raw)?,
            None => true,
        };

        let max_milestones_per_pass = match var("MAX_MILESTONES_PER_PASS") {
            Some(raw) => parse_var::<usize>("MAX_MILESTONES_PER_PASS", &raw)?,
            None => DEFAULT_MAX_MILESTONES_PER_PASS,
        };
        if max_milestones_per_pass == 0 {
            return Err(Error::Config("MAX_MILESTONES_PER_PASS must be at least 1".into()));
        }

        let defaults = IdempotencySettings::default();
        let wait_timeout = match var("IDEMPOTENCY_WAIT_MS") {
            Some(raw) => Duration::from_millis(parse_var::<u64>("IDEMPOTENCY_WAIT_MS", &raw)?),
            None => defaults.wait_timeout,
        };
        let stale_after = match var("IDEMPOTENCY_STALE_SECS") {
            Some(raw) => Duration::from_secs(parse_var::<u64>("IDEMPOTENCY_STALE_SECS", &raw)?),
            None => defaults.stale_after,
        };

        Ok(Self {
            database_url: var("DATABASE_URL").map(SecretString::from),
            bind_addr,
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            scheduler: SchedulerConfig {
                pre_alert_fraction,
                startup_sweep,
                system_actor: var("SYSTEM_ACTOR").unwrap_or_else(|| "system".to_string()),
                max_milestones_per_pass,
            },
            idempotency: IdempotencySettings {
                wait_timeout,
                stale_after,
            },
            notify_webhook_url: var("NOTIFY_WEBHOOK_URL"),
        })
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name} '{raw}' is invalid: {e}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name} '{other}' is not a boolean"))),
    }
}
