//! Cycle arithmetic for interval-based plans.
//!
//! Pure functions only. Given where an asset's counter sits relative to its
//! baseline and a plan's interval, work out how many cycles are done, where
//! the next milestone is, and where its pre-alert window opens.

use serde::Serialize;

use crate::config::DEFAULT_PRE_ALERT_FRACTION;

/// Snapshot of an (asset, plan) pair's position in its maintenance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleStatus {
    pub interval: f64,
    pub hours_worked: f64,
    /// Milestones reached or passed. An exact multiple counts as reached.
    pub cycles_completed: i64,
    /// Usage (relative to baseline) of the next milestone.
    pub next_due: f64,
    pub remaining: f64,
    /// Usage at which the next milestone's pre-alert window opens.
    pub pre_alert_threshold: f64,
}

/// A reached milestone: the `index`-th multiple of the interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Milestone {
    pub index: i64,
    pub threshold: f64,
}

/// Evaluate with the default pre-alert window (10% of the interval).
pub fn evaluate(baseline: f64, cumulative: f64, interval: f64) -> Option<CycleStatus> {
    evaluate_with(baseline, cumulative, interval, DEFAULT_PRE_ALERT_FRACTION)
}

/// Evaluate an asset's position against a plan interval.
///
/// Returns `None` when there is nothing meaningful to compute: a counter
/// below its baseline, or a non-positive interval.
pub fn evaluate_with(
    baseline: f64,
    cumulative: f64,
    interval: f64,
    pre_alert_fraction: f64,
) -> Option<CycleStatus> {
    if !baseline.is_finite() || !cumulative.is_finite() {
        return None;
    }
    if !interval.is_finite() || interval <= 0.0 {
        return None;
    }
    let hours_worked = cumulative - baseline;
    if hours_worked < 0.0 {
        return None;
    }

    let cycles_completed = (hours_worked / interval).floor() as i64;
    let next_due = (cycles_completed + 1) as f64 * interval;

    Some(CycleStatus {
        interval,
        hours_worked,
        cycles_completed,
        next_due,
        remaining: next_due - hours_worked,
        pre_alert_threshold: next_due - pre_alert_fraction * interval,
    })
}

impl CycleStatus {
    /// Usage sits in `[pre_alert_threshold, next_due)`.
    pub fn in_pre_alert_window(&self) -> bool {
        self.hours_worked >= self.pre_alert_threshold && self.hours_worked < self.next_due
    }

    /// Index of the milestone the next pre-alert would target.
    pub fn next_cycle(&self) -> i64 {
        self.cycles_completed + 1
    }

    /// Every reached milestone, lowest first.
    pub fn milestones(&self) -> impl Iterator<Item = Milestone> + '_ {
        (1..=self.cycles_completed)
            .map(|index| Milestone {
                index,
                threshold: index as f64 * self.interval,
            })
            .filter(|m| self.hours_worked >= m.threshold)
    }
}
