//! In-process storage backend.
//!
//! One mutex guards all state, so every trait method is atomic with respect
//! to the others, the same guarantee the Postgres backend gets from
//! transactions and unique indexes. Used by tests and by `serve` when no
//! database is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::*;
use crate::error::Error;

/// First number handed out by the work order sequence.
pub const FIRST_WORK_ORDER_NUMBER: i64 = 100_000;

#[derive(Default)]
struct State {
    assets: HashMap<AssetId, Asset>,
    plans: HashMap<PlanId, MaintenancePlan>,
    readings: Vec<UsageReading>,
    alerts: Vec<MaintenanceAlert>,
    work_orders: Vec<WorkOrder>,
    notices: Vec<MaterialNotice>,
    events: Vec<Event>,
    stock: HashMap<MaterialId, f64>,
    idempotency: HashMap<RequestFingerprint, StoredResponse>,
    next_number: i64,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_number: FIRST_WORK_ORDER_NUMBER,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // No method panics mid-update, so a poisoned lock still holds
        // consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the stock level reported by the [`Inventory`] impl.
    pub fn set_stock(&self, material_id: MaterialId, quantity: f64) {
        self.state().stock.insert(material_id, quantity);
    }
}

#[async_trait]
impl AssetRegistry for MemoryStore {
    async fn insert_asset(&self, new: NewAsset) -> Result<Asset> {
        let asset = new.into_asset(Utc::now());
        self.state().assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: AssetId) -> Result<Asset> {
        self.state()
            .assets
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("asset {id}")))
    }

    async fn list_assets(&self) -> Result<Vec<Asset>> {
        let mut assets: Vec<Asset> = self.state().assets.values().cloned().collect();
        assets.sort_by_key(|a| a.created_at);
        Ok(assets)
    }

    async fn apply_reading(&self, reading: NewReading) -> Result<(Asset, UsageReading)> {
        let mut state = self.state();
        let asset = state
            .assets
            .get_mut(&reading.asset_id)
            .ok_or_else(|| Error::NotFound(format!("asset {}", reading.asset_id)))?;

        if reading.new_value <= asset.cumulative_usage {
            return Err(Error::InvalidReading {
                current: asset.cumulative_usage,
                attempted: reading.new_value,
            });
        }

        let entry = UsageReading {
            id: ReadingId::new(),
            asset_id: reading.asset_id,
            previous_value: asset.cumulative_usage,
            new_value: reading.new_value,
            delta: reading.new_value - asset.cumulative_usage,
            recorded_by: reading.recorded_by,
            notes: reading.notes,
            recorded_at: reading.recorded_at,
        };
        asset.cumulative_usage = reading.new_value;
        asset.last_reading_at = Some(reading.recorded_at);
        let asset = asset.clone();
        state.readings.push(entry.clone());
        Ok((asset, entry))
    }
}

#[async_trait]
impl ReadingLog for MemoryStore {
    async fn list_readings(&self, asset_id: AssetId) -> Result<Vec<UsageReading>> {
        Ok(self
            .state()
            .readings
            .iter()
            .filter(|r| r.asset_id == asset_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PlanRegistry for MemoryStore {
    async fn insert_plan(&self, asset_id: AssetId, new: NewPlan) -> Result<MaintenancePlan> {
        let mut state = self.state();
        if !state.assets.contains_key(&asset_id) {
            return Err(Error::NotFound(format!("asset {asset_id}")));
        }
        let plan = new.into_plan(asset_id, Utc::now());
        state.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, id: PlanId) -> Result<MaintenancePlan> {
        self.state()
            .plans
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plan {id}")))
    }

    async fn active_plans(&self, asset_id: AssetId) -> Result<Vec<MaintenancePlan>> {
        let mut plans: Vec<MaintenancePlan> = self
            .state()
            .plans
            .values()
            .filter(|p| p.asset_id == asset_id && p.active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.created_at, p.id));
        Ok(plans)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn find_open_alert(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
    ) -> Result<Option<MaintenanceAlert>> {
        Ok(self
            .state()
            .alerts
            .iter()
            .find(|a| {
                a.asset_id == asset_id && a.plan_id == plan_id && a.cycle == cycle && !a.acknowledged
            })
            .cloned())
    }

    async fn insert_alert(&self, new: NewAlert) -> Result<Option<MaintenanceAlert>> {
        let mut state = self.state();
        let exists = state.alerts.iter().any(|a| {
            a.asset_id == new.asset_id
                && a.plan_id == new.plan_id
                && a.cycle == new.cycle
                && !a.acknowledged
        });
        if exists {
            return Ok(None);
        }
        let alert = MaintenanceAlert {
            id: AlertId::new(),
            asset_id: new.asset_id,
            plan_id: new.plan_id,
            cycle: new.cycle,
            target_threshold: new.target_threshold,
            usage_at_alert: new.usage_at_alert,
            remaining_units: new.remaining_units,
            message: new.message,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        };
        state.alerts.push(alert.clone());
        Ok(Some(alert))
    }

    async fn acknowledge_alerts(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceAlert>> {
        let mut acknowledged = Vec::new();
        for alert in self.state().alerts.iter_mut().filter(|a| {
            a.asset_id == asset_id && a.plan_id == plan_id && a.cycle == cycle && !a.acknowledged
        }) {
            alert.acknowledged = true;
            alert.acknowledged_by = Some(by.to_string());
            alert.acknowledged_at = Some(at);
            acknowledged.push(alert.clone());
        }
        Ok(acknowledged)
    }

    async fn list_alerts(&self, asset_id: AssetId) -> Result<Vec<MaintenanceAlert>> {
        Ok(self
            .state()
            .alerts
            .iter()
            .filter(|a| a.asset_id == asset_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkOrderStore for MemoryStore {
    async fn plan_work_orders(&self, asset_id: AssetId, plan_id: PlanId) -> Result<Vec<WorkOrder>> {
        let mut orders: Vec<WorkOrder> = self
            .state()
            .work_orders
            .iter()
            .filter(|o| o.asset_id == asset_id && o.plan_id == plan_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.milestone);
        Ok(orders)
    }

    async fn create_work_order(&self, new: NewWorkOrder) -> Result<Option<WorkOrder>> {
        let mut state = self.state();
        let exists = state.work_orders.iter().any(|o| {
            o.asset_id == new.asset_id && o.plan_id == new.plan_id && o.milestone == new.milestone
        });
        if exists {
            return Ok(None);
        }
        let number = state.next_number;
        state.next_number += 1;
        let order = WorkOrder {
            id: WorkOrderId::new(),
            number,
            asset_id: new.asset_id,
            plan_id: new.plan_id,
            milestone: new.milestone,
            milestone_threshold: new.milestone_threshold,
            title: new.title,
            description: new.description,
            priority: new.priority,
            estimated_hours: new.estimated_hours,
            status: WorkOrderStatus::Open,
            created_at: Utc::now(),
        };
        state.work_orders.push(order.clone());
        Ok(Some(order))
    }

    async fn list_work_orders(&self, asset_id: AssetId) -> Result<Vec<WorkOrder>> {
        let mut orders: Vec<WorkOrder> = self
            .state()
            .work_orders
            .iter()
            .filter(|o| o.asset_id == asset_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.number);
        Ok(orders)
    }

    async fn insert_material_notice(&self, notice: MaterialNotice) -> Result<()> {
        self.state().notices.push(notice);
        Ok(())
    }

    async fn material_notices(&self, work_order_id: WorkOrderId) -> Result<Vec<MaterialNotice>> {
        Ok(self
            .state()
            .notices
            .iter()
            .filter(|n| n.work_order_id == work_order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append_event(&self, kind: EventKind) -> Result<Event> {
        let mut state = self.state();
        let event = Event {
            seq: state.events.len() as i64 + 1,
            timestamp: Utc::now(),
            kind,
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn recent_events(&self, limit: i64) -> Result<Vec<Event>> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .state()
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Inventory for MemoryStore {
    async fn current_stock(&self, material_id: MaterialId) -> Result<Option<f64>> {
        Ok(self.state().stock.get(&material_id).copied())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn lookup(&self, fingerprint: &RequestFingerprint) -> Result<Option<StoredResponse>> {
        Ok(self.state().idempotency.get(fingerprint).cloned())
    }

    async fn claim(
        &self,
        fingerprint: &RequestFingerprint,
        stale_after: Duration,
    ) -> Result<Claim> {
        let now = Utc::now();
        let mut state = self.state();
        if let Some(existing) = state.idempotency.get(fingerprint) {
            let abandoned = matches!(
                existing,
                StoredResponse::Pending { claimed_at } if is_stale(*claimed_at, now, stale_after)
            );
            if !abandoned {
                return Ok(Claim::Held(existing.clone()));
            }
        }
        state
            .idempotency
            .insert(fingerprint.clone(), StoredResponse::Pending { claimed_at: now });
        Ok(Claim::Acquired)
    }

    async fn complete(
        &self,
        fingerprint: &RequestFingerprint,
        status_code: u16,
        body: &[u8],
    ) -> Result<IdempotencyRecord> {
        let mut state = self.state();
        match state.idempotency.get(fingerprint) {
            Some(StoredResponse::Complete(record)) => Ok(record.clone()),
            Some(StoredResponse::Pending { .. }) => {
                let record = IdempotencyRecord {
                    fingerprint: fingerprint.clone(),
                    status_code,
                    response_body: body.to_vec(),
                    created_at: Utc::now(),
                };
                state
                    .idempotency
                    .insert(fingerprint.clone(), StoredResponse::Complete(record.clone()));
                Ok(record)
            }
            None => Err(Error::NotFound(format!(
                "idempotency claim for key {}",
                fingerprint.key
            ))),
        }
    }

    async fn release(&self, fingerprint: &RequestFingerprint) -> Result<()> {
        let mut state = self.state();
        if matches!(
            state.idempotency.get(fingerprint),
            Some(StoredResponse::Pending { .. })
        ) {
            state.idempotency.remove(fingerprint);
        }
        Ok(())
    }
}

pub(crate) fn is_stale(claimed_at: DateTime<Utc>, now: DateTime<Utc>, stale_after: Duration) -> bool {
    chrono::Duration::from_std(stale_after)
        .map(|window| now - claimed_at >= window)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(key: &str) -> RequestFingerprint {
        RequestFingerprint {
            key: key.to_string(),
            method: "POST".to_string(),
            path: "/api/readings".to_string(),
            body_hash: "abc".to_string(),
        }
    }

    #[tokio::test]
    async fn second_claim_is_held_until_complete() {
        let store = MemoryStore::new();
        let fp = fingerprint("k1");

        assert!(matches!(
            store.claim(&fp, Duration::from_secs(60)).await.unwrap(),
            Claim::Acquired
        ));
        assert!(matches!(
            store.claim(&fp, Duration::from_secs(60)).await.unwrap(),
            Claim::Held(StoredResponse::Pending { .. })
        ));

        store.complete(&fp, 201, b"{\"ok\":true}").await.unwrap();
        match store.claim(&fp, Duration::from_secs(60)).await.unwrap() {
            Claim::Held(StoredResponse::Complete(record)) => {
                assert_eq!(record.status_code, 201);
                assert_eq!(record.response_body, b"{\"ok\":true}");
            }
            other => panic!("expected completed record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_pending_claim_is_taken_over() {
        let store = MemoryStore::new();
        let fp = fingerprint("k2");
        store.claim(&fp, Duration::from_secs(60)).await.unwrap();
        assert!(matches!(
            store.claim(&fp, Duration::ZERO).await.unwrap(),
            Claim::Acquired
        ));
    }

    #[tokio::test]
    async fn release_only_drops_pending_claims() {
        let store = MemoryStore::new();
        let fp = fingerprint("k3");
        store.claim(&fp, Duration::from_secs(60)).await.unwrap();
        store.complete(&fp, 200, b"{}").await.unwrap();
        store.release(&fp).await.unwrap();
        assert!(matches!(
            store.lookup(&fp).await.unwrap(),
            Some(StoredResponse::Complete(_))
        ));
    }

    #[tokio::test]
    async fn work_order_numbers_are_sequential_across_assets() {
        let store = MemoryStore::new();
        let mut numbers = Vec::new();
        for milestone in 1..=3 {
            let order = store
                .create_work_order(NewWorkOrder {
                    asset_id: AssetId::new(),
                    plan_id: PlanId::new(),
                    milestone,
                    milestone_threshold: milestone as f64 * 250.0,
                    title: "t".into(),
                    description: "d".into(),
                    priority: Priority::Normal,
                    estimated_hours: None,
                })
                .await
                .unwrap()
                .unwrap();
            numbers.push(order.number);
        }
        assert_eq!(numbers, vec![100_000, 100_001, 100_002]);
    }
}
