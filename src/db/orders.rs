//! Alerts, work orders, material notices, the event log and stock lookups
//! on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Db, parse_column};
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::model::*;
use crate::store::{AlertStore, EventLog, Inventory, WorkOrderStore};

const ALERT_COLUMNS: &str = "id, asset_id, plan_id, cycle, target_threshold, usage_at_alert, remaining_units, message, acknowledged, acknowledged_by, acknowledged_at, created_at";

const ORDER_COLUMNS: &str = "id, number, asset_id, plan_id, milestone, milestone_threshold, title, description, priority, estimated_hours, status, created_at";

#[async_trait]
impl AlertStore for Db {
    async fn find_open_alert(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
    ) -> Result<Option<MaintenanceAlert>> {
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM maintenance_alerts
             WHERE asset_id = $1 AND plan_id = $2 AND cycle = $3 AND NOT acknowledged"
        ))
        .bind(asset_id.0)
        .bind(plan_id.0)
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AlertRow::into_alert))
    }

    async fn insert_alert(&self, new: NewAlert) -> Result<Option<MaintenanceAlert>> {
        // The partial unique index on open alerts turns a racing duplicate
        // into a no-op.
        let row: Option<AlertRow> = sqlx::query_as(&format!(
            "INSERT INTO maintenance_alerts (id, asset_id, plan_id, cycle, target_threshold, usage_at_alert, remaining_units, message, acknowledged, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9)
             ON CONFLICT (asset_id, plan_id, cycle) WHERE NOT acknowledged DO NOTHING
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.asset_id.0)
        .bind(new.plan_id.0)
        .bind(new.cycle)
        .bind(new.target_threshold)
        .bind(new.usage_at_alert)
        .bind(new.remaining_units)
        .bind(&new.message)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AlertRow::into_alert))
    }

    async fn acknowledge_alerts(
        &self,
        asset_id: AssetId,
        plan_id: PlanId,
        cycle: i64,
        by: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceAlert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "UPDATE maintenance_alerts
             SET acknowledged = TRUE, acknowledged_by = $4, acknowledged_at = $5
             WHERE asset_id = $1 AND plan_id = $2 AND cycle = $3 AND NOT acknowledged
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(asset_id.0)
        .bind(plan_id.0)
        .bind(cycle)
        .bind(by)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AlertRow::into_alert).collect())
    }

    async fn list_alerts(&self, asset_id: AssetId) -> Result<Vec<MaintenanceAlert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM maintenance_alerts
             WHERE asset_id = $1 ORDER BY created_at, cycle"
        ))
        .bind(asset_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AlertRow::into_alert).collect())
    }
}

#[async_trait]
impl WorkOrderStore for Db {
    async fn plan_work_orders(&self, asset_id: AssetId, plan_id: PlanId) -> Result<Vec<WorkOrder>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM work_orders
             WHERE asset_id = $1 AND plan_id = $2 ORDER BY milestone"
        ))
        .bind(asset_id.0)
        .bind(plan_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderRow::try_into_order).collect()
    }

    async fn create_work_order(&self, new: NewWorkOrder) -> Result<Option<WorkOrder>> {
        // `number` defaults to nextval() of the shared sequence, which is
        // safe under concurrent inserts. A conflicting insert burns a value.
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "INSERT INTO work_orders (id, asset_id, plan_id, milestone, milestone_threshold, title, description, priority, estimated_hours, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'open', $10)
             ON CONFLICT (asset_id, plan_id, milestone) DO NOTHING
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.asset_id.0)
        .bind(new.plan_id.0)
        .bind(new.milestone)
        .bind(new.milestone_threshold)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.priority.to_string())
        .bind(new.estimated_hours)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.map(OrderRow::try_into_order).transpose()
    }

    async fn list_work_orders(&self, asset_id: AssetId) -> Result<Vec<WorkOrder>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM work_orders WHERE asset_id = $1 ORDER BY number"
        ))
        .bind(asset_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OrderRow::try_into_order).collect()
    }

    async fn insert_material_notice(&self, notice: MaterialNotice) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let notice_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO material_notices (id, work_order_id, asset_id, plan_id, priority, message, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notice_id)
        .bind(notice.work_order_id.0)
        .bind(notice.asset_id.0)
        .bind(notice.plan_id.0)
        .bind(notice.priority.to_string())
        .bind(&notice.message)
        .bind(notice.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, line) in notice.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO material_notice_lines (notice_id, position, material_id, quantity_needed, unit, quantity_available)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(notice_id)
            .bind(position as i32)
            .bind(line.material_id)
            .bind(line.quantity_needed)
            .bind(&line.unit)
            .bind(line.quantity_available)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn material_notices(&self, work_order_id: WorkOrderId) -> Result<Vec<MaterialNotice>> {
        let rows: Vec<NoticeRow> = sqlx::query_as(
            "SELECT id, work_order_id, asset_id, plan_id, priority, message, created_at
             FROM material_notices WHERE work_order_id = $1 ORDER BY created_at",
        )
        .bind(work_order_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut notices = Vec::with_capacity(rows.len());
        for row in rows {
            let lines: Vec<(i64, f64, String, f64)> = sqlx::query_as(
                "SELECT material_id, quantity_needed, unit, quantity_available
                 FROM material_notice_lines WHERE notice_id = $1 ORDER BY position",
            )
            .bind(row.id)
            .fetch_all(&self.pool)
            .await?;
            notices.push(MaterialNotice {
                work_order_id: WorkOrderId(row.work_order_id),
                asset_id: AssetId(row.asset_id),
                plan_id: PlanId(row.plan_id),
                priority: parse_column("priority", &row.priority)?,
                message: row.message,
                lines: lines
                    .into_iter()
                    .map(
                        |(material_id, quantity_needed, unit, quantity_available)| {
                            MaterialNoticeLine {
                                material_id,
                                quantity_needed,
                                unit,
                                quantity_available,
                            }
                        },
                    )
                    .collect(),
                created_at: row.created_at,
            });
        }
        Ok(notices)
    }
}

#[async_trait]
impl EventLog for Db {
    async fn append_event(&self, kind: EventKind) -> Result<Event> {
        let payload = serde_json::to_value(&kind)?;
        let (seq, timestamp): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO scheduler_events (kind) VALUES ($1) RETURNING seq, timestamp",
        )
        .bind(&payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(Event {
            seq,
            timestamp,
            kind,
        })
    }

    async fn recent_events(&self, limit: i64) -> Result<Vec<Event>> {
        let rows: Vec<(i64, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT seq, timestamp, kind FROM scheduler_events ORDER BY seq DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(seq, timestamp, kind)| {
                Ok(Event {
                    seq,
                    timestamp,
                    kind: serde_json::from_value(kind)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Inventory for Db {
    async fn current_stock(&self, material_id: MaterialId) -> Result<Option<f64>> {
        let row: Option<(f64,)> = sqlx::query_as("SELECT current_stock FROM materials WHERE id = $1")
            .bind(material_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(stock,)| stock))
    }
}

/// Internal row types for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    asset_id: Uuid,
    plan_id: Uuid,
    cycle: i64,
    target_threshold: f64,
    usage_at_alert: f64,
    remaining_units: f64,
    message: String,
    acknowledged: bool,
    acknowledged_by: Option<String>,
    acknowledged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl AlertRow {
    fn into_alert(self) -> MaintenanceAlert {
        MaintenanceAlert {
            id: AlertId(self.id),
            asset_id: AssetId(self.asset_id),
            plan_id: PlanId(self.plan_id),
            cycle: self.cycle,
            target_threshold: self.target_threshold,
            usage_at_alert: self.usage_at_alert,
            remaining_units: self.remaining_units,
            message: self.message,
            acknowledged: self.acknowledged,
            acknowledged_by: self.acknowledged_by,
            acknowledged_at: self.acknowledged_at,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    number: i64,
    asset_id: Uuid,
    plan_id: Uuid,
    milestone: i64,
    milestone_threshold: f64,
    title: String,
    description: String,
    priority: String,
    estimated_hours: Option<f64>,
    status: String,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn try_into_order(self) -> Result<WorkOrder> {
        Ok(WorkOrder {
            id: WorkOrderId(self.id),
            number: self.number,
            asset_id: AssetId(self.asset_id),
            plan_id: PlanId(self.plan_id),
            milestone: self.milestone,
            milestone_threshold: self.milestone_threshold,
            title: self.title,
            description: self.description,
            priority: parse_column("priority", &self.priority)?,
            estimated_hours: self.estimated_hours,
            status: parse_column("status", &self.status)?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NoticeRow {
    id: Uuid,
    work_order_id: Uuid,
    asset_id: Uuid,
    plan_id: Uuid,
    priority: String,
    message: String,
    created_at: DateTime<Utc>,
}
