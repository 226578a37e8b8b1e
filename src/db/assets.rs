//! Asset registry, plan registry and reading log on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Db, parse_column};
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{AssetRegistry, NewReading, PlanRegistry, ReadingLog};

#[async_trait]
impl AssetRegistry for Db {
    async fn insert_asset(&self, new: NewAsset) -> Result<Asset> {
        let asset = new.into_asset(Utc::now());
        sqlx::query(
            "INSERT INTO assets (id, name, tag, usage_baseline, cumulative_usage, last_reading_at, created_at)
             VALUES ($1, $2, $3, $4, $5, NULL, $6)",
        )
        .bind(asset.id.0)
        .bind(&asset.name)
        .bind(&asset.tag)
        .bind(asset.usage_baseline)
        .bind(asset.cumulative_usage)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(asset)
    }

    async fn get_asset(&self, id: AssetId) -> Result<Asset> {
        let row: Option<AssetRow> = sqlx::query_as(
            "SELECT id, name, tag, usage_baseline, cumulative_usage, last_reading_at, created_at
             FROM assets WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AssetRow::into_asset)
            .ok_or_else(|| Error::NotFound(format!("asset {id}")))
    }

    async fn list_assets(&self) -> Result<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            "SELECT id, name, tag, usage_baseline, cumulative_usage, last_reading_at, created_at
             FROM assets ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AssetRow::into_asset).collect())
    }

    async fn apply_reading(&self, reading: NewReading) -> Result<(Asset, UsageReading)> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent readings for the same asset.
        let current: Option<(f64,)> =
            sqlx::query_as("SELECT cumulative_usage FROM assets WHERE id = $1 FOR UPDATE")
                .bind(reading.asset_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let (current,) =
            current.ok_or_else(|| Error::NotFound(format!("asset {}", reading.asset_id)))?;

        if reading.new_value <= current {
            return Err(Error::InvalidReading {
                current,
                attempted: reading.new_value,
            });
        }

        let asset: AssetRow = sqlx::query_as(
            "UPDATE assets SET cumulative_usage = $2, last_reading_at = $3
             WHERE id = $1
             RETURNING id, name, tag, usage_baseline, cumulative_usage, last_reading_at, created_at",
        )
        .bind(reading.asset_id.0)
        .bind(reading.new_value)
        .bind(reading.recorded_at)
        .fetch_one(&mut *tx)
        .await?;

        let entry = UsageReading {
            id: ReadingId::new(),
            asset_id: reading.asset_id,
            previous_value: current,
            new_value: reading.new_value,
            delta: reading.new_value - current,
            recorded_by: reading.recorded_by,
            notes: reading.notes,
            recorded_at: reading.recorded_at,
        };
        sqlx::query(
            "INSERT INTO usage_readings (id, asset_id, previous_value, new_value, delta, recorded_by, notes, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id.0)
        .bind(entry.asset_id.0)
        .bind(entry.previous_value)
        .bind(entry.new_value)
        .bind(entry.delta)
        .bind(&entry.recorded_by)
        .bind(&entry.notes)
        .bind(entry.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((asset.into_asset(), entry))
    }
}

#[async_trait]
impl ReadingLog for Db {
    async fn list_readings(&self, asset_id: AssetId) -> Result<Vec<UsageReading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            "SELECT id, asset_id, previous_value, new_value, delta, recorded_by, notes, recorded_at
             FROM usage_readings WHERE asset_id = $1 ORDER BY recorded_at, new_value",
        )
        .bind(asset_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReadingRow::into_reading).collect())
    }
}

#[async_trait]
impl PlanRegistry for Db {
    async fn insert_plan(&self, asset_id: AssetId, new: NewPlan) -> Result<MaintenancePlan> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM assets WHERE id = $1")
            .bind(asset_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("asset {asset_id}")));
        }

        let plan = new.into_plan(asset_id, Utc::now());
        sqlx::query(
            "INSERT INTO maintenance_plans (id, asset_id, name, interval_value, active, priority, estimated_hours, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(plan.id.0)
        .bind(plan.asset_id.0)
        .bind(&plan.name)
        .bind(plan.interval_value)
        .bind(plan.active)
        .bind(plan.priority.to_string())
        .bind(plan.estimated_hours)
        .bind(plan.created_at)
        .execute(&mut *tx)
        .await?;

        for (position, m) in plan.materials.iter().enumerate() {
            sqlx::query(
                "INSERT INTO plan_materials (plan_id, position, material_id, quantity, unit, critical)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(plan.id.0)
            .bind(position as i32)
            .bind(m.material_id)
            .bind(m.quantity)
            .bind(&m.unit)
            .bind(m.critical)
            .execute(&mut *tx)
            .await?;
        }
        for (position, l) in plan.labor.iter().enumerate() {
            sqlx::query(
                "INSERT INTO plan_labor (plan_id, position, role, hours, hourly_rate)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(plan.id.0)
            .bind(position as i32)
            .bind(&l.role)
            .bind(l.hours)
            .bind(l.hourly_rate)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(plan)
    }

    async fn get_plan(&self, id: PlanId) -> Result<MaintenancePlan> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, asset_id, name, interval_value, active, priority, estimated_hours, created_at
             FROM maintenance_plans WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        let row = row.ok_or_else(|| Error::NotFound(format!("plan {id}")))?;
        self.hydrate_plan(row).await
    }

    async fn active_plans(&self, asset_id: AssetId) -> Result<Vec<MaintenancePlan>> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT id, asset_id, name, interval_value, active, priority, estimated_hours, created_at
             FROM maintenance_plans WHERE asset_id = $1 AND active
             ORDER BY created_at, id",
        )
        .bind(asset_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in rows {
            plans.push(self.hydrate_plan(row).await?);
        }
        Ok(plans)
    }
}

impl Db {
    /// Attach material and labor lines to a plan row.
    async fn hydrate_plan(&self, row: PlanRow) -> Result<MaintenancePlan> {
        let materials: Vec<(i64, f64, String, bool)> = sqlx::query_as(
            "SELECT material_id, quantity, unit, critical FROM plan_materials
             WHERE plan_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;
        let labor: Vec<(String, f64, f64)> = sqlx::query_as(
            "SELECT role, hours, hourly_rate FROM plan_labor
             WHERE plan_id = $1 ORDER BY position",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(MaintenancePlan {
            id: PlanId(row.id),
            asset_id: AssetId(row.asset_id),
            name: row.name,
            interval_value: row.interval_value,
            active: row.active,
            priority: parse_column("priority", &row.priority)?,
            estimated_hours: row.estimated_hours,
            materials: materials
                .into_iter()
                .map(|(material_id, quantity, unit, critical)| PlanMaterial {
                    material_id,
                    quantity,
                    unit,
                    critical,
                })
                .collect(),
            labor: labor
                .into_iter()
                .map(|(role, hours, hourly_rate)| PlanLabor {
                    role,
                    hours,
                    hourly_rate,
                })
                .collect(),
            created_at: row.created_at,
        })
    }
}

/// Internal row types for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AssetRow {
    id: Uuid,
    name: String,
    tag: Option<String>,
    usage_baseline: f64,
    cumulative_usage: f64,
    last_reading_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl AssetRow {
    fn into_asset(self) -> Asset {
        Asset {
            id: AssetId(self.id),
            name: self.name,
            tag: self.tag,
            usage_baseline: self.usage_baseline,
            cumulative_usage: self.cumulative_usage,
            last_reading_at: self.last_reading_at,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    asset_id: Uuid,
    name: String,
    interval_value: f64,
    active: bool,
    priority: String,
    estimated_hours: Option<f64>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReadingRow {
    id: Uuid,
    asset_id: Uuid,
    previous_value: f64,
    new_value: f64,
    delta: f64,
    recorded_by: Option<String>,
    notes: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl ReadingRow {
    fn into_reading(self) -> UsageReading {
        UsageReading {
            id: ReadingId(self.id),
            asset_id: AssetId(self.asset_id),
            previous_value: self.previous_value,
            new_value: self.new_value,
            delta: self.delta,
            recorded_by: self.recorded_by,
            notes: self.notes,
            recorded_at: self.recorded_at,
        }
    }
}
