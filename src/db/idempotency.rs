//! Idempotency records on Postgres.
//!
//! The primary key on (key, method, path, body_hash) is the lock: whichever
//! request inserts the pending row first executes, everyone else reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::Db;
use crate::error::{Error, Result};
use crate::model::{IdempotencyRecord, RequestFingerprint};
use crate::store::{Claim, IdempotencyStore, StoredResponse};

#[async_trait]
impl IdempotencyStore for Db {
    async fn lookup(&self, fingerprint: &RequestFingerprint) -> Result<Option<StoredResponse>> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT status_code, response_body, claimed_at, completed_at
             FROM idempotency_records
             WHERE key = $1 AND method = $2 AND path = $3 AND body_hash = $4",
        )
        .bind(&fingerprint.key)
        .bind(&fingerprint.method)
        .bind(&fingerprint.path)
        .bind(&fingerprint.body_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_stored(fingerprint)).transpose()
    }

    async fn claim(
        &self,
        fingerprint: &RequestFingerprint,
        stale_after: Duration,
    ) -> Result<Claim> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(stale_after)
                .map_err(|e| Error::Config(format!("idempotency stale window out of range: {e}")))?;

        // Insert a pending claim, or take over one whose owner went away.
        let acquired: Option<(String,)> = sqlx::query_as(
            "INSERT INTO idempotency_records (key, method, path, body_hash, claimed_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (key, method, path, body_hash) DO UPDATE
                 SET claimed_at = EXCLUDED.claimed_at
                 WHERE idempotency_records.completed_at IS NULL
                   AND idempotency_records.claimed_at <= $6
             RETURNING key",
        )
        .bind(&fingerprint.key)
        .bind(&fingerprint.method)
        .bind(&fingerprint.path)
        .bind(&fingerprint.body_hash)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        if acquired.is_some() {
            return Ok(Claim::Acquired);
        }

        match self.lookup(fingerprint).await? {
            Some(existing) => Ok(Claim::Held(existing)),
            // Released between our insert and the read; treat as still held
            // so the caller re-runs the lookup path.
            None => Ok(Claim::Held(StoredResponse::Pending { claimed_at: now })),
        }
    }

    async fn complete(
        &self,
        fingerprint: &RequestFingerprint,
        status_code: u16,
        body: &[u8],
    ) -> Result<IdempotencyRecord> {
        let completed: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "UPDATE idempotency_records
             SET status_code = $5, response_body = $6, completed_at = now()
             WHERE key = $1 AND method = $2 AND path = $3 AND body_hash = $4
               AND completed_at IS NULL
             RETURNING completed_at",
        )
        .bind(&fingerprint.key)
        .bind(&fingerprint.method)
        .bind(&fingerprint.path)
        .bind(&fingerprint.body_hash)
        .bind(i32::from(status_code))
        .bind(body)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((created_at,)) = completed {
            return Ok(IdempotencyRecord {
                fingerprint: fingerprint.clone(),
                status_code,
                response_body: body.to_vec(),
                created_at,
            });
        }

        // Already completed (records are written once) or claim vanished.
        match self.lookup(fingerprint).await? {
            Some(StoredResponse::Complete(record)) => Ok(record),
            _ => Err(Error::NotFound(format!(
                "idempotency claim for key {}",
                fingerprint.key
            ))),
        }
    }

    async fn release(&self, fingerprint: &RequestFingerprint) -> Result<()> {
        sqlx::query(
            "DELETE FROM idempotency_records
             WHERE key = $1 AND method = $2 AND path = $3 AND body_hash = $4
               AND completed_at IS NULL",
        )
        .bind(&fingerprint.key)
        .bind(&fingerprint.method)
        .bind(&fingerprint.path)
        .bind(&fingerprint.body_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    status_code: Option<i32>,
    response_body: Option<Vec<u8>>,
    claimed_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl RecordRow {
    fn into_stored(self, fingerprint: &RequestFingerprint) -> Result<StoredResponse> {
        match (self.completed_at, self.status_code) {
            (Some(created_at), Some(status)) => {
                let status_code = u16::try_from(status)
                    .map_err(|_| Error::Other(format!("corrupt stored status code {status}")))?;
                Ok(StoredResponse::Complete(IdempotencyRecord {
                    fingerprint: fingerprint.clone(),
                    status_code,
                    response_body: self.response_body.unwrap_or_default(),
                    created_at,
                }))
            }
            _ => Ok(StoredResponse::Pending {
                claimed_at: self.claimed_at,
            }),
        }
    }
}
