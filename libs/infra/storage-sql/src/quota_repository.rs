// [libs/infra/storage-sql/src/quota_repository.rs]
//! `QuotaStorage` over the four normative tables. Every mutating
//! primitive runs inside one libSQL transaction so the row lock on
//! `(user_id, resource, period_start)` covers the whole read-compute-
//! write sequence the trait requires.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::params;
use quotaforge_core::{period_kind_as_str, period_kind_from_str, ConsumeRequest, QuotaOutcome, QuotaStorage, RateLimitRequest, RefundRequest};
use quotaforge_domain_models::{
    ConsumptionRecord, Entitlement, Period, QuotaError, QuotaResult, RateLimitDecision,
    RefundRecord, UsageRecord,
};
use tracing::instrument;

use crate::client::TursoClient;
use crate::errors::DbError;

pub struct SqlStorage {
    client: TursoClient,
}

impl SqlStorage {
    pub fn new(client: TursoClient) -> Self {
        Self { client }
    }
}

fn map_db(err: impl Into<DbError>) -> QuotaError {
    err.into().into()
}

fn end_to_string(end: DateTime<Utc>) -> Option<String> {
    if end == quotaforge_domain_models::forever_sentinel() {
        None
    } else {
        Some(end.to_rfc3339())
    }
}

fn end_from_string(value: Option<String>) -> QuotaResult<DateTime<Utc>> {
    match value {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| QuotaError::storage(DbError::MappingError(e.to_string()))),
        None => Ok(quotaforge_domain_models::forever_sentinel()),
    }
}

fn parse_rfc3339(value: &str) -> QuotaResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QuotaError::storage(DbError::MappingError(e.to_string())))
}

#[async_trait]
impl QuotaStorage for SqlStorage {
    #[instrument(skip(self))]
    async fn get_entitlement(&self, user_id: &str) -> QuotaResult<Option<Entitlement>> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let mut rows = conn
            .query(
                "SELECT tier_id, subscription_start, expires_at, updated_at FROM entitlements WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let Some(row) = rows.next().await.map_err(DbError::from).map_err(map_db)? else {
            return Ok(None);
        };

        let tier_id: String = row.get(0).map_err(DbError::from).map_err(map_db)?;
        let subscription_start: Option<String> = row.get(1).map_err(DbError::from).map_err(map_db)?;
        let expires_at: Option<String> = row.get(2).map_err(DbError::from).map_err(map_db)?;
        let updated_at: String = row.get(3).map_err(DbError::from).map_err(map_db)?;

        let mut entitlement = Entitlement::new(user_id, tier_id, parse_rfc3339(&updated_at)?);
        if let Some(start) = subscription_start {
            entitlement = entitlement.with_subscription_start(
                NaiveDate::parse_from_str(&start, "%Y-%m-%d")
                    .map_err(|e| QuotaError::storage(DbError::MappingError(e.to_string())))?,
            );
        }
        if let Some(expiry) = expires_at {
            entitlement = entitlement.with_expiry(parse_rfc3339(&expiry)?);
        }

        Ok(Some(entitlement))
    }

    #[instrument(skip(self, entitlement))]
    async fn set_entitlement(&self, entitlement: Entitlement) -> QuotaResult<()> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let tx = conn.transaction().await.map_err(DbError::from).map_err(map_db)?;

        let mut rows = tx
            .query("SELECT updated_at FROM entitlements WHERE user_id = ?1", params![entitlement.user_id.clone()])
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let should_apply = match rows.next().await.map_err(DbError::from).map_err(map_db)? {
            Some(row) => {
                let existing_updated_at: String = row.get(0).map_err(DbError::from).map_err(map_db)?;
                entitlement.updated_at > parse_rfc3339(&existing_updated_at)?
            }
            None => true,
        };

        if should_apply {
            tx.execute(
                "INSERT INTO entitlements (user_id, tier_id, subscription_start, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                   tier_id = excluded.tier_id,
                   subscription_start = excluded.subscription_start,
                   expires_at = excluded.expires_at,
                   updated_at = excluded.updated_at",
                params![
                    entitlement.user_id.clone(),
                    entitlement.tier_name.clone(),
                    entitlement.subscription_start_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    entitlement.expires_at.map(|dt| dt.to_rfc3339()),
                    entitlement.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;
        }

        tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_usage(
        &self,
        user_id: &str,
        resource: &str,
        period_start: DateTime<Utc>,
    ) -> QuotaResult<Option<UsageRecord>> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let mut rows = conn
            .query(
                "SELECT period_end, period_type, usage_amount, limit_amount, tier, updated_at
                 FROM quota_usage WHERE user_id = ?1 AND resource = ?2 AND period_start = ?3",
                params![user_id, resource, period_start.to_rfc3339()],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let Some(row) = rows.next().await.map_err(DbError::from).map_err(map_db)? else {
            return Ok(None);
        };

        row_to_usage(user_id, resource, period_start, row).map(Some)
    }

    #[instrument(skip(self, usage))]
    async fn set_usage(&self, usage: UsageRecord) -> QuotaResult<()> {
        let conn = self.client.get_connection().map_err(map_db)?;
        upsert_usage_row(&conn, &usage).await
    }

    #[instrument(skip(self, request))]
    async fn consume_quota(&self, request: ConsumeRequest) -> QuotaResult<QuotaOutcome> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let tx = conn.transaction().await.map_err(DbError::from).map_err(map_db)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(new_used) = lookup_consumption(&tx, &request.user_id, key).await? {
                tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
                return Ok(QuotaOutcome {
                    new_used,
                    limit: request.limit,
                    exceeded: false,
                });
            }
        }

        let current_used = current_usage_amount(&tx, &request.user_id, &request.resource, request.period.start).await?;
        let new_used = current_used.saturating_add(request.amount);

        if new_used > request.limit {
            tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
            return Ok(QuotaOutcome {
                new_used: current_used,
                limit: request.limit,
                exceeded: true,
            });
        }

        tx.execute(
            "INSERT INTO quota_usage (user_id, resource, period_start, period_end, period_type, usage_amount, limit_amount, tier, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(user_id, resource, period_start) DO UPDATE SET
               usage_amount = excluded.usage_amount,
               limit_amount = excluded.limit_amount,
               tier = excluded.tier,
               updated_at = excluded.updated_at",
            params![
                request.user_id.clone(),
                request.resource.clone(),
                request.period.start.to_rfc3339(),
                end_to_string(request.period.end),
                period_kind_as_str(request.period.kind),
                new_used as i64,
                request.limit as i64,
                request.tier_name.clone(),
                request.now.to_rfc3339(),
            ],
        )
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;

        if let Some(key) = &request.idempotency_key {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO consumption_records
                     (consumption_id, user_id, resource, amount, period_start, period_end, period_type, new_used, timestamp, expires_at, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        key.clone(),
                        request.user_id.clone(),
                        request.resource.clone(),
                        request.amount as i64,
                        request.period.start.to_rfc3339(),
                        end_to_string(request.period.end),
                        period_kind_as_str(request.period.kind),
                        new_used as i64,
                        request.now.to_rfc3339(),
                        (request.now + request.idempotency_ttl).to_rfc3339(),
                        request.metadata.as_ref().map(|m| m.to_string()),
                    ],
                )
                .await
                .map_err(DbError::from)
                .map_err(map_db)?;

            if inserted == 0 {
                // Lost the race to a concurrent writer with the same key;
                // its committed `new_used` is the authoritative answer.
                let raced_used = lookup_consumption(&tx, &request.user_id, key)
                    .await?
                    .ok_or_else(|| map_db(DbError::MappingError("consumption record vanished mid-transaction".into())))?;
                tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
                return Ok(QuotaOutcome {
                    new_used: raced_used,
                    limit: request.limit,
                    exceeded: false,
                });
            }
        }

        tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
        Ok(QuotaOutcome {
            new_used,
            limit: request.limit,
            exceeded: false,
        })
    }

    #[instrument(skip(self, request))]
    async fn refund_quota(&self, request: RefundRequest) -> QuotaResult<QuotaOutcome> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let tx = conn.transaction().await.map_err(DbError::from).map_err(map_db)?;

        if let Some(key) = &request.idempotency_key {
            let mut rows = tx
                .query(
                    "SELECT new_used FROM refund_records WHERE user_id = ?1 AND refund_id = ?2",
                    params![request.user_id.clone(), key.clone()],
                )
                .await
                .map_err(DbError::from)
                .map_err(map_db)?;
            if let Some(row) = rows.next().await.map_err(DbError::from).map_err(map_db)? {
                let new_used: i64 = row.get(0).map_err(DbError::from).map_err(map_db)?;
                tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
                return Ok(QuotaOutcome {
                    new_used: new_used as u64,
                    limit: 0,
                    exceeded: false,
                });
            }
        }

        let mut rows = tx
            .query(
                "SELECT usage_amount, limit_amount FROM quota_usage WHERE user_id = ?1 AND resource = ?2 AND period_start = ?3",
                params![request.user_id.clone(), request.resource.clone(), request.period.start.to_rfc3339()],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let (used, limit) = match rows.next().await.map_err(DbError::from).map_err(map_db)? {
            Some(row) => {
                let used: i64 = row.get(0).map_err(DbError::from).map_err(map_db)?;
                let limit: i64 = row.get(1).map_err(DbError::from).map_err(map_db)?;
                (used as u64, limit as u64)
            }
            None => (0, 0),
        };

        let new_used = used.saturating_sub(request.amount);

        tx.execute(
            "UPDATE quota_usage SET usage_amount = ?1, updated_at = ?2
             WHERE user_id = ?3 AND resource = ?4 AND period_start = ?5",
            params![new_used as i64, request.now.to_rfc3339(), request.user_id.clone(), request.resource.clone(), request.period.start.to_rfc3339()],
        )
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;

        if let Some(key) = &request.idempotency_key {
            tx.execute(
                "INSERT OR IGNORE INTO refund_records
                 (refund_id, user_id, resource, amount, period_start, period_end, period_type, timestamp, expires_at, reason, metadata, new_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    key.clone(),
                    request.user_id.clone(),
                    request.resource.clone(),
                    request.amount as i64,
                    request.period.start.to_rfc3339(),
                    end_to_string(request.period.end),
                    period_kind_as_str(request.period.kind),
                    request.now.to_rfc3339(),
                    (request.now + request.idempotency_ttl).to_rfc3339(),
                    request.reason.clone(),
                    request.metadata.as_ref().map(|m| m.to_string()),
                    new_used as i64,
                ],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;
        }

        tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
        Ok(QuotaOutcome {
            new_used,
            limit,
            exceeded: false,
        })
    }

    #[instrument(skip(self))]
    async fn apply_tier_change(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        new_limit: u64,
        new_tier: &str,
    ) -> QuotaResult<()> {
        let conn = self.client.get_connection().map_err(map_db)?;
        conn.execute(
            "INSERT INTO quota_usage (user_id, resource, period_start, period_end, period_type, usage_amount, limit_amount, tier, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)
             ON CONFLICT(user_id, resource, period_start) DO UPDATE SET
               limit_amount = excluded.limit_amount,
               tier = excluded.tier,
               updated_at = excluded.updated_at",
            params![
                user_id,
                resource,
                period.start.to_rfc3339(),
                end_to_string(period.end),
                period_kind_as_str(period.kind),
                new_limit as i64,
                new_tier,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_limit(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        tier_name: &str,
        amount: u64,
        idempotency_key: &str,
    ) -> QuotaResult<u64> {
        adjust_limit(&self.client, user_id, resource, period, tier_name, amount as i64, idempotency_key).await
    }

    #[instrument(skip(self))]
    async fn subtract_limit(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        amount: u64,
        idempotency_key: &str,
    ) -> QuotaResult<u64> {
        adjust_limit(&self.client, user_id, resource, period, "", -(amount as i64), idempotency_key).await
    }

    #[instrument(skip(self))]
    async fn get_consumption_record(&self, user_id: &str, idempotency_key: &str) -> QuotaResult<Option<ConsumptionRecord>> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let mut rows = conn
            .query(
                "SELECT resource, amount, period_start, period_end, period_type, new_used, timestamp, expires_at, metadata
                 FROM consumption_records WHERE user_id = ?1 AND consumption_id = ?2",
                params![user_id, idempotency_key],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let Some(row) = rows.next().await.map_err(DbError::from).map_err(map_db)? else {
            return Ok(None);
        };

        let resource: String = row.get(0).map_err(DbError::from).map_err(map_db)?;
        let amount: i64 = row.get(1).map_err(DbError::from).map_err(map_db)?;
        let period_start: String = row.get(2).map_err(DbError::from).map_err(map_db)?;
        let period_end: Option<String> = row.get(3).map_err(DbError::from).map_err(map_db)?;
        let period_type: String = row.get(4).map_err(DbError::from).map_err(map_db)?;
        let new_used: i64 = row.get(5).map_err(DbError::from).map_err(map_db)?;
        let timestamp: String = row.get(6).map_err(DbError::from).map_err(map_db)?;
        let expires_at: String = row.get(7).map_err(DbError::from).map_err(map_db)?;
        let metadata: Option<String> = row.get(8).map_err(DbError::from).map_err(map_db)?;

        Ok(Some(ConsumptionRecord {
            user_id: user_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            resource,
            amount: amount as u64,
            period_start: parse_rfc3339(&period_start)?,
            period_end: end_from_string(period_end)?,
            period_kind: period_kind_from_str(&period_type)
                .ok_or_else(|| QuotaError::storage(DbError::MappingError(format!("unknown period_type {period_type}"))))?,
            new_used: new_used as u64,
            timestamp: parse_rfc3339(&timestamp)?,
            expires_at: parse_rfc3339(&expires_at)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        }))
    }

    #[instrument(skip(self))]
    async fn get_refund_record(&self, user_id: &str, idempotency_key: &str) -> QuotaResult<Option<RefundRecord>> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let mut rows = conn
            .query(
                "SELECT resource, amount, period_start, period_end, period_type, timestamp, expires_at, reason, metadata, new_used
                 FROM refund_records WHERE user_id = ?1 AND refund_id = ?2",
                params![user_id, idempotency_key],
            )
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;

        let Some(row) = rows.next().await.map_err(DbError::from).map_err(map_db)? else {
            return Ok(None);
        };

        let resource: String = row.get(0).map_err(DbError::from).map_err(map_db)?;
        let amount: i64 = row.get(1).map_err(DbError::from).map_err(map_db)?;
        let period_start: String = row.get(2).map_err(DbError::from).map_err(map_db)?;
        let period_end: Option<String> = row.get(3).map_err(DbError::from).map_err(map_db)?;
        let period_type: String = row.get(4).map_err(DbError::from).map_err(map_db)?;
        let timestamp: String = row.get(5).map_err(DbError::from).map_err(map_db)?;
        let expires_at: String = row.get(6).map_err(DbError::from).map_err(map_db)?;
        let reason: Option<String> = row.get(7).map_err(DbError::from).map_err(map_db)?;
        let metadata: Option<String> = row.get(8).map_err(DbError::from).map_err(map_db)?;
        let new_used: i64 = row.get(9).map_err(DbError::from).map_err(map_db)?;

        Ok(Some(RefundRecord {
            user_id: user_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            resource,
            amount: amount as u64,
            period_start: parse_rfc3339(&period_start)?,
            period_end: end_from_string(period_end)?,
            period_kind: period_kind_from_str(&period_type)
                .ok_or_else(|| QuotaError::storage(DbError::MappingError(format!("unknown period_type {period_type}"))))?,
            new_used: new_used as u64,
            timestamp: parse_rfc3339(&timestamp)?,
            expires_at: parse_rfc3339(&expires_at)?,
            reason,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        }))
    }

    /// The SQL backend does not keep rate-limiter state of its own — use
    /// `quotaforge-storage-memory` or `quotaforge-storage-redis` for
    /// rate limiting alongside this backend for quotas.
    async fn check_rate_limit(&self, _request: RateLimitRequest<'_>) -> QuotaResult<RateLimitDecision> {
        Err(QuotaError::Configuration(
            "the SQL backend does not implement rate limiting; pair it with an in-memory or Redis limiter".into(),
        ))
    }

    #[instrument(skip(self))]
    async fn sweep_expired(&self, now: DateTime<Utc>) -> QuotaResult<u64> {
        let conn = self.client.get_connection().map_err(map_db)?;
        let now_str = now.to_rfc3339();
        let deleted_consumption = conn
            .execute("DELETE FROM consumption_records WHERE expires_at < ?1", params![now_str.clone()])
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;
        let deleted_refund = conn
            .execute("DELETE FROM refund_records WHERE expires_at < ?1", params![now_str])
            .await
            .map_err(DbError::from)
            .map_err(map_db)?;
        Ok(deleted_consumption + deleted_refund)
    }
}

async fn lookup_consumption(tx: &libsql::Transaction, user_id: &str, key: &str) -> QuotaResult<Option<u64>> {
    let mut rows = tx
        .query(
            "SELECT new_used FROM consumption_records WHERE user_id = ?1 AND consumption_id = ?2",
            params![user_id, key],
        )
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;

    match rows.next().await.map_err(DbError::from).map_err(map_db)? {
        Some(row) => {
            let new_used: i64 = row.get(0).map_err(DbError::from).map_err(map_db)?;
            Ok(Some(new_used as u64))
        }
        None => Ok(None),
    }
}

async fn current_usage_amount(tx: &libsql::Transaction, user_id: &str, resource: &str, period_start: DateTime<Utc>) -> QuotaResult<u64> {
    let mut rows = tx
        .query(
            "SELECT usage_amount FROM quota_usage WHERE user_id = ?1 AND resource = ?2 AND period_start = ?3",
            params![user_id, resource, period_start.to_rfc3339()],
        )
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;

    match rows.next().await.map_err(DbError::from).map_err(map_db)? {
        Some(row) => {
            let used: i64 = row.get(0).map_err(DbError::from).map_err(map_db)?;
            Ok(used as u64)
        }
        None => Ok(0),
    }
}

fn row_to_usage(user_id: &str, resource: &str, period_start: DateTime<Utc>, row: libsql::Row) -> QuotaResult<UsageRecord> {
    let period_end: Option<String> = row.get(0).map_err(DbError::from).map_err(map_db)?;
    let period_type: String = row.get(1).map_err(DbError::from).map_err(map_db)?;
    let usage_amount: i64 = row.get(2).map_err(DbError::from).map_err(map_db)?;
    let limit_amount: i64 = row.get(3).map_err(DbError::from).map_err(map_db)?;
    let tier: String = row.get(4).map_err(DbError::from).map_err(map_db)?;
    let updated_at: String = row.get(5).map_err(DbError::from).map_err(map_db)?;

    Ok(UsageRecord {
        user_id: user_id.to_string(),
        resource: resource.to_string(),
        period_start,
        period_end: end_from_string(period_end)?,
        period_kind: period_kind_from_str(&period_type)
            .ok_or_else(|| QuotaError::storage(DbError::MappingError(format!("unknown period_type {period_type}"))))?,
        used: usage_amount as u64,
        limit: limit_amount as u64,
        tier_name: tier,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

async fn upsert_usage_row(conn: &libsql::Connection, usage: &UsageRecord) -> QuotaResult<()> {
    conn.execute(
        "INSERT INTO quota_usage (user_id, resource, period_start, period_end, period_type, usage_amount, limit_amount, tier, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(user_id, resource, period_start) DO UPDATE SET
           usage_amount = excluded.usage_amount,
           limit_amount = excluded.limit_amount,
           tier = excluded.tier,
           updated_at = excluded.updated_at",
        params![
            usage.user_id.clone(),
            usage.resource.clone(),
            usage.period_start.to_rfc3339(),
            end_to_string(usage.period_end),
            period_kind_as_str(usage.period_kind),
            usage.used as i64,
            usage.limit as i64,
            usage.tier_name.clone(),
            usage.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(DbError::from)
    .map_err(map_db)?;
    Ok(())
}

async fn adjust_limit(
    client: &TursoClient,
    user_id: &str,
    resource: &str,
    period: Period,
    tier_name: &str,
    delta: i64,
    idempotency_key: &str,
) -> QuotaResult<u64> {
    let conn = client.get_connection().map_err(map_db)?;
    let tx = conn.transaction().await.map_err(DbError::from).map_err(map_db)?;

    let mut seen = tx
        .query("SELECT 1 FROM consumption_records WHERE user_id = ?1 AND consumption_id = ?2", params![user_id, idempotency_key])
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;
    if seen.next().await.map_err(DbError::from).map_err(map_db)?.is_some() {
        return Err(QuotaError::IdempotencyExists);
    }

    tx.execute(
        "INSERT INTO quota_usage (user_id, resource, period_start, period_end, period_type, usage_amount, limit_amount, tier, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7)
         ON CONFLICT(user_id, resource, period_start) DO NOTHING",
        params![
            user_id,
            resource,
            period.start.to_rfc3339(),
            end_to_string(period.end),
            period_kind_as_str(period.kind),
            tier_name,
            period.start.to_rfc3339(),
        ],
    )
    .await
    .map_err(DbError::from)
    .map_err(map_db)?;

    let new_limit = if delta >= 0 {
        tx.execute(
            "UPDATE quota_usage SET limit_amount = limit_amount + ?1 WHERE user_id = ?2 AND resource = ?3 AND period_start = ?4",
            params![delta, user_id, resource, period.start.to_rfc3339()],
        )
        .await
    } else {
        tx.execute(
            "UPDATE quota_usage SET limit_amount = MAX(0, limit_amount + ?1) WHERE user_id = ?2 AND resource = ?3 AND period_start = ?4",
            params![delta, user_id, resource, period.start.to_rfc3339()],
        )
        .await
    };
    new_limit.map_err(DbError::from).map_err(map_db)?;

    let mut rows = tx
        .query("SELECT limit_amount FROM quota_usage WHERE user_id = ?1 AND resource = ?2 AND period_start = ?3", params![user_id, resource, period.start.to_rfc3339()])
        .await
        .map_err(DbError::from)
        .map_err(map_db)?;
    let limit_amount: i64 = rows
        .next()
        .await
        .map_err(DbError::from)
        .map_err(map_db)?
        .ok_or_else(|| map_db(DbError::MappingError("usage row vanished mid-transaction".into())))?
        .get(0)
        .map_err(DbError::from)
        .map_err(map_db)?;

    tx.execute(
        "INSERT OR IGNORE INTO consumption_records
         (consumption_id, user_id, resource, amount, period_start, period_end, period_type, new_used, timestamp, expires_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
        params![
            idempotency_key,
            user_id,
            resource,
            delta.abs(),
            period.start.to_rfc3339(),
            end_to_string(period.end),
            period_kind_as_str(period.kind),
            limit_amount,
            period.start.to_rfc3339(),
            period.end.to_rfc3339(),
        ],
    )
    .await
    .map_err(DbError::from)
    .map_err(map_db)?;

    tx.commit().await.map_err(|e| map_db(DbError::TransactionError(e.to_string())))?;
    Ok(limit_amount as u64)
}
