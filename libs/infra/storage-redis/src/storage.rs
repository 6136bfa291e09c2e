// [libs/infra/storage-redis/src/storage.rs]
//! `QuotaStorage` over Redis. Every multi-key mutation is a `redis::Script`
//! invocation — atomic by construction, no `WATCH`/`MULTI` retry loop needed.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use quotaforge_core::{period_kind_as_str, period_kind_from_str, ConsumeRequest, QuotaOutcome, QuotaStorage, RateLimitRequest};
use quotaforge_domain_models::{
    ConsumptionRecord, Entitlement, Period, QuotaError, QuotaResult, RateLimitAlgorithm,
    RateLimitDecision, RefundRecord, UsageRecord,
};
use tracing::instrument;

use crate::errors::RedisStoreError;
use crate::lua;

pub struct RedisStorage {
    manager: ConnectionManager,
    key_prefix: String,
}

impl RedisStorage {
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self, RedisStoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            key_prefix: key_prefix.into(),
        })
    }

    fn entitlement_key(&self, user_id: &str) -> String {
        format!("{}:entitlement:{}", self.key_prefix, user_id)
    }

    fn usage_key(&self, user_id: &str, resource: &str, period_start: DateTime<Utc>) -> String {
        format!("{}:usage:{}:{}:{}", self.key_prefix, user_id, resource, period_start.timestamp())
    }

    fn consumption_key(&self, user_id: &str, idempotency_key: &str) -> String {
        format!("{}:consume:{}:{}", self.key_prefix, user_id, idempotency_key)
    }

    fn refund_key(&self, user_id: &str, idempotency_key: &str) -> String {
        format!("{}:refund:{}:{}", self.key_prefix, user_id, idempotency_key)
    }

    fn topup_key(&self, user_id: &str, resource: &str, idempotency_key: &str) -> String {
        format!("{}:topup:{}:{}:{}", self.key_prefix, user_id, resource, idempotency_key)
    }

    fn bucket_key(&self, user_id: &str, resource: &str) -> String {
        format!("{}:bucket:{}:{}", self.key_prefix, user_id, resource)
    }

    fn window_key(&self, user_id: &str, resource: &str) -> String {
        format!("{}:window:{}:{}", self.key_prefix, user_id, resource)
    }
}

fn map_err(err: impl Into<RedisStoreError>) -> QuotaError {
    err.into().into()
}

#[async_trait]
impl QuotaStorage for RedisStorage {
    #[instrument(skip(self))]
    async fn get_entitlement(&self, user_id: &str) -> QuotaResult<Option<Entitlement>> {
        let mut conn = self.manager.clone();
        let fields: Vec<(String, String)> = conn
            .hgetall(self.entitlement_key(user_id))
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut tier_id = None;
        let mut subscription_start = None;
        let mut expires_at = None;
        let mut updated_at = None;
        for (field, value) in fields {
            match field.as_str() {
                "tier_id" => tier_id = Some(value),
                "subscription_start" if !value.is_empty() => subscription_start = Some(value),
                "expires_at" if !value.is_empty() => expires_at = Some(value),
                "updated_at" => updated_at = Some(value),
                _ => {}
            }
        }

        let tier_id = tier_id.ok_or_else(|| map_err(RedisStoreError::Mapping("entitlement missing tier_id".into())))?;
        let updated_at = updated_at.ok_or_else(|| map_err(RedisStoreError::Mapping("entitlement missing updated_at".into())))?;

        let mut entitlement = Entitlement::new(user_id, tier_id, parse_rfc3339(&updated_at)?);
        if let Some(start) = subscription_start {
            entitlement = entitlement.with_subscription_start(
                NaiveDate::parse_from_str(&start, "%Y-%m-%d").map_err(|e| map_err(RedisStoreError::Mapping(e.to_string())))?,
            );
        }
        if let Some(expiry) = expires_at {
            entitlement = entitlement.with_expiry(parse_rfc3339(&expiry)?);
        }

        Ok(Some(entitlement))
    }

    #[instrument(skip(self, entitlement))]
    async fn set_entitlement(&self, entitlement: Entitlement) -> QuotaResult<()> {
        let mut conn = self.manager.clone();
        Script::new(lua::SET_ENTITLEMENT)
            .key(self.entitlement_key(&entitlement.user_id))
            .arg(entitlement.tier_name.clone())
            .arg(entitlement.subscription_start_date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default())
            .arg(entitlement.expires_at.map(|dt| dt.to_rfc3339()).unwrap_or_default())
            .arg(entitlement.updated_at.to_rfc3339())
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_usage(&self, user_id: &str, resource: &str, period_start: DateTime<Utc>) -> QuotaResult<Option<UsageRecord>> {
        let mut conn = self.manager.clone();
        let fields: Vec<(String, String)> = conn
            .hgetall(self.usage_key(user_id, resource, period_start))
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        if fields.is_empty() {
            return Ok(None);
        }
        fields_to_usage(user_id, resource, period_start, fields).map(Some)
    }

    #[instrument(skip(self, usage))]
    async fn set_usage(&self, usage: UsageRecord) -> QuotaResult<()> {
        let mut conn = self.manager.clone();
        let key = self.usage_key(&usage.user_id, &usage.resource, usage.period_start);
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("used", usage.used.to_string()),
                    ("limit", usage.limit.to_string()),
                    ("tier", usage.tier_name.clone()),
                    ("period_end", usage.period_end.timestamp().to_string()),
                    ("period_kind", period_kind_as_str(usage.period_kind).to_string()),
                    ("updated_at", usage.updated_at.to_rfc3339()),
                ],
            )
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn consume_quota(&self, request: ConsumeRequest) -> QuotaResult<QuotaOutcome> {
        let mut conn = self.manager.clone();
        let usage_key = self.usage_key(&request.user_id, &request.resource, request.period.start);
        let record_key = request
            .idempotency_key
            .as_ref()
            .map(|k| self.consumption_key(&request.user_id, k))
            .unwrap_or_default();

        let ttl_seconds = request.idempotency_ttl.num_seconds().max(1);
        let result: Vec<i64> = Script::new(lua::CONSUME)
            .key(usage_key)
            .key(record_key)
            .arg(request.amount)
            .arg(request.limit)
            .arg(request.tier_name.clone())
            .arg(request.resource.clone())
            .arg(request.period.start.timestamp())
            .arg(request.period.end.timestamp())
            .arg(period_kind_as_str(request.period.kind))
            .arg(request.now.to_rfc3339())
            .arg((request.now + request.idempotency_ttl).to_rfc3339())
            .arg(ttl_seconds)
            .arg(request.metadata.as_ref().map(|m| m.to_string()).unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        let [new_used, exceeded] = result[..] else {
            return Err(map_err(RedisStoreError::Mapping("unexpected consume script reply shape".into())));
        };

        Ok(QuotaOutcome {
            new_used: new_used as u64,
            limit: request.limit,
            exceeded: exceeded != 0,
        })
    }

    #[instrument(skip(self, request))]
    async fn refund_quota(&self, request: quotaforge_core::RefundRequest) -> QuotaResult<QuotaOutcome> {
        let mut conn = self.manager.clone();
        let usage_key = self.usage_key(&request.user_id, &request.resource, request.period.start);
        let record_key = request
            .idempotency_key
            .as_ref()
            .map(|k| self.refund_key(&request.user_id, k))
            .unwrap_or_default();

        let ttl_seconds = request.idempotency_ttl.num_seconds().max(1);
        let new_used: i64 = Script::new(lua::REFUND)
            .key(usage_key)
            .key(record_key)
            .arg(request.amount)
            .arg(request.resource.clone())
            .arg(request.period.start.timestamp())
            .arg(request.period.end.timestamp())
            .arg(period_kind_as_str(request.period.kind))
            .arg(request.now.to_rfc3339())
            .arg((request.now + request.idempotency_ttl).to_rfc3339())
            .arg(ttl_seconds)
            .arg(request.reason.clone().unwrap_or_default())
            .arg(request.metadata.as_ref().map(|m| m.to_string()).unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        Ok(QuotaOutcome {
            new_used: new_used as u64,
            limit: 0,
            exceeded: false,
        })
    }

    #[instrument(skip(self))]
    async fn apply_tier_change(&self, user_id: &str, resource: &str, period: Period, new_limit: u64, new_tier: &str) -> QuotaResult<()> {
        let mut conn = self.manager.clone();
        let key = self.usage_key(user_id, resource, period.start);
        let _: () = conn
            .hset_multiple(
                &key,
                &[
                    ("limit", new_limit.to_string()),
                    ("tier", new_tier.to_string()),
                    ("period_end", period.end.timestamp().to_string()),
                    ("period_kind", period_kind_as_str(period.kind).to_string()),
                    ("updated_at", Utc::now().to_rfc3339()),
                ],
            )
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;
        let _: () = conn.hset_nx(&key, "used", 0).await.map_err(RedisStoreError::from).map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_limit(&self, user_id: &str, resource: &str, period: Period, tier_name: &str, amount: u64, idempotency_key: &str) -> QuotaResult<u64> {
        adjust_limit(self, user_id, resource, period, tier_name, amount as i64, idempotency_key).await
    }

    #[instrument(skip(self))]
    async fn subtract_limit(&self, user_id: &str, resource: &str, period: Period, amount: u64, idempotency_key: &str) -> QuotaResult<u64> {
        adjust_limit(self, user_id, resource, period, "", -(amount as i64), idempotency_key).await
    }

    #[instrument(skip(self))]
    async fn get_consumption_record(&self, user_id: &str, idempotency_key: &str) -> QuotaResult<Option<ConsumptionRecord>> {
        let mut conn = self.manager.clone();
        let fields: Vec<(String, String)> = conn
            .hgetall(self.consumption_key(user_id, idempotency_key))
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut map = std::collections::HashMap::new();
        for (k, v) in fields {
            map.insert(k, v);
        }

        Ok(Some(ConsumptionRecord {
            user_id: user_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            resource: map.get("resource").cloned().unwrap_or_default(),
            amount: map.get("amount").and_then(|v| v.parse().ok()).unwrap_or(0),
            period_start: map.get("period_start").and_then(|v| v.parse().ok()).map(|e| Utc.timestamp_opt(e, 0).unwrap()).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
            period_end: map.get("period_end").and_then(|v| v.parse().ok()).map(|e| Utc.timestamp_opt(e, 0).unwrap()).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
            period_kind: map.get("period_kind").and_then(|v| period_kind_from_str(v)).ok_or_else(|| map_err(RedisStoreError::Mapping("consumption record missing period_kind".into())))?,
            new_used: map.get("new_used").and_then(|v| v.parse().ok()).unwrap_or(0),
            timestamp: parse_rfc3339(map.get("timestamp").map(String::as_str).unwrap_or_default())?,
            expires_at: parse_rfc3339(map.get("expires_at").map(String::as_str).unwrap_or_default())?,
            metadata: map.get("metadata").filter(|v| !v.is_empty()).and_then(|v| serde_json::from_str(v).ok()),
        }))
    }

    #[instrument(skip(self))]
    async fn get_refund_record(&self, user_id: &str, idempotency_key: &str) -> QuotaResult<Option<RefundRecord>> {
        let mut conn = self.manager.clone();
        let fields: Vec<(String, String)> = conn
            .hgetall(self.refund_key(user_id, idempotency_key))
            .await
            .map_err(RedisStoreError::from)
            .map_err(map_err)?;

        if fields.is_empty() {
            return Ok(None);
        }

        let mut map = std::collections::HashMap::new();
        for (k, v) in fields {
            map.insert(k, v);
        }

        Ok(Some(RefundRecord {
            user_id: user_id.to_string(),
            idempotency_key: idempotency_key.to_string(),
            resource: map.get("resource").cloned().unwrap_or_default(),
            amount: map.get("amount").and_then(|v| v.parse().ok()).unwrap_or(0),
            period_start: map.get("period_start").and_then(|v| v.parse().ok()).map(|e| Utc.timestamp_opt(e, 0).unwrap()).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
            period_end: map.get("period_end").and_then(|v| v.parse().ok()).map(|e| Utc.timestamp_opt(e, 0).unwrap()).unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
            period_kind: map.get("period_kind").and_then(|v| period_kind_from_str(v)).ok_or_else(|| map_err(RedisStoreError::Mapping("refund record missing period_kind".into())))?,
            new_used: map.get("new_used").and_then(|v| v.parse().ok()).unwrap_or(0),
            timestamp: parse_rfc3339(map.get("timestamp").map(String::as_str).unwrap_or_default())?,
            expires_at: parse_rfc3339(map.get("expires_at").map(String::as_str).unwrap_or_default())?,
            reason: map.get("reason").filter(|v| !v.is_empty()).cloned(),
            metadata: map.get("metadata").filter(|v| !v.is_empty()).and_then(|v| serde_json::from_str(v).ok()),
        }))
    }

    #[instrument(skip(self, request))]
    async fn check_rate_limit(&self, request: RateLimitRequest<'_>) -> QuotaResult<RateLimitDecision> {
        let mut conn = self.manager.clone();
        let now_millis = request.now.timestamp_millis();

        match request.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                let config = request
                    .token_bucket
                    .ok_or_else(|| QuotaError::InvalidAmount("token_bucket config required for TokenBucket algorithm".into()))?;

                let result: Vec<String> = Script::new(lua::TOKEN_BUCKET)
                    .key(self.bucket_key(request.user_id, request.resource))
                    .arg(config.burst)
                    .arg(config.rate)
                    .arg(config.window_seconds)
                    .arg(now_millis)
                    .arg(config.window_seconds * 2)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(RedisStoreError::from)
                    .map_err(map_err)?;

                let tokens_milli: f64 = result[0].parse().map_err(|_| map_err(RedisStoreError::Mapping("bad token bucket reply".into())))?;
                let allowed = result[1] == "1";

                Ok(RateLimitDecision {
                    allowed,
                    remaining: (tokens_milli / 1000.0) as u64,
                    reset_at: request.now + chrono::Duration::seconds(config.window_seconds as i64),
                })
            }
            RateLimitAlgorithm::SlidingWindow => {
                let config = request
                    .sliding_window
                    .ok_or_else(|| QuotaError::InvalidAmount("sliding_window config required for SlidingWindow algorithm".into()))?;

                let member = format!("{now_millis}:{}", uuid::Uuid::new_v4());
                let result: Vec<i64> = Script::new(lua::SLIDING_WINDOW)
                    .key(self.window_key(request.user_id, request.resource))
                    .arg(config.rate)
                    .arg(config.window_seconds)
                    .arg(now_millis)
                    .arg(member)
                    .arg(config.window_seconds * 2)
                    .invoke_async(&mut conn)
                    .await
                    .map_err(RedisStoreError::from)
                    .map_err(map_err)?;

                let [allowed, count] = result[..] else {
                    return Err(map_err(RedisStoreError::Mapping("unexpected sliding window reply shape".into())));
                };

                Ok(RateLimitDecision {
                    allowed: allowed != 0,
                    remaining: config.rate.saturating_sub(count as u64),
                    reset_at: request.now + chrono::Duration::seconds(config.window_seconds as i64),
                })
            }
        }
    }

    /// Usage and idempotency keys already carry a Redis `EXPIRE`; there is
    /// nothing left for a sweep to reclaim.
    async fn sweep_expired(&self, _now: DateTime<Utc>) -> QuotaResult<u64> {
        Ok(0)
    }
}

async fn adjust_limit(
    storage: &RedisStorage,
    user_id: &str,
    resource: &str,
    period: Period,
    tier_name: &str,
    delta: i64,
    idempotency_key: &str,
) -> QuotaResult<u64> {
    let mut conn = storage.manager.clone();
    let new_limit: i64 = Script::new(lua::ADJUST_LIMIT)
        .key(storage.usage_key(user_id, resource, period.start))
        .key(storage.topup_key(user_id, resource, idempotency_key))
        .arg(delta)
        .arg(tier_name)
        .arg(period.end.timestamp())
        .arg(period_kind_as_str(period.kind))
        .arg(Utc::now().to_rfc3339())
        .arg(86_400_i64)
        .invoke_async(&mut conn)
        .await
        .map_err(RedisStoreError::from)
        .map_err(map_err)?;

    if new_limit < 0 {
        return Err(QuotaError::IdempotencyExists);
    }
    Ok(new_limit as u64)
}

fn parse_rfc3339(value: &str) -> QuotaResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| map_err(RedisStoreError::Mapping(e.to_string())))
}

fn fields_to_usage(user_id: &str, resource: &str, period_start: DateTime<Utc>, fields: Vec<(String, String)>) -> QuotaResult<UsageRecord> {
    let mut map = std::collections::HashMap::new();
    for (k, v) in fields {
        map.insert(k, v);
    }

    let used: u64 = map.get("used").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: u64 = map.get("limit").and_then(|v| v.parse().ok()).unwrap_or(0);
    let tier_name = map.get("tier").cloned().unwrap_or_default();
    let period_end_epoch: i64 = map.get("period_end").and_then(|v| v.parse().ok()).unwrap_or(0);
    let period_kind = map
        .get("period_kind")
        .and_then(|v| period_kind_from_str(v))
        .ok_or_else(|| map_err(RedisStoreError::Mapping("usage row missing period_kind".into())))?;
    let updated_at = map.get("updated_at").map(|v| parse_rfc3339(v)).transpose()?.unwrap_or(period_start);

    Ok(UsageRecord {
        user_id: user_id.to_string(),
        resource: resource.to_string(),
        period_start,
        period_end: Utc.timestamp_opt(period_end_epoch, 0).unwrap(),
        period_kind,
        used,
        limit,
        tier_name,
        updated_at,
    })
}
