// [libs/infra/storage-redis/src/lua.rs]
//! Server-side scripts. Every mutating primitive that touches more than
//! one key runs as one script — Redis evaluates a script atomically, so
//! this gets us the same serialisability the SQL backend gets from a
//! transaction, without a round trip per step.

/// KEYS[1] = usage hash, KEYS[2] = consumption record hash (may be "").
/// ARGV: amount, limit, tier, resource, period_start_epoch, period_end_epoch,
/// period_kind, now_rfc3339, expires_at_rfc3339, ttl_seconds, metadata_json (may be "").
/// Returns `{new_used, exceeded}`.
pub const CONSUME: &str = r#"
local usage_key = KEYS[1]
local record_key = KEYS[2]

local amount = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local tier = ARGV[3]
local resource = ARGV[4]
local period_start = ARGV[5]
local period_end = ARGV[6]
local period_kind = ARGV[7]
local now = ARGV[8]
local expires_at = ARGV[9]
local ttl = tonumber(ARGV[10])
local metadata = ARGV[11]

if record_key ~= "" then
    local cached = redis.call("HGET", record_key, "new_used")
    if cached then
        return {tonumber(cached), 0}
    end
end

local used = tonumber(redis.call("HGET", usage_key, "used") or "0")
local new_used = used + amount

if new_used > limit then
    return {used, 1}
end

redis.call("HSET", usage_key, "used", new_used, "limit", limit, "tier", tier,
    "period_end", period_end, "period_kind", period_kind, "updated_at", now)
redis.call("EXPIREAT", usage_key, tonumber(period_end) + 86400)

if record_key ~= "" then
    redis.call("HSET", record_key, "new_used", new_used, "amount", amount, "resource", resource,
        "period_start", period_start, "period_end", period_end, "period_kind", period_kind,
        "timestamp", now, "expires_at", expires_at, "metadata", metadata)
    redis.call("EXPIRE", record_key, ttl)
end

return {new_used, 0}
"#;

/// KEYS[1] = usage hash, KEYS[2] = refund record hash (may be "").
/// ARGV: amount, resource, period_start_epoch, period_end_epoch, period_kind,
/// now_rfc3339, expires_at_rfc3339, ttl_seconds, reason (may be ""), metadata_json (may be "").
/// Returns the resulting `used`, floored at zero.
pub const REFUND: &str = r#"
local usage_key = KEYS[1]
local record_key = KEYS[2]

local amount = tonumber(ARGV[1])
local resource = ARGV[2]
local period_start = ARGV[3]
local period_end = ARGV[4]
local period_kind = ARGV[5]
local now = ARGV[6]
local expires_at = ARGV[7]
local ttl = tonumber(ARGV[8])
local reason = ARGV[9]
local metadata = ARGV[10]

if record_key ~= "" then
    local cached = redis.call("HGET", record_key, "new_used")
    if cached then
        return tonumber(cached)
    end
end

local used = tonumber(redis.call("HGET", usage_key, "used") or "0")
local new_used = used - amount
if new_used < 0 then
    new_used = 0
end

redis.call("HSET", usage_key, "used", new_used, "updated_at", now)

if record_key ~= "" then
    redis.call("HSET", record_key, "new_used", new_used, "amount", amount, "resource", resource,
        "period_start", period_start, "period_end", period_end, "period_kind", period_kind,
        "timestamp", now, "expires_at", expires_at, "reason", reason, "metadata", metadata)
    redis.call("EXPIRE", record_key, ttl)
end

return new_used
"#;

/// KEYS[1] = usage hash, KEYS[2] = top-up record hash.
/// ARGV: delta (signed), tier, period_end_epoch, period_kind, now_epoch, ttl_seconds.
/// Returns the new limit, or `-1` if the idempotency key was already seen.
pub const ADJUST_LIMIT: &str = r#"
local usage_key = KEYS[1]
local record_key = KEYS[2]

local delta = tonumber(ARGV[1])
local tier = ARGV[2]
local period_end = ARGV[3]
local period_kind = ARGV[4]
local now = ARGV[5]
local ttl = tonumber(ARGV[6])

if redis.call("EXISTS", record_key) == 1 then
    return -1
end

local limit = tonumber(redis.call("HGET", usage_key, "limit") or "0")
local new_limit = limit + delta
if new_limit < 0 then
    new_limit = 0
end

redis.call("HSET", usage_key, "limit", new_limit, "tier", tier, "period_end", period_end,
    "period_kind", period_kind, "updated_at", now)
redis.call("HSETNX", usage_key, "used", 0)
redis.call("EXPIREAT", usage_key, tonumber(period_end) + 86400)

redis.call("SET", record_key, new_limit, "EX", ttl)

return new_limit
"#;

/// KEYS[1] = entitlement hash. ARGV: tier_id, subscription_start (may be ""),
/// expires_at (may be ""), updated_at_epoch (string, compared lexically since
/// both sides are RFC 3339 and therefore order-preserving).
/// Applies last-writer-wins: a no-op if the stored `updated_at` is not older.
pub const SET_ENTITLEMENT: &str = r#"
local key = KEYS[1]
local tier_id = ARGV[1]
local subscription_start = ARGV[2]
local expires_at = ARGV[3]
local updated_at = ARGV[4]

local existing = redis.call("HGET", key, "updated_at")
if existing and existing >= updated_at then
    return 0
end

redis.call("HSET", key, "tier_id", tier_id, "subscription_start", subscription_start,
    "expires_at", expires_at, "updated_at", updated_at)
return 1
"#;

/// KEYS[1] = bucket hash. ARGV: capacity, rate_per_window, window_seconds, now_epoch_ms, ttl_seconds.
/// Mirrors `quotaforge_core::token_bucket_step` so both backends agree bit-for-bit.
/// Returns `{tokens_remaining_millis, allowed}`.
pub const TOKEN_BUCKET: &str = r#"
local bucket_key = KEYS[1]

local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local window_seconds = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local tokens = tonumber(redis.call("HGET", bucket_key, "tokens_milli") or tostring(capacity * 1000))
local last_refill = tonumber(redis.call("HGET", bucket_key, "last_refill") or tostring(now))

local elapsed = math.max(0, now - last_refill)
local refill_rate_per_ms = rate / (window_seconds * 1000)
tokens = math.min(capacity * 1000, tokens + elapsed * refill_rate_per_ms * 1000)

local allowed = 0
if tokens >= 1000 then
    tokens = tokens - 1000
    allowed = 1
end

redis.call("HSET", bucket_key, "tokens_milli", tokens, "last_refill", now)
redis.call("EXPIRE", bucket_key, ttl)

return {tostring(tokens), allowed}
"#;

/// KEYS[1] = window zset. ARGV: rate, window_seconds, now_epoch_ms, member_id, ttl_seconds.
/// Returns `{allowed, count_after}`.
pub const SLIDING_WINDOW: &str = r#"
local window_key = KEYS[1]

local rate = tonumber(ARGV[1])
local window_seconds = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]
local ttl = tonumber(ARGV[5])

local cutoff = now - (window_seconds * 1000)
redis.call("ZREMRANGEBYSCORE", window_key, "-inf", cutoff)

local count = redis.call("ZCARD", window_key)
local allowed = 0
if count < rate then
    redis.call("ZADD", window_key, now, member)
    allowed = 1
    count = count + 1
end

redis.call("EXPIRE", window_key, ttl)

return {allowed, count}
"#;
