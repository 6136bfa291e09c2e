// [libs/infra/storage-redis/src/errors.rs]
//! Error catalog for the Redis-backed adapter. Every variant converts
//! into `QuotaError::StorageFailure` at the trait boundary, except the
//! idempotency-collision sentinel a Lua script signals explicitly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedisStoreError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("redis response could not be mapped to a domain value: {0}")]
    Mapping(String),

    #[error("idempotency key already used for this operation")]
    IdempotencyExists,
}

impl From<RedisStoreError> for quotaforge_domain_models::QuotaError {
    fn from(err: RedisStoreError) -> Self {
        match err {
            RedisStoreError::IdempotencyExists => quotaforge_domain_models::QuotaError::IdempotencyExists,
            other => quotaforge_domain_models::QuotaError::storage(other),
        }
    }
}
