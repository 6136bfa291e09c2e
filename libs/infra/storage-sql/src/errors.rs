// [libs/infra/storage-sql/src/errors.rs]
//! Error catalog for the libSQL-backed adapter. Bracketed prefixes make
//! grepping production logs for a layer ("L3") or subsystem ("DB")
//! tractable; every variant converts into `QuotaError::StorageFailure`
//! at the trait boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("[L3_DB_NET_FAULT]: DATABASE_UPLINK_SEVERED -> {0}")]
    ConnectionError(String),

    #[error("[L3_DB_CONFIG_FAULT]: STRATEGIC_ENV_VOID -> {0}")]
    ConfigurationError(String),

    #[error("[L3_DB_QUERY_FAULT]: SQL_QUERY_REJECTED -> {0}")]
    QueryError(#[from] libsql::Error),

    #[error("[L3_DB_MAPPING_FAULT]: DATA_MAPPING_VIOLATION -> {0}")]
    MappingError(String),

    #[error("[L3_DB_FAULT]: TRANSACTION_COLLAPSE -> {0}")]
    TransactionError(String),

    #[error("[L3_QUOTA_FAULT]: IDEMPOTENCY_KEY_ALREADY_USED")]
    IdempotencyExists,
}

impl From<DbError> for quotaforge_domain_models::QuotaError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::IdempotencyExists => quotaforge_domain_models::QuotaError::IdempotencyExists,
            other => quotaforge_domain_models::QuotaError::storage(other),
        }
    }
}
