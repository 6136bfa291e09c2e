// [libs/infra/storage-sql/src/lib.rs]
//! libSQL-backed `QuotaStorage`: a durable, transactional adapter
//! suited to a single-writer or few-writer deployment. Pair it with
//! `quotaforge-storage-memory` or `quotaforge-storage-redis` for the
//! rate-limiting primitives, which this backend does not implement.

pub mod client;
pub mod errors;
pub mod quota_repository;
pub mod schema;

pub use client::TursoClient;
pub use errors::DbError;
pub use quota_repository::SqlStorage;
