// [libs/infra/storage-redis/src/lib.rs]
//! Redis-backed `QuotaStorage`, fit for a multi-writer deployment where
//! every instance needs to see the same counters with sub-millisecond
//! latency. Rate limiting lives here too, unlike the SQL backend — a
//! token bucket or sliding window is exactly the workload Redis's
//! in-memory data structures and scripting were built for.

pub mod errors;
pub mod lua;
pub mod storage;

pub use errors::RedisStoreError;
pub use storage::RedisStorage;
