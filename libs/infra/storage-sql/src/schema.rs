// [libs/infra/storage-sql/src/schema.rs]
//! The four normative tables and their accelerating indexes, applied
//! idempotently. `ALTER TABLE ... ADD COLUMN` failures whose message
//! contains "duplicate column name" are swallowed — that is libSQL's
//! way of saying "already at this revision," not a real fault.

use anyhow::{Context, Result};
use libsql::Connection;
use tracing::{debug, info, instrument, warn};

const TACTICAL_TABLES: &[(&str, &str)] = &[
    ("TABLE_ENTITLEMENTS", r#"
        CREATE TABLE IF NOT EXISTS entitlements (
            user_id TEXT PRIMARY KEY,
            tier_id TEXT NOT NULL,
            subscription_start TEXT,
            expires_at TEXT,
            updated_at TEXT NOT NULL
        );
    "#),
    ("TABLE_QUOTA_USAGE", r#"
        CREATE TABLE IF NOT EXISTS quota_usage (
            user_id TEXT NOT NULL,
            resource TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT,
            period_type TEXT NOT NULL,
            usage_amount INTEGER NOT NULL DEFAULT 0,
            limit_amount INTEGER NOT NULL DEFAULT 0,
            tier TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, resource, period_start)
        );
    "#),
    ("TABLE_CONSUMPTION_RECORDS", r#"
        CREATE TABLE IF NOT EXISTS consumption_records (
            consumption_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            resource TEXT NOT NULL,
            amount INTEGER NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT,
            period_type TEXT NOT NULL,
            new_used INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            metadata TEXT,
            UNIQUE(user_id, consumption_id)
        );
    "#),
    ("TABLE_REFUND_RECORDS", r#"
        CREATE TABLE IF NOT EXISTS refund_records (
            refund_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            resource TEXT NOT NULL,
            amount INTEGER NOT NULL,
            period_start TEXT NOT NULL,
            period_end TEXT,
            period_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            reason TEXT,
            metadata TEXT,
            new_used INTEGER NOT NULL,
            UNIQUE(user_id, refund_id)
        );
    "#),
];

const EVOLUTIONARY_STRATA: &[(&str, &str)] = &[
    ("ENTITLEMENTS_SUBSCRIPTION_START_BACKFILL", "ALTER TABLE entitlements ADD COLUMN subscription_start TEXT"),
];

const ACCELERATION_INDEXES: &[(&str, &str)] = &[
    ("IDX_USAGE_USER_RESOURCE", "CREATE INDEX IF NOT EXISTS idx_usage_user_resource ON quota_usage(user_id, resource);"),
    ("IDX_CONSUMPTION_EXPIRY", "CREATE INDEX IF NOT EXISTS idx_consumption_expiry ON consumption_records(expires_at);"),
    ("IDX_REFUND_EXPIRY", "CREATE INDEX IF NOT EXISTS idx_refund_expiry ON refund_records(expires_at);"),
];

#[instrument(skip(database_connection))]
pub async fn apply_quota_schema(database_connection: &Connection) -> Result<()> {
    info!("applying quota schema");
    solidify_base_strata(database_connection).await?;
    execute_evolutionary_repair(database_connection).await?;
    harden_access_layer(database_connection).await?;
    Ok(())
}

async fn solidify_base_strata(db: &Connection) -> Result<()> {
    for (identifier, sql) in TACTICAL_TABLES {
        debug!("  creating: {}", identifier);
        db.execute(sql, ()).await.with_context(|| format!("failed to create table {identifier}"))?;
    }
    Ok(())
}

async fn execute_evolutionary_repair(db: &Connection) -> Result<()> {
    for (identifier, sql) in EVOLUTIONARY_STRATA {
        match db.execute(sql, ()).await {
            Ok(_) => info!("applied evolutionary step {}", identifier),
            Err(e) => {
                let message = e.to_string();
                if message.contains("duplicate column name") {
                    debug!("{} already applied", identifier);
                } else {
                    warn!("{} could not be applied: {}", identifier, message);
                }
            }
        }
    }
    Ok(())
}

async fn harden_access_layer(db: &Connection) -> Result<()> {
    for (identifier, sql) in ACCELERATION_INDEXES {
        debug!("  indexing: {}", identifier);
        db.execute(sql, ()).await.with_context(|| format!("failed to create index {identifier}"))?;
    }
    Ok(())
}
