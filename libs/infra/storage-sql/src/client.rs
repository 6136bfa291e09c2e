// [libs/infra/storage-sql/src/client.rs]
//! Connection management: local file, remote libSQL, or an in-memory
//! database anchored by a held connection so SQLite does not tear the
//! schema down between uses.

use crate::errors::DbError;
use crate::schema::apply_quota_schema;
use libsql::{Builder, Connection, Database};
use std::sync::Arc;
use tracing::{error, info, instrument};

#[derive(Clone)]
pub struct TursoClient {
    driver: Arc<Database>,
    /// Keeps an in-memory database alive across calls; SQLite drops a
    /// `:memory:` database's contents once its last connection closes.
    _memory_anchor: Option<Arc<Connection>>,
}

impl TursoClient {
    #[instrument(skip(access_token))]
    pub async fn connect(connection_url: &str, access_token: Option<String>) -> Result<Self, DbError> {
        if connection_url.is_empty() {
            return Err(DbError::ConnectionError("database url is empty".into()));
        }

        info!(connection_url, "connecting to quota storage backend");

        let is_remote = connection_url.starts_with("libsql://") || connection_url.starts_with("https://");
        let is_memory = connection_url.contains(":memory:") || connection_url.contains("mode=memory");

        let driver = if is_remote {
            let token = access_token
                .ok_or_else(|| DbError::ConnectionError("remote connection requires an access token".into()))?;
            Builder::new_remote(connection_url.to_string(), token).build().await
        } else {
            Builder::new_local(connection_url).build().await
        }
        .map_err(|e| DbError::ConnectionError(format!("failed to open database driver: {e}")))?;

        let driver = Arc::new(driver);
        let mut anchor = None;

        if is_memory {
            let anchor_conn = driver
                .connect()
                .map_err(|e| DbError::ConnectionError(format!("failed to open memory anchor: {e}")))?;
            apply_quota_schema(&anchor_conn)
                .await
                .map_err(|e| DbError::ConnectionError(format!("schema bootstrap failed: {e}")))?;
            anchor = Some(Arc::new(anchor_conn));
        } else {
            let bootstrap_conn = driver
                .connect()
                .map_err(|e| DbError::ConnectionError(format!("failed to open bootstrap connection: {e}")))?;
            apply_quota_schema(&bootstrap_conn)
                .await
                .map_err(|e| DbError::ConnectionError(format!("schema bootstrap failed: {e}")))?;
        }

        Ok(Self {
            driver,
            _memory_anchor: anchor,
        })
    }

    pub fn get_connection(&self) -> Result<Connection, DbError> {
        self.driver.connect().map_err(|e| {
            error!(error = %e, "failed to allocate a connection");
            DbError::ConnectionError(e.to_string())
        })
    }
}
