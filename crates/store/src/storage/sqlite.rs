//! SQLite 存储后端实现
//!
//! 使用 sqlx 提供原生异步 SQLite 存储支持

use crate::error::{StoreError, StoreResult};
use crate::storage::backend::{AssociationRepository, NonceRepository};
use crate::storage::config::SqliteConfig;
use crate::storage::{AssociationRow, association_from_row, lifetime_to_i64};
use crate::types::{Association, target_digest, unix_now};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// 按配置创建 SQLite 连接池
///
/// 启用 WAL 模式，数据库文件不存在时自动创建
pub async fn connect(config: &SqliteConfig) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))
        .map_err(|e| StoreError::Config(format!("Failed to parse SQLite path: {e}")))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    info!(
        "SQLite pool opened: path={}, max_connections={}, WAL mode enabled",
        config.path, config.max_connections
    );

    Ok(pool)
}

/// SQLite 关联仓储
#[derive(Clone, Debug)]
pub struct SqliteAssociationStore {
    pool: SqlitePool,
}

impl SqliteAssociationStore {
    /// 基于已有连接池创建仓储（不建表，需调用 `init`）
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssociationRepository for SqliteAssociationStore {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_associations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_url TEXT NOT NULL,
                target TEXT NOT NULL,
                handle TEXT NOT NULL,
                secret BLOB NOT NULL,
                issued_at INTEGER NOT NULL,
                lifetime INTEGER NOT NULL,
                assoc_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(server_url, handle)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_openid_associations_target ON openid_associations(target)",
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite openid_associations table initialized");
        Ok(())
    }

    async fn insert(&self, server_url: &str, association: &Association) -> StoreResult<bool> {
        let lifetime = lifetime_to_i64(association.lifetime)?;

        let result = sqlx::query(
            r#"INSERT INTO openid_associations
                   (server_url, target, handle, secret, issued_at, lifetime, assoc_type, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(server_url, handle) DO NOTHING"#,
        )
        .bind(server_url)
        .bind(target_digest(server_url))
        .bind(&association.handle)
        .bind(&association.secret)
        .bind(association.issued_at.timestamp())
        .bind(lifetime)
        .bind(&association.assoc_type)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(
        &self,
        server_url: &str,
        handle: &str,
        now: i64,
    ) -> StoreResult<Option<Association>> {
        let row = sqlx::query_as::<_, AssociationRow>(
            r#"SELECT handle, secret, issued_at, lifetime, assoc_type
               FROM openid_associations
               WHERE server_url = ?1 AND handle = ?2 AND lifetime >= ?3 - issued_at"#,
        )
        .bind(server_url)
        .bind(handle)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(association_from_row).transpose()
    }

    async fn find_latest(&self, server_url: &str, now: i64) -> StoreResult<Option<Association>> {
        let row = sqlx::query_as::<_, AssociationRow>(
            r#"SELECT handle, secret, issued_at, lifetime, assoc_type
               FROM openid_associations
               WHERE target = ?1 AND server_url = ?2 AND lifetime >= ?3 - issued_at
               ORDER BY issued_at DESC, id DESC
               LIMIT 1"#,
        )
        .bind(target_digest(server_url))
        .bind(server_url)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(association_from_row).transpose()
    }

    async fn delete(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM openid_associations WHERE server_url = ?1 AND handle = ?2")
                .bind(server_url)
                .bind(handle)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM openid_associations WHERE lifetime < ?1 - issued_at")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM openid_associations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}

/// SQLite nonce 仓储
#[derive(Clone, Debug)]
pub struct SqliteNonceStore {
    pool: SqlitePool,
}

impl SqliteNonceStore {
    /// 基于已有连接池创建仓储（不建表，需调用 `init`）
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceRepository for SqliteNonceStore {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_nonces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                server_url TEXT NOT NULL,
                target TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                salt TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(server_url, timestamp, salt)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_openid_nonces_timestamp_target ON openid_nonces(timestamp, target)",
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite openid_nonces table initialized");
        Ok(())
    }

    async fn claim(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO openid_nonces (server_url, target, timestamp, salt, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(server_url, timestamp, salt) DO NOTHING"#,
        )
        .bind(server_url)
        .bind(target_digest(server_url))
        .bind(timestamp)
        .bind(salt)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_older_than(&self, cutoff: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM openid_nonces WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM openid_nonces")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
