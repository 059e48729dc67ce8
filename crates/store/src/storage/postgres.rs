//! PostgreSQL 存储后端实现
//!
//! 使用 sqlx 提供 PostgreSQL 存储支持

use crate::error::StoreResult;
use crate::storage::backend::{AssociationRepository, NonceRepository};
use crate::storage::config::PostgresConfig;
use crate::storage::{AssociationRow, association_from_row, lifetime_to_i64};
use crate::types::{Association, target_digest, unix_now};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

/// 按配置创建 PostgreSQL 连接池
pub async fn connect(config: &PostgresConfig) -> StoreResult<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .password(&config.password);

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect_with(options)
        .await?;

    info!(
        "PostgreSQL pool opened: host={}:{}, db={}, pool_size={}",
        config.host, config.port, config.database, config.pool_size
    );

    Ok(pool)
}

/// PostgreSQL 关联仓储
#[derive(Clone, Debug)]
pub struct PgAssociationStore {
    pool: PgPool,
}

impl PgAssociationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssociationRepository for PgAssociationStore {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_associations (
                id BIGSERIAL PRIMARY KEY,
                server_url TEXT NOT NULL,
                target VARCHAR(32) NOT NULL,
                handle TEXT NOT NULL,
                secret BYTEA NOT NULL,
                issued_at BIGINT NOT NULL,
                lifetime BIGINT NOT NULL,
                assoc_type TEXT NOT NULL,
                created_at BIGINT NOT NULL,
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

        debug!("PostgreSQL openid_associations table initialized");
        Ok(())
    }

    async fn insert(&self, server_url: &str, association: &Association) -> StoreResult<bool> {
        let lifetime = lifetime_to_i64(association.lifetime)?;

        let result = sqlx::query(
            r#"INSERT INTO openid_associations
                   (server_url, target, handle, secret, issued_at, lifetime, assoc_type, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (server_url, handle) DO NOTHING"#,
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
               WHERE server_url = $1 AND handle = $2 AND lifetime >= $3 - issued_at"#,
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
               WHERE target = $1 AND server_url = $2 AND lifetime >= $3 - issued_at
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
            sqlx::query("DELETE FROM openid_associations WHERE server_url = $1 AND handle = $2")
                .bind(server_url)
                .bind(handle)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM openid_associations WHERE lifetime < $1 - issued_at")
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

/// PostgreSQL nonce 仓储
#[derive(Clone, Debug)]
pub struct PgNonceStore {
    pool: PgPool,
}

impl PgNonceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceRepository for PgNonceStore {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS openid_nonces (
                id BIGSERIAL PRIMARY KEY,
                server_url TEXT NOT NULL,
                target VARCHAR(32) NOT NULL,
                timestamp BIGINT NOT NULL,
                salt TEXT NOT NULL,
                created_at BIGINT NOT NULL,
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

        debug!("PostgreSQL openid_nonces table initialized");
        Ok(())
    }

    async fn claim(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO openid_nonces (server_url, target, timestamp, salt, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (server_url, timestamp, salt) DO NOTHING"#,
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
        let result = sqlx::query("DELETE FROM openid_nonces WHERE timestamp < $1")
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
