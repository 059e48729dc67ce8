//! 存储模块
//!
//! 提供 SQLite 与 PostgreSQL 两种后端
//!
//! # 设计
//!
//! - `AssociationRepository` / `NonceRepository` trait 定义各后端的统一异步接口
//! - `AssociationStore` / `NonceStore` enum 封装不同后端，并承载与后端无关的
//!   逻辑（过期时间计算、时钟偏差检查）
//! - `OpenIdStore` 通过 `StoreConfig` 选择后端并组合两个仓储

pub mod backend;
pub mod config;

// SQLite 始终可用
pub mod sqlite;

#[cfg(feature = "backend-postgres")]
pub mod postgres;

use crate::error::{StoreError, StoreResult};
use crate::nonce::is_within_skew;
use crate::types::{Association, StoreStats, unix_now};
use chrono::DateTime;
use tracing::{debug, info};

pub use backend::{AssociationRepository, NonceRepository};
pub use config::{NonceConfig, PostgresConfig, SqliteConfig, StorageBackend, StoreConfig};

use sqlite::{SqliteAssociationStore, SqliteNonceStore};

#[cfg(feature = "backend-postgres")]
use postgres::{PgAssociationStore, PgNonceStore};

/// 关联表查询结果行：`(handle, secret, issued_at, lifetime, assoc_type)`
pub(crate) type AssociationRow = (String, Vec<u8>, i64, i64, String);

pub(crate) fn association_from_row(row: AssociationRow) -> StoreResult<Association> {
    let (handle, secret, issued_at, lifetime, assoc_type) = row;

    let issued_at = DateTime::from_timestamp(issued_at, 0).ok_or_else(|| {
        StoreError::InvalidInput(format!("stored issued_at {issued_at} is out of range"))
    })?;
    let lifetime = u64::try_from(lifetime)
        .map_err(|_| StoreError::InvalidInput(format!("stored lifetime {lifetime} is negative")))?;

    Ok(Association {
        handle,
        secret,
        issued_at,
        lifetime,
        assoc_type,
    })
}

pub(crate) fn lifetime_to_i64(lifetime: u64) -> StoreResult<i64> {
    i64::try_from(lifetime)
        .map_err(|_| StoreError::InvalidInput(format!("lifetime {lifetime}s is too large")))
}

/// 关联存储
#[derive(Clone, Debug)]
pub enum AssociationStore {
    Sqlite(SqliteAssociationStore),

    #[cfg(feature = "backend-postgres")]
    Postgres(PgAssociationStore),
}

impl AssociationStore {
    fn repo(&self) -> &dyn AssociationRepository {
        match self {
            Self::Sqlite(r) => r,

            #[cfg(feature = "backend-postgres")]
            Self::Postgres(r) => r,
        }
    }

    /// 保存关联；`(server_url, handle)` 已存在时为空操作
    pub async fn store(&self, server_url: &str, association: &Association) -> StoreResult<()> {
        let inserted = self.repo().insert(server_url, association).await?;
        if inserted {
            debug!(
                "Stored association: server_url={}, handle={}, type={}",
                server_url, association.handle, association.assoc_type
            );
        } else {
            debug!(
                "Association already present, ignored: server_url={}, handle={}",
                server_url, association.handle
            );
        }
        Ok(())
    }

    /// 查询关联
    ///
    /// * 指定 `handle`：返回该句柄对应的未过期关联
    /// * 未指定：返回 issued_at 最大的未过期关联，相同时取最后写入的一条
    pub async fn get(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>> {
        let now = unix_now();
        match handle {
            Some(handle) => self.repo().find(server_url, handle, now).await,
            None => self.repo().find_latest(server_url, now).await,
        }
    }

    /// 删除关联，返回是否确实删除了记录
    pub async fn remove(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        let removed = self.repo().delete(server_url, handle).await?;
        debug!(
            "Remove association: server_url={}, handle={}, removed={}",
            server_url, handle, removed
        );
        Ok(removed)
    }

    /// 清理已过期的关联，返回删除数量
    pub async fn cleanup(&self) -> StoreResult<u64> {
        let deleted = self.repo().delete_expired(unix_now()).await?;
        if deleted > 0 {
            info!("Cleaned up {} expired associations", deleted);
        }
        Ok(deleted)
    }

    /// 关联记录总数
    pub async fn count(&self) -> StoreResult<u64> {
        self.repo().count().await
    }
}

/// Nonce 存储
#[derive(Clone, Debug)]
pub enum NonceStore {
    Sqlite(SqliteNonceStore),

    #[cfg(feature = "backend-postgres")]
    Postgres(PgNonceStore),
}

impl NonceStore {
    fn repo(&self) -> &dyn NonceRepository {
        match self {
            Self::Sqlite(r) => r,

            #[cfg(feature = "backend-postgres")]
            Self::Postgres(r) => r,
        }
    }

    /// 占用 nonce
    ///
    /// 时间戳超出 `skew` 窗口时直接拒绝，不访问存储；否则由唯一约束
    /// 保证同一 `(server_url, timestamp, salt)` 最多成功一次。
    pub async fn use_nonce(
        &self,
        server_url: &str,
        timestamp: i64,
        salt: &str,
        skew: u64,
    ) -> StoreResult<bool> {
        if !is_within_skew(timestamp, skew, unix_now()) {
            debug!(
                "Nonce rejected, outside skew window: server_url={}, timestamp={}, skew={}s",
                server_url, timestamp, skew
            );
            return Ok(false);
        }

        let claimed = self.repo().claim(server_url, timestamp, salt).await?;
        if !claimed {
            debug!(
                "Nonce replay rejected: server_url={}, timestamp={}",
                server_url, timestamp
            );
        }
        Ok(claimed)
    }

    /// 清理 timestamp 早于 `now - skew` 的 nonce，返回删除数量
    pub async fn cleanup(&self, skew: u64) -> StoreResult<u64> {
        let skew = i64::try_from(skew).unwrap_or(i64::MAX);
        let cutoff = unix_now().saturating_sub(skew);

        let deleted = self.repo().delete_older_than(cutoff).await?;
        if deleted > 0 {
            info!("Cleaned up {} stale nonces (cutoff={})", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// nonce 记录总数
    pub async fn count(&self) -> StoreResult<u64> {
        self.repo().count().await
    }
}

/// OpenID 存储：组合关联仓储与 nonce 仓储
#[derive(Clone, Debug)]
pub struct OpenIdStore {
    associations: AssociationStore,
    nonces: NonceStore,
}

impl OpenIdStore {
    /// 从配置创建存储实例，并初始化表结构
    ///
    /// # Errors
    /// - 缺少对应后端的配置
    /// - 后端初始化失败
    /// - 后端功能未启用（feature flag）
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match config.backend {
            StorageBackend::Sqlite => {
                let cfg = config
                    .sqlite
                    .as_ref()
                    .ok_or_else(|| StoreError::Config("Missing SQLite config".into()))?;
                let pool = sqlite::connect(cfg).await?;
                Self::with_sqlite_pool(pool).await
            }

            #[cfg(feature = "backend-postgres")]
            StorageBackend::Postgres => {
                let cfg = config
                    .postgres
                    .as_ref()
                    .ok_or_else(|| StoreError::Config("Missing PostgreSQL config".into()))?;
                let pool = postgres::connect(cfg).await?;
                Self::with_postgres_pool(pool).await
            }

            #[cfg(not(feature = "backend-postgres"))]
            StorageBackend::Postgres => Err(StoreError::Config(
                "PostgreSQL backend not enabled. Compile with --features backend-postgres".into(),
            )),
        }
    }

    /// 基于已有的 SQLite 连接池创建存储实例
    pub async fn with_sqlite_pool(pool: sqlx::SqlitePool) -> StoreResult<Self> {
        let associations = SqliteAssociationStore::new(pool.clone());
        let nonces = SqliteNonceStore::new(pool);
        associations.init().await?;
        nonces.init().await?;

        Ok(Self {
            associations: AssociationStore::Sqlite(associations),
            nonces: NonceStore::Sqlite(nonces),
        })
    }

    /// 基于已有的 PostgreSQL 连接池创建存储实例
    #[cfg(feature = "backend-postgres")]
    pub async fn with_postgres_pool(pool: sqlx::PgPool) -> StoreResult<Self> {
        let associations = PgAssociationStore::new(pool.clone());
        let nonces = PgNonceStore::new(pool);
        associations.init().await?;
        nonces.init().await?;

        Ok(Self {
            associations: AssociationStore::Postgres(associations),
            nonces: NonceStore::Postgres(nonces),
        })
    }

    pub fn associations(&self) -> &AssociationStore {
        &self.associations
    }

    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// 获取存储统计信息
    pub async fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            associations: self.associations.count().await?,
            nonces: self.nonces.count().await?,
        })
    }

    /// 获取后端类型名称
    pub fn backend_name(&self) -> &'static str {
        match self.associations {
            AssociationStore::Sqlite(_) => "SQLite",

            #[cfg(feature = "backend-postgres")]
            AssociationStore::Postgres(_) => "Postgres",
        }
    }
}
