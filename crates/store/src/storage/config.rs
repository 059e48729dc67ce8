//! 存储后端配置
//!
//! 定义各种存储后端的配置结构

use serde::{Deserialize, Serialize};

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// 存储后端类型
    pub backend: StorageBackend,

    /// SQLite 配置（当 backend = "sqlite" 时必需）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteConfig>,

    /// PostgreSQL 配置（当 backend = "postgres" 时必需）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresConfig>,

    /// Nonce 校验配置
    #[serde(default)]
    pub nonce: NonceConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            sqlite: Some(SqliteConfig::default()),
            postgres: None,
            nonce: NonceConfig::default(),
        }
    }
}

impl StoreConfig {
    /// 使用指定数据库文件的 SQLite 配置
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            sqlite: Some(SqliteConfig {
                path: path.into(),
                ..SqliteConfig::default()
            }),
            ..Self::default()
        }
    }

    /// 校验配置，返回全部问题
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match self.backend {
            StorageBackend::Sqlite => match &self.sqlite {
                None => errors.push("Missing [store.sqlite] section for sqlite backend".into()),
                Some(cfg) => {
                    if cfg.path.trim().is_empty() {
                        errors.push("store.sqlite.path cannot be empty".into());
                    }
                    if cfg.max_connections == 0 {
                        errors.push("store.sqlite.max_connections must be positive".into());
                    }
                }
            },
            StorageBackend::Postgres => match &self.postgres {
                None => errors.push("Missing [store.postgres] section for postgres backend".into()),
                Some(cfg) => {
                    if cfg.host.trim().is_empty() {
                        errors.push("store.postgres.host cannot be empty".into());
                    }
                    if cfg.pool_size == 0 {
                        errors.push("store.postgres.pool_size must be positive".into());
                    }
                }
            },
        }

        if self.nonce.allowed_skew_secs == 0 {
            errors.push(
                "Warning: store.nonce.allowed_skew_secs = 0 rejects every nonce not minted in the current second"
                    .into(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 存储后端类型枚举
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite 数据库
    Sqlite,
    /// PostgreSQL 数据库
    Postgres,
}

/// SQLite 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// 数据库文件路径，不存在时自动创建
    pub path: String,

    /// 连接池大小
    #[serde(default = "default_sqlite_max_connections")]
    pub max_connections: u32,

    /// 数据库忙等待超时（秒）
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "openid_store.db".to_string(),
            max_connections: default_sqlite_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

fn default_sqlite_max_connections() -> u32 {
    10
}

fn default_busy_timeout_secs() -> u64 {
    5
}

/// PostgreSQL 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// 数据库主机地址
    pub host: String,

    /// 数据库端口
    pub port: u16,

    /// 数据库名称
    pub database: String,

    /// 用户名
    pub username: String,

    /// 密码
    pub password: String,

    /// 连接池大小
    #[serde(default = "default_postgres_pool_size")]
    pub pool_size: u32,

    /// 连接最大生命周期（秒）
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "openid_store".to_string(),
            username: "openid".to_string(),
            password: "".to_string(),
            pool_size: default_postgres_pool_size(),
            max_lifetime_secs: default_max_lifetime_secs(),
        }
    }
}

fn default_postgres_pool_size() -> u32 {
    20
}

fn default_max_lifetime_secs() -> u64 {
    3600
}

/// Nonce 校验配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceConfig {
    /// 允许的时钟偏差（秒）
    ///
    /// `use_nonce` 拒绝时间戳与当前时间相差超过该值的 nonce，
    /// 清理任务删除早于 `now - allowed_skew_secs` 的 nonce。
    #[serde(default = "default_allowed_skew_secs")]
    pub allowed_skew_secs: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            allowed_skew_secs: default_allowed_skew_secs(),
        }
    }
}

fn default_allowed_skew_secs() -> u64 {
    300
}
