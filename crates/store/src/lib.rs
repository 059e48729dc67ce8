//! OpenID Store - OpenID 关联与防重放 nonce 的持久化存储
//!
//! 提供以下功能：
//! 1. 关联（association）的保存、查询（按句柄或取最新）、删除与过期清理
//! 2. nonce 的原子占用与过期清理，唯一性由存储层约束保证
//! 3. nonce 字符串的生成与解析
//! 4. 多存储后端支持：SQLite（默认）, PostgreSQL（`backend-postgres` feature）

pub mod error;
pub mod nonce;
pub mod storage;
pub mod sweeper;
pub mod types;

// Re-export commonly used items
pub use error::{StoreError, StoreResult};
pub use nonce::{check_timestamp, is_within_skew, mint_nonce, mint_nonce_at, split_nonce};
pub use storage::{
    AssociationRepository, AssociationStore, NonceConfig, NonceRepository, NonceStore,
    OpenIdStore, PostgresConfig, SqliteConfig, StorageBackend, StoreConfig,
};
pub use sweeper::{SweepReport, Sweeper};
pub use types::{Association, StoreStats, target_digest};
