//! 存储后端抽象接口
//!
//! 关联与 nonce 是两个独立的仓储，每个后端分别实现。
//! 唯一性由表结构上的 UNIQUE 约束保证，实现中不得使用"先查再写"。

use crate::error::StoreResult;
use crate::types::Association;
use async_trait::async_trait;

/// 关联仓储接口
///
/// 所有带 `now` 参数的方法都以 `issued_at + lifetime < now` 判定过期。
#[async_trait]
pub trait AssociationRepository: Send + Sync {
    /// 初始化表结构与索引（幂等）
    async fn init(&self) -> StoreResult<()>;

    /// 插入关联；`(server_url, handle)` 已存在时不做任何修改
    ///
    /// # Returns
    /// * `true` - 新插入
    /// * `false` - 已存在，忽略
    async fn insert(&self, server_url: &str, association: &Association) -> StoreResult<bool>;

    /// 按 `(server_url, handle)` 查询未过期的关联
    async fn find(
        &self,
        server_url: &str,
        handle: &str,
        now: i64,
    ) -> StoreResult<Option<Association>>;

    /// 查询 server_url 下 issued_at 最大的未过期关联
    ///
    /// issued_at 相同时取内部行 ID 最大的一条
    async fn find_latest(&self, server_url: &str, now: i64) -> StoreResult<Option<Association>>;

    /// 删除 `(server_url, handle)`，返回是否确实删除了记录
    async fn delete(&self, server_url: &str, handle: &str) -> StoreResult<bool>;

    /// 删除 `now` 时刻已过期的全部关联，返回删除数量
    async fn delete_expired(&self, now: i64) -> StoreResult<u64>;

    /// 关联记录总数（包括已过期但尚未清理的）
    async fn count(&self) -> StoreResult<u64>;
}

/// Nonce 仓储接口
#[async_trait]
pub trait NonceRepository: Send + Sync {
    /// 初始化表结构与索引（幂等）
    async fn init(&self) -> StoreResult<()>;

    /// 原子地占用 `(server_url, timestamp, salt)`
    ///
    /// # Returns
    /// * `true` - 首次占用成功
    /// * `false` - 已被占用（重放）
    async fn claim(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool>;

    /// 删除 timestamp 早于 `cutoff` 的全部 nonce，返回删除数量
    async fn delete_older_than(&self, cutoff: i64) -> StoreResult<u64>;

    /// nonce 记录总数
    async fn count(&self) -> StoreResult<u64>;
}
