//! 存储错误定义

use thiserror::Error;

/// OpenID 存储错误类型
///
/// "未找到" 与 "重复写入" 不是错误：前者用 `Option::None` 表示，
/// 后者用 `false` 或空操作表示。
#[derive(Error, Debug)]
pub enum StoreError {
    /// nonce 字符串无法解析
    #[error("Malformed nonce: {0}")]
    MalformedNonce(String),

    /// 数据库错误（连接丢失、非预期的约束冲突等），原样向上传递，不做重试
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 无法写入存储的参数值
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    /// 是否为底层存储不可用类错误
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

/// 存储结果类型别名
pub type StoreResult<T> = Result<T, StoreError>;
