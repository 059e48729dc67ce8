//! OpenID 存储数据类型定义

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// target 摘要长度（十六进制字符）
pub const TARGET_LEN: usize = 32;

/// 关联（association）：RP 与 OP 协商出的共享密钥
///
/// 过期时间 `issued_at + lifetime` 在读取和清理时现算，不落库。
#[derive(Clone, PartialEq, Eq)]
pub struct Association {
    /// 发放方选择的句柄，与 server_url 联合唯一
    pub handle: String,
    /// 共享密钥
    pub secret: Vec<u8>,
    /// 发放时间（存储精度为秒）
    pub issued_at: DateTime<Utc>,
    /// 有效期（秒）
    pub lifetime: u64,
    /// 关联类型，例如 `HMAC-SHA1`
    pub assoc_type: String,
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("lifetime", &self.lifetime)
            .field("assoc_type", &self.assoc_type)
            .finish()
    }
}

impl Association {
    pub fn new(
        handle: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        issued_at: DateTime<Utc>,
        lifetime: u64,
        assoc_type: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            secret: secret.into(),
            issued_at,
            lifetime,
            assoc_type: assoc_type.into(),
        }
    }

    /// 过期时间（Unix 秒）
    pub fn expires_at(&self) -> i64 {
        self.issued_at
            .timestamp()
            .saturating_add(i64::try_from(self.lifetime).unwrap_or(i64::MAX))
    }

    /// 在 `now` 时刻是否已过期
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at() < now
    }

    /// 距离过期的剩余秒数，已过期时为 0
    pub fn expires_in(&self, now: i64) -> u64 {
        u64::try_from(self.expires_at().saturating_sub(now)).unwrap_or(0)
    }
}

/// 存储统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStats {
    /// 关联记录总数（包括已过期但尚未清理的）
    pub associations: u64,
    /// nonce 记录总数
    pub nonces: u64,
}

/// 计算 server_url 的定长摘要，用作索引列
pub fn target_digest(server_url: &str) -> String {
    let digest = Sha256::digest(server_url.as_bytes());
    let mut target = hex::encode(digest);
    target.truncate(TARGET_LEN);
    target
}

/// 当前 Unix 时间（秒）
pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}
