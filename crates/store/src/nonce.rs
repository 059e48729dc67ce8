//! Nonce 编解码
//!
//! nonce 格式：固定宽度的 UTC 时间戳（`YYYY-MM-DDTHH:MM:SSZ`，20 字符）
//! 后接随机 salt。本模块不访问存储。

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

/// 时间戳部分的格式
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// 时间戳部分的长度
pub const TIME_STR_LEN: usize = 20;

/// salt 长度（字母数字，62^6 的取值空间）
pub const SALT_LEN: usize = 6;

/// 以当前时间生成 nonce
pub fn mint_nonce() -> String {
    encode_nonce(Utc::now())
}

/// 以指定时间生成 nonce
///
/// 时间只保留到秒。
///
/// # Errors
/// - 年份不在 0..=9999 之内，无法写成固定宽度的时间戳
pub fn mint_nonce_at(at: DateTime<Utc>) -> StoreResult<String> {
    if !(0..=9999).contains(&at.year()) {
        return Err(StoreError::InvalidInput(format!(
            "nonce timestamp year {} is outside 0..=9999",
            at.year()
        )));
    }
    Ok(encode_nonce(at))
}

fn encode_nonce(at: DateTime<Utc>) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();

    format!("{}{}", at.format(TIME_FORMAT), salt)
}

/// 拆分 nonce，返回 `(timestamp, salt)`
///
/// # Errors
/// - 字符串短于时间戳字段
/// - 时间戳字段不是合法时间
pub fn split_nonce(nonce: &str) -> StoreResult<(i64, String)> {
    let (stamp, salt) = match (nonce.get(..TIME_STR_LEN), nonce.get(TIME_STR_LEN..)) {
        (Some(stamp), Some(salt)) => (stamp, salt),
        _ => {
            return Err(StoreError::MalformedNonce(format!(
                "expected at least {TIME_STR_LEN} bytes of timestamp, got {}",
                nonce.len()
            )));
        }
    };

    let timestamp = NaiveDateTime::parse_from_str(stamp, TIME_FORMAT)
        .map_err(|e| StoreError::MalformedNonce(format!("invalid timestamp {stamp:?}: {e}")))?
        .and_utc()
        .timestamp();

    Ok((timestamp, salt.to_string()))
}

/// 判断时间戳是否在允许的时钟偏差窗口内（`|now - timestamp| <= skew`）
pub fn is_within_skew(timestamp: i64, skew: u64, now: i64) -> bool {
    now.saturating_sub(timestamp).unsigned_abs() <= skew
}

/// 检查 nonce 的时间戳是否新鲜，无法解析的 nonce 视为不新鲜
pub fn check_timestamp(nonce: &str, skew: u64, now: i64) -> bool {
    match split_nonce(nonce) {
        Ok((timestamp, _)) => is_within_skew(timestamp, skew, now),
        Err(_) => false,
    }
}
