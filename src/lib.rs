//! # openid-store-daemon
//!
//! OpenID 关联与 nonce 存储的维护进程

pub mod config;

// Re-export commonly used types
pub use config::AppConfig;
