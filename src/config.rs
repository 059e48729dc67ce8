//! 维护进程配置
//!
//! 从 TOML 文件加载，包含存储、清理任务与可观测性三部分

use openid_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 维护进程顶层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 实例名称
    #[serde(default = "default_name")]
    pub name: String,

    /// 存储配置
    #[serde(default)]
    pub store: StoreConfig,

    /// 清理任务配置
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// 可观测性配置
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// 清理任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// 清理间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

/// 可观测性配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ObservabilityConfig {
    /// 过滤级别
    ///
    /// 支持 EnvFilter 语法（如 "info,sqlx=warn"）。默认值 "info"。
    #[serde(default = "default_filter_level")]
    pub filter_level: String,

    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogConfig {
    /// 日志输出目标
    ///
    /// - "console": 仅输出到控制台（默认）
    /// - "file": 输出到文件
    #[serde(default = "default_log_output")]
    pub output: String,

    /// 日志轮转开关，当 output = "file" 时有效
    #[serde(default)]
    pub rotate: bool,

    /// 日志文件目录，当 output = "file" 时有效
    #[serde(default = "default_log_path")]
    pub path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            store: StoreConfig::default(),
            sweeper: SweeperConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            filter_level: default_filter_level(),
            log: LogConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output: default_log_output(),
            rotate: false,
            path: default_log_path(),
        }
    }
}

fn default_name() -> String {
    "openid-store".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_log_output() -> String {
    "console".to_string()
}

fn default_log_path() -> String {
    "logs/".to_string()
}

fn default_filter_level() -> String {
    "info".to_string()
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(format!("Configuration file does not exist: {path_ref:?}").into());
        }

        if !path_ref.is_file() {
            return Err(format!("Path is not a valid file: {path_ref:?}").into());
        }

        let content = std::fs::read_to_string(path_ref)?;
        Ok(Self::from_toml(&content)?)
    }

    /// 从 TOML 字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 验证配置
    ///
    /// 返回全部问题；以 "Warning:" 开头的条目不阻止启动
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Instance name cannot be empty".to_string());
        }

        if let Err(store_errors) = self.store.validate() {
            errors.extend(store_errors);
        }

        let sweep_limit = self.store.nonce.allowed_skew_secs.max(1).saturating_mul(12);
        if self.sweeper.interval_secs == 0 {
            errors.push("sweeper.interval_secs must be positive".to_string());
        } else if self.sweeper.interval_secs > sweep_limit {
            errors.push(format!(
                "Warning: sweeper.interval_secs ({}) is much longer than the nonce skew window ({}s); the nonce table may grow large between sweeps",
                self.sweeper.interval_secs, self.store.nonce.allowed_skew_secs
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.observability.filter_level).is_err() {
            errors.push(format!(
                "Invalid observability.filter_level '{}'",
                self.observability.filter_level
            ));
        }

        if !["console", "file"].contains(&self.observability.log.output.as_str()) {
            errors.push(format!(
                "Invalid log output '{}', must be one of: console, file",
                self.observability.log.output
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
