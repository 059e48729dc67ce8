//! OpenID 存储维护进程
//!
//! 定时清理过期的关联与 nonce，并提供一次性维护命令

mod cli;
mod error;
mod observability;

use anyhow::Context;
use clap::Parser;
use observability::init_observability;
use openid_store::{OpenIdStore, StorageBackend, Sweeper, mint_nonce};
use openid_store_daemon::AppConfig;
use std::path::{Path, PathBuf};
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        Some(Commands::MintNonce) => {
            println!("{}", mint_nonce());
            Ok(())
        }
        Some(Commands::Cleanup) => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;
            ApplicationLauncher::block_on(ApplicationLauncher::run_cleanup(&config_path))
        }
        Some(Commands::Stats) => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;
            ApplicationLauncher::block_on(ApplicationLauncher::run_stats(&config_path))
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;
            ApplicationLauncher::block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    fn block_on<F: std::future::Future<Output = Result<()>>>(future: F) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(future)
    }

    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // If the provided path is not the default "config.toml", check if it exists
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                return Ok(provided_path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", provided_path);
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        }

        let fallback_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/openid-store/config.toml"),
        ];

        for path in &fallback_paths {
            if path.exists() {
                return Ok(path.clone());
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: openid-store-daemon --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 加载并验证配置，警告项只打印不阻止
    fn load_config(config_path: &Path) -> Result<AppConfig> {
        let config = AppConfig::from_file(config_path)?;

        if let Err(errors) = config.validate() {
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_error!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::validation("配置验证失败，请修复上述错误"));
            }
        }

        Ok(config)
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        match AppConfig::from_file(config_path) {
            Ok(config) => {
                bootstrap_info!("✅ 配置文件解析成功: {:?}", config_path);

                match config.validate() {
                    Ok(()) => {
                        bootstrap_info!("✅ 配置验证通过");
                        Ok(())
                    }
                    Err(errors) => {
                        bootstrap_error!("配置验证发现问题:");
                        for (i, err) in errors.iter().enumerate() {
                            if err.starts_with("Warning:") {
                                bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                            } else {
                                bootstrap_error!("  {}. ❌ {}", i + 1, err);
                            }
                        }
                        if errors.iter().any(|e| !e.starts_with("Warning:")) {
                            return Err(Error::validation("配置验证失败"));
                        }
                        Ok(())
                    }
                }
            }
            Err(e) => {
                bootstrap_error!("❌ 配置文件解析失败: {}", e);
                Err(Error::validation(format!("配置解析失败: {e}")))
            }
        }
    }

    /// 打开存储，必要时创建 SQLite 数据目录
    async fn open_store(config: &AppConfig) -> Result<OpenIdStore> {
        if config.store.backend == StorageBackend::Sqlite
            && let Some(sqlite) = &config.store.sqlite
            && let Some(parent) = Path::new(&sqlite.path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create SQLite data directory: {}", parent.display())
            })?;
        }

        Ok(OpenIdStore::from_config(&config.store).await?)
    }

    fn sweeper_for(config: &AppConfig, store: OpenIdStore) -> Sweeper {
        Sweeper::new(
            store,
            config.sweeper.interval(),
            config.store.nonce.allowed_skew_secs,
        )
    }

    /// 一次性维护命令只把日志写到 stderr，stdout 留给 JSON 输出
    fn init_stderr_logging() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(tracing::Level::WARN)
            .try_init()
            .ok();
    }

    async fn run_cleanup(config_path: &Path) -> Result<()> {
        Self::init_stderr_logging();
        let config = Self::load_config(config_path)?;
        let store = Self::open_store(&config).await?;

        let report = Self::sweeper_for(&config, store).run_once().await?;
        println!("{}", serde_json::to_string(&report)?);
        Ok(())
    }

    async fn run_stats(config_path: &Path) -> Result<()> {
        Self::init_stderr_logging();
        let config = Self::load_config(config_path)?;
        let store = Self::open_store(&config).await?;

        let stats = store.stats().await?;
        println!("{}", serde_json::to_string(&stats)?);
        Ok(())
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);
        let config = Self::load_config(config_path)?;

        let _observability_guard = init_observability(&config)?;

        let store = Self::open_store(&config).await?;
        info!(
            "✅ 存储初始化完成: instance={}, backend={}",
            config.name,
            store.backend_name()
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
        setup_ctrl_c_handler(shutdown_tx);

        let handle = Self::sweeper_for(&config, store).spawn(shutdown_rx);
        handle.await?;

        info!("维护进程已退出");
        Ok(())
    }
}

fn setup_ctrl_c_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        let _ = shutdown_tx.send(());
    });
}
