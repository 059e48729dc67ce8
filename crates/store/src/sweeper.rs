//! 定时清理任务
//!
//! 周期性删除已过期的关联与超出时钟偏差窗口的 nonce。
//! 清理只按谓词删除已失效的记录，与读写并发执行，不加表锁。

use crate::error::StoreResult;
use crate::storage::OpenIdStore;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// 单次清理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub associations_removed: u64,
    pub nonces_removed: u64,
}

/// 清理任务
#[derive(Clone, Debug)]
pub struct Sweeper {
    store: OpenIdStore,
    interval: Duration,
    nonce_skew: u64,
}

impl Sweeper {
    /// # Arguments
    /// * `store` - 要清理的存储
    /// * `interval` - 两次清理之间的间隔
    /// * `nonce_skew` - nonce 允许的时钟偏差（秒），与 `use_nonce` 使用的值一致
    pub fn new(store: OpenIdStore, interval: Duration, nonce_skew: u64) -> Self {
        Self {
            store,
            interval,
            nonce_skew,
        }
    }

    /// 执行一次清理
    pub async fn run_once(&self) -> StoreResult<SweepReport> {
        let associations_removed = self.store.associations().cleanup().await?;
        let nonces_removed = self.store.nonces().cleanup(self.nonce_skew).await?;

        Ok(SweepReport {
            associations_removed,
            nonces_removed,
        })
    }

    /// 启动后台清理循环，收到关闭信号后退出
    pub fn spawn(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Sweeper started: interval={}s, nonce_skew={}s",
                self.interval.as_secs(),
                self.nonce_skew
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) => debug!("Sweep finished: {:?}", report),
                            Err(e) => warn!("Sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;
    use crate::types::Association;
    use chrono::{TimeDelta, Utc};
    use tempfile::{TempDir, tempdir};

    async fn create_test_store() -> (OpenIdStore, TempDir) {
        let temp_dir = tempdir().unwrap();
        let config = StoreConfig::sqlite(temp_dir.path().join("sweep.db").display().to_string());
        let store = OpenIdStore::from_config(&config).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_run_once() {
        let (store, _dir) = create_test_store().await;
        let now = Utc::now();

        let expired = Association::new(
            "expired",
            b"k".to_vec(),
            now - TimeDelta::seconds(7200),
            3600,
            "HMAC-SHA1",
        );
        let valid = Association::new("valid", b"k".to_vec(), now, 3600, "HMAC-SHA1");
        store.associations().store("https://op", &expired).await.unwrap();
        store.associations().store("https://op", &valid).await.unwrap();

        let old = (now - TimeDelta::seconds(5000)).timestamp();
        assert!(
            store
                .nonces()
                .use_nonce("https://op", old, "aaaaaa", 10_000)
                .await
                .unwrap()
        );
        assert!(
            store
                .nonces()
                .use_nonce("https://op", now.timestamp(), "bbbbbb", 10_000)
                .await
                .unwrap()
        );

        let sweeper = Sweeper::new(store.clone(), Duration::from_secs(60), 1000);
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                associations_removed: 1,
                nonces_removed: 1,
            }
        );

        // 第二次清理没有可删除的记录
        assert_eq!(sweeper.run_once().await.unwrap(), SweepReport::default());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.associations, 1);
        assert_eq!(stats.nonces, 1);
    }

    #[tokio::test]
    async fn test_spawn_stops_on_shutdown() {
        let (store, _dir) = create_test_store().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = Sweeper::new(store, Duration::from_millis(10), 300).spawn(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
