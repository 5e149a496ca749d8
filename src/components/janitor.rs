//! Janitor 模块
//! Janitor module
//!
//! 在清理租约保护下定期删除过了保留期的终态冷层条目和执行记录；
//! 清理在整个车队内单飞
//! Periodically deletes terminal cold entries and execution records past
//! retention, under the cleanup lease; cleanup is single-flight across the
//! fleet

use crate::base::constants::{CLEANUP_LEASE, CLEANUP_LEASE_TTL};
use crate::base::{AnalyticsStore, ColdStore, LockManager};
use crate::components::ComponentLifecycle;
use crate::error::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Janitor 配置
/// Janitor configuration
#[derive(Debug, Clone)]
pub struct JanitorConfig {
  /// 清理间隔
  /// Cleanup interval
  pub interval: Duration,
  /// 保留天数
  /// Retention in days
  pub ttl_days: u32,
}

impl Default for JanitorConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(3600),
      ttl_days: 30,
    }
  }
}

/// Janitor - 负责按保留期清理冷层与分析存储
/// Janitor - prunes the cold tier and the analytics store by retention
pub struct Janitor {
  cold: Arc<dyn ColdStore>,
  analytics: Arc<dyn AnalyticsStore>,
  locks: Arc<dyn LockManager>,
  config: JanitorConfig,
  done: Arc<AtomicBool>,
}

impl Janitor {
  /// 创建 Janitor
  /// Create the Janitor
  pub fn new(
    cold: Arc<dyn ColdStore>,
    analytics: Arc<dyn AnalyticsStore>,
    locks: Arc<dyn LockManager>,
    config: JanitorConfig,
  ) -> Self {
    Self {
      cold,
      analytics,
      locks,
      config,
      done: Arc::new(AtomicBool::new(false)),
    }
  }

  /// 启动 Janitor
  /// Start the Janitor
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("Janitor: shutting down");
          break;
        }

        if let Err(e) = self.run_once().await {
          tracing::error!("Janitor cleanup error: {}", e);
        }
      }
    })
  }

  /// 执行一轮清理（仍受租约约束）；返回删除的冷层条目数
  /// Run one cleanup pass (still lease-guarded); returns removed cold rows
  pub async fn run_once(&self) -> Result<u64> {
    let lease = match self.locks.acquire(CLEANUP_LEASE, CLEANUP_LEASE_TTL).await? {
      Some(lease) => lease,
      // 另一个节点正在清理
      // Another node is cleaning up
      None => return Ok(0),
    };

    let now = Utc::now();
    let removed = match self.cold.cleanup_expired(now, self.config.ttl_days).await {
      Ok(removed) => removed,
      Err(e) => {
        let _ = self.locks.release(&lease).await;
        return Err(e);
      }
    };

    let cutoff = now - chrono::Duration::days(self.config.ttl_days as i64);
    match self.analytics.prune(cutoff).await {
      Ok(0) => {}
      Ok(pruned) => {
        tracing::info!("Janitor: pruned {} execution records", pruned);
      }
      Err(e) => {
        tracing::warn!("Janitor: analytics prune failed: {}", e);
      }
    }

    if removed > 0 {
      tracing::info!("Janitor: removed {} expired cold entries", removed);
    }

    let _ = self.locks.release(&lease).await;
    Ok(removed)
  }

  /// 停止 Janitor
  /// Stop the Janitor
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for Janitor {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    Janitor::start(self)
  }

  fn shutdown(&self) {
    Janitor::shutdown(self)
  }

  fn is_done(&self) -> bool {
    Janitor::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::{MemoryAnalyticsStore, MemoryColdStore, MemoryLockManager};

  #[test]
  fn test_janitor_config_default() {
    let config = JanitorConfig::default();
    assert_eq!(config.interval, Duration::from_secs(3600));
    assert_eq!(config.ttl_days, 30);
  }

  #[tokio::test]
  async fn test_janitor_shutdown() {
    let janitor = Janitor::new(
      Arc::new(MemoryColdStore::new()),
      Arc::new(MemoryAnalyticsStore::new()),
      Arc::new(MemoryLockManager::new()),
      JanitorConfig::default(),
    );

    assert!(!janitor.is_done());
    janitor.shutdown();
    assert!(janitor.is_done());
  }

  #[tokio::test]
  async fn test_run_once_skips_when_lease_held() {
    let locks = Arc::new(MemoryLockManager::new());
    let _held = locks
      .acquire(CLEANUP_LEASE, Duration::from_secs(60))
      .await
      .unwrap()
      .unwrap();

    let janitor = Janitor::new(
      Arc::new(MemoryColdStore::new()),
      Arc::new(MemoryAnalyticsStore::new()),
      locks,
      JanitorConfig::default(),
    );
    assert_eq!(janitor.run_once().await.unwrap(), 0);
  }
}
