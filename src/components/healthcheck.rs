//! Healthcheck 模块
//! Healthcheck module
//!
//! 定期检查两个存储与锁管理器的可达性，并核对热循环的节拍新鲜度；
//! 节点健康 = 三个依赖可达且热循环在三个节拍内跳动过
//! Periodically checks reachability of both stores and the lock manager and
//! verifies hot-loop tick freshness; the node is healthy when all three
//! dependencies respond and the hot loop has ticked within three intervals

use crate::base::{ColdStore, HotStore, LockManager};
use crate::components::ComponentLifecycle;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Healthcheck 配置
/// Healthcheck configuration
#[derive(Debug, Clone)]
pub struct HealthcheckConfig {
  /// 检查间隔
  /// Check interval
  pub interval: Duration,
  /// 热循环的节拍周期（新鲜度按它的三倍衡量）
  /// Hot-loop tick period (freshness is measured as three of these)
  pub hot_interval: Duration,
}

impl Default for HealthcheckConfig {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(15),
      hot_interval: Duration::from_secs(5),
    }
  }
}

/// Healthcheck - 负责定期执行健康检查
/// Healthcheck - periodically executes health checks
pub struct Healthcheck {
  hot: Arc<dyn HotStore>,
  cold: Arc<dyn ColdStore>,
  locks: Arc<dyn LockManager>,
  /// 热循环共享的最近节拍时间（unix 毫秒）
  /// Last hot-loop tick shared by the loop (unix millis)
  hot_last_tick_ms: Arc<AtomicI64>,
  config: HealthcheckConfig,
  done: Arc<AtomicBool>,
  is_healthy: Arc<AtomicBool>,
}

impl Healthcheck {
  /// 创建 Healthcheck
  /// Create the Healthcheck
  pub fn new(
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    locks: Arc<dyn LockManager>,
    hot_last_tick_ms: Arc<AtomicI64>,
    config: HealthcheckConfig,
  ) -> Self {
    Self {
      hot,
      cold,
      locks,
      hot_last_tick_ms,
      config,
      done: Arc::new(AtomicBool::new(false)),
      is_healthy: Arc::new(AtomicBool::new(true)),
    }
  }

  /// 启动 Healthcheck
  /// Start the Healthcheck
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("Healthcheck: shutting down");
          break;
        }

        self.check().await;
      }
    })
  }

  /// 执行一次健康检查
  /// Execute one health check
  pub async fn check(&self) -> bool {
    let mut healthy = true;

    if let Err(e) = self.hot.ping().await {
      tracing::warn!("Healthcheck: hot store ping failed: {}", e);
      healthy = false;
    }
    if let Err(e) = self.cold.ping().await {
      tracing::warn!("Healthcheck: cold store ping failed: {}", e);
      healthy = false;
    }
    if let Err(e) = self.locks.ping().await {
      tracing::warn!("Healthcheck: lock manager ping failed: {}", e);
      healthy = false;
    }

    let last_tick = self.hot_last_tick_ms.load(Ordering::Relaxed);
    if last_tick > 0 {
      let age_ms = Utc::now().timestamp_millis() - last_tick;
      let max_age_ms = self.config.hot_interval.as_millis() as i64 * 3;
      if age_ms > max_age_ms {
        tracing::warn!(
          "Healthcheck: hot loop has not ticked for {}ms (limit {}ms)",
          age_ms,
          max_age_ms
        );
        healthy = false;
      }
    }

    self.is_healthy.store(healthy, Ordering::Relaxed);
    healthy
  }

  /// 节点当前是否健康
  /// Whether the node is currently healthy
  pub fn is_healthy(&self) -> bool {
    self.is_healthy.load(Ordering::Relaxed)
  }

  /// 停止 Healthcheck
  /// Stop the Healthcheck
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for Healthcheck {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    Healthcheck::start(self)
  }

  fn shutdown(&self) {
    Healthcheck::shutdown(self)
  }

  fn is_done(&self) -> bool {
    Healthcheck::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::{MemoryColdStore, MemoryHotStore, MemoryLockManager};

  fn healthcheck(last_tick_ms: i64) -> Healthcheck {
    Healthcheck::new(
      Arc::new(MemoryHotStore::new()),
      Arc::new(MemoryColdStore::new()),
      Arc::new(MemoryLockManager::new()),
      Arc::new(AtomicI64::new(last_tick_ms)),
      HealthcheckConfig::default(),
    )
  }

  #[tokio::test]
  async fn test_healthy_with_fresh_tick() {
    let hc = healthcheck(Utc::now().timestamp_millis());
    assert!(hc.check().await);
    assert!(hc.is_healthy());
  }

  #[tokio::test]
  async fn test_unhealthy_with_stale_tick() {
    let hc = healthcheck(Utc::now().timestamp_millis() - 60_000);
    assert!(!hc.check().await);
    assert!(!hc.is_healthy());
  }

  #[tokio::test]
  async fn test_healthy_before_first_tick() {
    // 尚未跳动过时不按新鲜度判定
    // Freshness is not judged before the first tick
    let hc = healthcheck(0);
    assert!(hc.check().await);
  }
}
