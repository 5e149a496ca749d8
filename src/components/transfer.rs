//! TransferLoop 模块
//! TransferLoop module
//!
//! 定期把冷层中临近触发的条目提升到热层，整个车队同一时刻只有
//! 转移租约的持有者在做这件事。转移按 `scheduled_at` 升序进行，
//! 最先触发的条目最先被提升。
//! Periodically promotes cold entries whose fire time approaches into the
//! hot tier; across the fleet only the transfer-lease holder does this at
//! any moment. Transfer runs in `scheduled_at` ascending order so the
//! soonest-to-fire entries are promoted first.
//!
//! 每一条转移遵循三步协议：
//! Each transfer follows the three-step protocol:
//! 1. 冷层受保护标记 `pending → transferring`，失败（状态已变）则跳过；
//!    guarded cold mark `pending → transferring`, skip when it fails;
//! 2. 热层插入，失败则回退冷层标记并中止本轮（暂时性故障）；
//!    hot insert, on failure revert the cold mark and bail out (transient);
//! 3. 冷层 `transferring → succeeded`，失败只记日志继续（热副本已是权威，
//!    滞留的 transferring 行由下一任持有者按过期阈值回收）。
//!    cold `transferring → succeeded`, on failure log and continue (the hot
//!    copy is canonical; lingering transferring rows are reaped past the
//!    stale threshold by a later holder).

use crate::base::constants::TRANSFER_LEASE;
use crate::base::{ColdStore, HotStore, Lease, LockManager};
use crate::breaker::CircuitBreaker;
use crate::components::ComponentLifecycle;
use crate::error::{Error, Result};
use crate::event::EventStatus;
use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// 续约间隔（按条目数）
/// Renewal cadence (in entries)
const RENEW_EVERY: usize = 50;

/// TransferLoop 配置
/// TransferLoop configuration
#[derive(Debug, Clone)]
pub struct TransferLoopConfig {
  /// 节拍周期
  /// Tick period
  pub interval: Duration,
  /// 转移窗口：提升 `scheduled_at ≤ now + horizon` 的条目
  /// Transfer window: promote entries with `scheduled_at ≤ now + horizon`
  pub horizon: Duration,
  /// 单轮扫描上限
  /// Per-pass scan limit
  pub batch_size: usize,
  /// 转移租约 TTL
  /// Transfer lease TTL
  pub lease_ttl: Duration,
  /// 本节点标识
  /// This node's identity
  pub node_id: String,
}

/// TransferLoop - 冷层到热层的转移泵
/// TransferLoop - the cold-to-hot transfer pump
pub struct TransferLoop {
  cold: Arc<dyn ColdStore>,
  hot: Arc<dyn HotStore>,
  locks: Arc<dyn LockManager>,
  config: TransferLoopConfig,
  metrics: Arc<SchedulerMetrics>,
  cold_breaker: Arc<CircuitBreaker>,
  done: Arc<AtomicBool>,
  /// 最近一次成功转移轮的时间（unix 毫秒；0 表示尚未运行）
  /// Last successful transfer pass (unix millis; 0 means not yet run)
  last_transfer_ms: AtomicI64,
}

impl TransferLoop {
  /// 创建 TransferLoop
  /// Create the TransferLoop
  pub fn new(
    cold: Arc<dyn ColdStore>,
    hot: Arc<dyn HotStore>,
    locks: Arc<dyn LockManager>,
    config: TransferLoopConfig,
    metrics: Arc<SchedulerMetrics>,
    cold_breaker: Arc<CircuitBreaker>,
  ) -> Self {
    Self {
      cold,
      hot,
      locks,
      config,
      metrics,
      cold_breaker,
      done: Arc::new(AtomicBool::new(false)),
      last_transfer_ms: AtomicI64::new(0),
    }
  }

  /// 最近一次转移轮的时间
  /// Time of the last transfer pass
  pub fn last_transfer_at(&self) -> Option<DateTime<Utc>> {
    let ms = self.last_transfer_ms.load(Ordering::Relaxed);
    if ms == 0 {
      None
    } else {
      DateTime::<Utc>::from_timestamp_millis(ms)
    }
  }

  /// 启动 TransferLoop
  /// Start the TransferLoop
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("TransferLoop: shutting down");
          break;
        }

        match self.run_once().await {
          Ok(0) => {}
          Ok(promoted) => {
            tracing::info!("TransferLoop: promoted {} entries", promoted);
          }
          Err(Error::LeaseLost { name }) => {
            tracing::warn!("TransferLoop: lease {} lost mid-pass, aborting", name);
          }
          Err(e) => {
            tracing::error!("TransferLoop error: {}", e);
          }
        }
      }
    })
  }

  /// 执行一轮转移（仍受租约约束）；返回提升的条目数
  /// Run one transfer pass (still lease-guarded); returns promoted count
  pub async fn run_once(&self) -> Result<u64> {
    if !self.cold_breaker.allow() {
      tracing::debug!("TransferLoop: cold-store breaker open, transfers paused");
      return Ok(0);
    }

    let lease = match self
      .locks
      .acquire(TRANSFER_LEASE, self.config.lease_ttl)
      .await?
    {
      Some(lease) => lease,
      // 另一个节点正在转移
      // Another node is transferring
      None => return Ok(0),
    };

    let result = self.transfer_pass(&lease).await;

    if let Err(e) = self.locks.release(&lease).await {
      tracing::warn!("TransferLoop: lease release failed: {}", e);
    }

    match &result {
      Ok(_) => self.cold_breaker.record_success(),
      Err(e) if e.is_retriable() => self.cold_breaker.record_failure(),
      Err(_) => {}
    }
    result
  }

  async fn transfer_pass(&self, lease: &Lease) -> Result<u64> {
    let now = Utc::now();
    let candidates = self
      .cold
      .scan_due_for_transfer(now, self.config.horizon, self.config.batch_size)
      .await?;

    let mut promoted = 0u64;
    for (i, candidate) in candidates.iter().enumerate() {
      // 周期性续约；令牌不再匹配说明租约被接管，立即中止
      // Renew periodically; a mismatched token means the lease was taken
      // over, abort immediately
      if i > 0 && i % RENEW_EVERY == 0
        && !self.locks.renew(lease, self.config.lease_ttl).await?
      {
        return Err(Error::LeaseLost {
          name: lease.name.clone(),
        });
      }

      if !self
        .cold
        .mark_transferring(&candidate.schedule_id, &self.config.node_id)
        .await?
      {
        // 状态已变（并发取消或另一次转移），跳过
        // Status changed underneath us (concurrent cancel or transfer), skip
        continue;
      }

      let mut hot_copy = candidate.clone();
      hot_copy.status = EventStatus::Pending;
      hot_copy.node_id = None;
      hot_copy.updated_at = Utc::now();

      match self.hot.add(&hot_copy).await {
        Ok(()) => {}
        Err(Error::Conflict { schedule_id }) => {
          // 热层已有同 id 不同内容的条目；回退冷层标记并跳过
          // The hot tier holds a different entry under this id; revert the
          // cold mark and skip
          tracing::error!(
            "TransferLoop: hot tier holds conflicting entry for {}, reverting",
            schedule_id
          );
          let _ = self.cold.revert_transfer(&candidate.schedule_id).await;
          continue;
        }
        Err(e) => {
          // 暂时性故障：回退标记，中止本轮
          // Transient failure: revert the mark and bail out of the pass
          if let Err(revert_err) = self.cold.revert_transfer(&candidate.schedule_id).await {
            tracing::error!(
              "TransferLoop: revert of {} after failed hot insert also failed: {}",
              candidate.schedule_id,
              revert_err
            );
          }
          return Err(e);
        }
      }

      match self.cold.finalize_transferred(&candidate.schedule_id).await {
        Ok(true) => {}
        Ok(false) => {
          tracing::warn!(
            "TransferLoop: finalize of {} found an unexpected status",
            candidate.schedule_id
          );
        }
        Err(e) => {
          // 热副本已是权威；滞留行由过期回收处理
          // The hot copy is canonical; the lingering row is reaped later
          tracing::warn!(
            "TransferLoop: finalize of {} failed: {}",
            candidate.schedule_id,
            e
          );
        }
      }
      promoted += 1;
    }

    self
      .metrics
      .transfer_batch_size
      .store(promoted, Ordering::Relaxed);
    self
      .metrics
      .events_transferred_total
      .fetch_add(promoted, Ordering::Relaxed);
    self
      .last_transfer_ms
      .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

    // 对账：滞留超过两个节拍的 transferring 行还原为 pending
    // Reconcile: transferring rows stuck past two ticks revert to pending
    let stale_cutoff = Utc::now()
      - chrono::Duration::from_std(self.config.interval * 2)
        .unwrap_or_else(|_| chrono::Duration::zero());
    match self.cold.revert_stale_transfers(stale_cutoff).await {
      Ok(0) => {}
      Ok(reverted) => {
        tracing::info!("TransferLoop: reverted {} stale transferring rows", reverted);
      }
      Err(e) => {
        tracing::warn!("TransferLoop: stale-transfer reconcile failed: {}", e);
      }
    }

    Ok(promoted)
  }

  /// 停止 TransferLoop
  /// Stop the TransferLoop
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for TransferLoop {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    TransferLoop::start(self)
  }

  fn shutdown(&self) {
    TransferLoop::shutdown(self)
  }

  fn is_done(&self) -> bool {
    TransferLoop::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::ScheduledEvent;
  use crate::memdb::{MemoryColdStore, MemoryHotStore, MemoryLockManager};
  use chrono::Duration as ChronoDuration;

  fn transfer_loop(
    cold: Arc<MemoryColdStore>,
    hot: Arc<MemoryHotStore>,
    locks: Arc<MemoryLockManager>,
  ) -> TransferLoop {
    TransferLoop::new(
      cold,
      hot,
      locks,
      TransferLoopConfig {
        interval: Duration::from_secs(300),
        horizon: Duration::from_secs(3600),
        batch_size: 500,
        lease_ttl: Duration::from_secs(600),
        node_id: "node-a".into(),
      },
      Arc::new(SchedulerMetrics::new()),
      Arc::new(CircuitBreaker::new("cold", 5, Duration::from_secs(30))),
    )
  }

  #[tokio::test]
  async fn test_promotes_entries_inside_horizon() {
    let cold = Arc::new(MemoryColdStore::new());
    let hot = Arc::new(MemoryHotStore::new());
    let locks = Arc::new(MemoryLockManager::new());

    let near = ScheduledEvent::new("t", b"", Utc::now() + ChronoDuration::seconds(600)).unwrap();
    let far = ScheduledEvent::new("t", b"", Utc::now() + ChronoDuration::seconds(90_000)).unwrap();
    cold.insert(&near).await.unwrap();
    cold.insert(&far).await.unwrap();

    let pump = transfer_loop(cold.clone(), hot.clone(), locks);
    let promoted = pump.run_once().await.unwrap();

    assert_eq!(promoted, 1);
    assert_eq!(hot.count_pending().await.unwrap(), 1);
    // 冷副本进入移交完成态，远期条目保持 pending
    // The cold copy reads handed-off; the distant entry stays pending
    assert_eq!(
      cold.get(&near.schedule_id).await.unwrap().status,
      EventStatus::Succeeded
    );
    assert_eq!(cold.count_pending().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_skips_when_lease_held_elsewhere() {
    let cold = Arc::new(MemoryColdStore::new());
    let hot = Arc::new(MemoryHotStore::new());
    let locks = Arc::new(MemoryLockManager::new());

    let near = ScheduledEvent::new("t", b"", Utc::now() + ChronoDuration::seconds(600)).unwrap();
    cold.insert(&near).await.unwrap();

    let _held = locks
      .acquire(TRANSFER_LEASE, Duration::from_secs(600))
      .await
      .unwrap()
      .unwrap();

    let pump = transfer_loop(cold, hot.clone(), locks.clone());
    assert_eq!(pump.run_once().await.unwrap(), 0);
    assert_eq!(hot.count_pending().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_transfer_is_idempotent_after_partial_failure() {
    let cold = Arc::new(MemoryColdStore::new());
    let hot = Arc::new(MemoryHotStore::new());
    let locks = Arc::new(MemoryLockManager::new());

    let near = ScheduledEvent::new("t", b"", Utc::now() + ChronoDuration::seconds(600)).unwrap();
    cold.insert(&near).await.unwrap();

    // 模拟上一任持有者在 finalize 前崩溃：热层已有副本，冷层回到 pending
    // Simulate the previous holder dying before finalize: the hot copy
    // exists and the cold row is back to pending
    let mut hot_copy = near.clone();
    hot_copy.status = EventStatus::Pending;
    hot.add(&hot_copy).await.unwrap();

    let pump = transfer_loop(cold.clone(), hot.clone(), locks);
    let promoted = pump.run_once().await.unwrap();

    // 重放被幂等吸收，热层仍只有一份
    // The replay is absorbed idempotently, the hot tier still holds one copy
    assert_eq!(promoted, 1);
    assert_eq!(hot.count_pending().await.unwrap(), 1);
    assert_eq!(
      cold.get(&near.schedule_id).await.unwrap().status,
      EventStatus::Succeeded
    );
  }
}
