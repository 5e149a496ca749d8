//! 检查器模块
//! Inspector module
//!
//! 聚合两层存储与循环状态，供 `/stats` 端点和运维诊断使用
//! Aggregates both tiers and loop state for the `/stats` endpoint and
//! operational diagnostics

use crate::base::constants::TRANSFER_LEASE;
use crate::base::{ColdStore, HotStore, LockManager};
use crate::components::hot_loop::HotLoop;
use crate::components::transfer::TransferLoop;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 调度器运行状态快照
/// Snapshot of the scheduler's runtime state
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
  /// 热层 pending 条目数
  /// Pending entries in the hot tier
  pub pending_hot: u64,
  /// 冷层 pending 条目数
  /// Pending entries in the cold tier
  pub pending_cold: u64,
  /// 处于 processing 的条目数
  /// Entries in processing
  pub processing: u64,
  /// 此刻已到期的条目数
  /// Entries due right now
  pub due_now: u64,
  /// 热循环最近一次节拍
  /// Last hot-loop tick
  pub last_tick_at: Option<DateTime<Utc>>,
  /// 最近一次转移轮
  /// Last transfer pass
  pub last_transfer_at: Option<DateTime<Utc>>,
  /// 转移租约当前持有者的围栏令牌
  /// Fencing token of the current transfer-lease holder
  pub transfer_lease_holder: Option<u64>,
}

/// 检查器
/// Inspector
pub struct Inspector {
  hot: Arc<dyn HotStore>,
  cold: Arc<dyn ColdStore>,
  locks: Arc<dyn LockManager>,
  hot_loop: Arc<HotLoop>,
  transfer: Arc<TransferLoop>,
}

impl Inspector {
  /// 创建检查器
  /// Create the inspector
  pub fn new(
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    locks: Arc<dyn LockManager>,
    hot_loop: Arc<HotLoop>,
    transfer: Arc<TransferLoop>,
  ) -> Self {
    Self {
      hot,
      cold,
      locks,
      hot_loop,
      transfer,
    }
  }

  /// 采集一份状态快照
  /// Collect one stats snapshot
  pub async fn stats(&self) -> Result<SchedulerStats> {
    let now = Utc::now();
    Ok(SchedulerStats {
      pending_hot: self.hot.count_pending().await?,
      pending_cold: self.cold.count_pending().await?,
      processing: self.hot.count_processing().await?,
      due_now: self.hot.count_due(now).await?,
      last_tick_at: self.hot_loop.last_tick_at(),
      last_transfer_at: self.transfer.last_transfer_at(),
      transfer_lease_holder: self.locks.holder(TRANSFER_LEASE).await?,
    })
  }
}
