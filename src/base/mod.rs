//! 存储抽象模块
//! Storage abstraction module
//!
//! 定义了热层、冷层、锁管理器、下游总线与分析存储的抽象层；
//! 引擎的其余部分只依赖这些 trait，后端可以替换
//! Defines the abstraction layer for the hot tier, the cold tier, the lock
//! manager, the downstream bus and the analytics store; the rest of the
//! engine depends only on these traits, so backends are swappable

use crate::error::Result;
use crate::event::{ExecutionRecord, ScheduledEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

pub mod constants;
pub mod keys;

/// 释放已认领条目时的处置
/// Disposition when releasing a claimed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
  /// 发布成功（或过期跳过）：退出调度，绝不再触发；终态副本短期保留
  /// Published (or skipped stale): leaves scheduling and never re-fires;
  /// a terminal copy is retained briefly
  Succeeded,
  /// 重试耗尽或永久失败：退出调度
  /// Retries exhausted or permanent failure: leaves scheduling
  Failed,
  /// 暂时性失败：按给定延迟改写分值并回到 pending
  /// Transient failure: score rewritten to now + delay, back to pending
  Requeue(Duration),
}

/// 取消操作的结果；调用方必须能区分“太迟了”与“不存在”
/// Result of a cancel; callers must distinguish "too late" from "not found"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
  /// 条目仍为 pending，已移除
  /// Entry was still pending and has been removed
  Cancelled,
  /// 条目已被认领或已终结，无法取消
  /// Entry already claimed or terminal, cannot cancel
  TooLate,
  /// 两层都找不到该条目
  /// Entry unknown to both tiers
  NotFound,
}

/// 热层存储：按触发时刻排序、支持原子认领的近期条目集合
/// Hot-tier store: a fire-time-ordered set of near-term entries with
/// atomic claim semantics
#[async_trait]
pub trait HotStore: Send + Sync {
  /// 测试连接
  /// Ping the connection
  async fn ping(&self) -> Result<()>;

  /// 幂等插入；同 id 不同内容返回 `Conflict`
  /// Idempotent insert; same id with different content returns `Conflict`
  async fn add(&self, evt: &ScheduledEvent) -> Result<()>;

  /// 返回至多 `limit` 条 score ≤ now 的条目，按 score 升序
  /// Return up to `limit` entries with score ≤ now, score ascending
  async fn peek_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledEvent>>;

  /// 原子认领：pending → processing 并打上节点标记；
  /// 已被他人认领或不存在时返回 `None`
  /// Atomic claim: pending → processing stamped with the node id;
  /// returns `None` if someone else claimed it or it no longer exists
  async fn claim(
    &self,
    schedule_id: &str,
    node_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<ScheduledEvent>>;

  /// 释放已认领条目；`Requeue` 时以 `evt` 中更新后的内容改写存储副本
  /// Release a claimed entry; for `Requeue` the stored copy is rewritten
  /// with the updated content in `evt`
  async fn release(&self, evt: &ScheduledEvent, outcome: ReleaseOutcome) -> Result<()>;

  /// 取消仍为 pending 的条目
  /// Cancel an entry that is still pending
  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome>;

  /// 将认领时间早于 `cutoff` 的 processing 条目还原为 pending，返回还原数
  /// Revert processing entries claimed before `cutoff` back to pending,
  /// returning how many were reverted
  async fn reap_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<u64>;

  /// pending 条目数
  /// Number of pending entries
  async fn count_pending(&self) -> Result<u64>;

  /// 已到期条目数
  /// Number of due entries
  async fn count_due(&self, now: DateTime<Utc>) -> Result<u64>;

  /// processing 条目数
  /// Number of processing entries
  async fn count_processing(&self) -> Result<u64>;
}

/// 冷层存储：按 `(status, scheduled_at)` 检索的持久表，按天分区
/// Cold-tier store: a durable table indexed by `(status, scheduled_at)`,
/// partitioned by day
///
/// 读后写一致性是最终一致的，因此所有状态转移都必须是受保护的
/// 条件更新，绝不能盲写
/// Read-after-write consistency is eventual, so every status transition
/// must be a guarded conditional update, never a blind write
#[async_trait]
pub trait ColdStore: Send + Sync {
  /// 测试连接
  /// Ping the connection
  async fn ping(&self) -> Result<()>;

  /// 幂等插入；同 id 不同内容返回 `Conflict`
  /// Idempotent insert; same id with different content returns `Conflict`
  async fn insert(&self, evt: &ScheduledEvent) -> Result<()>;

  /// 扫描 `status = pending` 且 `scheduled_at ≤ now + horizon` 的条目，
  /// 按 `scheduled_at` 升序、`priority` 降序
  /// Scan entries with `status = pending` and `scheduled_at ≤ now + horizon`,
  /// ordered by `scheduled_at` ascending then `priority` descending
  async fn scan_due_for_transfer(
    &self,
    now: DateTime<Utc>,
    horizon: Duration,
    limit: usize,
  ) -> Result<Vec<ScheduledEvent>>;

  /// 受保护转移标记：仅当前状态为 pending 时 → transferring
  /// Guarded transfer mark: pending → transferring only
  async fn mark_transferring(&self, schedule_id: &str, node_id: &str) -> Result<bool>;

  /// transferring → succeeded（冷副本保留作审计；热副本从此为准）
  /// transferring → succeeded (cold copy retained for audit; the hot copy
  /// is canonical from here on)
  async fn finalize_transferred(&self, schedule_id: &str) -> Result<bool>;

  /// transferring → pending（热层插入失败后的回退）
  /// transferring → pending (rollback after a failed hot insert)
  async fn revert_transfer(&self, schedule_id: &str) -> Result<bool>;

  /// 将更新时间早于 `cutoff` 的 transferring 条目批量还原为 pending
  /// Bulk-revert transferring entries not updated since `cutoff` back to
  /// pending
  async fn revert_stale_transfers(&self, cutoff: DateTime<Utc>) -> Result<u64>;

  /// 取消仍为 pending 的条目
  /// Cancel an entry that is still pending
  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome>;

  /// 删除终态且最近更新早于保留期的条目，返回删除数
  /// Delete terminal entries whose last update predates the retention
  /// window, returning how many were removed
  async fn cleanup_expired(&self, now: DateTime<Utc>, ttl_days: u32) -> Result<u64>;

  /// pending 条目数
  /// Number of pending entries
  async fn count_pending(&self) -> Result<u64>;
}

/// 带围栏令牌的命名租约
/// A named lease carrying a fencing token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
  /// 租约名称
  /// Lease name
  pub name: String,
  /// 单调递增的围栏令牌
  /// Monotonically increasing fencing token
  pub token: u64,
}

/// 锁管理器：带 TTL 的命名租约，用于串行化跨节点的单飞任务
/// Lock manager: TTL-bounded named leases serializing fleet-wide
/// single-flight work
#[async_trait]
pub trait LockManager: Send + Sync {
  /// 测试连接
  /// Ping the connection
  async fn ping(&self) -> Result<()>;

  /// 尝试获取租约；已被持有时返回 `None`
  /// Try to acquire the lease; returns `None` when already held
  async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>>;

  /// 续约；令牌不再匹配时返回 `false`（调用方应视为 `LeaseLost`）
  /// Renew; returns `false` when the token no longer matches (callers
  /// should treat this as `LeaseLost`)
  async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool>;

  /// 释放租约（仅当令牌仍匹配）
  /// Release the lease (only if the token still matches)
  async fn release(&self, lease: &Lease) -> Result<()>;

  /// 当前持有者的围栏令牌，用于状态展示
  /// Fencing token of the current holder, for stats reporting
  async fn holder(&self, name: &str) -> Result<Option<u64>>;
}

/// 下游发布总线
/// Downstream publish bus
///
/// 失败必须区分 `PublishTransient`（重试）与 `PublishPermanent`（终结条目）
/// Failures must distinguish `PublishTransient` (retry) from
/// `PublishPermanent` (entry becomes failed)
#[async_trait]
pub trait EventBus: Send + Sync {
  /// 发布一条事件
  /// Publish one event
  async fn publish(
    &self,
    topic: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    correlation_id: Option<&str>,
  ) -> Result<()>;
}

/// 分析存储：仅追加的执行记录表
/// Analytics store: append-only execution record table
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
  /// 批量追加执行记录
  /// Append a batch of execution records
  async fn append(&self, records: &[ExecutionRecord]) -> Result<()>;

  /// 删除执行时间早于 `cutoff` 的记录，返回删除数
  /// Delete records executed before `cutoff`, returning how many were removed
  async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
