//! 客户端模块
//! Client module
//!
//! 调度器的入口面：`schedule` 与 `cancel`。由延迟事件消费者和
//! 直接 API 调用；消费者保证至少一次投递，这里按 `schedule_id` 去重。
//! The scheduler's ingest surface: `schedule` and `cancel`. Called by the
//! delayed-events consumer and by a direct API; the consumer guarantees
//! at-least-once delivery and deduplication happens here on `schedule_id`.

use crate::base::{CancelOutcome, ColdStore, HotStore};
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::event::ScheduledEvent;
use crate::metrics::SchedulerMetrics;
use crate::router::{Router, Tier};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// 调度器客户端
/// Scheduler client
#[derive(Clone)]
pub struct SchedulerClient {
  hot: Arc<dyn HotStore>,
  cold: Arc<dyn ColdStore>,
  router: Router,
  metrics: Arc<SchedulerMetrics>,
}

impl SchedulerClient {
  /// 创建客户端
  /// Create the client
  pub fn new(
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    config: &SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
  ) -> Self {
    Self {
      hot,
      cold,
      router: Router::new(config.immediate_horizon),
      metrics,
    }
  }

  /// 调度一个事件，返回其 `schedule_id`
  /// Schedule an event, returning its `schedule_id`
  ///
  /// 同 id 的重放被幂等吸收；同 id 不同内容返回 `Conflict`。
  /// 暂时性存储错误向上传播，由上游按退避重试。
  /// Replays of the same id are absorbed idempotently; the same id with
  /// different content returns `Conflict`. Transient store errors propagate
  /// so the upstream retries with backoff.
  pub async fn schedule(&self, evt: ScheduledEvent) -> Result<String> {
    let now = Utc::now();
    match self.router.route(&evt, now) {
      Tier::Hot => self.hot.add(&evt).await?,
      Tier::Cold => self.cold.insert(&evt).await?,
    }
    self
      .metrics
      .events_scheduled_total
      .fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
      "Scheduled {} for {} ({})",
      evt.schedule_id,
      evt.scheduled_at,
      evt.topic
    );
    Ok(evt.schedule_id)
  }

  /// 取消一个尚未触发的事件
  /// Cancel an event that has not fired yet
  ///
  /// 只有仍为 pending 的条目可以取消；返回值区分已取消、太迟、不存在
  /// Only entries still pending can be cancelled; the return distinguishes
  /// cancelled, too-late and not-found
  pub async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome> {
    match self.hot.cancel(schedule_id).await? {
      CancelOutcome::NotFound => self.cold.cancel(schedule_id).await,
      outcome => Ok(outcome),
    }
  }
}
