//! HotLoop 模块
//! HotLoop module
//!
//! 热层执行引擎：每个节拍先回收被遗弃的认领，再窥视到期条目、
//! 逐条原子认领，并把成功认领的条目派发到受信号量约束的执行池。
//! 每个执行任务完成一次下游发布和一次分析记录提交。
//! The hot-tier execution engine: each tick first reaps abandoned claims,
//! then peeks due entries, claims them one by one atomically and dispatches
//! successful claims onto the semaphore-bounded execution pool. Every
//! execution task performs one downstream publish and one analytics submit.
//!
//! ## 并发控制 / Concurrency control
//!
//! - 信号量限制并发执行数；没有空闲槽位时本节拍停止派发
//!   A semaphore caps concurrent executions; dispatch stops for the tick
//!   when no slot is free
//! - 认领失败静默跳过：另一个节点赢得了该条目
//!   Failed claims are silently skipped: another node won the entry
//! - 下游总线熔断打开时暂停派发，但回收照常进行
//!   While the bus breaker is open dispatch pauses, reaping continues

use crate::base::constants::MAX_RETRY_DELAY;
use crate::base::{EventBus, HotStore, ReleaseOutcome};
use crate::breaker::CircuitBreaker;
use crate::components::analytics::AnalyticsHandle;
use crate::components::ComponentLifecycle;
use crate::error::{Error, Result};
use crate::event::{ExecutionRecord, ExecutionStatus, ScheduledEvent};
use crate::metrics::SchedulerMetrics;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// 单次下游发布的超时
/// Timeout of a single downstream publish
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// 每个节拍回收的过期认领上限
/// Per-tick cap on reaped stale claims
const REAP_LIMIT: usize = 1000;

/// HotLoop 配置
/// HotLoop configuration
#[derive(Debug, Clone)]
pub struct HotLoopConfig {
  /// 节拍周期
  /// Tick period
  pub interval: Duration,
  /// 执行池并发上限
  /// Execution pool cap
  pub concurrency: usize,
  /// 条目转为 failed 前的尝试上限
  /// Attempt cap before an entry becomes failed
  pub max_retries: u32,
  /// 重试退避基数
  /// Retry backoff base
  pub retry_delay: Duration,
  /// 认领过期阈值
  /// Stale-claim threshold
  pub stale_claim: Duration,
  /// 本节点标识
  /// This node's identity
  pub node_id: String,
}

/// HotLoop - 热层执行引擎
/// HotLoop - the hot-tier execution engine
pub struct HotLoop {
  hot: Arc<dyn HotStore>,
  bus: Arc<dyn EventBus>,
  analytics: AnalyticsHandle,
  config: HotLoopConfig,
  metrics: Arc<SchedulerMetrics>,
  bus_breaker: Arc<CircuitBreaker>,
  hot_breaker: Arc<CircuitBreaker>,
  sema: Arc<Semaphore>,
  done: Arc<AtomicBool>,
  /// 最近一次节拍（unix 毫秒；0 表示尚未运行）
  /// Last tick (unix millis; 0 means not yet run)
  last_tick_ms: Arc<AtomicI64>,
}

impl HotLoop {
  /// 创建 HotLoop
  /// Create the HotLoop
  pub fn new(
    hot: Arc<dyn HotStore>,
    bus: Arc<dyn EventBus>,
    analytics: AnalyticsHandle,
    config: HotLoopConfig,
    metrics: Arc<SchedulerMetrics>,
    bus_breaker: Arc<CircuitBreaker>,
    hot_breaker: Arc<CircuitBreaker>,
  ) -> Self {
    let concurrency = config.concurrency.max(1);
    Self {
      hot,
      bus,
      analytics,
      config,
      metrics,
      bus_breaker,
      hot_breaker,
      sema: Arc::new(Semaphore::new(concurrency)),
      done: Arc::new(AtomicBool::new(false)),
      last_tick_ms: Arc::new(AtomicI64::new(0)),
    }
  }

  /// 最近一次节拍时间的共享句柄，供健康检查与状态展示使用
  /// Shared handle to the last tick time, for healthcheck and stats
  pub fn last_tick_handle(&self) -> Arc<AtomicI64> {
    Arc::clone(&self.last_tick_ms)
  }

  /// 最近一次节拍时间
  /// Last tick time
  pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
    let ms = self.last_tick_ms.load(Ordering::Relaxed);
    if ms == 0 {
      None
    } else {
      DateTime::<Utc>::from_timestamp_millis(ms)
    }
  }

  /// 启动 HotLoop
  /// Start the HotLoop
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(self.config.interval);
      loop {
        interval.tick().await;

        if self.done.load(Ordering::Relaxed) {
          tracing::debug!("HotLoop: shutting down");
          break;
        }

        if let Err(e) = self.tick().await {
          tracing::error!("HotLoop tick error: {}", e);
        }
      }
    })
  }

  /// 执行一个节拍：回收、窥视、认领、派发
  /// Run one tick: reap, peek, claim, dispatch
  pub async fn tick(&self) -> Result<()> {
    let now = Utc::now();
    self
      .last_tick_ms
      .store(now.timestamp_millis(), Ordering::Relaxed);

    // 1. 回收：过期认领尽力还原为 pending
    // 1. Reap: best-effort revert of stale claims back to pending
    let cutoff = now
      - chrono::Duration::from_std(self.config.stale_claim)
        .unwrap_or_else(|_| chrono::Duration::zero());
    match self.hot.reap_stale(cutoff, REAP_LIMIT).await {
      Ok(0) => {}
      Ok(reverted) => {
        tracing::info!("HotLoop: reverted {} abandoned claims", reverted);
      }
      Err(e) => {
        self.hot_breaker.record_failure();
        tracing::warn!("HotLoop: reap pass failed: {}", e);
      }
    }

    // 熔断打开时暂停派发
    // Dispatch pauses while a breaker is open
    if !self.bus_breaker.allow() || !self.hot_breaker.allow() {
      return Ok(());
    }

    // 2. 窥视到期条目
    // 2. Peek due entries
    let candidates = match self
      .hot
      .peek_due(now, self.config.concurrency.max(1) * 4)
      .await
    {
      Ok(candidates) => {
        self.hot_breaker.record_success();
        candidates
      }
      Err(e) => {
        self.hot_breaker.record_failure();
        return Err(e);
      }
    };

    // 3. 逐条认领并派发
    // 3. Claim and dispatch one by one
    for candidate in candidates {
      let permit = match self.sema.clone().try_acquire_owned() {
        Ok(permit) => permit,
        // 执行池已满，本节拍到此为止
        // Pool saturated, done for this tick
        Err(_) => break,
      };

      let claimed = match self
        .hot
        .claim(&candidate.schedule_id, &self.config.node_id, Utc::now())
        .await
      {
        Ok(Some(claimed)) => claimed,
        // 其他工作者抢到了，静默跳过
        // Another worker got it, silently skip
        Ok(None) => {
          drop(permit);
          continue;
        }
        Err(e) => {
          self.hot_breaker.record_failure();
          drop(permit);
          tracing::warn!("HotLoop: claim of {} failed: {}", candidate.schedule_id, e);
          continue;
        }
      };

      let hot = Arc::clone(&self.hot);
      let bus = Arc::clone(&self.bus);
      let analytics = self.analytics.clone();
      let metrics = Arc::clone(&self.metrics);
      let bus_breaker = Arc::clone(&self.bus_breaker);
      let hot_breaker = Arc::clone(&self.hot_breaker);
      let config = self.config.clone();

      tokio::spawn(async move {
        let _permit = permit; // 持有许可直到执行结束 / held until the execution ends
        execute(
          claimed,
          hot,
          bus,
          analytics,
          metrics,
          bus_breaker,
          hot_breaker,
          config,
        )
        .await;
      });
    }

    Ok(())
  }

  /// 停止 HotLoop
  /// Stop the HotLoop
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 等待所有在途执行完成
  /// Wait for all in-flight executions to finish
  pub async fn drain(&self) {
    let concurrency = self.config.concurrency.max(1);
    let _ = self.sema.acquire_many(concurrency as u32).await;
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

/// 指数退避：基数 × 2^已重试次数，封顶一小时
/// Exponential backoff: base × 2^retries so far, capped at one hour
pub fn retry_backoff(base: Duration, retried: u32) -> Duration {
  let factor = 1u64 << retried.min(20);
  base.saturating_mul(factor as u32).min(MAX_RETRY_DELAY)
}

/// 执行一个已认领的条目
/// Execute one claimed entry
#[allow(clippy::too_many_arguments)]
async fn execute(
  mut evt: ScheduledEvent,
  hot: Arc<dyn HotStore>,
  bus: Arc<dyn EventBus>,
  analytics: AnalyticsHandle,
  metrics: Arc<SchedulerMetrics>,
  bus_breaker: Arc<CircuitBreaker>,
  hot_breaker: Arc<CircuitBreaker>,
  config: HotLoopConfig,
) {
  let started = Instant::now();
  let now = Utc::now();
  let delay = evt.delay_seconds(now);

  // 过期条目：记录 skipped 并按成功释放，保证绝不再触发
  // Stale entry: record skipped and release as succeeded so it never re-fires
  if evt.is_stale(now) {
    tracing::warn!(
      "Entry {} is {:.1}s late (tolerance {}s), skipping",
      evt.schedule_id,
      delay,
      evt.max_delay_seconds
    );
    finish(
      &hot,
      &hot_breaker,
      &analytics,
      &metrics,
      &evt,
      ReleaseOutcome::Succeeded,
      ExecutionStatus::Skipped,
      now,
      started,
      &config.node_id,
      Some(format!(
        "stale: {delay:.1}s past scheduled_at exceeds {}s",
        evt.max_delay_seconds
      )),
    )
    .await;
    return;
  }

  // 下游发布，带超时
  // Downstream publish, with a timeout
  let publish = tokio::time::timeout(
    PUBLISH_TIMEOUT,
    bus.publish(
      &evt.topic,
      &evt.headers,
      &evt.body,
      evt.correlation_id.as_deref(),
    ),
  )
  .await
  .unwrap_or(Err(Error::Timeout));

  let executed_at = Utc::now();
  match publish {
    Ok(()) => {
      bus_breaker.record_success();
      finish(
        &hot,
        &hot_breaker,
        &analytics,
        &metrics,
        &evt,
        ReleaseOutcome::Succeeded,
        ExecutionStatus::Success,
        executed_at,
        started,
        &config.node_id,
        None,
      )
      .await;
    }
    Err(e) => {
      bus_breaker.record_failure();
      let status = if matches!(e, Error::Timeout) {
        ExecutionStatus::Timeout
      } else {
        ExecutionStatus::Error
      };
      let retriable = e.is_retriable();
      let reason = e.to_string();

      if retriable && evt.retry_count < config.max_retries {
        let backoff = retry_backoff(config.retry_delay, evt.retry_count);
        evt.retry_count += 1;
        evt.error = Some(reason.clone());
        tracing::warn!(
          "Publish of {} failed ({}), retry {}/{} in {:?}",
          evt.schedule_id,
          reason,
          evt.retry_count,
          config.max_retries,
          backoff
        );
        finish(
          &hot,
          &hot_breaker,
          &analytics,
          &metrics,
          &evt,
          ReleaseOutcome::Requeue(backoff),
          status,
          executed_at,
          started,
          &config.node_id,
          Some(reason),
        )
        .await;
      } else {
        tracing::error!(
          "Publish of {} failed permanently after {} retries: {}",
          evt.schedule_id,
          evt.retry_count,
          reason
        );
        evt.error = Some(reason.clone());
        finish(
          &hot,
          &hot_breaker,
          &analytics,
          &metrics,
          &evt,
          ReleaseOutcome::Failed,
          status,
          executed_at,
          started,
          &config.node_id,
          Some(reason),
        )
        .await;
      }
    }
  }
}

/// 释放条目并提交执行记录与指标
/// Release the entry and submit the execution record and metrics
#[allow(clippy::too_many_arguments)]
async fn finish(
  hot: &Arc<dyn HotStore>,
  hot_breaker: &Arc<CircuitBreaker>,
  analytics: &AnalyticsHandle,
  metrics: &Arc<SchedulerMetrics>,
  evt: &ScheduledEvent,
  outcome: ReleaseOutcome,
  status: ExecutionStatus,
  executed_at: DateTime<Utc>,
  started: Instant,
  node_id: &str,
  error_message: Option<String>,
) {
  // 释放也是热层存储调用，与窥视、认领一样计入熔断器
  // The release is a hot-store call too and feeds the breaker just like
  // peek and claim
  match hot.release(evt, outcome).await {
    Ok(()) => hot_breaker.record_success(),
    Err(e) => {
      hot_breaker.record_failure();
      tracing::error!("Failed to release {}: {}", evt.schedule_id, e);
    }
  }

  let processing_time_ms = started.elapsed().as_millis() as u64;
  let record = ExecutionRecord::for_attempt(
    evt,
    status,
    executed_at,
    processing_time_ms,
    node_id,
    error_message,
  );
  metrics.record_fired(status);
  metrics
    .execution_delay_seconds
    .observe(record.delay_seconds.max(0.0));
  metrics
    .processing_time_ms
    .observe(processing_time_ms as f64);
  analytics.submit(record);
}

impl ComponentLifecycle for HotLoop {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    HotLoop::start(self)
  }

  fn shutdown(&self) {
    HotLoop::shutdown(self)
  }

  fn is_done(&self) -> bool {
    HotLoop::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retry_backoff_doubles() {
    let base = Duration::from_secs(60);
    assert_eq!(retry_backoff(base, 0), Duration::from_secs(60));
    assert_eq!(retry_backoff(base, 1), Duration::from_secs(120));
    assert_eq!(retry_backoff(base, 2), Duration::from_secs(240));
  }

  #[test]
  fn test_retry_backoff_capped_at_one_hour() {
    let base = Duration::from_secs(60);
    assert_eq!(retry_backoff(base, 10), Duration::from_secs(3600));
    assert_eq!(retry_backoff(base, 63), Duration::from_secs(3600));
  }
}
