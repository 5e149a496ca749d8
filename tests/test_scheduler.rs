//! 调度器端到端测试
//! End-to-end scheduler tests
//!
//! 在内存后端上驱动完整引擎：入口 → 路由 → 热层 → 下游总线 → 分析
//! Drives the full engine over the memory backends:
//! ingest -> router -> hot tier -> downstream bus -> analytics

use deferq::base::{CancelOutcome, HotStore};
use deferq::config::SchedulerConfig;
use deferq::event::{ExecutionStatus, ScheduledEvent};
use deferq::memdb::{
  MemoryAnalyticsStore, MemoryColdStore, MemoryEventBus, MemoryHotStore, MemoryLockManager,
  PublishOutcome,
};
use deferq::server::SchedulerServer;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
  hot: Arc<MemoryHotStore>,
  bus: Arc<MemoryEventBus>,
  analytics: Arc<MemoryAnalyticsStore>,
  server: SchedulerServer,
}

fn fast_config() -> SchedulerConfig {
  SchedulerConfig::new()
    .redis_processing_interval(Duration::from_millis(25))
    .cold_sync_interval(Duration::from_millis(100))
    .retry_delay(Duration::from_millis(50))
    .analytics_batch_size(1)
    .analytics_flush_interval(Duration::from_millis(25))
    .node_id("test-node")
}

fn harness(config: SchedulerConfig) -> Harness {
  let hot = Arc::new(MemoryHotStore::new());
  let cold = Arc::new(MemoryColdStore::new());
  let locks = Arc::new(MemoryLockManager::new());
  let bus = Arc::new(MemoryEventBus::new());
  let analytics = Arc::new(MemoryAnalyticsStore::new());

  let server = SchedulerServer::new(
    config,
    hot.clone(),
    cold,
    locks,
    bus.clone(),
    analytics.clone(),
  )
  .unwrap();

  Harness {
    hot,
    bus,
    analytics,
    server,
  }
}

/// 轮询等待条件成立
/// Poll until the condition holds
async fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if predicate() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  predicate()
}

#[tokio::test]
async fn test_short_horizon_fires_punctually() {
  let mut h = harness(fast_config());
  h.server.start().unwrap();
  let client = h.server.client();

  let evt = ScheduledEvent::new(
    "user.welcome",
    b"{\"user_id\":42}",
    Utc::now() + chrono::Duration::milliseconds(200),
  )
  .unwrap();
  client.schedule(evt).await.unwrap();

  let bus = h.bus.clone();
  assert!(wait_until(Duration::from_secs(3), || bus.published_count() == 1).await);

  let analytics = h.analytics.clone();
  assert!(wait_until(Duration::from_secs(3), || !analytics.records().is_empty()).await);

  let records = h.analytics.records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].status, ExecutionStatus::Success);
  assert!(records[0].delay_seconds >= 0.0 && records[0].delay_seconds < 2.0);
  assert_eq!(records[0].node_id, "test-node");

  let published = h.bus.published();
  assert_eq!(published[0].topic, "user.welcome");
  assert_eq!(published[0].body, b"{\"user_id\":42}");

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_replayed_schedule_fires_once() {
  let mut h = harness(fast_config());
  h.server.start().unwrap();
  let client = h.server.client();

  // 入口是至少一次投递：同一请求重复 5 次
  // Ingest is at-least-once: the same request delivered five times
  let evt = ScheduledEvent::new(
    "billing.invoice",
    b"x",
    Utc::now() + chrono::Duration::milliseconds(150),
  )
  .unwrap();
  for _ in 0..5 {
    let id = client.schedule(evt.clone()).await.unwrap();
    assert_eq!(id, evt.schedule_id);
  }

  let bus = h.bus.clone();
  assert!(wait_until(Duration::from_secs(3), || bus.published_count() >= 1).await);
  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(h.bus.published_count(), 1);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_retries_then_succeeds() {
  let mut h = harness(fast_config());
  // 前两次发布暂时性失败，之后成功
  // The first two publishes fail transiently, then it succeeds
  h.bus.push_outcome(PublishOutcome::Transient("broker away".into()));
  h.bus.push_outcome(PublishOutcome::Transient("broker away".into()));
  h.server.start().unwrap();
  let client = h.server.client();

  let evt = ScheduledEvent::new("order.ship", b"x", Utc::now()).unwrap();
  client.schedule(evt).await.unwrap();

  let analytics = h.analytics.clone();
  assert!(
    wait_until(Duration::from_secs(5), || analytics.records().len() >= 3).await,
    "expected three execution records"
  );

  let records = h.analytics.records();
  let errors = records
    .iter()
    .filter(|r| r.status == ExecutionStatus::Error)
    .count();
  let successes = records
    .iter()
    .filter(|r| r.status == ExecutionStatus::Success)
    .count();
  assert_eq!(errors, 2);
  assert_eq!(successes, 1);
  assert_eq!(h.bus.published_count(), 1);

  // 成功的那次带着累计的重试计数
  // The successful attempt carries the accumulated retry count
  let success = records
    .iter()
    .find(|r| r.status == ExecutionStatus::Success)
    .unwrap();
  assert_eq!(success.retry_count, 2);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_publish_failure_marks_failed() {
  let mut h = harness(fast_config());
  h.bus
    .push_outcome(PublishOutcome::Permanent("unknown topic".into()));
  h.server.start().unwrap();
  let client = h.server.client();

  let evt = ScheduledEvent::new("no.such.topic", b"x", Utc::now()).unwrap();
  client.schedule(evt).await.unwrap();

  let analytics = h.analytics.clone();
  assert!(wait_until(Duration::from_secs(3), || !analytics.records().is_empty()).await);
  tokio::time::sleep(Duration::from_millis(200)).await;

  // 永久失败：单条 error 记录，不再重试，热层已清空
  // Permanent failure: one error record, no retries, hot tier empty
  let records = h.analytics.records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].status, ExecutionStatus::Error);
  assert_eq!(h.bus.published_count(), 0);
  assert_eq!(h.hot.count_pending().await.unwrap(), 0);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stale_entry_is_skipped_not_published() {
  let mut h = harness(fast_config());
  h.server.start().unwrap();
  let client = h.server.client();

  // 到期已 10 秒，容忍 5 秒：记 skipped，绝不发布
  // Ten seconds late with a five second tolerance: recorded skipped,
  // never published
  let evt = ScheduledEvent::new(
    "digest.send",
    b"x",
    Utc::now() - chrono::Duration::seconds(10),
  )
  .unwrap()
  .with_max_delay_seconds(5);
  client.schedule(evt).await.unwrap();

  let analytics = h.analytics.clone();
  assert!(wait_until(Duration::from_secs(3), || !analytics.records().is_empty()).await);

  let records = h.analytics.records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].status, ExecutionStatus::Skipped);
  assert_eq!(h.bus.published_count(), 0);
  // skipped 条目按成功释放，不会再触发
  // Skipped entries release as succeeded and never re-fire
  assert_eq!(h.hot.count_pending().await.unwrap(), 0);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancellation_race_has_exactly_one_outcome() {
  let mut h = harness(fast_config());
  h.server.start().unwrap();
  let client = h.server.client();

  let evt = ScheduledEvent::new(
    "reminder.send",
    b"x",
    Utc::now() + chrono::Duration::milliseconds(150),
  )
  .unwrap();
  let id = client.schedule(evt).await.unwrap();

  tokio::time::sleep(Duration::from_millis(100)).await;
  let outcome = client.cancel(&id).await.unwrap();
  tokio::time::sleep(Duration::from_millis(500)).await;

  let records = h.analytics.records();
  match outcome {
    // 取消成功：不存在任何执行记录
    // Cancelled: no execution record exists
    CancelOutcome::Cancelled => {
      assert!(records.is_empty());
      assert_eq!(h.bus.published_count(), 0);
    }
    // 太迟：恰好一次成功执行
    // Too late: exactly one successful execution
    CancelOutcome::TooLate | CancelOutcome::NotFound => {
      let successes = records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Success)
        .count();
      assert_eq!(successes, 1);
      assert_eq!(h.bus.published_count(), 1);
    }
  }

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_after_fire_is_too_late() {
  let mut h = harness(fast_config());
  h.server.start().unwrap();
  let client = h.server.client();

  let evt = ScheduledEvent::new("receipt.send", b"x", Utc::now()).unwrap();
  let id = client.schedule(evt).await.unwrap();

  let bus = h.bus.clone();
  assert!(wait_until(Duration::from_secs(3), || bus.published_count() == 1).await);

  // 已触发的条目在保留窗口内读作“太迟”
  // A fired entry reads "too late" inside the retention window
  assert_eq!(client.cancel(&id).await.unwrap(), CancelOutcome::TooLate);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_claim_is_reaped_and_fired_once() {
  let mut h = harness(fast_config());
  let client = h.server.client();

  // 节点 A 认领后崩溃，未释放
  // Node A claims and dies without releasing
  let evt = ScheduledEvent::new("retryable.job", b"x", Utc::now()).unwrap();
  let id = client.schedule(evt).await.unwrap();
  let claimed = h
    .hot
    .claim(&id, "node-a", Utc::now() - chrono::Duration::seconds(60))
    .await
    .unwrap();
  assert!(claimed.is_some());

  // 节点 B（本服务器）回收并触发
  // Node B (this server) reaps and fires it
  h.server.start().unwrap();

  let analytics = h.analytics.clone();
  assert!(
    wait_until(Duration::from_secs(3), || analytics
      .records()
      .iter()
      .any(|r| r.status == ExecutionStatus::Success))
    .await
  );
  tokio::time::sleep(Duration::from_millis(200)).await;

  let successes = h
    .analytics
    .records()
    .iter()
    .filter(|r| r.status == ExecutionStatus::Success)
    .count();
  assert_eq!(successes, 1);
  assert_eq!(h.bus.published_count(), 1);

  h.server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_two_nodes_fire_each_entry_exactly_once() {
  let hot = Arc::new(MemoryHotStore::new());
  let cold = Arc::new(MemoryColdStore::new());
  let locks = Arc::new(MemoryLockManager::new());
  let bus = Arc::new(MemoryEventBus::new());
  let analytics = Arc::new(MemoryAnalyticsStore::new());

  let mut node_a = SchedulerServer::new(
    fast_config().node_id("node-a"),
    hot.clone(),
    cold.clone(),
    locks.clone(),
    bus.clone(),
    analytics.clone(),
  )
  .unwrap();
  let mut node_b = SchedulerServer::new(
    fast_config().node_id("node-b"),
    hot.clone(),
    cold,
    locks,
    bus.clone(),
    analytics.clone(),
  )
  .unwrap();

  node_a.start().unwrap();
  node_b.start().unwrap();

  let client = node_a.client();
  for i in 0..20 {
    let evt = ScheduledEvent::new("fanout.job", format!("{i}").as_bytes(), Utc::now()).unwrap();
    client.schedule(evt).await.unwrap();
  }

  let bus_ref = bus.clone();
  assert!(
    wait_until(Duration::from_secs(5), || bus_ref.published_count() >= 20).await,
    "all twenty entries should fire"
  );
  tokio::time::sleep(Duration::from_millis(300)).await;

  // 两个节点并发认领，但每个条目恰好触发一次
  // Both nodes claim concurrently, yet each entry fires exactly once
  assert_eq!(bus.published_count(), 20);
  let successes = analytics
    .records()
    .iter()
    .filter(|r| r.status == ExecutionStatus::Success)
    .count();
  assert_eq!(successes, 20);

  node_a.shutdown().await.unwrap();
  node_b.shutdown().await.unwrap();
}
