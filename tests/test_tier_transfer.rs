//! 层间转移端到端测试
//! End-to-end tier transfer tests
//!
//! 覆盖冷层驻留、转移窗口内的提升、移交后的触发，以及强制转移与清理轮
//! Covers cold-tier residence, promotion inside the transfer window,
//! firing after hand-off, and forced transfer / cleanup passes

use deferq::base::{AnalyticsStore, ColdStore, HotStore};
use deferq::config::SchedulerConfig;
use deferq::event::{EventStatus, ExecutionRecord, ExecutionStatus, ScheduledEvent};
use deferq::memdb::{
  MemoryAnalyticsStore, MemoryColdStore, MemoryEventBus, MemoryHotStore, MemoryLockManager,
};
use deferq::server::SchedulerServer;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

fn transfer_config() -> SchedulerConfig {
  SchedulerConfig::new()
    .redis_processing_interval(Duration::from_millis(25))
    .cold_sync_interval(Duration::from_millis(100))
    .immediate_horizon(Duration::from_secs(1))
    .transfer_horizon(Duration::from_secs(1))
    .analytics_batch_size(1)
    .analytics_flush_interval(Duration::from_millis(25))
    .node_id("transfer-node")
}

#[tokio::test]
async fn test_long_horizon_event_transfers_then_fires() {
  let hot = Arc::new(MemoryHotStore::new());
  let cold = Arc::new(MemoryColdStore::new());
  let bus = Arc::new(MemoryEventBus::new());
  let analytics = Arc::new(MemoryAnalyticsStore::new());

  let mut server = SchedulerServer::new(
    transfer_config(),
    hot.clone(),
    cold.clone(),
    Arc::new(MemoryLockManager::new()),
    bus.clone(),
    analytics.clone(),
  )
  .unwrap();
  server.start().unwrap();
  let client = server.client();

  // 超出立即视界：先落冷层
  // Beyond the immediate horizon: lands in the cold tier first
  let evt = ScheduledEvent::new(
    "campaign.launch",
    b"x",
    Utc::now() + chrono::Duration::milliseconds(1700),
  )
  .unwrap();
  let id = client.schedule(evt).await.unwrap();
  assert_eq!(cold.count_pending().await.unwrap(), 1);
  assert_eq!(hot.count_pending().await.unwrap(), 0);

  // 进入转移窗口后被提升到热层
  // Promoted into the hot tier once inside the transfer window
  let mut promoted = false;
  for _ in 0..150 {
    if hot.count_pending().await.unwrap() == 1 {
      promoted = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(promoted, "entry should be promoted into the hot tier");

  // 冷副本转入移交完成态
  // The cold copy moves to the handed-off status
  assert_eq!(cold.get(&id).await.unwrap().status, EventStatus::Succeeded);

  // 到期后触发，恰好一次
  // Fires once due, exactly once
  let mut fired = false;
  for _ in 0..150 {
    if bus.published_count() == 1 {
      fired = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(fired, "entry should fire after its scheduled time");

  let mut recorded = false;
  for _ in 0..100 {
    if !analytics.records().is_empty() {
      recorded = true;
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  assert!(recorded);
  let records = analytics.records();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].status, ExecutionStatus::Success);
  assert_eq!(records[0].schedule_id, id);
  assert!(records[0].delay_seconds >= 0.0);

  server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forced_sync_promotes_immediately() {
  let hot = Arc::new(MemoryHotStore::new());
  let cold = Arc::new(MemoryColdStore::new());

  // 转移节拍调慢，验证强制轮不等节拍
  // Slow the transfer tick to show the forced pass does not wait for it
  let config = transfer_config().cold_sync_interval(Duration::from_secs(300));
  let mut server = SchedulerServer::new(
    config,
    hot.clone(),
    cold.clone(),
    Arc::new(MemoryLockManager::new()),
    Arc::new(MemoryEventBus::new()),
    Arc::new(MemoryAnalyticsStore::new()),
  )
  .unwrap();
  server.start().unwrap();
  let client = server.client();

  let evt = ScheduledEvent::new(
    "campaign.launch",
    b"x",
    Utc::now() + chrono::Duration::milliseconds(1500),
  )
  .unwrap();
  client.schedule(evt).await.unwrap();
  assert_eq!(cold.count_pending().await.unwrap(), 1);

  // 等到条目进入转移窗口再强制执行一轮
  // Wait for the entry to enter the window, then force a pass
  tokio::time::sleep(Duration::from_millis(600)).await;
  let transfer = server.transfer_loop().unwrap();
  let promoted = transfer.run_once().await.unwrap();
  assert_eq!(promoted, 1);
  assert_eq!(hot.count_pending().await.unwrap(), 1);
  assert!(transfer.last_transfer_at().is_some());

  server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forced_cleanup_prunes_old_execution_records() {
  let analytics = Arc::new(MemoryAnalyticsStore::new());

  let mut server = SchedulerServer::new(
    transfer_config().execution_history_ttl_days(30),
    Arc::new(MemoryHotStore::new()),
    Arc::new(MemoryColdStore::new()),
    Arc::new(MemoryLockManager::new()),
    Arc::new(MemoryEventBus::new()),
    analytics.clone(),
  )
  .unwrap();
  server.start().unwrap();

  // 一条 60 天前的执行记录和一条今天的
  // One execution record from 60 days ago and one from today
  let evt = ScheduledEvent::new("t", b"", Utc::now()).unwrap();
  let old = ExecutionRecord::for_attempt(
    &evt,
    ExecutionStatus::Success,
    Utc::now() - chrono::Duration::days(60),
    5,
    "n",
    None,
  );
  let fresh =
    ExecutionRecord::for_attempt(&evt, ExecutionStatus::Success, Utc::now(), 5, "n", None);
  analytics.append(&[old, fresh]).await.unwrap();

  let janitor = server.janitor().unwrap();
  janitor.run_once().await.unwrap();

  let remaining = analytics.records();
  assert_eq!(remaining.len(), 1);
  assert!(remaining[0].executed_at > Utc::now() - chrono::Duration::days(1));

  server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stats_reflect_both_tiers() {
  let hot = Arc::new(MemoryHotStore::new());
  let cold = Arc::new(MemoryColdStore::new());

  let mut server = SchedulerServer::new(
    transfer_config().cold_sync_interval(Duration::from_secs(300)),
    hot,
    cold,
    Arc::new(MemoryLockManager::new()),
    Arc::new(MemoryEventBus::new()),
    Arc::new(MemoryAnalyticsStore::new()),
  )
  .unwrap();
  server.start().unwrap();
  let client = server.client();

  let near = ScheduledEvent::new(
    "near.topic",
    b"",
    Utc::now() + chrono::Duration::milliseconds(800),
  )
  .unwrap();
  let far =
    ScheduledEvent::new("far.topic", b"", Utc::now() + chrono::Duration::seconds(30)).unwrap();
  client.schedule(near).await.unwrap();
  client.schedule(far).await.unwrap();

  tokio::time::sleep(Duration::from_millis(100)).await;
  let stats = server.inspector().unwrap().stats().await.unwrap();
  assert_eq!(stats.pending_hot, 1);
  assert_eq!(stats.pending_cold, 1);
  assert!(stats.last_tick_at.is_some());

  server.shutdown().await.unwrap();
}
