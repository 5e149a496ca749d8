//! 内存热层存储实现
//! In-memory hot-tier store implementation
//!
//! 使用内存数据结构实现 HotStore trait；语义与 Redis 实现一致，
//! 用于测试和无外部服务的本地运行
//! Implements the HotStore trait with in-memory data structures; semantics
//! match the Redis implementation, used for tests and dependency-free runs

use crate::base::{CancelOutcome, HotStore, ReleaseOutcome};
use crate::error::{Error, Result};
use crate::event::{EventStatus, ScheduledEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct HotStorage {
  /// schedule_id -> 事件
  /// schedule_id -> event
  events: HashMap<String, ScheduledEvent>,
  /// (排序分值, schedule_id)，模拟排序集合
  /// (ordering score, schedule_id), mirroring the sorted set
  scheduled: BTreeMap<(i64, String), ()>,
  /// (认领时刻微秒, schedule_id)
  /// (claim time in micros, schedule_id)
  lease: BTreeMap<(i64, String), ()>,
}

/// 内存热层存储
/// In-memory hot-tier store
#[derive(Default)]
pub struct MemoryHotStore {
  storage: RwLock<HotStorage>,
}

impl MemoryHotStore {
  /// 创建内存热层存储
  /// Create an in-memory hot store
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl HotStore for MemoryHotStore {
  async fn ping(&self) -> Result<()> {
    // 内存存储始终可用
    // Memory storage is always available
    Ok(())
  }

  async fn add(&self, evt: &ScheduledEvent) -> Result<()> {
    let mut storage = self.storage.write().await;
    if let Some(existing) = storage.events.get(&evt.schedule_id) {
      if existing.same_request(evt) {
        return Ok(());
      }
      return Err(Error::Conflict {
        schedule_id: evt.schedule_id.clone(),
      });
    }

    let mut stored = evt.clone();
    stored.status = EventStatus::Pending;
    storage
      .scheduled
      .insert((stored.score(), stored.schedule_id.clone()), ());
    storage.events.insert(stored.schedule_id.clone(), stored);
    Ok(())
  }

  async fn peek_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledEvent>> {
    let storage = self.storage.read().await;
    let cutoff = now.timestamp_micros();
    let due = storage
      .scheduled
      .iter()
      .take_while(|((score, _), _)| *score <= cutoff)
      .take(limit)
      .filter_map(|((_, id), _)| storage.events.get(id).cloned())
      .collect();
    Ok(due)
  }

  async fn claim(
    &self,
    schedule_id: &str,
    node_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<ScheduledEvent>> {
    let mut storage = self.storage.write().await;
    let score = match storage.events.get(schedule_id) {
      Some(evt) if evt.status == EventStatus::Pending => evt.score(),
      _ => return Ok(None),
    };
    if storage
      .scheduled
      .remove(&(score, schedule_id.to_string()))
      .is_none()
    {
      return Ok(None);
    }

    let claimed = match storage.events.get_mut(schedule_id) {
      Some(evt) => {
        evt.status = EventStatus::Processing;
        evt.processing_started_at = Some(now);
        evt.node_id = Some(node_id.to_string());
        evt.updated_at = now;
        evt.clone()
      }
      None => return Ok(None),
    };
    storage
      .lease
      .insert((now.timestamp_micros(), schedule_id.to_string()), ());
    Ok(Some(claimed))
  }

  async fn release(&self, evt: &ScheduledEvent, outcome: ReleaseOutcome) -> Result<()> {
    let mut storage = self.storage.write().await;
    let lease_keys: Vec<(i64, String)> = storage
      .lease
      .keys()
      .filter(|(_, id)| id == &evt.schedule_id)
      .cloned()
      .collect();
    for key in lease_keys {
      storage.lease.remove(&key);
    }

    match outcome {
      ReleaseOutcome::Succeeded | ReleaseOutcome::Failed => {
        let scheduled_keys: Vec<(i64, String)> = storage
          .scheduled
          .keys()
          .filter(|(_, id)| id == &evt.schedule_id)
          .cloned()
          .collect();
        for key in scheduled_keys {
          storage.scheduled.remove(&key);
        }
        // 终态副本保留在记录表中，迟到的取消得到“太迟”
        // The terminal copy stays in the record map so late cancels read
        // "too late"
        if let Some(stored) = storage.events.get_mut(&evt.schedule_id) {
          stored.status = if matches!(outcome, ReleaseOutcome::Succeeded) {
            EventStatus::Succeeded
          } else {
            EventStatus::Failed
          };
          stored.processing_started_at = None;
          stored.node_id = None;
          stored.updated_at = Utc::now();
        }
      }
      ReleaseOutcome::Requeue(delay) => {
        let retry_at = Utc::now()
          + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let mut requeued = evt.clone();
        requeued.status = EventStatus::Pending;
        requeued.processing_started_at = None;
        requeued.node_id = None;
        requeued.updated_at = Utc::now();
        let score = ScheduledEvent::score_at(retry_at, requeued.priority);
        storage
          .scheduled
          .insert((score, requeued.schedule_id.clone()), ());
        storage
          .events
          .insert(requeued.schedule_id.clone(), requeued);
      }
    }
    Ok(())
  }

  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome> {
    let mut storage = self.storage.write().await;
    match storage.events.get(schedule_id) {
      None => Ok(CancelOutcome::NotFound),
      Some(evt) if evt.status != EventStatus::Pending => Ok(CancelOutcome::TooLate),
      Some(evt) => {
        let score = evt.score();
        storage.scheduled.remove(&(score, schedule_id.to_string()));
        storage.events.remove(schedule_id);
        Ok(CancelOutcome::Cancelled)
      }
    }
  }

  async fn reap_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<u64> {
    let mut storage = self.storage.write().await;
    let cutoff_micros = cutoff.timestamp_micros();
    let stale: Vec<(i64, String)> = storage
      .lease
      .keys()
      .take_while(|(claimed, _)| *claimed <= cutoff_micros)
      .take(limit)
      .cloned()
      .collect();

    let mut reverted = 0;
    let now = Utc::now();
    for (claimed, id) in stale {
      storage.lease.remove(&(claimed, id.clone()));
      if let Some(evt) = storage.events.get_mut(&id) {
        evt.status = EventStatus::Pending;
        evt.processing_started_at = None;
        evt.node_id = None;
        evt.updated_at = now;
        // 按条目自己的触发时刻与优先级重算分值，保留同批之间的平局裁决
        // Score recomputed from the entry's own fire time and priority,
        // keeping the tie-break among entries reaped in the same pass
        let score = evt.score();
        storage.scheduled.insert((score, id), ());
        reverted += 1;
      }
    }
    Ok(reverted)
  }

  async fn count_pending(&self) -> Result<u64> {
    let storage = self.storage.read().await;
    Ok(storage.scheduled.len() as u64)
  }

  async fn count_due(&self, now: DateTime<Utc>) -> Result<u64> {
    let storage = self.storage.read().await;
    let cutoff = now.timestamp_micros();
    Ok(
      storage
        .scheduled
        .keys()
        .take_while(|(score, _)| *score <= cutoff)
        .count() as u64,
    )
  }

  async fn count_processing(&self) -> Result<u64> {
    let storage = self.storage.read().await;
    Ok(storage.lease.len() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn event_at(offset_secs: i64) -> ScheduledEvent {
    ScheduledEvent::new("t", b"x", Utc::now() + Duration::seconds(offset_secs)).unwrap()
  }

  #[tokio::test]
  async fn test_add_is_idempotent() {
    let store = MemoryHotStore::new();
    let evt = event_at(10);
    store.add(&evt).await.unwrap();
    store.add(&evt).await.unwrap();
    assert_eq!(store.count_pending().await.unwrap(), 1);

    let mut conflicting = evt.clone();
    conflicting.body = b"different".to_vec();
    assert!(matches!(
      store.add(&conflicting).await,
      Err(Error::Conflict { .. })
    ));
  }

  #[tokio::test]
  async fn test_claim_exactly_once() {
    let store = MemoryHotStore::new();
    let evt = event_at(-1);
    store.add(&evt).await.unwrap();

    let now = Utc::now();
    let first = store.claim(&evt.schedule_id, "node-a", now).await.unwrap();
    let second = store.claim(&evt.schedule_id, "node-b", now).await.unwrap();
    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(store.count_processing().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_peek_due_orders_by_priority_within_second() {
    let store = MemoryHotStore::new();
    let at = Utc::now() - Duration::seconds(1);
    let low = ScheduledEvent::new("t", b"", at).unwrap().with_priority(0);
    let high = ScheduledEvent::new("t", b"", at).unwrap().with_priority(9);
    store.add(&low).await.unwrap();
    store.add(&high).await.unwrap();

    let due = store.peek_due(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].schedule_id, high.schedule_id);
  }

  #[tokio::test]
  async fn test_release_requeue_returns_to_pending() {
    let store = MemoryHotStore::new();
    let evt = event_at(-1);
    store.add(&evt).await.unwrap();
    let claimed = store
      .claim(&evt.schedule_id, "node-a", Utc::now())
      .await
      .unwrap()
      .unwrap();

    store
      .release(&claimed, ReleaseOutcome::Requeue(std::time::Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(store.count_processing().await.unwrap(), 0);
    assert_eq!(store.count_pending().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn test_cancel_outcomes() {
    let store = MemoryHotStore::new();
    let evt = event_at(5);
    store.add(&evt).await.unwrap();

    assert_eq!(
      store.cancel(&evt.schedule_id).await.unwrap(),
      CancelOutcome::Cancelled
    );
    assert_eq!(
      store.cancel(&evt.schedule_id).await.unwrap(),
      CancelOutcome::NotFound
    );

    let claimed = event_at(-1);
    store.add(&claimed).await.unwrap();
    store
      .claim(&claimed.schedule_id, "node-a", Utc::now())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(
      store.cancel(&claimed.schedule_id).await.unwrap(),
      CancelOutcome::TooLate
    );
  }

  #[tokio::test]
  async fn test_reap_stale_reverts_abandoned_claims() {
    let store = MemoryHotStore::new();
    let evt = event_at(-1);
    store.add(&evt).await.unwrap();
    store
      .claim(&evt.schedule_id, "node-a", Utc::now() - Duration::seconds(60))
      .await
      .unwrap()
      .unwrap();

    let reverted = store
      .reap_stale(Utc::now() - Duration::seconds(10), 100)
      .await
      .unwrap();
    assert_eq!(reverted, 1);
    assert_eq!(store.count_pending().await.unwrap(), 1);
    assert_eq!(store.count_processing().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_reap_preserves_priority_order_within_batch() {
    let store = MemoryHotStore::new();
    let at = Utc::now() - Duration::seconds(1);
    let low = ScheduledEvent::new("t", b"", at).unwrap().with_priority(0);
    let high = ScheduledEvent::new("t", b"", at).unwrap().with_priority(9);
    store.add(&low).await.unwrap();
    store.add(&high).await.unwrap();

    // 同一节点认领两条后崩溃，一次回收批量还原
    // One node claims both, dies, and a single reap pass reverts them
    store
      .claim(&low.schedule_id, "node-a", Utc::now() - Duration::seconds(60))
      .await
      .unwrap()
      .unwrap();
    store
      .claim(&high.schedule_id, "node-a", Utc::now() - Duration::seconds(59))
      .await
      .unwrap()
      .unwrap();

    let reverted = store
      .reap_stale(Utc::now() - Duration::seconds(10), 100)
      .await
      .unwrap();
    assert_eq!(reverted, 2);

    // 高优先级仍然排在前面，回收没有抹平平局裁决
    // The higher priority still sorts first; the reap did not flatten the
    // tie-break
    let due = store.peek_due(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].schedule_id, high.schedule_id);
  }
}
