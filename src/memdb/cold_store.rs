//! 内存冷层存储实现
//! In-memory cold-tier store implementation
//!
//! 与 SQL 实现保持相同的受保护状态转移语义
//! Keeps the same guarded-transition semantics as the SQL implementation

use crate::base::{CancelOutcome, ColdStore};
use crate::error::{Error, Result};
use crate::event::{EventStatus, ScheduledEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// 内存冷层存储
/// In-memory cold-tier store
#[derive(Default)]
pub struct MemoryColdStore {
  events: RwLock<HashMap<String, ScheduledEvent>>,
}

impl MemoryColdStore {
  /// 创建内存冷层存储
  /// Create an in-memory cold store
  pub fn new() -> Self {
    Self::default()
  }

  /// 读取一条冷层副本（测试用）
  /// Read one cold copy (for tests)
  pub async fn get(&self, schedule_id: &str) -> Option<ScheduledEvent> {
    self.events.read().await.get(schedule_id).cloned()
  }

  async fn transition(
    &self,
    schedule_id: &str,
    from: EventStatus,
    to: EventStatus,
    node_id: Option<&str>,
  ) -> Result<bool> {
    let mut events = self.events.write().await;
    match events.get_mut(schedule_id) {
      Some(evt) if evt.status == from => {
        evt.status = to;
        evt.node_id = node_id.map(str::to_string);
        evt.updated_at = Utc::now();
        Ok(true)
      }
      _ => Ok(false),
    }
  }
}

#[async_trait]
impl ColdStore for MemoryColdStore {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn insert(&self, evt: &ScheduledEvent) -> Result<()> {
    let mut events = self.events.write().await;
    if let Some(existing) = events.get(&evt.schedule_id) {
      if existing.same_request(evt) {
        return Ok(());
      }
      return Err(Error::Conflict {
        schedule_id: evt.schedule_id.clone(),
      });
    }
    let mut stored = evt.clone();
    stored.status = EventStatus::Pending;
    events.insert(stored.schedule_id.clone(), stored);
    Ok(())
  }

  async fn scan_due_for_transfer(
    &self,
    now: DateTime<Utc>,
    horizon: Duration,
    limit: usize,
  ) -> Result<Vec<ScheduledEvent>> {
    let cutoff =
      now + chrono::Duration::from_std(horizon).unwrap_or_else(|_| chrono::Duration::zero());
    let events = self.events.read().await;
    let mut due: Vec<ScheduledEvent> = events
      .values()
      .filter(|evt| evt.status == EventStatus::Pending && evt.scheduled_at <= cutoff)
      .cloned()
      .collect();
    due.sort_by(|a, b| {
      a.scheduled_at
        .cmp(&b.scheduled_at)
        .then(b.priority.cmp(&a.priority))
    });
    due.truncate(limit);
    Ok(due)
  }

  async fn mark_transferring(&self, schedule_id: &str, node_id: &str) -> Result<bool> {
    self
      .transition(
        schedule_id,
        EventStatus::Pending,
        EventStatus::Transferring,
        Some(node_id),
      )
      .await
  }

  async fn finalize_transferred(&self, schedule_id: &str) -> Result<bool> {
    self
      .transition(
        schedule_id,
        EventStatus::Transferring,
        EventStatus::Succeeded,
        None,
      )
      .await
  }

  async fn revert_transfer(&self, schedule_id: &str) -> Result<bool> {
    self
      .transition(
        schedule_id,
        EventStatus::Transferring,
        EventStatus::Pending,
        None,
      )
      .await
  }

  async fn revert_stale_transfers(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let mut events = self.events.write().await;
    let mut reverted = 0;
    for evt in events.values_mut() {
      if evt.status == EventStatus::Transferring && evt.updated_at < cutoff {
        evt.status = EventStatus::Pending;
        evt.node_id = None;
        evt.updated_at = Utc::now();
        reverted += 1;
      }
    }
    Ok(reverted)
  }

  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome> {
    let mut events = self.events.write().await;
    match events.get_mut(schedule_id) {
      None => Ok(CancelOutcome::NotFound),
      // 已取消的行对第二次取消而言等同不存在
      // An already-cancelled row reads as not-found to a second cancel
      Some(evt) if evt.status == EventStatus::Cancelled => Ok(CancelOutcome::NotFound),
      Some(evt) if evt.status != EventStatus::Pending => Ok(CancelOutcome::TooLate),
      Some(evt) => {
        evt.status = EventStatus::Cancelled;
        evt.updated_at = Utc::now();
        Ok(CancelOutcome::Cancelled)
      }
    }
  }

  async fn cleanup_expired(&self, now: DateTime<Utc>, ttl_days: u32) -> Result<u64> {
    let cutoff = now - chrono::Duration::days(ttl_days as i64);
    let mut events = self.events.write().await;
    let before = events.len();
    events.retain(|_, evt| !(evt.status.is_terminal() && evt.updated_at < cutoff));
    Ok((before - events.len()) as u64)
  }

  async fn count_pending(&self) -> Result<u64> {
    let events = self.events.read().await;
    Ok(
      events
        .values()
        .filter(|evt| evt.status == EventStatus::Pending)
        .count() as u64,
    )
  }
}
