//! 内存下游总线与分析存储
//! In-memory downstream bus and analytics store
//!
//! 总线记录每次发布，并支持脚本化的失败注入，用于验证重试路径
//! The bus records every publish and supports scripted failure injection
//! for exercising the retry path

use crate::base::{AnalyticsStore, EventBus};
use crate::error::{Error, Result};
use crate::event::ExecutionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// 一次发布的预设结果
/// A scripted outcome for one publish
#[derive(Debug, Clone)]
pub enum PublishOutcome {
  /// 发布成功
  /// Publish succeeds
  Ok,
  /// 暂时性失败
  /// Transient failure
  Transient(String),
  /// 永久性失败
  /// Permanent failure
  Permanent(String),
}

/// 已发布消息的副本
/// Copy of a published message
#[derive(Debug, Clone)]
pub struct PublishedMessage {
  pub topic: String,
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
  pub correlation_id: Option<String>,
}

/// 内存下游总线
/// In-memory downstream bus
#[derive(Default)]
pub struct MemoryEventBus {
  published: Mutex<Vec<PublishedMessage>>,
  outcomes: Mutex<VecDeque<PublishOutcome>>,
}

impl MemoryEventBus {
  /// 创建内存总线
  /// Create an in-memory bus
  pub fn new() -> Self {
    Self::default()
  }

  /// 预设下一次发布的结果；队列为空时发布总是成功
  /// Script the outcome of the next publish; with an empty queue every
  /// publish succeeds
  pub fn push_outcome(&self, outcome: PublishOutcome) {
    self.outcomes.lock().unwrap().push_back(outcome);
  }

  /// 已发布消息的快照
  /// Snapshot of published messages
  pub fn published(&self) -> Vec<PublishedMessage> {
    self.published.lock().unwrap().clone()
  }

  /// 已发布消息数量
  /// Number of published messages
  pub fn published_count(&self) -> usize {
    self.published.lock().unwrap().len()
  }
}

#[async_trait]
impl EventBus for MemoryEventBus {
  async fn publish(
    &self,
    topic: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    correlation_id: Option<&str>,
  ) -> Result<()> {
    let scripted = self.outcomes.lock().unwrap().pop_front();
    match scripted {
      Some(PublishOutcome::Transient(reason)) => Err(Error::PublishTransient(reason)),
      Some(PublishOutcome::Permanent(reason)) => Err(Error::PublishPermanent(reason)),
      Some(PublishOutcome::Ok) | None => {
        self.published.lock().unwrap().push(PublishedMessage {
          topic: topic.to_string(),
          headers: headers.clone(),
          body: body.to_vec(),
          correlation_id: correlation_id.map(str::to_string),
        });
        Ok(())
      }
    }
  }
}

/// 内存分析存储
/// In-memory analytics store
#[derive(Default)]
pub struct MemoryAnalyticsStore {
  records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryAnalyticsStore {
  /// 创建内存分析存储
  /// Create an in-memory analytics store
  pub fn new() -> Self {
    Self::default()
  }

  /// 已写入记录的快照
  /// Snapshot of the written records
  pub fn records(&self) -> Vec<ExecutionRecord> {
    self.records.lock().unwrap().clone()
  }
}

#[async_trait]
impl AnalyticsStore for MemoryAnalyticsStore {
  async fn append(&self, records: &[ExecutionRecord]) -> Result<()> {
    self.records.lock().unwrap().extend_from_slice(records);
    Ok(())
  }

  async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let mut records = self.records.lock().unwrap();
    let before = records.len();
    records.retain(|rec| rec.executed_at >= cutoff);
    Ok((before - records.len()) as u64)
  }
}
