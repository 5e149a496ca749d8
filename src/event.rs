//! 事件模块
//! Event module
//!
//! 定义了调度事件与执行记录的数据结构
//! Defines data structures for scheduled events and execution records

use crate::base::constants::{DEFAULT_MAX_DELAY_SECONDS, MAX_PRIORITY, PRIORITY_WEIGHT_MICROS};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 调度事件生命周期状态
/// Lifecycle status of a scheduled event
///
/// 状态只沿有向无环图转移：
/// Status only moves along the DAG:
/// `pending → transferring → pending` (冷到热 / cold to hot) |
/// `pending → processing → {succeeded, failed, pending}`；
/// `cancelled` 仅从 `pending` 可达，`succeeded` 与 `cancelled` 为终态
/// `cancelled` is reachable from `pending` only; `succeeded` and `cancelled` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
  /// 等待到期
  /// Waiting for its fire time
  Pending,
  /// 正在从冷层转移到热层
  /// Being promoted from the cold tier to the hot tier
  Transferring,
  /// 已被某个节点认领执行
  /// Claimed for execution by a node
  Processing,
  /// 已成功发布（冷层副本上表示已移交热层）
  /// Published successfully (on a cold copy this means handed off to the hot tier)
  Succeeded,
  /// 重试耗尽或永久失败
  /// Retries exhausted or permanent failure
  Failed,
  /// 在触发前被取消
  /// Cancelled before firing
  Cancelled,
}

impl EventStatus {
  /// 转换为字符串
  /// Convert to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Transferring => "transferring",
      Self::Processing => "processing",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    }
  }

  /// 是否为终态
  /// Whether the status is terminal
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
  }
}

impl std::fmt::Display for EventStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

mod body_base64 {
  //! 不透明消息体在 JSON 信封中以 base64 存储
  //! The opaque body is carried as base64 inside the JSON envelope
  use base64::prelude::*;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    BASE64_STANDARD
      .decode(s.as_bytes())
      .map_err(serde::de::Error::custom)
  }
}

/// 调度事件 —— 两层调度引擎的工作单元
/// Scheduled event - the unit of work of the two-tier scheduling engine
///
/// `schedule_id` 在入口处分配，在两层之间保持稳定，是整个生命周期的幂等键
/// `schedule_id` is assigned at ingest, stable across tiers, and the
/// idempotency key for the whole lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
  /// 唯一调度标识
  /// Unique schedule identifier
  pub schedule_id: String,
  /// 目标下游主题
  /// Target downstream topic
  pub topic: String,
  /// 路由标签：实体类型
  /// Routing label: entity type
  pub entity_type: String,
  /// 路由标签：动作
  /// Routing label: action
  pub action: String,
  /// 原样透传的消息体
  /// Payload emitted unchanged
  #[serde(with = "body_base64")]
  pub body: Vec<u8>,
  /// 关联标识，透传到下游和分析记录
  /// Correlation id, propagated downstream and into analytics
  #[serde(default)]
  pub correlation_id: Option<String>,
  /// 透传到下游的头信息
  /// Headers propagated downstream
  #[serde(default)]
  pub headers: HashMap<String, String>,
  /// 触发截止时间（UTC，微秒精度）
  /// Firing deadline (UTC, microsecond precision)
  pub scheduled_at: DateTime<Utc>,
  /// 同刻条目的平局裁决：数值越大越先触发
  /// Tie-breaker among equal-time entries; higher fires first
  #[serde(default)]
  pub priority: i32,
  /// 生命周期状态
  /// Lifecycle status
  pub status: EventStatus,
  /// 超过 `scheduled_at` 多少秒后视为过期条目
  /// Seconds past `scheduled_at` before the entry is considered stale
  pub max_delay_seconds: u32,
  /// 暂时性失败的累计次数
  /// Accumulated transient-failure count
  #[serde(default)]
  pub retry_count: u32,
  /// 创建时间
  /// Creation time
  pub created_at: DateTime<Utc>,
  /// 最近更新时间
  /// Last update time
  pub updated_at: DateTime<Utc>,
  /// 认领时间，终态转移时清除
  /// Set at claim, cleared on terminal transition
  #[serde(default)]
  pub processing_started_at: Option<DateTime<Utc>>,
  /// 处于 `processing`/`transferring` 时的持有节点
  /// Owning node while in `processing`/`transferring`
  #[serde(default)]
  pub node_id: Option<String>,
  /// 最近一次失败原因
  /// Last failure reason
  #[serde(default)]
  pub error: Option<String>,
}

impl ScheduledEvent {
  /// 创建新的调度事件
  /// Create a new scheduled event
  ///
  /// `topic` 不能为空白；其余字段通过构建方法设置
  /// `topic` must not be blank; remaining fields are set via builder methods
  pub fn new<T: AsRef<str>>(topic: T, body: &[u8], scheduled_at: DateTime<Utc>) -> Result<Self> {
    let topic = topic.as_ref();
    if topic.trim().is_empty() {
      return Err(Error::invalid_event("topic must not be empty"));
    }

    let now = Utc::now();
    Ok(Self {
      schedule_id: Uuid::new_v4().to_string(),
      topic: topic.to_string(),
      entity_type: String::new(),
      action: String::new(),
      body: body.to_vec(),
      correlation_id: None,
      headers: HashMap::new(),
      scheduled_at,
      priority: 0,
      status: EventStatus::Pending,
      max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
      retry_count: 0,
      created_at: now,
      updated_at: now,
      processing_started_at: None,
      node_id: None,
      error: None,
    })
  }

  /// 设置调度标识（调用方提供的幂等键）
  /// Set the schedule id (caller-supplied idempotency key)
  pub fn with_schedule_id<S: AsRef<str>>(mut self, id: S) -> Self {
    self.schedule_id = id.as_ref().to_string();
    self
  }

  /// 设置实体类型路由标签
  /// Set the entity-type routing label
  pub fn with_entity_type<S: AsRef<str>>(mut self, entity_type: S) -> Self {
    self.entity_type = entity_type.as_ref().to_string();
    self
  }

  /// 设置动作路由标签
  /// Set the action routing label
  pub fn with_action<S: AsRef<str>>(mut self, action: S) -> Self {
    self.action = action.as_ref().to_string();
    self
  }

  /// 设置关联标识
  /// Set the correlation id
  pub fn with_correlation_id<S: AsRef<str>>(mut self, correlation_id: S) -> Self {
    self.correlation_id = Some(correlation_id.as_ref().to_string());
    self
  }

  /// 设置头信息
  /// Set the headers
  pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
    self.headers = headers;
    self
  }

  /// 设置优先级，裁剪到合法范围
  /// Set the priority, clamped to the legal range
  pub fn with_priority(mut self, priority: i32) -> Self {
    self.priority = priority.clamp(-MAX_PRIORITY, MAX_PRIORITY);
    self
  }

  /// 设置过期容忍秒数
  /// Set the staleness tolerance in seconds
  pub fn with_max_delay_seconds(mut self, max_delay_seconds: u32) -> Self {
    self.max_delay_seconds = max_delay_seconds;
    self
  }

  /// 热层排序分值：到期时刻（微秒）减去优先级权重
  /// Hot-tier ordering score: fire time in micros minus the priority weight
  ///
  /// 权重被限制在一秒以内，优先级只在同一秒内打破平局，
  /// 绝不会让条目跨秒重排
  /// The weight stays below one second, so priority breaks ties within the
  /// same second and never reorders entries across seconds
  pub fn score(&self) -> i64 {
    Self::score_at(self.scheduled_at, self.priority)
  }

  /// 任意时刻与优先级对应的排序分值（重新排队时使用）
  /// Ordering score for an arbitrary time and priority (used on requeue)
  pub fn score_at(at: DateTime<Utc>, priority: i32) -> i64 {
    let clamped = priority.clamp(-MAX_PRIORITY, MAX_PRIORITY) as i64;
    at.timestamp_micros() - clamped * PRIORITY_WEIGHT_MICROS
  }

  /// 当前时刻相对到期时间的延迟秒数（未到期为负）
  /// Delay in seconds relative to the fire time (negative before due)
  pub fn delay_seconds(&self, now: DateTime<Utc>) -> f64 {
    (now - self.scheduled_at).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
  }

  /// 是否已超过过期容忍窗口
  /// Whether the entry is past its staleness tolerance
  pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
    self.delay_seconds(now) > self.max_delay_seconds as f64
  }

  /// 幂等性判定：除状态与审计字段外的请求内容是否一致
  /// Idempotency check: whether the request content matches, ignoring
  /// status and audit fields
  pub fn same_request(&self, other: &ScheduledEvent) -> bool {
    self.schedule_id == other.schedule_id
      && self.topic == other.topic
      && self.entity_type == other.entity_type
      && self.action == other.action
      && self.body == other.body
      && self.correlation_id == other.correlation_id
      && self.headers == other.headers
      && self.scheduled_at == other.scheduled_at
      && self.priority == other.priority
      && self.max_delay_seconds == other.max_delay_seconds
  }

  /// 编码为 JSON 信封
  /// Encode into the JSON envelope
  pub fn encode(&self) -> Result<String> {
    Ok(serde_json::to_string(self)?)
  }

  /// 从 JSON 信封解码
  /// Decode from the JSON envelope
  pub fn decode(data: &str) -> Result<Self> {
    Ok(serde_json::from_str(data)?)
  }
}

/// 执行记录状态
/// Execution record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
  /// 成功发布
  /// Published successfully
  Success,
  /// 发布出错（含重试中的失败尝试）
  /// Publish error (including attempts that will be retried)
  Error,
  /// 发布超时
  /// Publish timed out
  Timeout,
  /// 超过容忍窗口被丢弃，未发布
  /// Dropped past the tolerance window, never published
  Skipped,
}

impl ExecutionStatus {
  /// 转换为字符串
  /// Convert to string
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Success => "success",
      Self::Error => "error",
      Self::Timeout => "timeout",
      Self::Skipped => "skipped",
    }
  }
}

impl std::fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// 执行记录 —— 每次执行尝试追加一条，仅追加不修改
/// Execution record - one appended per attempt, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
  /// 本次尝试的唯一标识
  /// Unique identifier of this attempt
  pub execution_id: String,
  /// 所属调度事件
  /// Owning scheduled event
  pub schedule_id: String,
  /// 关联标识
  /// Correlation id
  pub correlation_id: Option<String>,
  /// 下游主题
  /// Downstream topic
  pub topic: String,
  /// 路由标签
  /// Routing labels
  pub entity_type: String,
  pub action: String,
  /// 原定触发时间
  /// Originally scheduled fire time
  pub scheduled_at: DateTime<Utc>,
  /// 实际执行时间
  /// Actual execution time
  pub executed_at: DateTime<Utc>,
  /// 执行延迟（executed − scheduled，秒）
  /// Execution delay (executed minus scheduled, seconds)
  pub delay_seconds: f64,
  /// 尝试结果
  /// Attempt outcome
  pub status: ExecutionStatus,
  /// 失败原因
  /// Failure reason
  pub error_message: Option<String>,
  /// 尝试时的重试计数
  /// Retry count at attempt time
  pub retry_count: u32,
  /// 处理耗时（毫秒）
  /// Processing time in milliseconds
  pub processing_time_ms: u64,
  /// 执行节点
  /// Executing node
  pub node_id: String,
}

impl ExecutionRecord {
  /// 从事件与结果构造一条执行记录
  /// Build an execution record from an event and its outcome
  pub fn for_attempt(
    evt: &ScheduledEvent,
    status: ExecutionStatus,
    executed_at: DateTime<Utc>,
    processing_time_ms: u64,
    node_id: &str,
    error_message: Option<String>,
  ) -> Self {
    Self {
      execution_id: Uuid::new_v4().to_string(),
      schedule_id: evt.schedule_id.clone(),
      correlation_id: evt.correlation_id.clone(),
      topic: evt.topic.clone(),
      entity_type: evt.entity_type.clone(),
      action: evt.action.clone(),
      scheduled_at: evt.scheduled_at,
      executed_at,
      delay_seconds: evt.delay_seconds(executed_at),
      status,
      error_message,
      retry_count: evt.retry_count,
      processing_time_ms,
      node_id: node_id.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  #[test]
  fn test_new_rejects_blank_topic() {
    assert!(ScheduledEvent::new("  ", b"x", Utc::now()).is_err());
    assert!(ScheduledEvent::new("user.welcome", b"x", Utc::now()).is_ok());
  }

  #[test]
  fn test_score_priority_breaks_ties_within_second() {
    let at = Utc::now();
    let low = ScheduledEvent::new("t", b"", at).unwrap().with_priority(0);
    let high = ScheduledEvent::new("t", b"", at).unwrap().with_priority(5);
    // 优先级高 => 分值更小 => 先触发
    // Higher priority => smaller score => fires first
    assert!(high.score() < low.score());
  }

  #[test]
  fn test_score_never_reorders_across_seconds() {
    let at = Utc::now();
    let sooner = ScheduledEvent::new("t", b"", at)
      .unwrap()
      .with_priority(-10_000);
    let later = ScheduledEvent::new("t", b"", at + Duration::seconds(1))
      .unwrap()
      .with_priority(10_000);
    assert!(sooner.score() < later.score());
  }

  #[test]
  fn test_priority_clamped() {
    let evt = ScheduledEvent::new("t", b"", Utc::now())
      .unwrap()
      .with_priority(5_000);
    assert_eq!(evt.priority, MAX_PRIORITY);
  }

  #[test]
  fn test_staleness() {
    let at = Utc::now() - Duration::seconds(10);
    let evt = ScheduledEvent::new("t", b"", at)
      .unwrap()
      .with_max_delay_seconds(5);
    assert!(evt.is_stale(Utc::now()));

    let tolerant = ScheduledEvent::new("t", b"", at)
      .unwrap()
      .with_max_delay_seconds(3600);
    assert!(!tolerant.is_stale(Utc::now()));
  }

  #[test]
  fn test_encode_decode_round_trip() {
    let mut headers = HashMap::new();
    headers.insert("tenant".to_string(), "acme".to_string());
    let evt = ScheduledEvent::new("billing.invoice", b"\x00\x01binary", Utc::now())
      .unwrap()
      .with_entity_type("invoice")
      .with_action("send")
      .with_correlation_id("corr-1")
      .with_headers(headers)
      .with_priority(3);

    let decoded = ScheduledEvent::decode(&evt.encode().unwrap()).unwrap();
    assert!(evt.same_request(&decoded));
    assert_eq!(decoded.body, b"\x00\x01binary");
  }

  #[test]
  fn test_same_request_ignores_lifecycle_fields() {
    let evt = ScheduledEvent::new("t", b"x", Utc::now()).unwrap();
    let mut replay = evt.clone();
    replay.status = EventStatus::Processing;
    replay.retry_count = 2;
    replay.node_id = Some("node-b".into());
    assert!(evt.same_request(&replay));

    let mut different = evt.clone();
    different.body = b"y".to_vec();
    assert!(!evt.same_request(&different));
  }

  #[test]
  fn test_execution_record_delay() {
    let at = Utc::now() - Duration::seconds(2);
    let evt = ScheduledEvent::new("t", b"", at).unwrap();
    let rec = ExecutionRecord::for_attempt(
      &evt,
      ExecutionStatus::Success,
      Utc::now(),
      12,
      "node-a",
      None,
    );
    assert!(rec.delay_seconds >= 2.0 && rec.delay_seconds < 3.0);
    assert_eq!(rec.schedule_id, evt.schedule_id);
  }
}
