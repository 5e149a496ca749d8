//! 冷层调度事件实体
//! Cold-tier scheduled event entity

use crate::event::EventStatus;
use sea_orm::entity::prelude::*;
use std::collections::HashMap;
use tracing::warn;

/// 事件状态枚举（数据库侧）
/// Event state enum (database side)
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum EventState {
  #[sea_orm(string_value = "pending")]
  Pending,
  #[sea_orm(string_value = "transferring")]
  Transferring,
  #[sea_orm(string_value = "processing")]
  Processing,
  #[sea_orm(string_value = "succeeded")]
  Succeeded,
  #[sea_orm(string_value = "failed")]
  Failed,
  #[sea_orm(string_value = "cancelled")]
  Cancelled,
}

impl From<EventStatus> for EventState {
  fn from(status: EventStatus) -> Self {
    match status {
      EventStatus::Pending => Self::Pending,
      EventStatus::Transferring => Self::Transferring,
      EventStatus::Processing => Self::Processing,
      EventStatus::Succeeded => Self::Succeeded,
      EventStatus::Failed => Self::Failed,
      EventStatus::Cancelled => Self::Cancelled,
    }
  }
}

impl From<EventState> for EventStatus {
  fn from(state: EventState) -> Self {
    match state {
      EventState::Pending => Self::Pending,
      EventState::Transferring => Self::Transferring,
      EventState::Processing => Self::Processing,
      EventState::Succeeded => Self::Succeeded,
      EventState::Failed => Self::Failed,
      EventState::Cancelled => Self::Cancelled,
    }
  }
}

/// 调度事件实体模型
/// Scheduled event entity model
///
/// `scheduled_day` 是按天的分区列，冗余自 `scheduled_at`
/// `scheduled_day` is the per-day partition column, derived from `scheduled_at`
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scheduled_events")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub schedule_id: String,
  pub topic: String,
  pub entity_type: String,
  pub action: String,
  #[sea_orm(column_type = "VarBinary(StringLen::None)")]
  pub body: Vec<u8>,
  pub correlation_id: Option<String>,
  #[sea_orm(nullable)]
  pub headers: Option<Json>,
  pub scheduled_at: DateTimeWithTimeZone,
  pub scheduled_day: Date,
  pub priority: i32,
  pub status: EventState,
  pub max_delay_seconds: i64,
  pub retry_count: i32,
  pub created_at: DateTimeWithTimeZone,
  pub updated_at: DateTimeWithTimeZone,
  pub processing_started_at: Option<DateTimeWithTimeZone>,
  pub node_id: Option<String>,
  pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
  /// 将 headers JSON 解析为 HashMap
  /// Parse the headers JSON into a HashMap
  pub fn parse_headers(&self) -> HashMap<String, String> {
    match &self.headers {
      Some(h) => match serde_json::from_value(h.clone()) {
        Ok(headers) => headers,
        Err(e) => {
          warn!(
            schedule_id = %self.schedule_id,
            error = %e,
            "Failed to parse event headers JSON, returning empty headers"
          );
          HashMap::new()
        }
      },
      None => HashMap::new(),
    }
  }
}

/// 将 HashMap 序列化为 headers JSON
/// Serialize a HashMap into the headers JSON
pub fn serialize_headers(headers: &HashMap<String, String>) -> Option<Json> {
  if headers.is_empty() {
    None
  } else {
    match serde_json::to_value(headers) {
      Ok(json) => Some(json),
      Err(e) => {
        warn!(
          error = %e,
          "Failed to serialize event headers to JSON, headers will not be stored"
        );
        None
      }
    }
  }
}
