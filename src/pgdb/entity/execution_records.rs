//! 执行记录实体
//! Execution record entity

use crate::event::ExecutionStatus;
use sea_orm::entity::prelude::*;

/// 执行结果枚举（数据库侧）
/// Execution result enum (database side)
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
pub enum ExecutionResult {
  #[sea_orm(string_value = "success")]
  Success,
  #[sea_orm(string_value = "error")]
  Error,
  #[sea_orm(string_value = "timeout")]
  Timeout,
  #[sea_orm(string_value = "skipped")]
  Skipped,
}

impl From<ExecutionStatus> for ExecutionResult {
  fn from(status: ExecutionStatus) -> Self {
    match status {
      ExecutionStatus::Success => Self::Success,
      ExecutionStatus::Error => Self::Error,
      ExecutionStatus::Timeout => Self::Timeout,
      ExecutionStatus::Skipped => Self::Skipped,
    }
  }
}

impl From<ExecutionResult> for ExecutionStatus {
  fn from(result: ExecutionResult) -> Self {
    match result {
      ExecutionResult::Success => Self::Success,
      ExecutionResult::Error => Self::Error,
      ExecutionResult::Timeout => Self::Timeout,
      ExecutionResult::Skipped => Self::Skipped,
    }
  }
}

/// 执行记录实体模型 —— 每次尝试一行，仅追加
/// Execution record entity model - one row per attempt, append-only
///
/// `executed_day` 是按天的分区列，保留期裁剪以 `executed_at` 为准
/// `executed_day` is the per-day partition column; retention pruning keys
/// off `executed_at`
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "execution_records")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub execution_id: String,
  pub schedule_id: String,
  pub correlation_id: Option<String>,
  pub topic: String,
  pub entity_type: String,
  pub action: String,
  pub scheduled_at: DateTimeWithTimeZone,
  pub executed_at: DateTimeWithTimeZone,
  pub executed_day: Date,
  pub delay_seconds: f64,
  pub status: ExecutionResult,
  pub error_message: Option<String>,
  pub retry_count: i32,
  pub processing_time_ms: i64,
  pub node_id: String,
  pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
