//! SQL 分析存储实现
//! SQL analytics store implementation
//!
//! 执行记录仅追加，按 `executed_day` 分区列组织，超过保留期由清理循环删除
//! Execution records are append-only, organized by the `executed_day`
//! partition column, pruned past retention by the cleanup loop

use crate::base::AnalyticsStore;
use crate::error::Result;
use crate::event::ExecutionRecord;
use crate::pgdb::entity::execution_records;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

/// SQL 分析存储
/// SQL analytics store
pub struct PgAnalyticsStore {
  db: DatabaseConnection,
}

impl PgAnalyticsStore {
  /// 创建分析存储
  /// Create the analytics store
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }
}

fn to_model(rec: &ExecutionRecord) -> execution_records::ActiveModel {
  execution_records::ActiveModel {
    execution_id: Set(rec.execution_id.clone()),
    schedule_id: Set(rec.schedule_id.clone()),
    correlation_id: Set(rec.correlation_id.clone()),
    topic: Set(rec.topic.clone()),
    entity_type: Set(rec.entity_type.clone()),
    action: Set(rec.action.clone()),
    scheduled_at: Set(rec.scheduled_at.fixed_offset()),
    executed_at: Set(rec.executed_at.fixed_offset()),
    executed_day: Set(rec.executed_at.date_naive()),
    delay_seconds: Set(rec.delay_seconds),
    status: Set(rec.status.into()),
    error_message: Set(rec.error_message.clone()),
    retry_count: Set(rec.retry_count as i32),
    processing_time_ms: Set(rec.processing_time_ms as i64),
    node_id: Set(rec.node_id.clone()),
    created_at: Set(Utc::now().fixed_offset()),
  }
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
  async fn append(&self, records: &[ExecutionRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    execution_records::Entity::insert_many(records.iter().map(to_model))
      .on_conflict(
        OnConflict::column(execution_records::Column::ExecutionId)
          .do_nothing()
          .to_owned(),
      )
      .exec_without_returning(&self.db)
      .await?;
    Ok(())
  }

  async fn prune(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let deleted = execution_records::Entity::delete_many()
      .filter(execution_records::Column::ExecutedAt.lt(cutoff.fixed_offset()))
      .exec(&self.db)
      .await?;
    Ok(deleted.rows_affected)
  }
}
