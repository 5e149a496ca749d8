//! SQL 冷层存储实现
//! SQL cold-tier store implementation
//!
//! 冷层是一个以 `(status, scheduled_at)` 为索引、按天分区列组织的持久表。
//! 读后写一致性只保证最终一致，因此每个状态转移都是条件更新：
//! 受影响行数为零即表示状态已被别人改掉，调用方据此跳过。
//! The cold tier is a durable table indexed by `(status, scheduled_at)` and
//! organized by a per-day partition column. Read-after-write consistency is
//! eventual, so every transition is a conditional update: zero affected
//! rows means someone else changed the status first and the caller skips.

use crate::base::{CancelOutcome, ColdStore};
use crate::error::{Error, Result};
use crate::event::ScheduledEvent;
use crate::pgdb::entity::scheduled_events::{self, EventState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
  ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
  QueryOrder, QuerySelect,
};
use std::time::Duration;

/// SQL 冷层存储
/// SQL cold-tier store
pub struct PgColdStore {
  db: DatabaseConnection,
}

impl PgColdStore {
  /// 创建冷层存储
  /// Create the cold store
  pub fn new(db: DatabaseConnection) -> Self {
    Self { db }
  }
}

fn to_model(evt: &ScheduledEvent) -> scheduled_events::ActiveModel {
  scheduled_events::ActiveModel {
    schedule_id: Set(evt.schedule_id.clone()),
    topic: Set(evt.topic.clone()),
    entity_type: Set(evt.entity_type.clone()),
    action: Set(evt.action.clone()),
    body: Set(evt.body.clone()),
    correlation_id: Set(evt.correlation_id.clone()),
    headers: Set(scheduled_events::serialize_headers(&evt.headers)),
    scheduled_at: Set(evt.scheduled_at.fixed_offset()),
    scheduled_day: Set(evt.scheduled_at.date_naive()),
    priority: Set(evt.priority),
    status: Set(evt.status.into()),
    max_delay_seconds: Set(evt.max_delay_seconds as i64),
    retry_count: Set(evt.retry_count as i32),
    created_at: Set(evt.created_at.fixed_offset()),
    updated_at: Set(evt.updated_at.fixed_offset()),
    processing_started_at: Set(evt.processing_started_at.map(|t| t.fixed_offset())),
    node_id: Set(evt.node_id.clone()),
    error: Set(evt.error.clone()),
  }
}

fn from_model(m: scheduled_events::Model) -> ScheduledEvent {
  let headers = m.parse_headers();
  ScheduledEvent {
    schedule_id: m.schedule_id,
    topic: m.topic,
    entity_type: m.entity_type,
    action: m.action,
    body: m.body,
    correlation_id: m.correlation_id,
    headers,
    scheduled_at: m.scheduled_at.with_timezone(&Utc),
    priority: m.priority,
    status: m.status.into(),
    max_delay_seconds: m.max_delay_seconds.max(0) as u32,
    retry_count: m.retry_count.max(0) as u32,
    created_at: m.created_at.with_timezone(&Utc),
    updated_at: m.updated_at.with_timezone(&Utc),
    processing_started_at: m.processing_started_at.map(|t| t.with_timezone(&Utc)),
    node_id: m.node_id,
    error: m.error,
  }
}

#[async_trait]
impl ColdStore for PgColdStore {
  async fn ping(&self) -> Result<()> {
    self.db.ping().await?;
    Ok(())
  }

  async fn insert(&self, evt: &ScheduledEvent) -> Result<()> {
    let inserted = scheduled_events::Entity::insert(to_model(evt))
      .on_conflict(
        OnConflict::column(scheduled_events::Column::ScheduleId)
          .do_nothing()
          .to_owned(),
      )
      .exec_without_returning(&self.db)
      .await?;

    if inserted == 0 {
      // 已存在：内容一致视为幂等重放，不一致报冲突
      // Already present: identical content is an idempotent replay,
      // different content is a conflict
      let existing = scheduled_events::Entity::find_by_id(evt.schedule_id.clone())
        .one(&self.db)
        .await?
        .map(from_model);
      match existing {
        Some(existing) if existing.same_request(evt) => Ok(()),
        Some(_) => Err(Error::Conflict {
          schedule_id: evt.schedule_id.clone(),
        }),
        None => Err(Error::transient(format!(
          "insert of {} raced with a delete",
          evt.schedule_id
        ))),
      }
    } else {
      Ok(())
    }
  }

  async fn scan_due_for_transfer(
    &self,
    now: DateTime<Utc>,
    horizon: Duration,
    limit: usize,
  ) -> Result<Vec<ScheduledEvent>> {
    let cutoff =
      now + chrono::Duration::from_std(horizon).unwrap_or_else(|_| chrono::Duration::zero());
    let models = scheduled_events::Entity::find()
      .filter(scheduled_events::Column::Status.eq(EventState::Pending))
      .filter(scheduled_events::Column::ScheduledAt.lte(cutoff.fixed_offset()))
      .order_by_asc(scheduled_events::Column::ScheduledAt)
      .order_by_desc(scheduled_events::Column::Priority)
      .limit(limit as u64)
      .all(&self.db)
      .await?;
    Ok(models.into_iter().map(from_model).collect())
  }

  async fn mark_transferring(&self, schedule_id: &str, node_id: &str) -> Result<bool> {
    let updated = scheduled_events::Entity::update_many()
      .col_expr(
        scheduled_events::Column::Status,
        Expr::value(EventState::Transferring),
      )
      .col_expr(scheduled_events::Column::NodeId, Expr::value(node_id))
      .col_expr(
        scheduled_events::Column::UpdatedAt,
        Expr::value(Utc::now().fixed_offset()),
      )
      .filter(scheduled_events::Column::ScheduleId.eq(schedule_id))
      .filter(scheduled_events::Column::Status.eq(EventState::Pending))
      .exec(&self.db)
      .await?;
    Ok(updated.rows_affected == 1)
  }

  async fn finalize_transferred(&self, schedule_id: &str) -> Result<bool> {
    let updated = scheduled_events::Entity::update_many()
      .col_expr(
        scheduled_events::Column::Status,
        Expr::value(EventState::Succeeded),
      )
      .col_expr(
        scheduled_events::Column::UpdatedAt,
        Expr::value(Utc::now().fixed_offset()),
      )
      .filter(scheduled_events::Column::ScheduleId.eq(schedule_id))
      .filter(scheduled_events::Column::Status.eq(EventState::Transferring))
      .exec(&self.db)
      .await?;
    Ok(updated.rows_affected == 1)
  }

  async fn revert_transfer(&self, schedule_id: &str) -> Result<bool> {
    let updated = scheduled_events::Entity::update_many()
      .col_expr(
        scheduled_events::Column::Status,
        Expr::value(EventState::Pending),
      )
      .col_expr(
        scheduled_events::Column::NodeId,
        Expr::value(Option::<String>::None),
      )
      .col_expr(
        scheduled_events::Column::UpdatedAt,
        Expr::value(Utc::now().fixed_offset()),
      )
      .filter(scheduled_events::Column::ScheduleId.eq(schedule_id))
      .filter(scheduled_events::Column::Status.eq(EventState::Transferring))
      .exec(&self.db)
      .await?;
    Ok(updated.rows_affected == 1)
  }

  async fn revert_stale_transfers(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    let updated = scheduled_events::Entity::update_many()
      .col_expr(
        scheduled_events::Column::Status,
        Expr::value(EventState::Pending),
      )
      .col_expr(
        scheduled_events::Column::NodeId,
        Expr::value(Option::<String>::None),
      )
      .col_expr(
        scheduled_events::Column::UpdatedAt,
        Expr::value(Utc::now().fixed_offset()),
      )
      .filter(scheduled_events::Column::Status.eq(EventState::Transferring))
      .filter(scheduled_events::Column::UpdatedAt.lt(cutoff.fixed_offset()))
      .exec(&self.db)
      .await?;
    Ok(updated.rows_affected)
  }

  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome> {
    let updated = scheduled_events::Entity::update_many()
      .col_expr(
        scheduled_events::Column::Status,
        Expr::value(EventState::Cancelled),
      )
      .col_expr(
        scheduled_events::Column::UpdatedAt,
        Expr::value(Utc::now().fixed_offset()),
      )
      .filter(scheduled_events::Column::ScheduleId.eq(schedule_id))
      .filter(scheduled_events::Column::Status.eq(EventState::Pending))
      .exec(&self.db)
      .await?;
    if updated.rows_affected == 1 {
      return Ok(CancelOutcome::Cancelled);
    }

    let existing = scheduled_events::Entity::find_by_id(schedule_id.to_string())
      .one(&self.db)
      .await?;
    Ok(match existing {
      // 已取消的行对第二次取消而言等同不存在
      // An already-cancelled row reads as not-found to a second cancel
      Some(m) if m.status == EventState::Cancelled => CancelOutcome::NotFound,
      Some(_) => CancelOutcome::TooLate,
      None => CancelOutcome::NotFound,
    })
  }

  async fn cleanup_expired(&self, now: DateTime<Utc>, ttl_days: u32) -> Result<u64> {
    let cutoff = now - chrono::Duration::days(ttl_days as i64);
    let deleted = scheduled_events::Entity::delete_many()
      .filter(scheduled_events::Column::Status.is_in([
        EventState::Succeeded,
        EventState::Failed,
        EventState::Cancelled,
      ]))
      .filter(scheduled_events::Column::UpdatedAt.lt(cutoff.fixed_offset()))
      .exec(&self.db)
      .await?;
    Ok(deleted.rows_affected)
  }

  async fn count_pending(&self) -> Result<u64> {
    let n = scheduled_events::Entity::find()
      .filter(scheduled_events::Column::Status.eq(EventState::Pending))
      .count(&self.db)
      .await?;
    Ok(n)
  }
}
