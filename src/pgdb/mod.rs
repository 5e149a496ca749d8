//! SQL 后端模块
//! SQL backend module
//!
//! 冷层存储与分析存储的 SeaORM 实现，以及两张表的结构引导
//! SeaORM implementations of the cold-tier store and the analytics store,
//! plus schema bootstrap for the two tables

use crate::error::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;

pub mod analytics_store;
pub mod cold_store;
pub mod entity;

pub use analytics_store::PgAnalyticsStore;
pub use cold_store::PgColdStore;

/// 建立数据库连接，连接与获取都带超时
/// Establish the database connection with connect and acquire timeouts
pub async fn connect(url: &str) -> Result<DatabaseConnection> {
  let mut options = ConnectOptions::new(url.to_owned());
  options
    .connect_timeout(Duration::from_secs(5))
    .acquire_timeout(Duration::from_secs(5));
  Ok(Database::connect(options).await?)
}

/// 创建两张表及其索引（幂等）
/// Create the two tables and their indexes (idempotent)
///
/// `(status, scheduled_at, priority)` 是转移扫描的主索引；
/// 按天分区列各有独立索引，供保留期裁剪使用
/// `(status, scheduled_at, priority)` is the primary index for transfer
/// scans; the per-day partition columns are indexed separately for
/// retention pruning
pub async fn ensure_tables(db: &DatabaseConnection) -> Result<()> {
  db.execute_unprepared(
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_events (
        schedule_id VARCHAR(64) PRIMARY KEY,
        topic VARCHAR(255) NOT NULL,
        entity_type VARCHAR(255) NOT NULL DEFAULT '',
        action VARCHAR(255) NOT NULL DEFAULT '',
        body BYTEA NOT NULL,
        correlation_id VARCHAR(255),
        headers JSONB,
        scheduled_at TIMESTAMPTZ(6) NOT NULL,
        scheduled_day DATE NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        max_delay_seconds BIGINT NOT NULL DEFAULT 86400,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ(6) NOT NULL,
        updated_at TIMESTAMPTZ(6) NOT NULL,
        processing_started_at TIMESTAMPTZ(6),
        node_id VARCHAR(255),
        error TEXT
    )
    "#,
  )
  .await?;
  db.execute_unprepared(
    "CREATE INDEX IF NOT EXISTS idx_scheduled_events_status_at \
     ON scheduled_events (status, scheduled_at, priority)",
  )
  .await?;
  db.execute_unprepared(
    "CREATE INDEX IF NOT EXISTS idx_scheduled_events_day ON scheduled_events (scheduled_day)",
  )
  .await?;
  db.execute_unprepared(
    "CREATE INDEX IF NOT EXISTS idx_scheduled_events_correlation \
     ON scheduled_events (correlation_id)",
  )
  .await?;

  db.execute_unprepared(
    r#"
    CREATE TABLE IF NOT EXISTS execution_records (
        execution_id VARCHAR(64) PRIMARY KEY,
        schedule_id VARCHAR(64) NOT NULL,
        correlation_id VARCHAR(255),
        topic VARCHAR(255) NOT NULL,
        entity_type VARCHAR(255) NOT NULL DEFAULT '',
        action VARCHAR(255) NOT NULL DEFAULT '',
        scheduled_at TIMESTAMPTZ(6) NOT NULL,
        executed_at TIMESTAMPTZ(6) NOT NULL,
        executed_day DATE NOT NULL,
        delay_seconds DOUBLE PRECISION NOT NULL,
        status VARCHAR(10) NOT NULL,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        processing_time_ms BIGINT NOT NULL DEFAULT 0,
        node_id VARCHAR(255) NOT NULL,
        created_at TIMESTAMPTZ(6) NOT NULL
    )
    "#,
  )
  .await?;
  db.execute_unprepared(
    "CREATE INDEX IF NOT EXISTS idx_execution_records_day_status \
     ON execution_records (executed_day, status, entity_type, action)",
  )
  .await?;
  db.execute_unprepared(
    "CREATE INDEX IF NOT EXISTS idx_execution_records_schedule \
     ON execution_records (schedule_id)",
  )
  .await?;

  Ok(())
}
