//! Redis 热层存储实现
//! Redis hot-tier store implementation
//!
//! 热层是一个按触发时刻排序的集合：每个事件一个哈希记录，
//! 排序集合 `scheduled` 按分值排队，`lease` 记录认领时刻供回收器扫描。
//! 所有状态转移都通过 Lua 脚本原子完成。
//! The hot tier is a fire-time-ordered set: one hash record per event, the
//! `scheduled` sorted set orders by score, and `lease` records claim times
//! for the reaper. Every state transition is a single atomic Lua script.

use crate::base::constants::{MAX_PRIORITY, PRIORITY_WEIGHT_MICROS};
use crate::base::keys;
use crate::base::{CancelOutcome, HotStore, ReleaseOutcome};
use crate::error::{Error, Result};
use crate::event::{EventStatus, ScheduledEvent};
use crate::rdb::redis_scripts::{RedisArg, ScriptManager};
use crate::redis::{RedisConfig, RedisConnection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

/// 终态副本的保留秒数：迟到的取消在此窗口内得到“太迟”而非“不存在”
/// Retention of terminal copies in seconds: late cancels inside this window
/// read "too late" instead of "not found"
const TERMINAL_RETENTION_SECS: i64 = 3600;

/// Redis 热层存储
/// Redis hot-tier store
pub struct RedisHotStore {
  conn: RedisConnection,
  script_manager: ScriptManager,
}

impl RedisHotStore {
  /// 创建热层存储并预加载脚本
  /// Create the hot store and preload its scripts
  pub async fn new(config: RedisConfig) -> Result<Self> {
    let mut conn = config.connect().await?;
    let mut script_manager = ScriptManager::default();
    script_manager.load_scripts(&mut conn).await?;
    Ok(Self {
      conn,
      script_manager,
    })
  }

  fn connection(&self) -> RedisConnection {
    self.conn.clone()
  }
}

#[async_trait]
impl HotStore for RedisHotStore {
  async fn ping(&self) -> Result<()> {
    let mut conn = self.connection();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }

  async fn add(&self, evt: &ScheduledEvent) -> Result<()> {
    let encoded = evt.encode()?;
    let mut conn = self.connection();
    let keys = vec![keys::event_key(&evt.schedule_id), keys::scheduled_key()];
    let args = vec![
      RedisArg::Str(encoded),
      RedisArg::Str(evt.schedule_id.clone()),
      RedisArg::Int(evt.score()),
      RedisArg::Int(evt.scheduled_at.timestamp_micros()),
      RedisArg::Int(evt.priority as i64),
    ];
    let reply: redis::Value = self
      .script_manager
      .eval_script(&mut conn, "add", &keys, &args)
      .await?;

    match reply {
      redis::Value::Int(1) => Ok(()),
      redis::Value::BulkString(existing) => {
        // 已存在：内容一致视为幂等重放，不一致报冲突
        // Already present: identical content is an idempotent replay,
        // different content is a conflict
        let existing = ScheduledEvent::decode(std::str::from_utf8(&existing).map_err(|e| {
          Error::other(format!("stored event is not valid UTF-8: {e}"))
        })?)?;
        if existing.same_request(evt) {
          Ok(())
        } else {
          Err(Error::Conflict {
            schedule_id: evt.schedule_id.clone(),
          })
        }
      }
      other => Err(Error::other(format!(
        "unexpected reply from add script: {other:?}"
      ))),
    }
  }

  async fn peek_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledEvent>> {
    let mut conn = self.connection();
    let ids: Vec<String> = conn
      .zrangebyscore_limit(
        keys::scheduled_key(),
        "-inf",
        now.timestamp_micros(),
        0,
        limit as isize,
      )
      .await?;

    let mut due = Vec::with_capacity(ids.len());
    for id in ids {
      // 哈希可能在读取间隙被其他节点移除；跳过即可
      // The hash may disappear between reads when another node wins; skip
      let msg: Option<String> = conn.hget(keys::event_key(&id), "msg").await?;
      if let Some(msg) = msg {
        due.push(ScheduledEvent::decode(&msg)?);
      }
    }
    Ok(due)
  }

  async fn claim(
    &self,
    schedule_id: &str,
    node_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Option<ScheduledEvent>> {
    let mut conn = self.connection();
    let keys = vec![
      keys::scheduled_key(),
      keys::lease_key(),
      keys::event_key(schedule_id),
    ];
    let args = vec![
      RedisArg::Str(schedule_id.to_string()),
      RedisArg::Int(now.timestamp_micros()),
      RedisArg::Str(node_id.to_string()),
    ];
    let msg: Option<String> = self
      .script_manager
      .eval_script(&mut conn, "claim", &keys, &args)
      .await?;

    match msg {
      Some(msg) => {
        let mut evt = ScheduledEvent::decode(&msg)?;
        evt.status = EventStatus::Processing;
        evt.processing_started_at = Some(now);
        evt.node_id = Some(node_id.to_string());
        evt.updated_at = now;
        Ok(Some(evt))
      }
      None => Ok(None),
    }
  }

  async fn release(&self, evt: &ScheduledEvent, outcome: ReleaseOutcome) -> Result<()> {
    let mut conn = self.connection();
    match outcome {
      ReleaseOutcome::Succeeded | ReleaseOutcome::Failed => {
        let terminal = if matches!(outcome, ReleaseOutcome::Succeeded) {
          EventStatus::Succeeded
        } else {
          EventStatus::Failed
        };
        let keys = vec![
          keys::lease_key(),
          keys::scheduled_key(),
          keys::event_key(&evt.schedule_id),
        ];
        let args = vec![
          RedisArg::Str(evt.schedule_id.clone()),
          RedisArg::Str(terminal.as_str().to_string()),
          RedisArg::Int(TERMINAL_RETENTION_SECS),
        ];
        let _: i64 = self
          .script_manager
          .eval_script(&mut conn, "release_remove", &keys, &args)
          .await?;
      }
      ReleaseOutcome::Requeue(delay) => {
        let retry_at = Utc::now()
          + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let mut requeued = evt.clone();
        requeued.status = EventStatus::Pending;
        requeued.processing_started_at = None;
        requeued.node_id = None;
        requeued.updated_at = Utc::now();
        let keys = vec![
          keys::lease_key(),
          keys::scheduled_key(),
          keys::event_key(&evt.schedule_id),
        ];
        let args = vec![
          RedisArg::Str(evt.schedule_id.clone()),
          RedisArg::Int(ScheduledEvent::score_at(retry_at, evt.priority)),
          RedisArg::Str(requeued.encode()?),
        ];
        let _: i64 = self
          .script_manager
          .eval_script(&mut conn, "release_requeue", &keys, &args)
          .await?;
      }
    }
    Ok(())
  }

  async fn cancel(&self, schedule_id: &str) -> Result<CancelOutcome> {
    let mut conn = self.connection();
    let keys = vec![keys::event_key(schedule_id), keys::scheduled_key()];
    let args = vec![RedisArg::Str(schedule_id.to_string())];
    let outcome: i64 = self
      .script_manager
      .eval_script(&mut conn, "cancel", &keys, &args)
      .await?;
    Ok(match outcome {
      1 => CancelOutcome::Cancelled,
      -1 => CancelOutcome::TooLate,
      _ => CancelOutcome::NotFound,
    })
  }

  async fn reap_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<u64> {
    let mut conn = self.connection();
    let keys = vec![keys::lease_key(), keys::scheduled_key()];
    let args = vec![
      RedisArg::Int(cutoff.timestamp_micros()),
      RedisArg::Int(limit as i64),
      RedisArg::Str(keys::event_key_prefix()),
      RedisArg::Int(PRIORITY_WEIGHT_MICROS),
      RedisArg::Int(MAX_PRIORITY as i64),
    ];
    let reverted: i64 = self
      .script_manager
      .eval_script(&mut conn, "reap_stale", &keys, &args)
      .await?;
    Ok(reverted.max(0) as u64)
  }

  async fn count_pending(&self) -> Result<u64> {
    let mut conn = self.connection();
    let n: u64 = conn.zcard(keys::scheduled_key()).await?;
    Ok(n)
  }

  async fn count_due(&self, now: DateTime<Utc>) -> Result<u64> {
    let mut conn = self.connection();
    let n: u64 = conn
      .zcount(keys::scheduled_key(), "-inf", now.timestamp_micros())
      .await?;
    Ok(n)
  }

  async fn count_processing(&self) -> Result<u64> {
    let mut conn = self.connection();
    let n: u64 = conn.zcard(keys::lease_key()).await?;
    Ok(n)
  }
}
