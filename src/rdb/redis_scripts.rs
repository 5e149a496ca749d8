//! Redis Lua 脚本模块
//!
//! 提供热层状态转移所需的 Lua 脚本，保证每次转移都是单条原子操作；
//! 两个节点对同一条目发起认领时必须恰好一个成功
//! Lua scripts for hot-tier state transitions; every transition is a single
//! atomic operation, and of two nodes claiming the same entry exactly one
//! must win

use crate::error::{Error, Result};
use crate::redis::RedisConnection;
use phf::phf_map;
use redis::{RedisWrite, ToRedisArgs};

/// 脚本参数
/// Script argument
#[derive(Clone, Debug)]
pub enum RedisArg {
  Int(i64),
  Str(String),
  Bytes(Vec<u8>),
  Float(f64),
}

impl ToRedisArgs for RedisArg {
  fn write_redis_args<W>(&self, out: &mut W)
  where
    W: ?Sized + RedisWrite,
  {
    match self {
      RedisArg::Int(i) => i.write_redis_args(out),
      RedisArg::Str(s) => s.write_redis_args(out),
      RedisArg::Bytes(b) => b.write_redis_args(out),
      RedisArg::Float(f) => f.write_redis_args(out),
    }
  }
}

/// 热层 Lua 脚本集合
/// Hot-tier Lua script collection
pub mod scripts {
  /// 幂等插入脚本
  /// Idempotent insert script
  /// `scheduled_at` 与 `priority` 作为独立字段保存，过期认领回收时
  /// 据此重算条目自己的排序分值
  /// `scheduled_at` and `priority` are kept as separate fields so the
  /// stale-claim reap can recompute each entry's own ordering score
  /// `KEYS[1]` -> deferq:{events}:t:`<schedule_id>`
  /// `KEYS[2]` -> deferq:{events}:scheduled
  /// `ARGV[1]` -> 事件 JSON / event JSON
  /// `ARGV[2]` -> schedule_id
  /// `ARGV[3]` -> 排序分值 / ordering score
  /// `ARGV[4]` -> 触发时刻（微秒）/ fire time in micros
  /// `ARGV[5]` -> 优先级 / priority
  /// 返回值：1=插入成功；已存在时返回现存的事件 JSON，由调用方比较内容
  /// Returns: 1 when inserted; when the id already exists, returns the
  /// stored event JSON for the caller to compare
  pub const ADD: &str = r#"
        if redis.call("EXISTS", KEYS[1]) == 1 then
            return redis.call("HGET", KEYS[1], "msg")
        end
        redis.call("HSET", KEYS[1],
                   "msg", ARGV[1],
                   "state", "pending",
                   "scheduled_at", ARGV[4],
                   "priority", ARGV[5])
        redis.call("ZADD", KEYS[2], ARGV[3], ARGV[2])
        return 1
    "#;

  /// 原子认领脚本
  /// Atomic claim script
  /// `KEYS[1]` -> deferq:{events}:scheduled
  /// `KEYS[2]` -> deferq:{events}:lease
  /// `KEYS[3]` -> deferq:{events}:t:`<schedule_id>`
  /// `ARGV[1]` -> schedule_id
  /// `ARGV[2]` -> 当前时间（微秒）/ current time in micros
  /// `ARGV[3]` -> node_id
  /// 返回值：认领成功返回事件 JSON，否则返回 nil
  /// Returns: the event JSON on success, nil otherwise
  pub const CLAIM: &str = r#"
        if redis.call("ZREM", KEYS[1], ARGV[1]) == 0 then
            return nil
        end
        if redis.call("EXISTS", KEYS[3]) == 0 then
            return nil
        end
        redis.call("HSET", KEYS[3],
                   "state", "processing",
                   "node_id", ARGV[3],
                   "processing_started_at", ARGV[2])
        redis.call("ZADD", KEYS[2], ARGV[2], ARGV[1])
        return redis.call("HGET", KEYS[3], "msg")
    "#;

  /// 终态释放脚本（succeeded / failed 均退出调度）
  /// Terminal release script (both succeeded and failed leave scheduling)
  /// 事件记录以终态短期保留，令迟到的取消得到“太迟”而非“不存在”
  /// The event record is retained briefly in its terminal state so a late
  /// cancel reads "too late" instead of "not found"
  /// `KEYS[1]` -> deferq:{events}:lease
  /// `KEYS[2]` -> deferq:{events}:scheduled
  /// `KEYS[3]` -> deferq:{events}:t:`<schedule_id>`
  /// `ARGV[1]` -> schedule_id
  /// `ARGV[2]` -> 终态 / terminal state
  /// `ARGV[3]` -> 保留秒数 / retention in seconds
  pub const RELEASE_REMOVE: &str = r#"
        redis.call("ZREM", KEYS[1], ARGV[1])
        redis.call("ZREM", KEYS[2], ARGV[1])
        redis.call("HSET", KEYS[3], "state", ARGV[2])
        redis.call("HDEL", KEYS[3], "node_id", "processing_started_at")
        redis.call("EXPIRE", KEYS[3], ARGV[3])
        return 1
    "#;

  /// 重新排队脚本：改写内容并按新分值回到 pending
  /// Requeue script: rewrite the content and return to pending at a new score
  /// `KEYS[1]` -> deferq:{events}:lease
  /// `KEYS[2]` -> deferq:{events}:scheduled
  /// `KEYS[3]` -> deferq:{events}:t:`<schedule_id>`
  /// `ARGV[1]` -> schedule_id
  /// `ARGV[2]` -> 新的排序分值 / new ordering score
  /// `ARGV[3]` -> 更新后的事件 JSON / updated event JSON
  pub const RELEASE_REQUEUE: &str = r#"
        redis.call("ZREM", KEYS[1], ARGV[1])
        redis.call("HSET", KEYS[3],
                   "msg", ARGV[3],
                   "state", "pending")
        redis.call("HDEL", KEYS[3], "node_id", "processing_started_at")
        redis.call("ZADD", KEYS[2], ARGV[2], ARGV[1])
        return 1
    "#;

  /// 取消脚本
  /// Cancel script
  /// `KEYS[1]` -> deferq:{events}:t:`<schedule_id>`
  /// `KEYS[2]` -> deferq:{events}:scheduled
  /// `ARGV[1]` -> schedule_id
  /// 返回值：1=已取消，-1=已被认领（太迟），0=不存在
  /// Returns: 1 cancelled, -1 already claimed (too late), 0 not found
  pub const CANCEL: &str = r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return 0
        end
        if redis.call("HGET", KEYS[1], "state") ~= "pending" then
            return -1
        end
        redis.call("ZREM", KEYS[2], ARGV[1])
        redis.call("DEL", KEYS[1])
        return 1
    "#;

  /// 过期认领回收脚本
  /// Stale-claim reap script
  /// 每个条目按自己存储的 `scheduled_at`/`priority` 重算分值回到排序集合，
  /// 同一批被回收的条目之间优先级平局裁决保持不变
  /// Each entry returns to the sorted set at a score recomputed from its
  /// own stored `scheduled_at`/`priority`, so the priority tie-break
  /// among entries reaped in the same pass is preserved
  /// `KEYS[1]` -> deferq:{events}:lease
  /// `KEYS[2]` -> deferq:{events}:scheduled
  /// `ARGV[1]` -> 过期阈值（微秒）/ staleness cutoff in micros
  /// `ARGV[2]` -> 单次上限 / per-pass limit
  /// `ARGV[3]` -> 事件键前缀 / event key prefix
  /// `ARGV[4]` -> 优先级权重（微秒）/ priority weight in micros
  /// `ARGV[5]` -> 优先级绝对值上限 / priority magnitude cap
  /// 返回值：还原为 pending 的条目数
  /// Returns: number of entries reverted to pending
  pub const REAP_STALE: &str = r#"
        local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
        local reverted = 0
        for _, id in ipairs(ids) do
            redis.call("ZREM", KEYS[1], id)
            local key = ARGV[3] .. id
            if redis.call("EXISTS", key) == 1 then
                redis.call("HSET", key, "state", "pending")
                redis.call("HDEL", key, "node_id", "processing_started_at")
                local fields = redis.call("HMGET", key, "scheduled_at", "priority")
                local at = tonumber(fields[1])
                local pr = tonumber(fields[2]) or 0
                local cap = tonumber(ARGV[5])
                if pr > cap then pr = cap elseif pr < -cap then pr = -cap end
                local score
                if at then
                    score = at - pr * tonumber(ARGV[4])
                else
                    score = tonumber(ARGV[1])
                end
                redis.call("ZADD", KEYS[2], score, id)
                reverted = reverted + 1
            end
        end
        return reverted
    "#;

  /// 租约获取脚本：颁发单调递增的围栏令牌
  /// Lease acquire script: issues a monotonically increasing fencing token
  /// `KEYS[1]` -> deferq:lock:`<name>`
  /// `KEYS[2]` -> deferq:lock:fence
  /// `ARGV[1]` -> TTL（毫秒）/ TTL in millis
  /// 返回值：令牌，已被持有时返回 nil
  /// Returns: the token, or nil when already held
  pub const LOCK_ACQUIRE: &str = r#"
        if redis.call("EXISTS", KEYS[1]) == 1 then
            return nil
        end
        local token = redis.call("INCR", KEYS[2])
        redis.call("SET", KEYS[1], token, "PX", ARGV[1])
        return token
    "#;

  /// 租约续期脚本：仅当令牌仍匹配
  /// Lease renew script: only while the token still matches
  /// `KEYS[1]` -> deferq:lock:`<name>`
  /// `ARGV[1]` -> 令牌 / token
  /// `ARGV[2]` -> TTL（毫秒）/ TTL in millis
  pub const LOCK_RENEW: &str = r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            redis.call("PEXPIRE", KEYS[1], ARGV[2])
            return 1
        end
        return 0
    "#;

  /// 租约释放脚本：比较后删除
  /// Lease release script: compare-and-delete
  /// `KEYS[1]` -> deferq:lock:`<name>`
  /// `ARGV[1]` -> 令牌 / token
  pub const LOCK_RELEASE: &str = r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            redis.call("DEL", KEYS[1])
            return 1
        end
        return 0
    "#;
}

static ALL_SCRIPTS: phf::Map<&'static str, &'static str> = phf_map! {
    "add" => scripts::ADD,
    "claim" => scripts::CLAIM,
    "release_remove" => scripts::RELEASE_REMOVE,
    "release_requeue" => scripts::RELEASE_REQUEUE,
    "cancel" => scripts::CANCEL,
    "reap_stale" => scripts::REAP_STALE,
    "lock_acquire" => scripts::LOCK_ACQUIRE,
    "lock_renew" => scripts::LOCK_RENEW,
    "lock_release" => scripts::LOCK_RELEASE,
};

/// Redis 脚本管理器
/// Redis script manager
#[derive(Debug, Default)]
pub struct ScriptManager {
  /// 脚本 SHA 缓存
  /// Script SHA cache
  script_sha1: std::collections::HashMap<&'static str, String>,
}

impl ScriptManager {
  /// 预加载所有脚本
  /// Preload all scripts
  pub async fn load_scripts(&mut self, conn: &mut RedisConnection) -> Result<()> {
    for (name, script) in ALL_SCRIPTS.entries() {
      let sha: String = redis::cmd("SCRIPT")
        .arg("LOAD")
        .arg(*script)
        .query_async(conn)
        .await?;
      self.script_sha1.insert(name, sha);
    }
    Ok(())
  }

  /// 执行脚本，优先使用 EVALSHA，脚本被清理时回退到 EVAL
  /// Execute a script, preferring EVALSHA with an EVAL fallback when the
  /// script cache was flushed
  pub async fn eval_script<T>(
    &self,
    conn: &mut RedisConnection,
    script_name: &str,
    keys: &[String],
    args: &[RedisArg],
  ) -> Result<T>
  where
    T: redis::FromRedisValue,
  {
    let script = ALL_SCRIPTS
      .get(script_name)
      .ok_or_else(|| Error::other(format!("Unknown script: {script_name}")))?;

    if let Some(sha) = self.script_sha1.get(script_name) {
      match redis::cmd("EVALSHA")
        .arg(sha)
        .arg(keys.len())
        .arg(keys)
        .arg(args)
        .query_async::<T>(conn)
        .await
      {
        Ok(result) => return Ok(result),
        Err(e) if e.to_string().contains("NOSCRIPT") => {
          // 脚本缓存被清理，落到 EVAL
          // Script cache was flushed, fall through to EVAL
        }
        Err(e) => return Err(e.into()),
      }
    }

    let result: T = redis::cmd("EVAL")
      .arg(*script)
      .arg(keys.len())
      .arg(keys)
      .arg(args)
      .query_async(conn)
      .await?;
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_all_scripts_registered() {
    for name in [
      "add",
      "claim",
      "release_remove",
      "release_requeue",
      "cancel",
      "reap_stale",
      "lock_acquire",
      "lock_renew",
      "lock_release",
    ] {
      assert!(ALL_SCRIPTS.contains_key(name), "missing script: {name}");
    }
  }
}
