//! Redis 键名常量与生成函数
//! Redis key name constants and generators
//!
//! 所有热层键共享 `deferq:{events}` 哈希槽标签，保证 Lua 脚本
//! 在集群部署下也落在同一个槽
//! All hot-tier keys share the `deferq:{events}` hash-tag so Lua scripts
//! stay on a single slot under cluster deployments

/// 热层键前缀
/// Hot-tier key prefix
pub const HOT_PREFIX: &str = "deferq:{events}:";

/// 锁的全局围栏计数器
/// Global fencing counter for locks
pub const LOCK_FENCE: &str = "deferq:lock:fence";

/// 锁键前缀
/// Lock key prefix
pub const LOCK_PREFIX: &str = "deferq:lock:";

/// 到期排序集合：score = 排序分值，member = schedule_id
/// Due-ordering sorted set: score = ordering score, member = schedule_id
pub fn scheduled_key() -> String {
  format!("{HOT_PREFIX}scheduled")
}

/// 认领租约集合：score = 认领时刻（微秒），member = schedule_id
/// Claim lease set: score = claim time in micros, member = schedule_id
pub fn lease_key() -> String {
  format!("{HOT_PREFIX}lease")
}

/// 单个事件的哈希键
/// Hash key of a single event
pub fn event_key(schedule_id: &str) -> String {
  format!("{HOT_PREFIX}t:{schedule_id}")
}

/// 事件哈希键前缀（供脚本拼接）
/// Event hash key prefix (for script concatenation)
pub fn event_key_prefix() -> String {
  format!("{HOT_PREFIX}t:")
}

/// 命名锁的键
/// Key of a named lock
pub fn lock_key(name: &str) -> String {
  format!("{LOCK_PREFIX}{name}")
}
