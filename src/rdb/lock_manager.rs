//! Redis 锁管理器实现
//! Redis lock manager implementation
//!
//! 命名租约以 SET NX + TTL 持有，令牌取自单调递增的围栏计数器；
//! 续期与释放都是比较令牌后的原子脚本
//! Named leases are held via SET NX with a TTL, tokens come from a
//! monotonically increasing fencing counter; renew and release are
//! compare-token atomic scripts

use crate::base::keys;
use crate::base::{Lease, LockManager};
use crate::error::Result;
use crate::rdb::redis_scripts::{RedisArg, ScriptManager};
use crate::redis::{RedisConfig, RedisConnection};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis 锁管理器
/// Redis lock manager
pub struct RedisLockManager {
  conn: RedisConnection,
  script_manager: ScriptManager,
}

impl RedisLockManager {
  /// 创建锁管理器并预加载脚本
  /// Create the lock manager and preload its scripts
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
impl LockManager for RedisLockManager {
  async fn ping(&self) -> Result<()> {
    let mut conn = self.connection();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }

  async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
    let mut conn = self.connection();
    let keys = vec![keys::lock_key(name), keys::LOCK_FENCE.to_string()];
    let args = vec![RedisArg::Int(ttl.as_millis() as i64)];
    let token: Option<i64> = self
      .script_manager
      .eval_script(&mut conn, "lock_acquire", &keys, &args)
      .await?;
    Ok(token.map(|token| Lease {
      name: name.to_string(),
      token: token.max(0) as u64,
    }))
  }

  async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool> {
    let mut conn = self.connection();
    let keys = vec![keys::lock_key(&lease.name)];
    let args = vec![
      RedisArg::Int(lease.token as i64),
      RedisArg::Int(ttl.as_millis() as i64),
    ];
    let renewed: i64 = self
      .script_manager
      .eval_script(&mut conn, "lock_renew", &keys, &args)
      .await?;
    Ok(renewed == 1)
  }

  async fn release(&self, lease: &Lease) -> Result<()> {
    let mut conn = self.connection();
    let keys = vec![keys::lock_key(&lease.name)];
    let args = vec![RedisArg::Int(lease.token as i64)];
    let _: i64 = self
      .script_manager
      .eval_script(&mut conn, "lock_release", &keys, &args)
      .await?;
    Ok(())
  }

  async fn holder(&self, name: &str) -> Result<Option<u64>> {
    let mut conn = self.connection();
    let token: Option<u64> = conn.get(keys::lock_key(name)).await?;
    Ok(token)
  }
}
