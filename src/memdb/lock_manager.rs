//! 内存锁管理器实现
//! In-memory lock manager implementation

use crate::base::{Lease, LockManager};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Held {
  token: u64,
  expires_at: Instant,
}

/// 内存锁管理器
/// In-memory lock manager
#[derive(Default)]
pub struct MemoryLockManager {
  fence: AtomicU64,
  locks: Mutex<HashMap<String, Held>>,
}

impl MemoryLockManager {
  /// 创建内存锁管理器
  /// Create an in-memory lock manager
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl LockManager for MemoryLockManager {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<Lease>> {
    let mut locks = self.locks.lock().unwrap();
    let now = Instant::now();
    if let Some(held) = locks.get(name) {
      if held.expires_at > now {
        return Ok(None);
      }
    }
    let token = self.fence.fetch_add(1, Ordering::SeqCst) + 1;
    locks.insert(
      name.to_string(),
      Held {
        token,
        expires_at: now + ttl,
      },
    );
    Ok(Some(Lease {
      name: name.to_string(),
      token,
    }))
  }

  async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<bool> {
    let mut locks = self.locks.lock().unwrap();
    let now = Instant::now();
    match locks.get_mut(&lease.name) {
      Some(held) if held.token == lease.token && held.expires_at > now => {
        held.expires_at = now + ttl;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn release(&self, lease: &Lease) -> Result<()> {
    let mut locks = self.locks.lock().unwrap();
    if let Some(held) = locks.get(&lease.name) {
      if held.token == lease.token {
        locks.remove(&lease.name);
      }
    }
    Ok(())
  }

  async fn holder(&self, name: &str) -> Result<Option<u64>> {
    let locks = self.locks.lock().unwrap();
    Ok(
      locks
        .get(name)
        .filter(|held| held.expires_at > Instant::now())
        .map(|held| held.token),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_single_holder() {
    let locks = MemoryLockManager::new();
    let lease = locks
      .acquire("transfer-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .unwrap();
    assert!(locks
      .acquire("transfer-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .is_none());
    assert_eq!(
      locks.holder("transfer-lease").await.unwrap(),
      Some(lease.token)
    );

    locks.release(&lease).await.unwrap();
    assert!(locks
      .acquire("transfer-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_fencing_tokens_increase() {
    let locks = MemoryLockManager::new();
    let first = locks
      .acquire("cleanup-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .unwrap();
    locks.release(&first).await.unwrap();
    let second = locks
      .acquire("cleanup-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .unwrap();
    assert!(second.token > first.token);
  }

  #[tokio::test]
  async fn test_expired_lease_is_lost() {
    let locks = MemoryLockManager::new();
    let lease = locks
      .acquire("transfer-lease", Duration::from_millis(1))
      .await
      .unwrap()
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // 过期后续约失败，其他节点可以接管
    // Renewal fails after expiry and another node can take over
    assert!(!locks.renew(&lease, Duration::from_secs(60)).await.unwrap());
    assert!(locks
      .acquire("transfer-lease", Duration::from_secs(60))
      .await
      .unwrap()
      .is_some());
  }
}
