use std::time::Duration;

/// 默认最大重试次数
/// Default maximum retry attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认重试退避基数
/// Default retry backoff base
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// 重试退避上限
/// Retry backoff ceiling
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600); // 1 小时

/// 默认过期容忍窗口（秒）
/// Default staleness tolerance window in seconds
pub const DEFAULT_MAX_DELAY_SECONDS: u32 = 86400; // 24 小时

/// 优先级在排序分值中的权重（微秒）
/// Weight of one priority step in the ordering score, in microseconds
pub const PRIORITY_WEIGHT_MICROS: i64 = 1000;

/// 优先级绝对值上限；权重 × 上限必须小于一秒
/// Priority magnitude cap; weight times cap must stay below one second
pub const MAX_PRIORITY: i32 = 999;

/// 转移租约名称
/// Transfer lease name
pub const TRANSFER_LEASE: &str = "transfer-lease";

/// 清理租约名称
/// Cleanup lease name
pub const CLEANUP_LEASE: &str = "cleanup-lease";

/// 清理租约 TTL
/// Cleanup lease TTL
pub const CLEANUP_LEASE_TTL: Duration = Duration::from_secs(60);

/// 版本信息
/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_priority_weight_stays_within_one_second() {
    assert!(PRIORITY_WEIGHT_MICROS * (MAX_PRIORITY as i64) < 1_000_000);
  }

  #[test]
  fn test_constants() {
    assert_eq!(DEFAULT_MAX_RETRIES, 3);
    assert_eq!(DEFAULT_RETRY_DELAY, Duration::from_secs(60));
    assert_eq!(DEFAULT_MAX_DELAY_SECONDS, 86400);
  }
}
