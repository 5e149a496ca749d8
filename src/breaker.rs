//! 熔断器模块
//! Circuit breaker module
//!
//! 每个外部依赖（下游总线、两个存储）一只熔断器：连续失败达到阈值后
//! 打开，冷却期过后放行一次探测请求（半开），成功则闭合。
//! 打开期间热循环暂停派发（继续回收），转移循环暂停转移。
//! One breaker per external dependency (the downstream bus and each store):
//! it opens after a run of consecutive failures, lets one probe through
//! after the cool-down (half-open) and closes again on success. While open,
//! the hot loop pauses dispatch (reaping continues) and the transfer loop
//! pauses transfers.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

/// 熔断器状态
/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
  /// 正常放行
  /// Requests flow normally
  Closed,
  /// 拒绝请求
  /// Requests are rejected
  Open,
  /// 冷却结束，放行探测
  /// Cool-down elapsed, probes allowed
  HalfOpen,
}

/// 按依赖计数的熔断器
/// Per-dependency circuit breaker
pub struct CircuitBreaker {
  name: &'static str,
  failure_threshold: u32,
  cooldown: Duration,
  consecutive_failures: AtomicU32,
  /// 打开时刻（unix 毫秒；0 表示未打开）
  /// Opening time (unix millis; 0 means not open)
  opened_at_ms: AtomicI64,
}

fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

impl CircuitBreaker {
  /// 创建熔断器
  /// Create a breaker
  pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
    Self {
      name,
      failure_threshold: failure_threshold.max(1),
      cooldown,
      consecutive_failures: AtomicU32::new(0),
      opened_at_ms: AtomicI64::new(0),
    }
  }

  /// 依赖名称
  /// Dependency name
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// 当前状态
  /// Current state
  pub fn state(&self) -> BreakerState {
    let opened_at = self.opened_at_ms.load(Ordering::Relaxed);
    if opened_at == 0 {
      return BreakerState::Closed;
    }
    if now_ms() - opened_at >= self.cooldown.as_millis() as i64 {
      BreakerState::HalfOpen
    } else {
      BreakerState::Open
    }
  }

  /// 当前是否放行请求
  /// Whether a request may pass right now
  pub fn allow(&self) -> bool {
    self.state() != BreakerState::Open
  }

  /// 记录一次成功，闭合熔断器
  /// Record a success, closing the breaker
  pub fn record_success(&self) {
    self.consecutive_failures.store(0, Ordering::Relaxed);
    self.opened_at_ms.store(0, Ordering::Relaxed);
  }

  /// 记录一次失败；达到阈值时打开
  /// Record a failure; opens at the threshold
  pub fn record_failure(&self) {
    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
    if failures >= self.failure_threshold {
      let was_open = self.opened_at_ms.swap(now_ms(), Ordering::Relaxed);
      if was_open == 0 {
        tracing::warn!(
          "Circuit breaker for {} opened after {} consecutive failures",
          self.name,
          failures
        );
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_opens_after_threshold() {
    let breaker = CircuitBreaker::new("bus", 3, Duration::from_secs(30));
    assert_eq!(breaker.state(), BreakerState::Closed);

    breaker.record_failure();
    breaker.record_failure();
    assert!(breaker.allow());
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.allow());
  }

  #[test]
  fn test_success_closes() {
    let breaker = CircuitBreaker::new("bus", 2, Duration::from_secs(30));
    breaker.record_failure();
    breaker.record_failure();
    assert!(!breaker.allow());

    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.allow());
  }

  #[test]
  fn test_half_open_after_cooldown() {
    let breaker = CircuitBreaker::new("bus", 1, Duration::from_millis(0));
    breaker.record_failure();
    // 冷却为零：立即进入半开，放行探测
    // Zero cool-down: immediately half-open, probes allowed
    assert_eq!(breaker.state(), BreakerState::HalfOpen);
    assert!(breaker.allow());
  }
}
