//! 错误处理模块
//! Error handling module
//!
//! 定义了 deferq 库中使用的各种错误类型
//! Defines various error types used in the deferq library

use thiserror::Error;

/// deferq 库的结果类型
/// Result type for the deferq library
pub type Result<T> = std::result::Result<T, Error>;

/// deferq 错误类型
/// deferq error type
#[derive(Error, Debug)]
pub enum Error {
  /// Redis 连接错误
  /// Redis connection error
  #[error("Redis connection error: {0}")]
  Redis(#[from] redis::RedisError),

  /// SeaORM 数据库错误
  /// SeaORM database error
  #[error("Database error: {0}")]
  Database(#[from] sea_orm::DbErr),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 存储暂时不可用
  /// Backing store temporarily unavailable
  #[error("Transient store error: {0}")]
  TransientStore(String),

  /// 幂等性冲突：同一 schedule_id 已存在不同内容的条目
  /// Idempotency conflict: the schedule_id exists with different content
  #[error("Conflicting entry for schedule id: {schedule_id}")]
  Conflict { schedule_id: String },

  /// 条目未找到
  /// Entry not found
  #[error("Entry not found: {schedule_id}")]
  NotFound { schedule_id: String },

  /// 租约丢失：持有者发现租约已过期或被抢占
  /// Lease lost: the holder found its lease expired or taken over
  #[error("Lease lost: {name}")]
  LeaseLost { name: String },

  /// 下游总线暂时性发布失败（可重试）
  /// Transient downstream publish failure (retryable)
  #[error("Transient publish failure: {0}")]
  PublishTransient(String),

  /// 下游总线永久性发布失败（不可重试）
  /// Permanent downstream publish failure (not retryable)
  #[error("Permanent publish failure: {0}")]
  PublishPermanent(String),

  /// 熔断器打开，依赖暂不可用
  /// Circuit breaker open, dependency paused
  #[error("Circuit open for dependency: {dependency}")]
  CircuitOpen { dependency: String },

  /// 超时错误
  /// Timeout error
  #[error("Operation timeout")]
  Timeout,

  /// 无效的事件
  /// Invalid event
  #[error("Invalid event: {message}")]
  InvalidEvent { message: String },

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// 调度器已在运行
  /// Scheduler is already running
  #[error("Scheduler is already running")]
  SchedulerRunning,

  /// 调度器已关闭
  /// Scheduler closed
  #[error("Scheduler closed")]
  SchedulerClosed,

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建无效事件错误
  /// Create an invalid event error
  pub fn invalid_event<S: Into<String>>(message: S) -> Self {
    Self::InvalidEvent {
      message: message.into(),
    }
  }

  /// 创建暂时性存储错误
  /// Create a transient store error
  pub fn transient<S: Into<String>>(message: S) -> Self {
    Self::TransientStore(message.into())
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 检查错误是否可重试
  /// Check if the error is retriable
  ///
  /// 可重试错误由调用方按指数退避重试；其余错误向上传播
  /// Retriable errors are retried by the caller with exponential backoff;
  /// everything else propagates
  pub fn is_retriable(&self) -> bool {
    matches!(
      self,
      Error::Redis(_)
        | Error::Database(_)
        | Error::TransientStore(_)
        | Error::PublishTransient(_)
        | Error::CircuitOpen { .. }
        | Error::Timeout
        | Error::Io(_)
    )
  }

  /// 检查是否为致命错误
  /// Check if the error is fatal
  pub fn is_fatal(&self) -> bool {
    !self.is_retriable()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_creation() {
    let err = Error::config("bad interval");
    assert!(matches!(err, Error::Config { .. }));

    let err = Error::invalid_event("empty topic");
    assert!(matches!(err, Error::InvalidEvent { .. }));

    let err = Error::transient("store down");
    assert!(matches!(err, Error::TransientStore(_)));
  }

  #[test]
  fn test_error_retriable() {
    assert!(Error::Timeout.is_retriable());
    assert!(Error::PublishTransient("broker hiccup".into()).is_retriable());
    assert!(Error::transient("redis down").is_retriable());
    assert!(!Error::PublishPermanent("unknown topic".into()).is_retriable());
    assert!(
      !Error::Conflict {
        schedule_id: "a".into()
      }
      .is_retriable()
    );
    assert!(Error::SchedulerClosed.is_fatal());
  }
}
