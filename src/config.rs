//! 配置模块
//! Configuration module
//!
//! 定义了调度器的配置选项，可通过构建方法或 `DEFERQ_` 前缀的
//! 环境变量设置
//! Defines scheduler configuration options, settable through builder
//! methods or `DEFERQ_`-prefixed environment variables

use crate::error::{Error, Result};
use std::time::Duration;
use uuid::Uuid;

/// 环境变量前缀
/// Environment variable prefix
const ENV_PREFIX: &str = "DEFERQ_";

/// 调度器配置
/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  /// 路由阈值：`now + delay ≤ 阈值` 的事件直接进热层，否则进冷层
  /// Router threshold: events with `now + delay ≤ threshold` go straight
  /// to the hot tier, everything else to the cold tier
  pub immediate_horizon: Duration,
  /// 转移窗口：冷层中 `scheduled_at ≤ now + 窗口` 的条目被提升到热层
  /// Transfer window: cold entries with `scheduled_at ≤ now + window` are
  /// promoted into the hot tier
  pub transfer_horizon: Duration,
  /// 冷层同步（转移循环）的节拍
  /// Cold sync (transfer loop) tick period
  pub cold_sync_interval: Duration,
  /// 热层处理循环的节拍
  /// Hot processing loop tick period
  pub redis_processing_interval: Duration,
  /// 单个条目转为 failed 前的尝试上限
  /// Attempt cap before an entry becomes failed
  pub max_retries: u32,
  /// 重试退避基数（指数增长）
  /// Base backoff between retries (grows exponentially)
  pub retry_delay: Duration,
  /// 执行池并发上限
  /// Execution pool parallelism cap
  pub max_concurrent_executions: usize,
  /// 认领过期阈值：processing 超过该时长即视为被遗弃
  /// Stale-claim threshold: processing entries older than this are
  /// considered abandoned
  pub stale_claim: Duration,
  /// 转移循环单次扫描上限
  /// Per-pass transfer scan limit
  pub transfer_batch_size: usize,
  /// 执行历史与终态冷条目的保留天数
  /// Retention in days for execution history and terminal cold entries
  pub execution_history_ttl_days: u32,
  /// 分析写入的批大小
  /// Analytics flush batch size
  pub analytics_batch_size: usize,
  /// 分析缓冲的最大驻留时长
  /// Maximum age of the analytics buffer
  pub analytics_flush_interval: Duration,
  /// 熔断器连续失败阈值
  /// Breaker consecutive-failure threshold
  pub breaker_failure_threshold: u32,
  /// 熔断器冷却时长
  /// Breaker cool-down period
  pub breaker_cooldown: Duration,
  /// 清理循环的节拍
  /// Janitor tick period
  pub cleanup_interval: Duration,
  /// 本节点标识，写入认领与分析记录
  /// This node's identity, stamped on claims and analytics records
  pub node_id: String,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    let redis_processing_interval = Duration::from_secs(5);
    Self {
      immediate_horizon: Duration::from_secs(86400),
      transfer_horizon: Duration::from_secs(3600),
      cold_sync_interval: Duration::from_secs(300),
      redis_processing_interval,
      max_retries: 3,
      retry_delay: Duration::from_secs(60),
      max_concurrent_executions: 10,
      stale_claim: redis_processing_interval * 2,
      transfer_batch_size: 500,
      execution_history_ttl_days: 30,
      analytics_batch_size: 100,
      analytics_flush_interval: Duration::from_secs(5),
      breaker_failure_threshold: 5,
      breaker_cooldown: Duration::from_secs(30),
      cleanup_interval: Duration::from_secs(3600),
      node_id: default_node_id(),
    }
  }
}

/// 默认节点标识：hostname:pid:uuid
/// Default node id: hostname:pid:uuid
fn default_node_id() -> String {
  let host = hostname::get()
    .unwrap_or_default()
    .to_string_lossy()
    .to_string();
  format!(
    "{}:{}:{}",
    host,
    std::process::id(),
    Uuid::new_v4().simple()
  )
}

fn env_u64(name: &str) -> Result<Option<u64>> {
  match std::env::var(format!("{ENV_PREFIX}{name}")) {
    Ok(raw) => raw
      .parse::<u64>()
      .map(Some)
      .map_err(|_| Error::config(format!("{ENV_PREFIX}{name} must be a non-negative integer"))),
    Err(_) => Ok(None),
  }
}

impl SchedulerConfig {
  /// 创建默认配置
  /// Create the default configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 从环境变量加载配置；未设置的键保留默认值
  /// Load configuration from the environment; unset keys keep defaults
  pub fn from_env() -> Result<Self> {
    let mut cfg = Self::default();
    let mut stale_claim_set = false;

    if let Some(v) = env_u64("IMMEDIATE_HORIZON_SECONDS")? {
      cfg.immediate_horizon = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("TRANSFER_HORIZON_SECONDS")? {
      cfg.transfer_horizon = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("COLD_SYNC_INTERVAL_SECONDS")? {
      cfg.cold_sync_interval = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("REDIS_PROCESSING_INTERVAL_SECONDS")? {
      cfg.redis_processing_interval = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("MAX_RETRIES")? {
      cfg.max_retries = v as u32;
    }
    if let Some(v) = env_u64("RETRY_DELAY_SECONDS")? {
      cfg.retry_delay = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("MAX_CONCURRENT_EXECUTIONS")? {
      cfg.max_concurrent_executions = v as usize;
    }
    if let Some(v) = env_u64("STALE_CLAIM_SECONDS")? {
      cfg.stale_claim = Duration::from_secs(v);
      stale_claim_set = true;
    }
    if let Some(v) = env_u64("TRANSFER_BATCH_SIZE")? {
      cfg.transfer_batch_size = v as usize;
    }
    if let Some(v) = env_u64("EXECUTION_HISTORY_TTL_DAYS")? {
      cfg.execution_history_ttl_days = v as u32;
    }
    if let Some(v) = env_u64("ANALYTICS_BATCH_SIZE")? {
      cfg.analytics_batch_size = v as usize;
    }
    if let Some(v) = env_u64("ANALYTICS_FLUSH_INTERVAL_SECONDS")? {
      cfg.analytics_flush_interval = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("BREAKER_FAILURE_THRESHOLD")? {
      cfg.breaker_failure_threshold = v as u32;
    }
    if let Some(v) = env_u64("BREAKER_COOLDOWN_SECONDS")? {
      cfg.breaker_cooldown = Duration::from_secs(v);
    }
    if let Some(v) = env_u64("CLEANUP_INTERVAL_SECONDS")? {
      cfg.cleanup_interval = Duration::from_secs(v);
    }
    if let Ok(v) = std::env::var(format!("{ENV_PREFIX}NODE_ID")) {
      cfg.node_id = v;
    }

    // 未显式设置时，认领过期阈值跟随热层节拍
    // Unless set explicitly, the stale-claim threshold follows the hot tick
    if !stale_claim_set {
      cfg.stale_claim = cfg.redis_processing_interval * 2;
    }

    cfg.validate()?;
    Ok(cfg)
  }

  /// 设置路由阈值
  /// Set the router threshold
  pub fn immediate_horizon(mut self, horizon: Duration) -> Self {
    self.immediate_horizon = horizon;
    self
  }

  /// 设置转移窗口
  /// Set the transfer window
  pub fn transfer_horizon(mut self, horizon: Duration) -> Self {
    self.transfer_horizon = horizon;
    self
  }

  /// 设置冷层同步节拍
  /// Set the cold sync tick period
  pub fn cold_sync_interval(mut self, interval: Duration) -> Self {
    self.cold_sync_interval = interval;
    self
  }

  /// 设置热层处理节拍，并同步默认的认领过期阈值
  /// Set the hot processing tick period, keeping the default stale-claim
  /// threshold in step
  pub fn redis_processing_interval(mut self, interval: Duration) -> Self {
    self.stale_claim = interval * 2;
    self.redis_processing_interval = interval;
    self
  }

  /// 设置最大重试次数
  /// Set the maximum retry attempts
  pub fn max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// 设置重试退避基数
  /// Set the retry backoff base
  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// 设置执行池并发上限
  /// Set the execution pool cap
  pub fn max_concurrent_executions(mut self, concurrency: usize) -> Self {
    self.max_concurrent_executions = concurrency.max(1);
    self
  }

  /// 设置认领过期阈值
  /// Set the stale-claim threshold
  pub fn stale_claim(mut self, stale_claim: Duration) -> Self {
    self.stale_claim = stale_claim;
    self
  }

  /// 设置转移扫描批大小
  /// Set the transfer scan batch size
  pub fn transfer_batch_size(mut self, batch_size: usize) -> Self {
    self.transfer_batch_size = batch_size.max(1);
    self
  }

  /// 设置保留天数
  /// Set the retention in days
  pub fn execution_history_ttl_days(mut self, days: u32) -> Self {
    self.execution_history_ttl_days = days;
    self
  }

  /// 设置分析批大小
  /// Set the analytics batch size
  pub fn analytics_batch_size(mut self, batch_size: usize) -> Self {
    self.analytics_batch_size = batch_size.max(1);
    self
  }

  /// 设置分析缓冲最大驻留时长
  /// Set the analytics buffer maximum age
  pub fn analytics_flush_interval(mut self, interval: Duration) -> Self {
    self.analytics_flush_interval = interval;
    self
  }

  /// 设置节点标识
  /// Set the node id
  pub fn node_id<S: AsRef<str>>(mut self, node_id: S) -> Self {
    self.node_id = node_id.as_ref().to_string();
    self
  }

  /// 转移租约 TTL：两个同步节拍
  /// Transfer lease TTL: two sync ticks
  pub fn transfer_lease_ttl(&self) -> Duration {
    self.cold_sync_interval * 2
  }

  /// 验证配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.redis_processing_interval.is_zero() {
      return Err(Error::config("hot processing interval must be positive"));
    }
    if self.cold_sync_interval.is_zero() {
      return Err(Error::config("cold sync interval must be positive"));
    }
    if self.max_concurrent_executions == 0 {
      return Err(Error::config(
        "max concurrent executions must be greater than 0",
      ));
    }
    if self.transfer_horizon > self.immediate_horizon {
      return Err(Error::config(
        "transfer horizon must not exceed the immediate horizon",
      ));
    }
    if self.transfer_batch_size == 0 {
      return Err(Error::config("transfer batch size must be greater than 0"));
    }
    if self.node_id.trim().is_empty() {
      return Err(Error::config("node id must not be empty"));
    }
    Ok(())
  }
}
