//! 服务器模块
//! Server module
//!
//! 监督者：持有所有存储句柄，按依赖注入组装两个循环、清理器、
//! 健康检查与分析写入器，并管理它们的启动与排空
//! The supervisor: holds every store handle, assembles the two loops, the
//! janitor, the healthcheck and the analytics sink by dependency injection,
//! and manages their startup and drain

use crate::base::{AnalyticsStore, ColdStore, EventBus, HotStore, LockManager};
use crate::breaker::CircuitBreaker;
use crate::client::SchedulerClient;
use crate::components::analytics::{AnalyticsSink, AnalyticsSinkConfig};
use crate::components::healthcheck::{Healthcheck, HealthcheckConfig};
use crate::components::hot_loop::{HotLoop, HotLoopConfig};
use crate::components::janitor::{Janitor, JanitorConfig};
use crate::components::transfer::{TransferLoop, TransferLoopConfig};
use crate::components::ComponentLifecycle;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::inspector::Inspector;
use crate::metrics::SchedulerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;

/// 服务器状态
/// Server state
#[derive(Debug, Clone, Copy, PartialEq)]
enum ServerState {
  // 新建，未启动
  New,
  // 循环正在运行
  Running,
  // 已关闭
  Closed,
}

/// 调度器服务器
/// Scheduler server
pub struct SchedulerServer {
  config: SchedulerConfig,
  hot: Arc<dyn HotStore>,
  cold: Arc<dyn ColdStore>,
  locks: Arc<dyn LockManager>,
  bus: Arc<dyn EventBus>,
  analytics_store: Arc<dyn AnalyticsStore>,
  metrics: Arc<SchedulerMetrics>,
  state: ServerState,
  hot_loop: Option<Arc<HotLoop>>,
  transfer: Option<Arc<TransferLoop>>,
  janitor: Option<Arc<Janitor>>,
  healthcheck: Option<Arc<Healthcheck>>,
  inspector: Option<Arc<Inspector>>,
  // 统一管理实现了 ComponentLifecycle 的组件
  // Unified registry of components implementing ComponentLifecycle
  components: Vec<(Arc<dyn ComponentLifecycle + Send + Sync>, JoinHandle<()>)>,
}

impl SchedulerServer {
  /// 创建服务器实例
  /// Create a server instance
  pub fn new(
    config: SchedulerConfig,
    hot: Arc<dyn HotStore>,
    cold: Arc<dyn ColdStore>,
    locks: Arc<dyn LockManager>,
    bus: Arc<dyn EventBus>,
    analytics_store: Arc<dyn AnalyticsStore>,
  ) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      config,
      hot,
      cold,
      locks,
      bus,
      analytics_store,
      metrics: Arc::new(SchedulerMetrics::new()),
      state: ServerState::New,
      hot_loop: None,
      transfer: None,
      janitor: None,
      healthcheck: None,
      inspector: None,
      components: Vec::new(),
    })
  }

  /// 入口客户端
  /// Ingest client
  pub fn client(&self) -> SchedulerClient {
    SchedulerClient::new(
      Arc::clone(&self.hot),
      Arc::clone(&self.cold),
      &self.config,
      Arc::clone(&self.metrics),
    )
  }

  /// 指标集合
  /// Metrics collection
  pub fn metrics(&self) -> Arc<SchedulerMetrics> {
    Arc::clone(&self.metrics)
  }

  /// 状态检查器（启动后可用）
  /// Inspector (available once started)
  pub fn inspector(&self) -> Option<Arc<Inspector>> {
    self.inspector.clone()
  }

  /// 健康检查组件（启动后可用）
  /// Healthcheck component (available once started)
  pub fn healthcheck(&self) -> Option<Arc<Healthcheck>> {
    self.healthcheck.clone()
  }

  /// 转移循环（启动后可用）
  /// Transfer loop (available once started)
  pub fn transfer_loop(&self) -> Option<Arc<TransferLoop>> {
    self.transfer.clone()
  }

  /// 清理器（启动后可用）
  /// Janitor (available once started)
  pub fn janitor(&self) -> Option<Arc<Janitor>> {
    self.janitor.clone()
  }

  /// 启动所有后台组件
  /// Start every background component
  pub fn start(&mut self) -> Result<()> {
    if self.state != ServerState::New {
      return Err(Error::SchedulerRunning);
    }
    self.state = ServerState::Running;

    let bus_breaker = Arc::new(CircuitBreaker::new(
      "downstream-bus",
      self.config.breaker_failure_threshold,
      self.config.breaker_cooldown,
    ));
    let hot_breaker = Arc::new(CircuitBreaker::new(
      "hot-store",
      self.config.breaker_failure_threshold,
      self.config.breaker_cooldown,
    ));
    let cold_breaker = Arc::new(CircuitBreaker::new(
      "cold-store",
      self.config.breaker_failure_threshold,
      self.config.breaker_cooldown,
    ));

    // 分析写入器先于执行引擎启动，发送端交给热循环
    // The analytics sink starts before the execution engine; the handle
    // goes to the hot loop
    let (sink, analytics_handle) = AnalyticsSink::new(
      Arc::clone(&self.analytics_store),
      AnalyticsSinkConfig {
        batch_size: self.config.analytics_batch_size,
        flush_interval: self.config.analytics_flush_interval,
      },
    );
    let sink = Arc::new(sink);
    let sink_handle = sink.clone().start();
    self
      .components
      .push((sink as Arc<dyn ComponentLifecycle + Send + Sync>, sink_handle));

    // 热循环 - 执行引擎
    // Hot loop - the execution engine
    let hot_loop = Arc::new(HotLoop::new(
      Arc::clone(&self.hot),
      Arc::clone(&self.bus),
      analytics_handle,
      HotLoopConfig {
        interval: self.config.redis_processing_interval,
        concurrency: self.config.max_concurrent_executions,
        max_retries: self.config.max_retries,
        retry_delay: self.config.retry_delay,
        stale_claim: self.config.stale_claim,
        node_id: self.config.node_id.clone(),
      },
      Arc::clone(&self.metrics),
      Arc::clone(&bus_breaker),
      hot_breaker,
    ));
    let last_tick = hot_loop.last_tick_handle();
    let hot_loop_handle = hot_loop.clone().start();
    self.components.push((
      hot_loop.clone() as Arc<dyn ComponentLifecycle + Send + Sync>,
      hot_loop_handle,
    ));
    self.hot_loop = Some(hot_loop.clone());

    // 转移循环 - 冷层到热层的提升
    // Transfer loop - cold-to-hot promotion
    let transfer = Arc::new(TransferLoop::new(
      Arc::clone(&self.cold),
      Arc::clone(&self.hot),
      Arc::clone(&self.locks),
      TransferLoopConfig {
        interval: self.config.cold_sync_interval,
        horizon: self.config.transfer_horizon,
        batch_size: self.config.transfer_batch_size,
        lease_ttl: self.config.transfer_lease_ttl(),
        node_id: self.config.node_id.clone(),
      },
      Arc::clone(&self.metrics),
      cold_breaker,
    ));
    let transfer_handle = transfer.clone().start();
    self.components.push((
      transfer.clone() as Arc<dyn ComponentLifecycle + Send + Sync>,
      transfer_handle,
    ));
    self.transfer = Some(transfer.clone());

    // 清理器 - 保留期裁剪
    // Janitor - retention pruning
    let janitor = Arc::new(Janitor::new(
      Arc::clone(&self.cold),
      Arc::clone(&self.analytics_store),
      Arc::clone(&self.locks),
      JanitorConfig {
        interval: self.config.cleanup_interval,
        ttl_days: self.config.execution_history_ttl_days,
      },
    ));
    let janitor_handle = janitor.clone().start();
    self.components.push((
      janitor.clone() as Arc<dyn ComponentLifecycle + Send + Sync>,
      janitor_handle,
    ));
    self.janitor = Some(janitor);

    // 健康检查
    // Healthcheck
    let healthcheck = Arc::new(Healthcheck::new(
      Arc::clone(&self.hot),
      Arc::clone(&self.cold),
      Arc::clone(&self.locks),
      last_tick,
      HealthcheckConfig {
        interval: Duration::from_secs(15),
        hot_interval: self.config.redis_processing_interval,
      },
    ));
    let healthcheck_handle = healthcheck.clone().start();
    self.components.push((
      healthcheck.clone() as Arc<dyn ComponentLifecycle + Send + Sync>,
      healthcheck_handle,
    ));
    self.healthcheck = Some(healthcheck);

    self.inspector = Some(Arc::new(Inspector::new(
      Arc::clone(&self.hot),
      Arc::clone(&self.cold),
      Arc::clone(&self.locks),
      hot_loop,
      transfer,
    )));

    tracing::info!(
      "Scheduler started (node {}, hot tick {:?}, cold sync {:?})",
      self.config.node_id,
      self.config.redis_processing_interval,
      self.config.cold_sync_interval
    );
    Ok(())
  }

  /// 启动并运行直到收到停止信号
  /// Start and run until a stop signal arrives
  pub async fn run(&mut self) -> Result<()> {
    self.start()?;
    let _ = signal::ctrl_c().await;
    tracing::info!("Received shutdown signal");
    self.shutdown().await
  }

  /// 优雅关闭：停止循环、排空执行池、落盘分析缓冲
  /// Graceful shutdown: stop the loops, drain the pool, flush analytics
  pub async fn shutdown(&mut self) -> Result<()> {
    if self.state == ServerState::Closed {
      return Ok(());
    }
    self.state = ServerState::Closed;

    for (component, _) in &self.components {
      component.shutdown();
    }

    // 等待在途执行结束后再等各组件退出
    // Wait for in-flight executions before waiting on the components
    if let Some(hot_loop) = &self.hot_loop {
      hot_loop.drain().await;
    }

    for (_, handle) in self.components.drain(..) {
      let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
    }

    tracing::info!("Scheduler stopped");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memdb::{
    MemoryAnalyticsStore, MemoryColdStore, MemoryEventBus, MemoryHotStore, MemoryLockManager,
  };

  fn server(config: SchedulerConfig) -> SchedulerServer {
    SchedulerServer::new(
      config,
      Arc::new(MemoryHotStore::new()),
      Arc::new(MemoryColdStore::new()),
      Arc::new(MemoryLockManager::new()),
      Arc::new(MemoryEventBus::new()),
      Arc::new(MemoryAnalyticsStore::new()),
    )
    .unwrap()
  }

  #[tokio::test]
  async fn test_start_twice_fails() {
    let mut srv = server(SchedulerConfig::default());
    srv.start().unwrap();
    assert!(matches!(srv.start(), Err(Error::SchedulerRunning)));
    srv.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_accessors_available_after_start() {
    let mut srv = server(SchedulerConfig::default());
    assert!(srv.inspector().is_none());
    srv.start().unwrap();
    assert!(srv.inspector().is_some());
    assert!(srv.healthcheck().is_some());
    assert!(srv.transfer_loop().is_some());
    assert!(srv.janitor().is_some());
    srv.shutdown().await.unwrap();
  }

  #[tokio::test]
  async fn test_shutdown_is_idempotent() {
    let mut srv = server(SchedulerConfig::default());
    srv.start().unwrap();
    srv.shutdown().await.unwrap();
    srv.shutdown().await.unwrap();
  }
}
