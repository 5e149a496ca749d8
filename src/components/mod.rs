//! 组件模块
//! Components module
//!
//! 提供通用的组件生命周期管理 trait
//! Provides a common trait for component lifecycle management
//!
//! 此模块定义了统一的生命周期接口，用于管理各种后台组件
//! （如 HotLoop、TransferLoop、Janitor 等）
//! This module defines a unified lifecycle interface for managing the
//! background components (HotLoop, TransferLoop, Janitor, ...)

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod analytics;
pub mod healthcheck;
pub mod hot_loop;
pub mod janitor;
pub mod transfer;

/// 组件生命周期管理接口
/// Component lifecycle management interface
///
/// 此 trait 定义了组件的基本生命周期操作：启动、关闭和状态检查
/// This trait defines the basic lifecycle operations: start, shutdown and
/// state check
///
/// # 实现者 / Implementors
///
/// - [`HotLoop`](hot_loop::HotLoop) - 认领到期条目并发布到下游总线
/// - [`TransferLoop`](transfer::TransferLoop) - 将临近触发的冷层条目提升到热层
/// - [`Janitor`](janitor::Janitor) - 按保留期清理终态条目与执行记录
/// - [`AnalyticsSink`](analytics::AnalyticsSink) - 缓冲并批量写入执行记录
/// - [`Healthcheck`](healthcheck::Healthcheck) - 检查存储与锁管理器的可达性
pub trait ComponentLifecycle {
  /// 启动组件
  /// Start the component
  ///
  /// 此方法启动组件的后台任务，返回一个 JoinHandle 用于等待任务完成
  /// Starts the component's background task, returning a JoinHandle to
  /// await its completion
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 关闭组件
  /// Shutdown the component
  ///
  /// 发送关闭信号；组件在完成当前一轮工作后停止
  /// Sends the shutdown signal; the component stops after finishing its
  /// current pass
  fn shutdown(&self);

  /// 检查组件是否已完成
  /// Check if the component is done
  fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct TestComponent {
    done: Arc<AtomicBool>,
  }

  impl ComponentLifecycle for TestComponent {
    fn start(self: Arc<Self>) -> JoinHandle<()> {
      tokio::spawn(async move {
        loop {
          if self.done.load(Ordering::Relaxed) {
            break;
          }
          tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
      })
    }

    fn shutdown(&self) {
      self.done.store(true, Ordering::Relaxed);
    }

    fn is_done(&self) -> bool {
      self.done.load(Ordering::Relaxed)
    }
  }

  #[tokio::test]
  async fn test_lifecycle_trait() {
    let component = Arc::new(TestComponent {
      done: Arc::new(AtomicBool::new(false)),
    });

    assert!(!component.is_done());
    let handle = component.clone().start();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    component.shutdown();

    assert!(component.is_done());
    handle.await.unwrap();
  }
}
