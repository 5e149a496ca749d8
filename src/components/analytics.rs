//! AnalyticsSink 模块
//! AnalyticsSink module
//!
//! 仅追加的执行记录写入器：缓冲到批大小或最大驻留时长后落盘。
//! 分析是旁路观测，写入失败只记日志并丢弃该批，绝不阻塞执行路径。
//! Append-only execution record writer: buffers up to the batch size or the
//! maximum age, then flushes. Analytics is advisory; a failed flush is
//! logged and the batch dropped, and the execution path is never blocked.

use crate::base::AnalyticsStore;
use crate::components::ComponentLifecycle;
use crate::event::ExecutionRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 执行路径持有的发送端；满时丢弃而不是等待
/// Sender held by the execution path; drops when full instead of waiting
#[derive(Clone)]
pub struct AnalyticsHandle {
  tx: mpsc::Sender<ExecutionRecord>,
}

impl AnalyticsHandle {
  /// 提交一条执行记录（尽力而为）
  /// Submit one execution record (best effort)
  pub fn submit(&self, record: ExecutionRecord) {
    if let Err(e) = self.tx.try_send(record) {
      tracing::warn!("Analytics record dropped: {}", e);
    }
  }
}

/// AnalyticsSink 配置
/// AnalyticsSink configuration
#[derive(Debug, Clone)]
pub struct AnalyticsSinkConfig {
  /// 触发落盘的批大小
  /// Batch size that triggers a flush
  pub batch_size: usize,
  /// 缓冲最大驻留时长
  /// Maximum buffer age
  pub flush_interval: Duration,
}

impl Default for AnalyticsSinkConfig {
  fn default() -> Self {
    Self {
      batch_size: 100,
      flush_interval: Duration::from_secs(5),
    }
  }
}

/// AnalyticsSink - 缓冲并批量写入执行记录
/// AnalyticsSink - buffers and batch-writes execution records
pub struct AnalyticsSink {
  store: Arc<dyn AnalyticsStore>,
  config: AnalyticsSinkConfig,
  rx: Mutex<Option<mpsc::Receiver<ExecutionRecord>>>,
  done: Arc<AtomicBool>,
}

impl AnalyticsSink {
  /// 创建 AnalyticsSink 并返回执行路径使用的发送端
  /// Create the sink along with the handle used by the execution path
  pub fn new(
    store: Arc<dyn AnalyticsStore>,
    config: AnalyticsSinkConfig,
  ) -> (Self, AnalyticsHandle) {
    let capacity = (config.batch_size * 8).max(64);
    let (tx, rx) = mpsc::channel(capacity);
    (
      Self {
        store,
        config,
        rx: Mutex::new(Some(rx)),
        done: Arc::new(AtomicBool::new(false)),
      },
      AnalyticsHandle { tx },
    )
  }

  async fn flush(&self, buffer: &mut Vec<ExecutionRecord>) {
    if buffer.is_empty() {
      return;
    }
    if let Err(e) = self.store.append(buffer).await {
      tracing::warn!("Analytics flush of {} records failed: {}", buffer.len(), e);
    }
    buffer.clear();
  }

  /// 启动写入循环
  /// Start the write loop
  pub fn start(self: Arc<Self>) -> JoinHandle<()> {
    let mut rx = self
      .rx
      .lock()
      .unwrap()
      .take()
      .expect("AnalyticsSink already started");

    tokio::spawn(async move {
      let mut buffer: Vec<ExecutionRecord> = Vec::with_capacity(self.config.batch_size);
      let mut ticker = tokio::time::interval(self.config.flush_interval);

      loop {
        tokio::select! {
          maybe = rx.recv() => {
            match maybe {
              Some(record) => {
                buffer.push(record);
                if buffer.len() >= self.config.batch_size {
                  self.flush(&mut buffer).await;
                }
              }
              // 所有发送端已关闭：落盘后退出
              // All senders closed: flush and exit
              None => {
                self.flush(&mut buffer).await;
                break;
              }
            }
          }
          _ = ticker.tick() => {
            if self.done.load(Ordering::Relaxed) {
              self.flush(&mut buffer).await;
              tracing::debug!("AnalyticsSink: shutting down");
              break;
            }
            self.flush(&mut buffer).await;
          }
        }
      }
    })
  }

  /// 停止写入循环
  /// Stop the write loop
  pub fn shutdown(&self) {
    self.done.store(true, Ordering::Relaxed);
  }

  /// 检查是否已完成
  /// Check if done
  pub fn is_done(&self) -> bool {
    self.done.load(Ordering::Relaxed)
  }
}

impl ComponentLifecycle for AnalyticsSink {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    AnalyticsSink::start(self)
  }

  fn shutdown(&self) {
    AnalyticsSink::shutdown(self)
  }

  fn is_done(&self) -> bool {
    AnalyticsSink::is_done(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::{ExecutionStatus, ScheduledEvent};
  use crate::memdb::MemoryAnalyticsStore;
  use chrono::Utc;

  fn record() -> ExecutionRecord {
    let evt = ScheduledEvent::new("t", b"", Utc::now()).unwrap();
    ExecutionRecord::for_attempt(&evt, ExecutionStatus::Success, Utc::now(), 3, "node-a", None)
  }

  #[tokio::test]
  async fn test_flush_on_batch_size() {
    let store = Arc::new(MemoryAnalyticsStore::new());
    let (sink, handle) = AnalyticsSink::new(
      store.clone(),
      AnalyticsSinkConfig {
        batch_size: 2,
        flush_interval: Duration::from_secs(60),
      },
    );
    let sink = Arc::new(sink);
    let _task = sink.clone().start();

    handle.submit(record());
    handle.submit(record());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.records().len(), 2);
  }

  #[tokio::test]
  async fn test_flush_on_max_age() {
    let store = Arc::new(MemoryAnalyticsStore::new());
    let (sink, handle) = AnalyticsSink::new(
      store.clone(),
      AnalyticsSinkConfig {
        batch_size: 1000,
        flush_interval: Duration::from_millis(20),
      },
    );
    let sink = Arc::new(sink);
    let _task = sink.clone().start();

    handle.submit(record());
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.records().len(), 1);
  }

  #[tokio::test]
  async fn test_drains_on_sender_drop() {
    let store = Arc::new(MemoryAnalyticsStore::new());
    let (sink, handle) = AnalyticsSink::new(
      store.clone(),
      AnalyticsSinkConfig {
        batch_size: 1000,
        flush_interval: Duration::from_secs(60),
      },
    );
    let sink = Arc::new(sink);
    let task = sink.clone().start();

    handle.submit(record());
    drop(handle);
    task.await.unwrap();
    assert_eq!(store.records().len(), 1);
  }
}
