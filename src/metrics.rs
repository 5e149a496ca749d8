//! 指标模块
//! Metrics module
//!
//! 原子计数器与固定桶直方图，按 Prometheus 文本格式导出；
//! 指标是尽力而为的观测，绝不影响执行路径
//! Atomic counters and fixed-bucket histograms rendered in the Prometheus
//! text exposition format; metrics are best-effort observation and never
//! affect the execution path

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// 固定桶直方图
/// Fixed-bucket histogram
pub struct Histogram {
  bounds: &'static [f64],
  counts: Vec<AtomicU64>,
  /// 总和以微单位保存，避免浮点原子
  /// Sum kept in micro-units to avoid a floating-point atomic
  sum_micros: AtomicU64,
  total: AtomicU64,
}

impl Histogram {
  fn new(bounds: &'static [f64]) -> Self {
    Self {
      bounds,
      counts: (0..bounds.len()).map(|_| AtomicU64::new(0)).collect(),
      sum_micros: AtomicU64::new(0),
      total: AtomicU64::new(0),
    }
  }

  /// 记录一次观测
  /// Record one observation
  pub fn observe(&self, value: f64) {
    for (i, bound) in self.bounds.iter().enumerate() {
      if value <= *bound {
        self.counts[i].fetch_add(1, Ordering::Relaxed);
        break;
      }
    }
    self.total.fetch_add(1, Ordering::Relaxed);
    self
      .sum_micros
      .fetch_add((value.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);
  }

  fn render(&self, out: &mut String, name: &str) {
    let mut cumulative = 0u64;
    for (i, bound) in self.bounds.iter().enumerate() {
      cumulative += self.counts[i].load(Ordering::Relaxed);
      let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    let total = self.total.load(Ordering::Relaxed);
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {total}");
    let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
    let _ = writeln!(out, "{name}_sum {sum}");
    let _ = writeln!(out, "{name}_count {total}");
  }
}

const DELAY_BOUNDS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 3600.0];
const PROCESSING_BOUNDS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0];

/// 调度器指标集合
/// Scheduler metrics collection
pub struct SchedulerMetrics {
  /// 入口接收的事件总数
  /// Total events accepted at ingest
  pub events_scheduled_total: AtomicU64,
  /// 按结果分类的触发总数
  /// Fired totals by outcome
  pub events_fired_success: AtomicU64,
  pub events_fired_error: AtomicU64,
  pub events_fired_timeout: AtomicU64,
  pub events_fired_skipped: AtomicU64,
  /// 最近一次转移批的大小
  /// Size of the most recent transfer batch
  pub transfer_batch_size: AtomicU64,
  /// 累计转移条目数
  /// Total transferred entries
  pub events_transferred_total: AtomicU64,
  /// 执行延迟直方图（秒）
  /// Execution delay histogram (seconds)
  pub execution_delay_seconds: Histogram,
  /// 处理耗时直方图（毫秒）
  /// Processing time histogram (milliseconds)
  pub processing_time_ms: Histogram,
}

impl Default for SchedulerMetrics {
  fn default() -> Self {
    Self {
      events_scheduled_total: AtomicU64::new(0),
      events_fired_success: AtomicU64::new(0),
      events_fired_error: AtomicU64::new(0),
      events_fired_timeout: AtomicU64::new(0),
      events_fired_skipped: AtomicU64::new(0),
      transfer_batch_size: AtomicU64::new(0),
      events_transferred_total: AtomicU64::new(0),
      execution_delay_seconds: Histogram::new(DELAY_BOUNDS),
      processing_time_ms: Histogram::new(PROCESSING_BOUNDS),
    }
  }
}

impl SchedulerMetrics {
  /// 创建指标集合
  /// Create the metrics collection
  pub fn new() -> Self {
    Self::default()
  }

  /// 记录一次触发结果
  /// Record one fire outcome
  pub fn record_fired(&self, status: crate::event::ExecutionStatus) {
    use crate::event::ExecutionStatus;
    let counter = match status {
      ExecutionStatus::Success => &self.events_fired_success,
      ExecutionStatus::Error => &self.events_fired_error,
      ExecutionStatus::Timeout => &self.events_fired_timeout,
      ExecutionStatus::Skipped => &self.events_fired_skipped,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// 渲染为 Prometheus 文本格式
  /// Render in the Prometheus text format
  pub fn render(&self) -> String {
    let mut out = String::new();

    out.push_str("# HELP events_scheduled_total Total events accepted at ingest\n");
    out.push_str("# TYPE events_scheduled_total counter\n");
    let _ = writeln!(
      out,
      "events_scheduled_total {}",
      self.events_scheduled_total.load(Ordering::Relaxed)
    );

    out.push_str("# HELP events_fired_total Fired events by outcome\n");
    out.push_str("# TYPE events_fired_total counter\n");
    for (status, counter) in [
      ("success", &self.events_fired_success),
      ("error", &self.events_fired_error),
      ("timeout", &self.events_fired_timeout),
      ("skipped", &self.events_fired_skipped),
    ] {
      let _ = writeln!(
        out,
        "events_fired_total{{status=\"{status}\"}} {}",
        counter.load(Ordering::Relaxed)
      );
    }

    out.push_str("# HELP transfer_batch_size Entries promoted in the last transfer pass\n");
    out.push_str("# TYPE transfer_batch_size gauge\n");
    let _ = writeln!(
      out,
      "transfer_batch_size {}",
      self.transfer_batch_size.load(Ordering::Relaxed)
    );

    out.push_str("# HELP events_transferred_total Entries promoted cold to hot\n");
    out.push_str("# TYPE events_transferred_total counter\n");
    let _ = writeln!(
      out,
      "events_transferred_total {}",
      self.events_transferred_total.load(Ordering::Relaxed)
    );

    out.push_str("# HELP execution_delay_seconds Delay between scheduled and executed\n");
    out.push_str("# TYPE execution_delay_seconds histogram\n");
    self
      .execution_delay_seconds
      .render(&mut out, "execution_delay_seconds");

    out.push_str("# HELP processing_time_ms Publish round-trip per execution\n");
    out.push_str("# TYPE processing_time_ms histogram\n");
    self.processing_time_ms.render(&mut out, "processing_time_ms");

    out
  }
}
