//! 路由模块
//! Router module
//!
//! 入口处的分层决策：以立即视界为阈值，近期事件进热层，
//! 远期事件进冷层。决策是 `scheduled_at - now` 与阈值的纯函数，
//! 随后的落库由调用方一次写入完成。
//! Tier decision at ingest: with the immediate horizon as the threshold,
//! near-term events go to the hot tier and distant events to the cold
//! tier. The decision is a pure function of `scheduled_at - now` and the
//! threshold; the caller commits the placement in a single store write.

use crate::event::ScheduledEvent;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 目标层
/// Target tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
  /// 热层：秒级到一天内
  /// Hot tier: seconds up to about a day
  Hot,
  /// 冷层：一天以上
  /// Cold tier: beyond a day
  Cold,
}

/// 路由器
/// Router
#[derive(Debug, Clone)]
pub struct Router {
  immediate_horizon: Duration,
}

impl Router {
  /// 创建路由器
  /// Create the router
  pub fn new(immediate_horizon: Duration) -> Self {
    Self { immediate_horizon }
  }

  /// 决定事件落入哪一层
  /// Decide which tier the event lands in
  ///
  /// 已过期（delay ≤ 0）与恰好等于阈值的事件都进热层；
  /// 过期事件在下一个热层节拍触发
  /// Already-due events (delay ≤ 0) and events exactly at the threshold
  /// both go hot; past-due entries fire on the next hot tick
  pub fn route(&self, evt: &ScheduledEvent, now: DateTime<Utc>) -> Tier {
    let delay = evt.scheduled_at - now;
    if delay <= chrono::Duration::zero() {
      return Tier::Hot;
    }
    let horizon = chrono::Duration::from_std(self.immediate_horizon)
      .unwrap_or_else(|_| chrono::Duration::seconds(86400));
    if delay <= horizon {
      Tier::Hot
    } else {
      Tier::Cold
    }
  }
}
