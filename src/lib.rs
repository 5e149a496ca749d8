//! # deferq
//!
//! 混合两层延迟事件调度器
//! Hybrid two-tier delayed-event scheduler
//!
//! 给定一个事件（主题、实体、动作、消息体）和一个触发时刻，deferq
//! 保证在该时刻或之后把事件投递到下游消息总线：正常运行恰好一次，
//! 故障下至少一次（消费端按 `schedule_id` 幂等）。
//! Given an event (topic, entity, action, payload) and a wall-clock fire
//! time, deferq guarantees delivery to a downstream message bus at or after
//! that time: exactly once in normal operation, at least once under failure
//! (consumers deduplicate on `schedule_id`).
//!
//! ## 架构 / Architecture
//!
//! - **热层 / Hot tier**: Redis 排序集合存放近期条目，紧凑的轮询循环
//!   原子认领并发布，秒级准时
//!   a Redis sorted set holds near-term entries; a tight polling loop
//!   claims atomically and publishes, punctual to seconds
//! - **冷层 / Cold tier**: SQL 表按 `(status, scheduled_at)` 索引、按天
//!   分区，廉价地批量存放远期条目
//!   a SQL table indexed by `(status, scheduled_at)` and partitioned by
//!   day stores distant entries cheaply in bulk
//! - **转移泵 / Transfer pump**: 转移租约的持有者把临近触发的冷层条目
//!   提升到热层
//!   the transfer-lease holder promotes cold entries into the hot tier as
//!   their fire time approaches
//! - **多节点 / Multi-node**: 原子认领加围栏租约，多个节点协同工作而
//!   不会重复触发
//!   atomic claims plus fenced leases let multiple nodes cooperate without
//!   double-firing
//!
//! ## 快速开始 / Quick Start
//!
//! ```rust,no_run
//! use deferq::config::SchedulerConfig;
//! use deferq::event::ScheduledEvent;
//! use deferq::memdb::{
//!   MemoryAnalyticsStore, MemoryColdStore, MemoryEventBus, MemoryHotStore, MemoryLockManager,
//! };
//! use deferq::server::SchedulerServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   // 内存后端：本地运行，不依赖外部服务
//!   // Memory backends: runs locally, no external services
//!   let mut server = SchedulerServer::new(
//!     SchedulerConfig::default(),
//!     Arc::new(MemoryHotStore::new()),
//!     Arc::new(MemoryColdStore::new()),
//!     Arc::new(MemoryLockManager::new()),
//!     Arc::new(MemoryEventBus::new()),
//!     Arc::new(MemoryAnalyticsStore::new()),
//!   )?;
//!   server.start()?;
//!
//!   // 两秒后触发一个事件
//!   // Fire an event in two seconds
//!   let evt = ScheduledEvent::new(
//!     "user.welcome",
//!     b"{\"user_id\":42}",
//!     chrono::Utc::now() + chrono::Duration::seconds(2),
//!   )?;
//!   let client = server.client();
//!   let schedule_id = client.schedule(evt).await?;
//!   println!("scheduled {schedule_id}");
//!
//!   server.shutdown().await?;
//!   Ok(())
//! }
//! ```

pub mod api;
pub mod base;
pub mod breaker;
pub mod client;
pub mod components;
pub mod config;
pub mod error;
pub mod event;
pub mod inspector;
pub mod memdb;
pub mod metrics;
pub mod pgdb;
pub mod rdb;
pub mod redis;
pub mod router;
pub mod server;
