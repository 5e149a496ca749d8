//! Redis 下游总线实现
//! Redis downstream bus implementation
//!
//! 把触发的事件发布到按主题命名的 Redis 发布/订阅频道；消息是携带
//! 头信息与关联标识的 JSON 信封，消息体以 base64 原样透传。
//! Publishes fired events onto topic-named Redis pub/sub channels; the
//! message is a JSON envelope carrying headers and the correlation id,
//! with the body passed through unchanged as base64.
//!
//! Redis 层的失败一律视为暂时性发布失败，由热循环按退避重试
//! Redis-level failures all count as transient publish failures, retried
//! by the hot loop with backoff

use crate::base::EventBus;
use crate::error::{Error, Result};
use crate::redis::{RedisConfig, RedisConnection};
use async_trait::async_trait;
use base64::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

/// Redis 下游总线
/// Redis downstream bus
pub struct RedisEventBus {
  conn: RedisConnection,
  channel_prefix: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
  headers: &'a HashMap<String, String>,
  body: String,
  correlation_id: Option<&'a str>,
}

impl RedisEventBus {
  /// 创建总线
  /// Create the bus
  pub async fn new(config: RedisConfig, channel_prefix: String) -> Result<Self> {
    let conn = config.connect().await?;
    Ok(Self {
      conn,
      channel_prefix,
    })
  }

  fn channel(&self, topic: &str) -> String {
    format!("{}:{}", self.channel_prefix, topic)
  }
}

#[async_trait]
impl EventBus for RedisEventBus {
  async fn publish(
    &self,
    topic: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
    correlation_id: Option<&str>,
  ) -> Result<()> {
    let envelope = serde_json::to_string(&Envelope {
      headers,
      body: BASE64_STANDARD.encode(body),
      correlation_id,
    })?;

    let mut conn = self.conn.clone();
    let _: i64 = redis::cmd("PUBLISH")
      .arg(self.channel(topic))
      .arg(envelope)
      .query_async(&mut conn)
      .await
      .map_err(|e| Error::PublishTransient(e.to_string()))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_envelope_shape() {
    let mut headers = HashMap::new();
    headers.insert("tenant".to_string(), "acme".to_string());
    let envelope = Envelope {
      headers: &headers,
      body: BASE64_STANDARD.encode(b"payload"),
      correlation_id: Some("corr-1"),
    };
    let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["headers"]["tenant"], "acme");
    assert_eq!(json["correlation_id"], "corr-1");
    assert_eq!(
      BASE64_STANDARD.decode(json["body"].as_str().unwrap()).unwrap(),
      b"payload"
    );
  }
}
