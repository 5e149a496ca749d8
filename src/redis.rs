//! Redis 配置和连接管理模块
//! Redis configuration and connection management module

use crate::error::Result;
use redis::{Client, ConnectionInfo, IntoConnectionInfo};
use std::time::Duration;

/// 热层使用的异步连接类型
/// Async connection type used by the hot tier
pub type RedisConnection = redis::aio::MultiplexedConnection;

/// 单次请求的响应超时；超时按暂时性失败处理
/// Per-request response timeout; a timeout counts as a transient failure
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 建立连接的超时
/// Connection establishment timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis 连接配置
/// Redis connection configuration
#[derive(Clone, Debug)]
pub struct RedisConfig {
  /// 连接信息
  /// Connection information
  pub connection_info: ConnectionInfo,
}

impl RedisConfig {
  /// 从 URL 创建配置
  /// Create a configuration from a URL
  pub fn from_url<T: IntoConnectionInfo>(url: T) -> Result<Self> {
    Ok(Self {
      connection_info: url.into_connection_info()?,
    })
  }

  /// 构建客户端
  /// Build the client
  pub fn client(&self) -> Result<Client> {
    Ok(Client::open(self.connection_info.clone())?)
  }

  /// 建立带超时的多路复用连接
  /// Establish a multiplexed connection with timeouts
  pub async fn connect(&self) -> Result<RedisConnection> {
    let client = self.client()?;
    Ok(
      client
        .get_multiplexed_async_connection_with_timeouts(RESPONSE_TIMEOUT, CONNECTION_TIMEOUT)
        .await?,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_url() {
    assert!(RedisConfig::from_url("redis://localhost:6379").is_ok());
    assert!(RedisConfig::from_url("not a url").is_err());
  }
}
