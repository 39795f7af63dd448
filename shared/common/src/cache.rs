use redis::{aio::ConnectionManager, AsyncCommands, Client};
use crate::{AppError, RedisConfig};

#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.connection_string())?;
        let manager = ConnectionManager::new(client).await?;

        // Test connection
        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        tracing::info!("Redis connection established");

        Ok(Self { manager })
    }

    /// Publishes `payload` on `channel`, returning the number of subscribers that received it.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<i64, AppError> {
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }
}
