use gymflow_common::{env_flag, env_or, env_parse, DatabaseConfig, RedisConfig, RetryPolicy, ServerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingServiceConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub store: StoreConfig,
    pub booking: BookingSettings,
    pub notifications: NotificationConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

/// Rules the booking manager applies. Read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSettings {
    /// When true a confirmed booking consumes one session and cancelling restores it.
    pub consumes_session: bool,
    /// Members may not cancel within this many hours of class start. Zero disables the check.
    pub cancellation_cutoff_hours: i64,
    pub delete_retry: RetryPolicy,
    pub store_timeout_seconds: u64,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            consumes_session: true,
            cancellation_cutoff_hours: 0,
            delete_retry: RetryPolicy::default(),
            store_timeout_seconds: 15,
        }
    }
}

impl BookingSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub redis_enabled: bool,
    pub channel: String,
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub cron: String,
}

impl BookingServiceConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let backend = match env_or("BOOKING_STORE", "postgres").to_ascii_lowercase().as_str() {
            "postgres" => StoreBackend::Postgres,
            "memory" => StoreBackend::Memory,
            other => return Err(format!("Unknown BOOKING_STORE backend: {}", other).into()),
        };

        let defaults = BookingSettings::default();

        Ok(Self {
            server: ServerConfig::from_env(8010),
            database: DatabaseConfig::from_env(),
            redis: RedisConfig::from_env(),
            store: StoreConfig { backend },
            booking: BookingSettings {
                consumes_session: env_flag("BOOKING_CONSUMES_SESSION", defaults.consumes_session),
                cancellation_cutoff_hours: env_parse(
                    "CANCELLATION_CUTOFF_HOURS",
                    defaults.cancellation_cutoff_hours,
                )
                .max(0),
                delete_retry: RetryPolicy::linear(
                    env_parse("DELETE_MAX_ATTEMPTS", defaults.delete_retry.max_attempts),
                    env_parse("DELETE_RETRY_DELAY_MS", defaults.delete_retry.base_delay_ms),
                ),
                store_timeout_seconds: env_parse("STORE_TIMEOUT_SECONDS", defaults.store_timeout_seconds),
            },
            notifications: NotificationConfig {
                redis_enabled: env_flag("NOTIFICATION_REDIS_ENABLED", false),
                channel: env_or("NOTIFICATION_CHANNEL", "gymflow:booking-events"),
                webhook_url: std::env::var("NOTIFICATION_WEBHOOK_URL").ok().filter(|u| !u.is_empty()),
                timeout_seconds: env_parse("NOTIFICATION_TIMEOUT_SECONDS", 15),
            },
            reconcile: ReconcileConfig {
                enabled: env_flag("RECONCILE_ENABLED", true),
                cron: env_or("RECONCILE_CRON", "0 */10 * * * *"),
            },
        })
    }
}
