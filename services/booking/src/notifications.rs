use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gymflow_common::{AppError, Booking, RedisService};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventType {
    BookingCreated,
    BookingCancelled,
    BookingDeleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingEvent {
    pub event_id: Uuid,
    pub event_type: BookingEventType,
    pub booking_id: Uuid,
    pub member_id: Uuid,
    pub class_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn new(event_type: BookingEventType, booking: &Booking) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            booking_id: booking.id,
            member_id: booking.user_id,
            class_id: booking.class_id,
            occurred_at: Utc::now(),
        }
    }
}

/// Best-effort sink for booking events (email, WhatsApp and push fan-out live behind it).
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn emit(&self, event: &BookingEvent) -> Result<(), AppError>;
}

/// Fires `event` on a background task. Failures are logged and never reach the caller.
pub fn dispatch_in_background(dispatcher: Arc<dyn NotificationDispatcher>, event: BookingEvent) {
    tokio::spawn(async move {
        match dispatcher.emit(&event).await {
            Ok(()) => tracing::debug!(
                "Dispatched {:?} for booking {}",
                event.event_type, event.booking_id
            ),
            Err(err) => tracing::warn!(
                "Notification {:?} for booking {} dropped: {}",
                event.event_type, event.booking_id, err
            ),
        }
    });
}

/// Publishes events as JSON on a Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisEventPublisher {
    redis_service: RedisService,
    channel: String,
}

impl RedisEventPublisher {
    pub fn new(redis_service: RedisService, channel: String) -> Self {
        Self { redis_service, channel }
    }
}

#[async_trait]
impl NotificationDispatcher for RedisEventPublisher {
    async fn emit(&self, event: &BookingEvent) -> Result<(), AppError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("Failed to encode booking event: {}", e)))?;
        let receivers = self.redis_service.publish(&self.channel, &payload).await?;
        tracing::debug!("Published booking event to {} ({} receivers)", self.channel, receivers);
        Ok(())
    }
}

/// Posts events as JSON to an HTTP hook.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn emit(&self, event: &BookingEvent) -> Result<(), AppError> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::ExternalService(format!("Webhook {} failed: {}", self.url, e)))?;
        Ok(())
    }
}

/// Sends every event to each target. One failing target does not stop the others.
#[derive(Clone, Default)]
pub struct FanoutDispatcher {
    targets: Vec<Arc<dyn NotificationDispatcher>>,
}

impl FanoutDispatcher {
    pub fn new(targets: Vec<Arc<dyn NotificationDispatcher>>) -> Self {
        Self { targets }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl NotificationDispatcher for FanoutDispatcher {
    async fn emit(&self, event: &BookingEvent) -> Result<(), AppError> {
        if self.targets.is_empty() {
            tracing::info!(
                "Booking event {:?} for booking {} (no notification targets configured)",
                event.event_type, event.booking_id
            );
            return Ok(());
        }

        let mut failures = Vec::new();
        for target in &self.targets {
            if let Err(err) = target.emit(event).await {
                failures.push(err.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::ExternalService(failures.join("; ")))
        }
    }
}
