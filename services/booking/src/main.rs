use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gymflow_booking::config::{BookingServiceConfig, StoreBackend};
use gymflow_booking::memory::InMemoryStore;
use gymflow_booking::notifications::{
    FanoutDispatcher, NotificationDispatcher, RedisEventPublisher, WebhookDispatcher,
};
use gymflow_booking::postgres::PgStore;
use gymflow_booking::reconciler::ReconciliationScheduler;
use gymflow_booking::store::{BookingStore, ClassCatalog, MemberDirectory};
use gymflow_booking::{build_app, cors_layer, AppState, BookingManager};
use gymflow_common::RedisService;
use gymflow_database::{create_pool, run_migrations};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gymflow_booking=debug,booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = BookingServiceConfig::from_env()?;

    // Select the backing store
    let (members, classes, bookings) = match config.store.backend {
        StoreBackend::Postgres => {
            let db_pool = create_pool(&config.database).await?;
            run_migrations(&db_pool).await?;
            shared_store(PgStore::new(db_pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            shared_store(InMemoryStore::new())
        }
    };

    // Notification targets
    let mut targets: Vec<Arc<dyn NotificationDispatcher>> = Vec::new();
    if config.notifications.redis_enabled {
        let redis_service = RedisService::new(&config.redis).await?;
        targets.push(Arc::new(RedisEventPublisher::new(
            redis_service,
            config.notifications.channel.clone(),
        )));
    }
    if let Some(url) = &config.notifications.webhook_url {
        targets.push(Arc::new(WebhookDispatcher::new(
            url.clone(),
            Duration::from_secs(config.notifications.timeout_seconds),
        )?));
    }
    let notifier = FanoutDispatcher::new(targets);
    if notifier.is_empty() {
        tracing::info!("No notification targets configured; booking events will only be logged");
    }

    let manager = BookingManager::new(members, classes, bookings, Arc::new(notifier), config.booking.clone());

    // Scheduled enrollment reconciliation
    let _reconciler = if config.reconcile.enabled {
        let scheduler = ReconciliationScheduler::new(manager.clone()).await?;
        scheduler.start(&config.reconcile.cron).await?;
        Some(scheduler)
    } else {
        tracing::info!("Scheduled reconciliation disabled");
        None
    };

    // Build the application
    let app = build_app(AppState { manager }, cors_layer(&config.server.cors_origins));

    // Start the server
    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;

    tracing::info!("Booking Service listening on {}", config.server.bind_address());

    axum::serve(listener, app).await?;

    Ok(())
}

type Collaborators = (Arc<dyn MemberDirectory>, Arc<dyn ClassCatalog>, Arc<dyn BookingStore>);

fn shared_store<S>(store: S) -> Collaborators
where
    S: MemberDirectory + ClassCatalog + BookingStore + Clone + 'static,
{
    (Arc::new(store.clone()), Arc::new(store.clone()), Arc::new(store))
}
