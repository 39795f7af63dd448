use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use gymflow_common::AppError;

use crate::manager::BookingManager;

/// Periodically rewrites the enrolled count of upcoming classes from their confirmed bookings.
pub struct ReconciliationScheduler {
    scheduler: JobScheduler,
    manager: BookingManager,
}

impl ReconciliationScheduler {
    pub async fn new(manager: BookingManager) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler creation error: {}", e)))?;

        Ok(Self { scheduler, manager })
    }

    /// Registers the sweep under `cron` (six fields, seconds first) and starts the scheduler.
    pub async fn start(&self, cron: &str) -> Result<(), AppError> {
        let manager = self.manager.clone();
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let manager = manager.clone();
            Box::pin(async move {
                if let Err(err) = manager.reconcile_upcoming(Utc::now().date_naive()).await {
                    tracing::error!("Scheduled enrollment reconciliation failed: {}", err);
                }
            })
        })
        .map_err(|e| AppError::Internal(format!("Invalid reconcile schedule '{}': {}", cron, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler job error: {}", e)))?;

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(format!("Scheduler start error: {}", e)))?;

        tracing::info!("Enrollment reconciliation scheduled: {}", cron);
        Ok(())
    }
}
