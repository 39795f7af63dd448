use chrono::{Duration, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use gymflow_common::AppError;

pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_migrations(&self) -> Result<(), AppError> {
        tracing::info!("Starting database migrations...");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.into()))?;

        tracing::info!("All migrations completed successfully");
        Ok(())
    }

    pub async fn check_migration_status(&self) -> Result<MigrationStatus, AppError> {
        let migrator = sqlx::migrate!("./migrations");
        let total = migrator.iter().count();

        let table_exists = sqlx::query_scalar::<_, bool>(
            "SELECT to_regclass('_sqlx_migrations') IS NOT NULL"
        )
        .fetch_one(&self.pool)
        .await?;

        let applied = if table_exists {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _sqlx_migrations WHERE success = TRUE"
            )
            .fetch_one(&self.pool)
            .await? as usize
        } else {
            0
        };

        let pending = total.saturating_sub(applied);

        Ok(MigrationStatus {
            total,
            applied,
            pending,
            is_up_to_date: pending == 0,
        })
    }

    /// Inserts a few members and upcoming classes for local testing. Safe to run repeatedly.
    pub async fn seed_demo_data(&self) -> Result<(), AppError> {
        let members = [
            ("alice@gymflow.test", "Alice Moreno", Some("Female"), 10),
            ("bob@gymflow.test", "Bob Okafor", Some("Male"), 5),
            ("casey@gymflow.test", "Casey Lin", None, 0),
        ];

        for (email, name, gender, sessions) in members {
            sqlx::query(
                r#"
                INSERT INTO members (id, email, name, gender, remaining_sessions, status)
                VALUES ($1, $2, $3, $4, $5, 'Active')
                ON CONFLICT (email) DO NOTHING
                "#
            )
            .bind(Uuid::new_v4())
            .bind(email)
            .bind(name)
            .bind(gender)
            .bind(sessions)
            .execute(&self.pool)
            .await?;
        }

        let has_classes = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM classes)")
            .fetch_one(&self.pool)
            .await?;

        if !has_classes {
            let today = Utc::now().date_naive();
            let classes = [
                ("Morning Yoga", 1, (7, 0), (8, 0), 12, "All", "Dana"),
                ("Ladies Strength", 1, (18, 0), (19, 0), 8, "Female", "Maya"),
                ("HIIT Express", 2, (12, 30), (13, 0), 1, "All", "Omar"),
            ];

            for (name, days_ahead, start, end, capacity, gender, trainer) in classes {
                let start_time = NaiveTime::from_hms_opt(start.0, start.1, 0)
                    .ok_or_else(|| AppError::Internal(format!("Invalid seed start time for {}", name)))?;
                let end_time = NaiveTime::from_hms_opt(end.0, end.1, 0)
                    .ok_or_else(|| AppError::Internal(format!("Invalid seed end time for {}", name)))?;

                sqlx::query(
                    r#"
                    INSERT INTO classes (id, name, schedule, start_time, end_time, capacity, enrolled, gender, trainers, status)
                    VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, 'Active')
                    "#
                )
                .bind(Uuid::new_v4())
                .bind(name)
                .bind(today + Duration::days(days_ahead))
                .bind(start_time)
                .bind(end_time)
                .bind(capacity)
                .bind(gender)
                .bind(vec![trainer.to_string()])
                .execute(&self.pool)
                .await?;
            }

            tracing::info!("Seeded {} demo classes", classes.len());
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct MigrationStatus {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
    pub is_up_to_date: bool,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Migrations: {}/{} applied, {} pending",
            self.applied, self.total, self.pending
        )
    }
}
