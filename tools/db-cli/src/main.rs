use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use gymflow_booking::config::BookingSettings;
use gymflow_booking::notifications::FanoutDispatcher;
use gymflow_booking::postgres::PgStore;
use gymflow_booking::BookingManager;
use gymflow_common::DatabaseConfig;
use gymflow_database::{create_pool, DbPool, MigrationRunner};

#[derive(Parser)]
#[command(name = "db-cli")]
#[command(about = "GymFlow Database CLI Tool")]
struct Cli {
    /// Database name override (connection settings come from DATABASE_*)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Check migration status
    Status,
    /// Seed demo members and classes
    Seed,
    /// Reset database (drop and recreate)
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Rewrite enrolled counts from confirmed bookings
    Reconcile {
        /// Only this class; defaults to every upcoming class
        #[arg(long)]
        class_id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = database_config(cli.database);

    match cli.command {
        Commands::Migrate => {
            let runner = MigrationRunner::new(connect(&config).await?);
            runner.run_all_migrations().await.context("running migrations")?;

            println!("✅ Migrations completed successfully");
        }
        Commands::Status => {
            let runner = MigrationRunner::new(connect(&config).await?);
            let status = runner
                .check_migration_status()
                .await
                .context("reading migration status")?;
            println!("📊 {}", status);

            if status.is_up_to_date {
                println!("✅ Database is up to date");
            } else {
                println!("⚠️  Database needs migration");
            }
        }
        Commands::Seed => {
            let runner = MigrationRunner::new(connect(&config).await?);
            runner.seed_demo_data().await.context("seeding demo data")?;

            println!("✅ Demo data seeded successfully");
        }
        Commands::Reset { force } => {
            if !force {
                println!("⚠️  This will delete ALL data in database '{}'!", config.database);
                println!("Type 'yes' to continue:");

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;

                if input.trim() != "yes" {
                    println!("❌ Operation cancelled");
                    return Ok(());
                }
            }

            reset_database(&config).await?;
            println!("✅ Database reset completed");
        }
        Commands::Reconcile { class_id } => {
            let pool = connect(&config).await?;
            let manager = reconciling_manager(pool);

            match class_id {
                Some(class_id) => {
                    let enrolled = manager
                        .reconcile_enrollment(class_id)
                        .await
                        .with_context(|| format!("reconciling class {}", class_id))?;
                    println!("✅ Class {} has {} enrolled", class_id, enrolled);
                }
                None => {
                    let summary = manager
                        .reconcile_upcoming(Utc::now().date_naive())
                        .await
                        .context("reconciling upcoming classes")?;
                    println!(
                        "✅ Checked {} class(es): {} repaired, {} failed",
                        summary.classes_checked, summary.classes_repaired, summary.classes_failed
                    );
                }
            }
        }
    }

    Ok(())
}

fn database_config(database: Option<String>) -> DatabaseConfig {
    let config = DatabaseConfig::from_env();
    match database {
        Some(database) => DatabaseConfig { database, ..config },
        None => config,
    }
}

async fn connect(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    create_pool(config)
        .await
        .with_context(|| format!("connecting to database '{}' on {}:{}", config.database, config.host, config.port))
}

/// The manager only needs the store here; events are dropped because reconciliation emits none.
fn reconciling_manager(pool: DbPool) -> BookingManager {
    let store = PgStore::new(pool);
    BookingManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(FanoutDispatcher::default()),
        BookingSettings::default(),
    )
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn reset_database(config: &DatabaseConfig) -> anyhow::Result<()> {
    if !is_plain_identifier(&config.database) {
        bail!("refusing to reset database with unusual name '{}'", config.database);
    }

    let admin_config = DatabaseConfig {
        database: "postgres".to_string(),
        ..config.clone()
    };
    let admin_pool = connect(&admin_config).await?;

    // Terminate existing connections
    sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(&config.database)
    .execute(&admin_pool)
    .await
    .context("terminating open connections")?;

    sqlx::query(&format!("DROP DATABASE IF EXISTS {}", config.database))
        .execute(&admin_pool)
        .await
        .context("dropping database")?;

    sqlx::query(&format!("CREATE DATABASE {}", config.database))
        .execute(&admin_pool)
        .await
        .context("creating database")?;

    // Run migrations on the new database
    let runner = MigrationRunner::new(connect(config).await?);
    runner.run_all_migrations().await.context("running migrations")?;

    Ok(())
}
