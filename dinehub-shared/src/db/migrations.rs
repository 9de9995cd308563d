/// Database migration runner
///
/// Migrations live in `migrations/` at the workspace root and are embedded at
/// compile time. The schema is:
///
/// | file | contents |
/// |------|----------|
/// | `..0001_create_businesses_and_users` | businesses, owner accounts |
/// | `..0002_create_subscription_plans` | plan catalog, single-default index |
/// | `..0003_create_subscriptions` | subscriptions, one-active-per-business index |
/// | `..0004_create_payments` | payments, unique reference numbers |
/// | `..0005_create_exchange_rates` | rates, one-active-per-scope index |
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::db::pool::{create_pool, DatabaseConfig};
/// use dinehub_shared::db::migrations::{run_migrations, get_migration_status};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::with_url(std::env::var("DATABASE_URL")?)).await?;
/// run_migrations(&pool).await?;
///
/// let status = get_migration_status(&pool).await?;
/// println!("Applied {} migrations", status.applied_migrations);
/// # Ok(())
/// # }
/// ```

use sqlx::{migrate::MigrateDatabase, migrate::Migrator, postgres::PgPool, Postgres};
use tracing::{debug, info, warn};

/// Embedded migrations
pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Number of successfully applied migrations
    pub applied_migrations: usize,

    /// Latest applied version
    pub latest_version: Option<i64>,

    /// Every embedded migration has been applied
    pub is_up_to_date: bool,
}

/// Runs all pending migrations
///
/// # Errors
///
/// Returns an error if a migration fails to apply or the database is unreachable.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!(
        embedded = MIGRATOR.iter().count(),
        "Starting database migrations"
    );

    match MIGRATOR.run(pool).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!("Migration failed: {}", e);
            Err(e)
        }
    }
}

/// Reports how many migrations have been applied
///
/// # Errors
///
/// Returns an error if `_sqlx_migrations` cannot be queried.
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    debug!("Checking migration status");

    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        debug!("Migrations table does not exist yet");
        return Ok(MigrationStatus {
            applied_migrations: 0,
            latest_version: None,
            is_up_to_date: false,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version)
         FROM _sqlx_migrations
         WHERE success = true",
    )
    .fetch_one(pool)
    .await?;

    let embedded = MIGRATOR.iter().filter(|m| m.migration_type.is_up_migration()).count();

    debug!(
        applied_migrations = count,
        embedded_migrations = embedded,
        latest_version = ?latest_version,
        "Migration status retrieved"
    );

    Ok(MigrationStatus {
        applied_migrations: count as usize,
        latest_version,
        is_up_to_date: count as usize >= embedded,
    })
}

/// Creates the database if it does not exist (development and tests)
///
/// # Errors
///
/// Returns an error if the server is unreachable or creation is not permitted.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    if !Postgres::database_exists(database_url).await? {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url).await?;
    } else {
        debug!("Database already exists");
    }

    Ok(())
}

/// Drops the database. Test environments only.
///
/// # Errors
///
/// Returns an error if the server is unreachable or the database is in use.
pub async fn drop_database(database_url: &str) -> Result<(), sqlx::Error> {
    warn!("Dropping database");

    if Postgres::database_exists(database_url).await? {
        Postgres::drop_database(database_url).await?;
        info!("Database dropped successfully");
    }

    Ok(())
}
