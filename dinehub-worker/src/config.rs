/// Configuration management for the sweep worker
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 5)
/// - `EXPIRY_SWEEP_INTERVAL_SECS`: Expiry sweep period (default: 3600)
/// - `REMINDER_SWEEP_INTERVAL_SECS`: Reminder sweep period (default: 86400)
/// - `REMINDER_HORIZON_DAYS`: How far ahead reminders look (default: 7)
/// - `NOTIFY_WEBHOOK_URL` / `NOTIFY_WEBHOOK_SECRET`: Optional webhook notifier
///
/// # Example
///
/// ```no_run
/// use dinehub_worker::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Expiry sweep every {}s", config.scheduler.expiry_interval.as_secs());
/// # Ok(())
/// # }
/// ```

use crate::scheduler::SchedulerConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub scheduler: SchedulerConfig,
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or a number fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let expiry_secs: u64 = parse_var("EXPIRY_SWEEP_INTERVAL_SECS", 3600)?;
        let reminder_secs: u64 = parse_var("REMINDER_SWEEP_INTERVAL_SECS", 86_400)?;
        let horizon_days: i64 = parse_var("REMINDER_HORIZON_DAYS", 7)?;

        if expiry_secs == 0 || reminder_secs == 0 {
            anyhow::bail!("sweep intervals must be at least one second");
        }
        if horizon_days <= 0 {
            anyhow::bail!("REMINDER_HORIZON_DAYS must be positive");
        }

        Ok(Self {
            database_url,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            scheduler: SchedulerConfig {
                expiry_interval: Duration::from_secs(expiry_secs),
                reminder_interval: Duration::from_secs(reminder_secs),
                reminder_horizon_days: horizon_days,
            },
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok(),
            notify_webhook_secret: env::var("NOTIFY_WEBHOOK_SECRET").ok(),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is not a valid number: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("DINEHUB_WORKER_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }
}
