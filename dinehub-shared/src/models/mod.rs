/// Database models for the billing engine
///
/// One file per table. Each model exposes its row struct, the closed
/// enumerations stored in it, and the queries the engine runs against it.
/// Queries take `&mut PgConnection` so [`crate::billing`] can compose them
/// inside a single transaction.
///
/// # Models
///
/// - `business`: tenants
/// - `user`: owner accounts
/// - `plan`: subscription plan catalog
/// - `subscription`: subscription windows and their states
/// - `payment`: charges and refunds
/// - `exchange_rate`: USD to local-currency rates per scope
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::models::plan::SubscriptionPlan;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let mut conn = pool.acquire().await?;
/// for plan in SubscriptionPlan::list_public(&mut conn).await? {
///     println!("{}: {}", plan.name, plan.pricing_display());
/// }
/// # Ok(())
/// # }
/// ```

pub mod business;
pub mod exchange_rate;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod user;
