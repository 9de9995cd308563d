/// Database layer
///
/// - `pool`: connection pool, health check, snapshot transactions
/// - `migrations`: embedded schema migrations
///
/// Row types and their queries live in [`crate::models`].

pub mod migrations;
pub mod pool;
