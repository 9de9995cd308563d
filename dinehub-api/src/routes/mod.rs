/// API route handlers
///
/// Handlers are thin: they parse and validate the request, call one engine
/// service from [`AppState`](crate::app::AppState) and map its error.
///
/// - `health`: Health check endpoint
/// - `plans`: Plan catalog
/// - `subscriptions`: Subscription lifecycle
/// - `payments`: Payment ledger and refunds
/// - `exchange_rates`: Exchange rate ledger
/// - `owners`: Business-owner onboarding and listing
/// - `usage`: Plan usage caps

pub mod exchange_rates;
pub mod health;
pub mod owners;
pub mod payments;
pub mod plans;
pub mod subscriptions;
pub mod usage;
