/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use dinehub_api::{app::AppState, config::Config};
/// use dinehub_shared::notify::LogNotifier;
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config, Arc::new(LogNotifier));
/// let app = dinehub_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, middleware::security::SecurityHeadersLayer};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use dinehub_shared::billing::{
    ExchangeRateLedger, OwnerService, PaymentLedger, PlanCatalog, SubscriptionLifecycle,
};
use dinehub_shared::notify::Notifier;
use dinehub_shared::quota::UsageEnforcer;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor. Every
/// service holds a pool handle, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    pub plans: PlanCatalog,
    pub subscriptions: SubscriptionLifecycle,
    pub payments: PaymentLedger,
    pub rates: ExchangeRateLedger,
    pub owners: OwnerService,
    pub usage: UsageEnforcer,
}

impl AppState {
    /// Creates new application state, wiring every engine service to `db`
    pub fn new(db: PgPool, config: Config, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            plans: PlanCatalog::new(db.clone()),
            subscriptions: SubscriptionLifecycle::new(db.clone(), Arc::clone(&notifier)),
            payments: PaymentLedger::new(db.clone(), Arc::clone(&notifier)),
            rates: ExchangeRateLedger::new(db.clone()),
            owners: OwnerService::new(db.clone(), notifier),
            usage: UsageEnforcer::new(db.clone()),
            config: Arc::new(config),
            db,
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                                   # Health check
/// └── /v1/
///     ├── /plans                                # Plan catalog
///     ├── /subscriptions                        # Subscription lifecycle
///     ├── /payments                             # Payment ledger
///     ├── /exchange-rates                       # Exchange rate ledger
///     ├── /owners                               # Business-owner onboarding
///     └── /businesses/:id/
///         ├── subscriptions, payments           # Per-business history
///         ├── exchange-rate                     # Business rate override
///         ├── status                            # Suspend / activate
///         └── usage/:resource                   # Plan cap check
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let plan_routes = Router::new()
        .route(
            "/",
            post(routes::plans::create_plan).get(routes::plans::list_plans),
        )
        .route("/public", get(routes::plans::list_public_plans))
        .route("/default", get(routes::plans::get_default_plan))
        .route("/by-name/:name", get(routes::plans::get_plan_by_name))
        .route(
            "/:id",
            get(routes::plans::get_plan)
                .put(routes::plans::update_plan)
                .delete(routes::plans::delete_plan),
        )
        .route("/:id/default", post(routes::plans::set_default_plan));

    let subscription_routes = Router::new()
        .route("/", post(routes::subscriptions::create_subscription))
        .route("/expiring", get(routes::subscriptions::list_expiring))
        .route("/expired", get(routes::subscriptions::list_expired))
        .route("/bulk/renew", post(routes::subscriptions::bulk_renew))
        .route("/bulk/cancel", post(routes::subscriptions::bulk_cancel))
        .route("/bulk/suspend", post(routes::subscriptions::bulk_suspend))
        .route("/:id", get(routes::subscriptions::get_subscription))
        .route("/:id/renew", post(routes::subscriptions::renew_subscription))
        .route("/:id/cancel", post(routes::subscriptions::cancel_subscription))
        .route("/:id/change-plan", post(routes::subscriptions::change_plan))
        .route("/:id/extend", post(routes::subscriptions::extend_subscription))
        .route("/:id/suspend", post(routes::subscriptions::suspend_subscription))
        .route("/:id/reactivate", post(routes::subscriptions::reactivate_subscription))
        .route("/:id/auto-renew", post(routes::subscriptions::set_auto_renew))
        .route("/:id/payments", get(routes::payments::list_subscription_payments))
        .route("/:id/payments/summary", get(routes::payments::payment_summary))
        .route("/:id/refunds", post(routes::payments::record_refund));

    let payment_routes = Router::new()
        .route("/", post(routes::payments::record_payment))
        .route("/revenue", get(routes::payments::revenue))
        .route("/overdue", get(routes::payments::list_overdue_payments))
        .route(
            "/by-reference/:reference",
            get(routes::payments::get_payment_by_reference),
        )
        .route(
            "/:id",
            get(routes::payments::get_payment).delete(routes::payments::delete_payment),
        )
        .route("/:id/complete", post(routes::payments::complete_payment))
        .route("/:id/cancel", post(routes::payments::cancel_payment))
        .route("/:id/fail", post(routes::payments::fail_payment));

    let rate_routes = Router::new()
        .route(
            "/system",
            get(routes::exchange_rates::get_system_rate)
                .post(routes::exchange_rates::set_system_rate),
        )
        .route("/current", get(routes::exchange_rates::current_rate))
        .route("/history", get(routes::exchange_rates::rate_history))
        .route("/convert", get(routes::exchange_rates::convert))
        .route("/:id", axum::routing::delete(routes::exchange_rates::delete_rate))
        .route("/:id/activate", post(routes::exchange_rates::activate_rate))
        .route("/:id/deactivate", post(routes::exchange_rates::deactivate_rate));

    let owner_routes = Router::new()
        .route(
            "/",
            post(routes::owners::onboard_owner).get(routes::owners::list_owners),
        )
        .route(
            "/:id",
            get(routes::owners::get_owner).delete(routes::owners::delete_owner),
        )
        .route("/:id/renew", post(routes::owners::renew_for_owner))
        .route("/:id/change-plan", post(routes::owners::change_plan_for_owner))
        .route("/:id/cancel", post(routes::owners::cancel_for_owner));

    let business_routes = Router::new()
        .route(
            "/:id/subscriptions",
            get(routes::subscriptions::list_business_subscriptions),
        )
        .route(
            "/:id/subscriptions/current",
            get(routes::subscriptions::current_business_subscription),
        )
        .route("/:id/payments", get(routes::payments::list_business_payments))
        .route(
            "/:id/payments/summary",
            get(routes::payments::business_payment_summary),
        )
        .route("/:id/plans", get(routes::plans::list_business_plans))
        .route(
            "/:id/exchange-rate",
            get(routes::exchange_rates::get_business_rate)
                .post(routes::exchange_rates::set_business_rate),
        )
        .route("/:id/status", post(routes::owners::set_business_status))
        .route("/:id/usage/:resource", get(routes::usage::check_usage));

    let v1_routes = Router::new()
        .nest("/plans", plan_routes)
        .nest("/subscriptions", subscription_routes)
        .nest("/payments", payment_routes)
        .nest("/exchange-rates", rate_routes)
        .nest("/owners", owner_routes)
        .nest("/businesses", business_routes);

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}
