/// Billing engine services
///
/// Each service wraps a `PgPool` and exposes the public operations of one
/// ledger or state machine. Every write service also has `*_in` associated
/// functions taking a `&mut PgConnection`, so [`owners::OwnerService`] can
/// chain several of them inside one transaction.
///
/// # Services
///
/// - [`exchange::ExchangeRateLedger`]: USD to local-currency rates
/// - [`payments::PaymentLedger`]: charges, refunds and per-subscription totals
/// - [`plans::PlanCatalog`]: plan catalog
/// - [`subscriptions::SubscriptionLifecycle`]: subscription state machine and sweeps
/// - [`owners::OwnerService`]: business-owner orchestration
///
/// Notifications produced inside a transaction are collected and handed to
/// [`crate::notify::dispatch`] only after the commit succeeds.

pub mod exchange;
pub mod money;
pub mod owners;
pub mod payments;
pub mod plans;
pub mod status;
pub mod subscriptions;

pub use exchange::{CurrentRate, ExchangeRateLedger, RateSource};
pub use owners::{OwnerDetail, OwnerFilter, OwnerService, Page};
pub use payments::{PaymentAggregate, PaymentLedger, RevenueReport};
pub use plans::PlanCatalog;
pub use status::{BillingStatus, DisplayStatus};
pub use subscriptions::{BulkReport, SubscriptionLifecycle, SubscriptionView, SweepReport};

use crate::error::EngineResult;
use crate::models::business::Business;
use crate::notify::{Notification, NotificationKind};
use sqlx::PgConnection;
use uuid::Uuid;

/// Builds a notification addressed to the owner of `business_id`
///
/// A business that vanished still gets a recipient-less notification.
pub(crate) async fn notification_for(
    conn: &mut PgConnection,
    business_id: Uuid,
    kind: NotificationKind,
    payload: serde_json::Value,
) -> EngineResult<Notification> {
    let owner_id = Business::find_by_id(conn, business_id)
        .await?
        .and_then(|b| b.owner_id);

    Ok(Notification::new(owner_id, business_id, kind, payload))
}
