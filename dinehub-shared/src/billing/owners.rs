/// Business-owner orchestration
///
/// Composes the plan catalog, subscription state machine and payment ledger
/// into the owner-facing operations. Onboarding creates the business, its
/// owner account, the first subscription and the optional first payment in
/// one transaction: any failure leaves nothing behind.
///
/// Reads ([`OwnerService::detail`], [`OwnerService::list`]) run in a
/// read-only repeatable-read transaction so every figure in a view comes from
/// the same snapshot.
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::billing::owners::{OnboardOwner, OwnerInfo, OwnerService, PaymentInfo};
/// use dinehub_shared::models::business::NewBusiness;
/// use dinehub_shared::notify::LogNotifier;
/// use rust_decimal::Decimal;
/// use sqlx::PgPool;
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, plan_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let owners = OwnerService::new(pool, Arc::new(LogNotifier));
///
/// let onboarded = owners
///     .onboard(OnboardOwner {
///         business: NewBusiness {
///             name: "Noodle House".to_string(),
///             email: Some("hello@noodle.kh".to_string()),
///             ..Default::default()
///         },
///         owner: OwnerInfo {
///             identifier: "noodle-owner".to_string(),
///             email: "owner@noodle.kh".to_string(),
///             password: "kitchen-open-9".to_string(),
///             full_name: "Sok Dara".to_string(),
///             phone: None,
///         },
///         plan_id,
///         custom_duration_days: None,
///         auto_renew: false,
///         payment: Some(PaymentInfo {
///             amount: Some(Decimal::from(30)),
///             method: Some("CASH".to_string()),
///             reference_number: None,
///             notes: None,
///         }),
///     })
///     .await?;
///
/// println!("{:?}", onboarded.created_components);
/// # Ok(())
/// # }
/// ```

use super::payments::{PaymentAggregate, PaymentLedger, RecordPayment};
use super::status::{BillingStatus, DisplayStatus};
use super::subscriptions::{
    CancelSubscription, CancellationRefund, CreateSubscription, RenewSubscription,
    SubscriptionLifecycle, SubscriptionView,
};
use crate::credentials::{looks_like_email, normalize_email, prepare_owner_credentials};
use crate::db::pool::begin_snapshot;
use crate::error::{EngineError, EngineResult};
use crate::models::business::{Business, BusinessStatus, NewBusiness};
use crate::models::payment::{Payment, PaymentMethod, PaymentTotals, PaymentType};
use crate::models::plan::SubscriptionPlan;
use crate::models::subscription::Subscription;
use crate::models::user::{AccountStatus, NewOwnerUser, User, BUSINESS_OWNER_ROLE};
use crate::notify::{dispatch, Notification, NotificationKind, Notifier};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Plan label shown when a business has no subscription at all
pub const NO_ACTIVE_PLAN: &str = "No Active Plan";

/// Largest page [`OwnerService::list`] returns
pub const MAX_PAGE_SIZE: u32 = 100;

/// Page size when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Owner account fields supplied at onboarding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub identifier: String,
    pub email: String,

    #[serde(skip_serializing)]
    pub password: String,

    /// Split into first and last name on the first whitespace
    pub full_name: String,

    pub phone: Option<String>,
}

/// Optional payment taken together with an owner operation
///
/// Recorded only when complete (amount and method present), always as
/// `COMPLETED`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub amount: Option<Decimal>,

    /// Payment method label, e.g. `CASH` or `bank-transfer`
    pub method: Option<String>,

    pub reference_number: Option<String>,
    pub notes: Option<String>,
}

impl PaymentInfo {
    pub fn is_complete(&self) -> bool {
        self.amount.is_some() && self.method.as_deref().is_some_and(|m| !m.trim().is_empty())
    }
}

/// Input for onboarding a paying business
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardOwner {
    pub business: NewBusiness,
    pub owner: OwnerInfo,
    pub plan_id: Uuid,
    pub custom_duration_days: Option<i32>,

    #[serde(default)]
    pub auto_renew: bool,

    pub payment: Option<PaymentInfo>,
}

/// Input for renewing an owner's subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewForOwner {
    pub new_plan_id: Option<Uuid>,
    pub custom_duration_days: Option<i32>,
    pub payment: Option<PaymentInfo>,
}

/// Input for changing an owner's plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePlanForOwner {
    pub new_plan_id: Uuid,

    #[serde(default = "keep_end_date")]
    pub keep_current_end_date: bool,

    pub payment: Option<PaymentInfo>,
}

fn keep_end_date() -> bool {
    true
}

/// Input for cancelling an owner's subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelForOwner {
    pub reason: String,

    #[serde(default)]
    pub immediate: bool,

    pub refund: Option<CancellationRefund>,
}

/// Owner, business, current subscription and payment standing in one view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerDetail {
    pub owner: User,
    pub business: Business,

    /// Most recent non-deleted subscription, if any
    pub subscription: Option<SubscriptionView>,

    pub plan_name: String,
    pub subscription_status: DisplayStatus,
    pub days_remaining: i64,
    pub auto_renew: bool,
    pub payments: Option<PaymentAggregate>,
    pub payment_status: BillingStatus,
}

impl OwnerDetail {
    /// Builds the view from already-loaded rows
    ///
    /// A business without any subscription reads as `EXPIRED` on
    /// [`NO_ACTIVE_PLAN`].
    pub fn compose(
        owner: User,
        business: Business,
        current: Option<(Subscription, SubscriptionPlan)>,
        totals: Option<PaymentTotals>,
        now: DateTime<Utc>,
    ) -> Self {
        match current {
            Some((subscription, plan)) => {
                let totals = totals.unwrap_or_else(|| PaymentTotals {
                    subscription_id: subscription.id,
                    ..Default::default()
                });
                let payments = PaymentAggregate::from_totals(plan.price, totals);
                let view = SubscriptionView::new(subscription, &plan, now);

                OwnerDetail {
                    owner,
                    business,
                    plan_name: plan.name,
                    subscription_status: view.display_status,
                    days_remaining: view.days_remaining,
                    auto_renew: view.subscription.auto_renew,
                    payment_status: payments.status,
                    payments: Some(payments),
                    subscription: Some(view),
                }
            }
            None => OwnerDetail {
                owner,
                business,
                subscription: None,
                plan_name: NO_ACTIVE_PLAN.to_string(),
                subscription_status: DisplayStatus::Expired,
                days_remaining: 0,
                auto_renew: false,
                payments: None,
                payment_status: BillingStatus::Unpaid,
            },
        }
    }

    fn subscription_end(&self) -> Option<DateTime<Utc>> {
        self.subscription.as_ref().map(|v| v.subscription.end_date)
    }

    fn matches_search(&self, needle: &str) -> bool {
        let hay = [
            self.owner.identifier.as_str(),
            self.owner.email.as_str(),
            self.business.name.as_str(),
        ];
        hay.iter().any(|h| h.to_lowercase().contains(needle))
            || self.owner.full_name().to_lowercase().contains(needle)
    }
}

/// Result of onboarding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardedOwner {
    pub detail: OwnerDetail,

    /// What the operation created, e.g. `["Owner User", "Business Profile", "Subscription"]`
    pub created_components: Vec<String>,
}

/// Sort key for owner listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerSort {
    #[default]
    CreatedAt,
    BusinessName,
    SubscriptionEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Owner listing filter; empty lists and `None` match everything
#[derive(Debug, Clone, Default)]
pub struct OwnerFilter {
    pub account_statuses: Vec<AccountStatus>,
    pub business_statuses: Vec<BusinessStatus>,
    pub subscription_statuses: Vec<DisplayStatus>,
    pub payment_statuses: Vec<BillingStatus>,
    pub auto_renew: Option<bool>,

    /// Owner creation time range, inclusive
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,

    /// Case-insensitive match on identifier, email, name or business name
    pub search: Option<String>,

    pub sort_by: OwnerSort,
    pub direction: SortDirection,

    /// 1-based
    pub page: u32,
    pub page_size: u32,
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

/// Filters, sorts and paginates composed owner views
pub fn apply_filter(items: Vec<OwnerDetail>, filter: &OwnerFilter) -> Page<OwnerDetail> {
    let needle = filter
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut matched: Vec<OwnerDetail> = items
        .into_iter()
        .filter(|d| {
            filter.account_statuses.is_empty()
                || filter.account_statuses.contains(&d.owner.account_status)
        })
        .filter(|d| {
            filter.business_statuses.is_empty()
                || filter.business_statuses.contains(&d.business.status)
        })
        .filter(|d| {
            filter.subscription_statuses.is_empty()
                || filter.subscription_statuses.contains(&d.subscription_status)
        })
        .filter(|d| {
            filter.payment_statuses.is_empty()
                || filter.payment_statuses.contains(&d.payment_status)
        })
        .filter(|d| filter.auto_renew.map_or(true, |flag| d.auto_renew == flag))
        .filter(|d| filter.created_from.map_or(true, |from| d.owner.created_at >= from))
        .filter(|d| filter.created_to.map_or(true, |to| d.owner.created_at <= to))
        .filter(|d| needle.as_deref().map_or(true, |n| d.matches_search(n)))
        .collect();

    matched.sort_by(|a, b| {
        let ord = match filter.sort_by {
            OwnerSort::CreatedAt => a.owner.created_at.cmp(&b.owner.created_at),
            OwnerSort::BusinessName => a
                .business
                .name
                .to_lowercase()
                .cmp(&b.business.name.to_lowercase()),
            OwnerSort::SubscriptionEnd => a.subscription_end().cmp(&b.subscription_end()),
        };
        let ord = match filter.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        ord.then_with(|| a.owner.id.cmp(&b.owner.id))
    });

    let page_size = match filter.page_size {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    let page = filter.page.max(1);
    let total_items = matched.len() as u64;
    let total_pages = total_items.div_ceil(u64::from(page_size)) as u32;

    let items = matched
        .into_iter()
        .skip((page as usize - 1) * page_size as usize)
        .take(page_size as usize)
        .collect();

    Page {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    }
}

/// Business-owner orchestrator
#[derive(Clone)]
pub struct OwnerService {
    db: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl OwnerService {
    pub fn new(db: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        OwnerService { db, notifier }
    }

    /// Creates business, owner, subscription and optional payment atomically
    ///
    /// # Errors
    ///
    /// - `Validation` for a taken identifier or email, bad credentials, or an
    ///   unknown payment method
    /// - `NotFound` if the plan does not exist
    /// - anything [`SubscriptionLifecycle::create`] or
    ///   [`PaymentLedger::record`] can return
    pub async fn onboard(&self, input: OnboardOwner) -> EngineResult<OnboardedOwner> {
        let business_name = input.business.name.trim().to_string();
        if business_name.is_empty() {
            return Err(EngineError::validation("business name is required"));
        }
        let business_email = input
            .business
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());
        if let Some(email) = business_email.as_deref() {
            if !looks_like_email(email) {
                return Err(EngineError::validation(format!(
                    "business email '{}' is not a valid address",
                    email
                )));
            }
        }

        // Hashing is slow; do it before the transaction opens
        let credentials = prepare_owner_credentials(
            &input.owner.identifier,
            &input.owner.email,
            &input.owner.password,
            &input.owner.full_name,
        )?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if User::identifier_exists(&mut tx, &credentials.identifier).await? {
            return Err(EngineError::validation(format!(
                "owner identifier '{}' is already taken",
                credentials.identifier
            )));
        }
        if User::email_exists(&mut tx, &credentials.email).await? {
            return Err(EngineError::validation(format!(
                "owner email '{}' is already registered",
                credentials.email
            )));
        }
        if let Some(email) = business_email.as_deref() {
            if Business::email_exists(&mut tx, email).await? {
                return Err(EngineError::validation(format!(
                    "business email '{}' is already registered",
                    email
                )));
            }
        }

        SubscriptionPlan::find_by_id(&mut tx, input.plan_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| EngineError::not_found("plan", input.plan_id))?;

        let business = Business::insert(
            &mut tx,
            NewBusiness {
                name: business_name,
                email: business_email,
                ..input.business
            },
        )
        .await?;

        let owner = User::insert_owner(
            &mut tx,
            NewOwnerUser {
                identifier: credentials.identifier,
                email: credentials.email,
                password_hash: credentials.password_hash,
                first_name: credentials.first_name,
                last_name: credentials.last_name,
                phone: input.owner.phone,
                business_id: business.id,
            },
        )
        .await?;
        Business::set_owner(&mut tx, business.id, owner.id).await?;

        let subscription = SubscriptionLifecycle::create_in(
            &mut tx,
            now,
            CreateSubscription {
                business_id: business.id,
                plan_id: input.plan_id,
                custom_duration_days: input.custom_duration_days,
                auto_renew: input.auto_renew,
                notes: None,
            },
        )
        .await?;

        let mut created_components = vec![
            "Owner User".to_string(),
            "Business Profile".to_string(),
            "Subscription".to_string(),
        ];

        if let Some(payment) = input.payment.filter(PaymentInfo::is_complete) {
            Self::record_owner_payment(&mut tx, now, subscription.id, payment).await?;
            created_components.push("Payment".to_string());
        }

        Business::set_status(&mut tx, business.id, BusinessStatus::Active).await?;
        Business::set_subscription_active(&mut tx, business.id, true).await?;

        let detail = Self::detail_in(&mut tx, owner.id, now).await?;
        tx.commit().await?;

        info!(
            owner_id = %owner.id,
            business_id = %business.id,
            subscription_id = %subscription.id,
            components = ?created_components,
            "Business owner onboarded"
        );

        Ok(OnboardedOwner {
            detail,
            created_components,
        })
    }

    /// Composed view of one owner
    pub async fn detail(&self, owner_id: Uuid) -> EngineResult<OwnerDetail> {
        let mut tx = begin_snapshot(&self.db).await?;
        let detail = Self::detail_in(&mut tx, owner_id, Utc::now()).await?;
        tx.commit().await?;

        Ok(detail)
    }

    async fn detail_in(
        conn: &mut PgConnection,
        owner_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<OwnerDetail> {
        let (owner, business) = Self::owner_and_business(conn, owner_id).await?;

        let current = match Subscription::current_for_business(conn, business.id).await? {
            Some(subscription) => {
                let plan = SubscriptionPlan::find_by_id(conn, subscription.plan_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;
                Some((subscription, plan))
            }
            None => None,
        };

        let totals = match &current {
            Some((subscription, _)) => {
                Some(Payment::totals_for_subscription(conn, subscription.id).await?)
            }
            None => None,
        };

        Ok(OwnerDetail::compose(owner, business, current, totals, now))
    }

    /// Renews the owner's current subscription, optionally with a payment
    pub async fn renew_for(&self, owner_id: Uuid, input: RenewForOwner) -> EngineResult<OwnerDetail> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();

        let current = Self::current_subscription(&mut tx, owner_id).await?;
        let renewed = SubscriptionLifecycle::renew_in(
            &mut tx,
            now,
            current.id,
            RenewSubscription {
                new_plan_id: input.new_plan_id,
                custom_duration_days: input.custom_duration_days,
            },
            &mut outbox,
        )
        .await?;

        if let Some(payment) = input.payment.filter(PaymentInfo::is_complete) {
            Self::record_owner_payment(&mut tx, now, renewed.id, payment).await?;
        }

        let detail = Self::detail_in(&mut tx, owner_id, now).await?;
        tx.commit().await?;
        dispatch(&self.notifier, outbox);

        info!(owner_id = %owner_id, subscription_id = %renewed.id, "Owner subscription renewed");
        Ok(detail)
    }

    /// Changes the owner's plan in place, optionally with a payment
    pub async fn change_plan_for(
        &self,
        owner_id: Uuid,
        input: ChangePlanForOwner,
    ) -> EngineResult<OwnerDetail> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let current = Self::current_subscription(&mut tx, owner_id).await?;
        let changed = SubscriptionLifecycle::change_plan_in(
            &mut tx,
            current.id,
            input.new_plan_id,
            input.keep_current_end_date,
        )
        .await?;

        if let Some(payment) = input.payment.filter(PaymentInfo::is_complete) {
            Self::record_owner_payment(&mut tx, now, changed.id, payment).await?;
        }

        let detail = Self::detail_in(&mut tx, owner_id, now).await?;
        tx.commit().await?;

        Ok(detail)
    }

    /// Cancels the owner's current subscription, optionally recording a refund
    pub async fn cancel_for(&self, owner_id: Uuid, input: CancelForOwner) -> EngineResult<OwnerDetail> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();

        let current = Self::current_subscription(&mut tx, owner_id).await?;
        SubscriptionLifecycle::cancel_in(
            &mut tx,
            now,
            current.id,
            CancelSubscription {
                reason: input.reason,
                immediate: input.immediate,
                refund: input.refund,
            },
            &mut outbox,
        )
        .await?;

        let detail = Self::detail_in(&mut tx, owner_id, now).await?;
        tx.commit().await?;
        dispatch(&self.notifier, outbox);

        Ok(detail)
    }

    /// Soft-deletes the owner, the business and every subscription of it
    pub async fn delete(&self, owner_id: Uuid) -> EngineResult<()> {
        let mut tx = self.db.begin().await?;

        let (owner, business) = Self::owner_and_business(&mut tx, owner_id).await?;
        Business::lock_for_update(&mut tx, business.id).await?;

        let subscriptions = Subscription::soft_delete_for_business(&mut tx, business.id).await?;
        Business::soft_delete(&mut tx, business.id).await?;
        User::soft_delete(&mut tx, owner.id).await?;
        tx.commit().await?;

        info!(
            owner_id = %owner.id,
            business_id = %business.id,
            subscriptions,
            "Business owner deleted"
        );
        Ok(())
    }

    /// Suspends or activates a business and tells its owner
    pub async fn set_business_status(
        &self,
        business_id: Uuid,
        status: BusinessStatus,
    ) -> EngineResult<Business> {
        let mut tx = self.db.begin().await?;

        let business = Business::lock_for_update(&mut tx, business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;
        let updated = Business::set_status(&mut tx, business_id, status)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;
        tx.commit().await?;

        info!(
            business_id = %business_id,
            from = %business.status,
            to = %status,
            "Business status changed"
        );

        if business.status != status {
            dispatch(
                &self.notifier,
                vec![Notification::new(
                    updated.owner_id,
                    updated.id,
                    NotificationKind::BusinessStatusChanged,
                    serde_json::json!({
                        "business_name": updated.name,
                        "from": business.status,
                        "to": status,
                    }),
                )],
            );
        }

        Ok(updated)
    }

    /// Filtered, sorted, paginated owner views from one snapshot
    pub async fn list(&self, filter: &OwnerFilter) -> EngineResult<Page<OwnerDetail>> {
        let now = Utc::now();
        let mut tx = begin_snapshot(&self.db).await?;

        let owners = User::list_owners(&mut tx).await?;
        let business_ids: Vec<Uuid> = owners.iter().filter_map(|o| o.business_id).collect();

        let mut businesses: HashMap<Uuid, Business> = Business::find_by_ids(&mut tx, &business_ids)
            .await?
            .into_iter()
            .map(|b| (b.id, b))
            .collect();

        let subscriptions = Subscription::current_for_businesses(&mut tx, &business_ids).await?;
        let plan_ids: Vec<Uuid> = subscriptions.iter().map(|s| s.plan_id).collect();
        let subscription_ids: Vec<Uuid> = subscriptions.iter().map(|s| s.id).collect();

        let plans: HashMap<Uuid, SubscriptionPlan> = SubscriptionPlan::find_by_ids(&mut tx, &plan_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let mut totals: HashMap<Uuid, PaymentTotals> =
            Payment::totals_for_subscriptions(&mut tx, &subscription_ids)
                .await?
                .into_iter()
                .map(|t| (t.subscription_id, t))
                .collect();
        let mut current: HashMap<Uuid, Subscription> = subscriptions
            .into_iter()
            .map(|s| (s.business_id, s))
            .collect();

        tx.commit().await?;

        let details = owners
            .into_iter()
            .filter_map(|owner| {
                let business = businesses.remove(&owner.business_id?)?;
                let subscription = current
                    .remove(&business.id)
                    .and_then(|s| plans.get(&s.plan_id).cloned().map(|p| (s, p)));
                let sums = subscription
                    .as_ref()
                    .and_then(|(s, _)| totals.remove(&s.id));
                Some(OwnerDetail::compose(owner, business, subscription, sums, now))
            })
            .collect();

        Ok(apply_filter(details, filter))
    }

    async fn owner_and_business(
        conn: &mut PgConnection,
        owner_id: Uuid,
    ) -> EngineResult<(User, Business)> {
        let owner = User::find_by_id(conn, owner_id)
            .await?
            .filter(|u| u.role == BUSINESS_OWNER_ROLE)
            .ok_or_else(|| EngineError::not_found("owner", owner_id))?;
        let business_id = owner
            .business_id
            .ok_or_else(|| EngineError::not_found("business", format!("owner {}", owner_id)))?;
        let business = Business::find_by_id(conn, business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;

        Ok((owner, business))
    }

    async fn current_subscription(
        conn: &mut PgConnection,
        owner_id: Uuid,
    ) -> EngineResult<Subscription> {
        let (_, business) = Self::owner_and_business(conn, owner_id).await?;
        Subscription::current_for_business(conn, business.id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", format!("business {}", business.id)))
    }

    /// Records a completed charge from owner-supplied payment info
    async fn record_owner_payment(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        subscription_id: Uuid,
        payment: PaymentInfo,
    ) -> EngineResult<Payment> {
        let label = payment.method.unwrap_or_default();
        let method = PaymentMethod::from_str(&label).ok_or_else(|| {
            EngineError::validation(format!("unknown payment method '{}'", label))
        })?;

        PaymentLedger::record_in(
            conn,
            now,
            RecordPayment {
                subscription_id,
                amount: payment.amount.unwrap_or_default(),
                method,
                payment_type: PaymentType::Subscription,
                reference_number: payment.reference_number,
                notes: payment.notes,
                auto_complete: true,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::status::tests::subscription;
    use crate::models::plan::{PlanVisibility, UNLIMITED};
    use crate::models::subscription::SubscriptionState;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn plan(price: Decimal) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Starter".to_string(),
            description: None,
            price,
            duration_days: 30,
            visibility: PlanVisibility::Public,
            max_staff: UNLIMITED,
            max_menu_items: UNLIMITED,
            max_tables: UNLIMITED,
            is_active: true,
            is_default: false,
            is_trial: false,
            custom_for_business_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn owner(identifier: &str, created_at: DateTime<Utc>) -> User {
        User {
            id: Uuid::new_v4(),
            identifier: identifier.to_string(),
            email: format!("{identifier}@example.com"),
            password_hash: String::new(),
            first_name: Some("Sok".to_string()),
            last_name: Some(identifier.to_string()),
            phone: None,
            position: Some("Owner".to_string()),
            role: BUSINESS_OWNER_ROLE.to_string(),
            account_status: AccountStatus::Active,
            business_id: None,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    fn business(name: &str, status: BusinessStatus) -> Business {
        let now = Utc::now();
        Business {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: None,
            phone: None,
            address: None,
            description: None,
            status,
            is_subscription_active: true,
            owner_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn detail(
        identifier: &str,
        business_name: &str,
        created_at: DateTime<Utc>,
        end_in_days: Option<i64>,
        paid: Decimal,
    ) -> OwnerDetail {
        let now = Utc::now();
        let current = end_in_days.map(|days| {
            (
                subscription(
                    SubscriptionState::Active,
                    now - Duration::days(1),
                    now + Duration::days(days),
                ),
                plan(dec!(30)),
            )
        });
        let totals = current.as_ref().map(|(s, _)| PaymentTotals {
            subscription_id: s.id,
            total_completed: paid,
            completed_count: i64::from(!paid.is_zero()),
            payment_count: i64::from(!paid.is_zero()),
            ..Default::default()
        });

        OwnerDetail::compose(
            owner(identifier, created_at),
            business(business_name, BusinessStatus::Active),
            current,
            totals,
            now,
        )
    }

    #[test]
    fn test_compose_without_subscription() {
        let d = detail("lonely", "Empty Cafe", Utc::now(), None, dec!(0));
        assert_eq!(d.plan_name, NO_ACTIVE_PLAN);
        assert_eq!(d.subscription_status, DisplayStatus::Expired);
        assert_eq!(d.payment_status, BillingStatus::Unpaid);
        assert!(d.subscription.is_none());
    }

    #[test]
    fn test_compose_with_subscription() {
        let d = detail("dara", "Noodle House", Utc::now(), Some(20), dec!(30));
        assert_eq!(d.plan_name, "Starter");
        assert_eq!(d.subscription_status, DisplayStatus::Active);
        assert_eq!(d.payment_status, BillingStatus::Paid);
        assert_eq!(d.days_remaining, 20);
    }

    #[test]
    fn test_filter_by_statuses_and_search() {
        let now = Utc::now();
        let items = vec![
            detail("alpha", "Alpha Grill", now, Some(20), dec!(30)),
            detail("beta", "Beta Noodles", now, Some(3), dec!(10)),
            detail("gamma", "Gamma Cafe", now, None, dec!(0)),
        ];

        let page = apply_filter(
            items.clone(),
            &OwnerFilter {
                subscription_statuses: vec![DisplayStatus::ExpiringSoon],
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].owner.identifier, "beta");

        let page = apply_filter(
            items.clone(),
            &OwnerFilter {
                payment_statuses: vec![BillingStatus::Paid, BillingStatus::Unpaid],
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 2);

        let page = apply_filter(
            items,
            &OwnerFilter {
                search: Some("  NOODLE ".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].business.name, "Beta Noodles");
    }

    #[test]
    fn test_sort_and_paginate() {
        let now = Utc::now();
        let items: Vec<OwnerDetail> = (0..5)
            .map(|i| {
                detail(
                    &format!("owner{i}"),
                    &format!("Business {i}"),
                    now - Duration::days(i),
                    Some(30),
                    dec!(0),
                )
            })
            .collect();

        let page = apply_filter(
            items.clone(),
            &OwnerFilter {
                sort_by: OwnerSort::CreatedAt,
                direction: SortDirection::Desc,
                page: 2,
                page_size: 2,
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
        let ids: Vec<&str> = page.items.iter().map(|d| d.owner.identifier.as_str()).collect();
        assert_eq!(ids, vec!["owner2", "owner3"]);

        let page = apply_filter(
            items.clone(),
            &OwnerFilter {
                sort_by: OwnerSort::BusinessName,
                direction: SortDirection::Asc,
                page: 3,
                page_size: 2,
                ..Default::default()
            },
        );
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].business.name, "Business 4");

        let page = apply_filter(
            items,
            &OwnerFilter {
                page: 9,
                ..Default::default()
            },
        );
        assert!(page.items.is_empty());
        assert_eq!(page.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_created_range_and_auto_renew() {
        let now = Utc::now();
        let items = vec![
            detail("old", "Old Diner", now - Duration::days(60), Some(30), dec!(0)),
            detail("new", "New Diner", now - Duration::days(1), Some(30), dec!(0)),
        ];

        let page = apply_filter(
            items.clone(),
            &OwnerFilter {
                created_from: Some(now - Duration::days(7)),
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 1);
        assert_eq!(page.items[0].owner.identifier, "new");

        let page = apply_filter(
            items,
            &OwnerFilter {
                auto_renew: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(page.total_items, 0);
    }

    #[test]
    fn test_payment_info_completeness() {
        assert!(!PaymentInfo::default().is_complete());
        assert!(!PaymentInfo {
            amount: Some(dec!(30)),
            method: Some("  ".to_string()),
            ..Default::default()
        }
        .is_complete());
        assert!(PaymentInfo {
            amount: Some(dec!(30)),
            method: Some("cash".to_string()),
            ..Default::default()
        }
        .is_complete());
    }
}
