/// Subscription state machine
///
/// Owns every write to `subscriptions`. Renewal never edits a window in
/// place: the old row becomes `superseded` and a new row starts exactly where
/// it ended. All writers take the business row lock first and the
/// subscription row lock second, so concurrent requests and sweeps for the
/// same business serialize without deadlocking.
///
/// # Sweeps
///
/// [`SubscriptionLifecycle::sweep_expired`] and
/// [`SubscriptionLifecycle::sweep_reminders`] are plain functions of `now`
/// meant to be driven by a scheduler. Each subscription is handled in its own
/// transaction; a row locked by someone else is skipped and picked up by the
/// next run, and a failing row is reported without stopping the sweep.
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::billing::subscriptions::{CreateSubscription, RenewSubscription, SubscriptionLifecycle};
/// use dinehub_shared::notify::LogNotifier;
/// use sqlx::PgPool;
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, business_id: Uuid, plan_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let lifecycle = SubscriptionLifecycle::new(pool, Arc::new(LogNotifier));
///
/// let first = lifecycle
///     .create(CreateSubscription {
///         business_id,
///         plan_id,
///         custom_duration_days: None,
///         auto_renew: true,
///         notes: None,
///     })
///     .await?;
///
/// let next = lifecycle.renew(first.id, RenewSubscription::default()).await?;
/// assert_eq!(next.start_date, first.end_date);
/// # Ok(())
/// # }
/// ```

use super::payments::{PaymentLedger, RecordRefund};
use super::plans::PlanCatalog;
use super::status::{days_active, days_remaining, display_status, is_expiring_soon, DisplayStatus};
use crate::error::{EngineError, EngineResult};
use crate::models::business::Business;
use crate::models::payment::{Payment, PaymentMethod};
use crate::models::plan::{SubscriptionPlan, MAX_DURATION_DAYS};
use crate::models::subscription::{NewSubscription, Subscription, SubscriptionState};
use crate::notify::{dispatch, Notification, NotificationKind, Notifier};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Most consecutive periods one sweep will auto-renew for a single subscription
pub const MAX_CATCH_UP_RENEWALS: u32 = 24;

/// Most subscriptions one bulk request may name
pub const MAX_BULK_SIZE: usize = 100;

/// Input for starting a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscription {
    pub business_id: Uuid,
    pub plan_id: Uuid,

    /// Overrides the plan duration
    pub custom_duration_days: Option<i32>,

    #[serde(default)]
    pub auto_renew: bool,

    pub notes: Option<String>,
}

/// Input for renewing a subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenewSubscription {
    /// Plan for the new window; the current plan when `None`
    pub new_plan_id: Option<Uuid>,

    pub custom_duration_days: Option<i32>,
}

/// Refund to record alongside a cancellation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationRefund {
    /// Positive USD amount
    pub amount: Decimal,

    #[serde(default = "default_refund_method")]
    pub method: PaymentMethod,

    pub reference_number: Option<String>,
}

fn default_refund_method() -> PaymentMethod {
    PaymentMethod::Cash
}

/// Input for cancelling a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSubscription {
    pub reason: String,

    /// End the window now instead of at its scheduled end
    #[serde(default)]
    pub immediate: bool,

    /// Recorded only when supplied; cancellation never infers a refund
    pub refund: Option<CancellationRefund>,
}

/// A subscription with its derived figures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,

    pub plan_name: String,
    pub plan_price: Decimal,
    pub plan_duration_days: i32,
    pub days_remaining: i64,
    pub days_active: i64,
    pub is_expiring_soon: bool,
    pub display_status: DisplayStatus,
}

impl SubscriptionView {
    pub fn new(subscription: Subscription, plan: &SubscriptionPlan, now: DateTime<Utc>) -> Self {
        SubscriptionView {
            plan_name: plan.name.clone(),
            plan_price: plan.price,
            plan_duration_days: plan.duration_days,
            days_remaining: days_remaining(subscription.end_date, now),
            days_active: days_active(subscription.start_date, now),
            is_expiring_soon: is_expiring_soon(
                &subscription,
                now,
                super::status::EXPIRING_SOON_DAYS,
            ),
            display_status: display_status(&subscription, now),
            subscription,
        }
    }
}

/// One row a sweep could not process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepFailure {
    pub subscription_id: Uuid,
    pub error: String,
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Rows transitioned (renewed, expired or reminded)
    pub processed: usize,

    pub renewed: usize,
    pub expired: usize,
    pub reminded: usize,

    /// Rows locked by another transaction or no longer qualifying
    pub skipped: usize,

    pub failed: usize,
    pub errors: Vec<SweepFailure>,
}

impl SweepReport {
    fn record_failure(&mut self, subscription_id: Uuid, err: &EngineError) {
        self.failed += 1;
        self.errors.push(SweepFailure {
            subscription_id,
            error: err.to_string(),
        });
    }
}

/// Outcome of a bulk renew, cancel or suspend
///
/// Each subscription runs in its own transaction; one failure does not undo
/// the others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReport {
    /// Distinct subscriptions attempted
    pub requested: usize,

    /// Resulting rows, in request order; renewals list the new row
    pub succeeded: Vec<Subscription>,

    pub failed: usize,
    pub errors: Vec<SweepFailure>,
}

impl BulkReport {
    fn record(&mut self, subscription_id: Uuid, result: EngineResult<Subscription>) {
        match result {
            Ok(subscription) => self.succeeded.push(subscription),
            Err(e) => {
                warn!(subscription_id = %subscription_id, error = %e, "Bulk operation failed for subscription");
                self.failed += 1;
                self.errors.push(SweepFailure {
                    subscription_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Deduplicates ids in request order and enforces the batch bounds
fn bulk_ids(ids: &[Uuid]) -> EngineResult<Vec<Uuid>> {
    let mut distinct = Vec::with_capacity(ids.len());
    for id in ids {
        if !distinct.contains(id) {
            distinct.push(*id);
        }
    }

    if distinct.is_empty() {
        return Err(EngineError::validation("at least one subscription id is required"));
    }
    if distinct.len() > MAX_BULK_SIZE {
        return Err(EngineError::validation(format!(
            "at most {} subscriptions per bulk request",
            MAX_BULK_SIZE
        )));
    }
    Ok(distinct)
}

fn require_reason(reason: &str) -> EngineResult<()> {
    if reason.trim().is_empty() {
        return Err(EngineError::validation("a reason is required"));
    }
    Ok(())
}

/// What the expiry sweep did with one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DueOutcome {
    Renewed,
    Expired,
    Skipped,
}

/// Window length for a plan, honoring a custom override
pub fn resolve_duration(plan: &SubscriptionPlan, custom_duration_days: Option<i32>) -> EngineResult<i32> {
    match custom_duration_days {
        Some(days) if !(1..=MAX_DURATION_DAYS).contains(&days) => Err(EngineError::validation(
            format!("custom duration must be between 1 and {} days", MAX_DURATION_DAYS),
        )),
        Some(days) => Ok(days),
        None => Ok(plan.duration_days),
    }
}

/// `start` plus `days`, or `Validation` when the date is out of range
pub fn window_end(start: DateTime<Utc>, days: i64) -> EngineResult<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|span| start.checked_add_signed(span))
        .ok_or_else(|| EngineError::validation(format!("{} days from {} is out of range", days, start)))
}

/// Subscription state machine service
#[derive(Clone)]
pub struct SubscriptionLifecycle {
    db: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl SubscriptionLifecycle {
    pub fn new(db: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        SubscriptionLifecycle { db, notifier }
    }

    /// Starts a subscription at `now`
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown business or plan
    /// - `Validation` for a bad custom duration or an unavailable plan
    /// - `Conflict` if the business already has a live active subscription
    pub async fn create(&self, input: CreateSubscription) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let subscription = Self::create_in(&mut tx, Utc::now(), input).await?;
        tx.commit().await?;

        Ok(subscription)
    }

    /// [`create`](Self::create) inside a caller's transaction
    pub async fn create_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        input: CreateSubscription,
    ) -> EngineResult<Subscription> {
        let business = Business::lock_for_update(conn, input.business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", input.business_id))?;

        let plan = PlanCatalog::available_plan_in(conn, input.plan_id, business.id).await?;
        let days = resolve_duration(&plan, input.custom_duration_days)?;

        Self::clear_active_slot(conn, now, business.id, None).await?;

        let subscription = Subscription::insert(
            conn,
            NewSubscription {
                business_id: business.id,
                plan_id: plan.id,
                start_date: now,
                end_date: window_end(now, i64::from(days))?,
                auto_renew: input.auto_renew,
                custom_duration_days: input.custom_duration_days,
                notes: input.notes,
                renewed_from_id: None,
            },
        )
        .await?;
        Business::set_subscription_active(conn, business.id, true).await?;

        info!(
            subscription_id = %subscription.id,
            business_id = %business.id,
            plan_id = %plan.id,
            end_date = %subscription.end_date,
            "Subscription created"
        );

        Ok(subscription)
    }

    /// Replaces a subscription with a new back-to-back window
    ///
    /// The old row becomes `SUPERSEDED`; the new row starts at the old end.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the subscription was already superseded
    /// - `Conflict` if another live subscription of the business is active
    pub async fn renew(&self, id: Uuid, input: RenewSubscription) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();
        let renewed = Self::renew_in(&mut tx, Utc::now(), id, input, &mut outbox).await?;
        tx.commit().await?;

        dispatch(&self.notifier, outbox);
        Ok(renewed)
    }

    /// [`renew`](Self::renew) inside a caller's transaction
    pub async fn renew_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        id: Uuid,
        input: RenewSubscription,
        outbox: &mut Vec<Notification>,
    ) -> EngineResult<Subscription> {
        let (business, old) = Self::lock_in(conn, id).await?;

        if !old.state.is_renewable() {
            return Err(EngineError::invalid_state(
                "subscription",
                old.state,
                "a superseded subscription cannot be renewed; renew its replacement",
            ));
        }

        Self::clear_active_slot(conn, now, business.id, Some(old.id)).await?;

        let plan = match input.new_plan_id {
            Some(plan_id) => PlanCatalog::available_plan_in(conn, plan_id, business.id).await?,
            None => SubscriptionPlan::find_by_id(conn, old.plan_id)
                .await?
                .ok_or_else(|| EngineError::not_found("plan", old.plan_id))?,
        };

        let renewed = Self::supersede(conn, &old, &plan, input.custom_duration_days).await?;
        Business::set_subscription_active(conn, business.id, true).await?;

        outbox.push(renewal_notification(&business, &renewed, &plan));
        Ok(renewed)
    }

    /// Swaps the plan in place
    ///
    /// With `keep_current_end_date` the window is untouched; otherwise the end
    /// becomes `start + new plan duration`.
    pub async fn change_plan(
        &self,
        id: Uuid,
        new_plan_id: Uuid,
        keep_current_end_date: bool,
    ) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let subscription =
            Self::change_plan_in(&mut tx, id, new_plan_id, keep_current_end_date).await?;
        tx.commit().await?;

        Ok(subscription)
    }

    /// [`change_plan`](Self::change_plan) inside a caller's transaction
    pub async fn change_plan_in(
        conn: &mut PgConnection,
        id: Uuid,
        new_plan_id: Uuid,
        keep_current_end_date: bool,
    ) -> EngineResult<Subscription> {
        let (business, subscription) = Self::lock_in(conn, id).await?;
        ensure_mutable(&subscription)?;

        let plan = PlanCatalog::available_plan_in(conn, new_plan_id, business.id).await?;
        let end_date = if keep_current_end_date {
            subscription.end_date
        } else {
            window_end(subscription.start_date, i64::from(plan.duration_days))?
        };

        let updated = Subscription::set_plan(conn, id, plan.id, end_date).await?;

        info!(
            subscription_id = %id,
            from_plan = %subscription.plan_id,
            to_plan = %plan.id,
            end_date = %updated.end_date,
            "Subscription plan changed"
        );

        Ok(updated)
    }

    /// Cancels a subscription
    ///
    /// Pending payments are cancelled; completed ones are left alone. A
    /// refund is recorded only when one is supplied.
    pub async fn cancel(&self, id: Uuid, input: CancelSubscription) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();
        let cancelled = Self::cancel_in(&mut tx, Utc::now(), id, input, &mut outbox).await?;
        tx.commit().await?;

        dispatch(&self.notifier, outbox);
        Ok(cancelled)
    }

    /// [`cancel`](Self::cancel) inside a caller's transaction
    pub async fn cancel_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        id: Uuid,
        input: CancelSubscription,
        outbox: &mut Vec<Notification>,
    ) -> EngineResult<Subscription> {
        let (business, subscription) = Self::lock_in(conn, id).await?;

        if !subscription.state.can_transition_to(SubscriptionState::Cancelled) {
            return Err(EngineError::invalid_state(
                "subscription",
                subscription.state,
                "only active or suspended subscriptions can be cancelled",
            ));
        }

        let end_date = if input.immediate {
            now.max(subscription.start_date)
        } else {
            subscription.end_date
        };

        let cancelled =
            Subscription::mark_cancelled(conn, id, end_date, &input.reason, now).await?;
        let voided = Payment::cancel_pending_for_subscription(
            conn,
            id,
            &format!("Cancelled: {}", input.reason),
        )
        .await?;

        if let Some(refund) = input.refund {
            PaymentLedger::refund_in(
                conn,
                now,
                RecordRefund {
                    subscription_id: id,
                    amount: refund.amount,
                    method: refund.method,
                    reference_number: refund.reference_number,
                    reason: input.reason.clone(),
                },
                outbox,
            )
            .await?;
        }

        Business::set_subscription_active(conn, business.id, false).await?;

        info!(
            subscription_id = %id,
            business_id = %business.id,
            immediate = input.immediate,
            pending_payments_cancelled = voided,
            "Subscription cancelled"
        );

        outbox.push(Notification::new(
            business.owner_id,
            business.id,
            NotificationKind::SubscriptionCancelled,
            serde_json::json!({
                "subscription_id": id,
                "business_name": business.name,
                "reason": input.reason,
                "end_date": cancelled.end_date,
            }),
        ));

        Ok(cancelled)
    }

    /// Puts an active subscription on administrative hold
    pub async fn suspend(&self, id: Uuid, reason: &str) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let (business, subscription) = Self::lock_in(&mut tx, id).await?;

        if !subscription.state.can_transition_to(SubscriptionState::Suspended) {
            return Err(EngineError::invalid_state(
                "subscription",
                subscription.state,
                "only active subscriptions can be suspended",
            ));
        }

        let suspended = Subscription::set_state_with_note(
            &mut tx,
            id,
            SubscriptionState::Suspended,
            &format!("SUSPENDED: {}", reason),
        )
        .await?;
        Business::set_subscription_active(&mut tx, business.id, false).await?;
        tx.commit().await?;

        info!(subscription_id = %id, business_id = %business.id, reason, "Subscription suspended");
        Ok(suspended)
    }

    /// Lifts a suspension
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not suspended, or the window already ended
    /// - `Conflict` if the business has started another live subscription
    pub async fn reactivate(&self, id: Uuid) -> EngineResult<Subscription> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let (business, subscription) = Self::lock_in(&mut tx, id).await?;

        if subscription.state != SubscriptionState::Suspended {
            return Err(EngineError::invalid_state(
                "subscription",
                subscription.state,
                "only suspended subscriptions can be reactivated",
            ));
        }
        if subscription.end_date <= now {
            return Err(EngineError::invalid_state(
                "subscription",
                "expired",
                "the subscription window has ended; renew instead",
            ));
        }

        Self::clear_active_slot(&mut tx, now, business.id, Some(id)).await?;

        let reactivated = Subscription::set_state_with_note(
            &mut tx,
            id,
            SubscriptionState::Active,
            &format!("REACTIVATED: {}", now.format("%Y-%m-%d %H:%M UTC")),
        )
        .await?;
        Business::set_subscription_active(&mut tx, business.id, true).await?;
        tx.commit().await?;

        info!(subscription_id = %id, business_id = %business.id, "Subscription reactivated");
        Ok(reactivated)
    }

    /// Pushes the end date out by `days` without creating a new row
    pub async fn extend(&self, id: Uuid, days: i32, reason: &str) -> EngineResult<Subscription> {
        if !(1..=MAX_DURATION_DAYS).contains(&days) {
            return Err(EngineError::validation(format!(
                "extension must be between 1 and {} days",
                MAX_DURATION_DAYS
            )));
        }

        let mut tx = self.db.begin().await?;
        let (_, subscription) = Self::lock_in(&mut tx, id).await?;
        ensure_mutable(&subscription)?;

        let end_date = window_end(subscription.end_date, i64::from(days))?;
        let extended = Subscription::set_end_date_with_note(
            &mut tx,
            id,
            end_date,
            &format!("EXTENDED: {} days - {}", days, reason),
        )
        .await?;
        tx.commit().await?;

        info!(subscription_id = %id, days, end_date = %end_date, "Subscription extended");
        Ok(extended)
    }

    /// Turns automatic renewal on or off for a live window
    pub async fn set_auto_renew(&self, id: Uuid, auto_renew: bool) -> EngineResult<Subscription> {
        let mut tx = self.db.begin().await?;
        let (_, subscription) = Self::lock_in(&mut tx, id).await?;
        ensure_mutable(&subscription)?;

        let updated = Subscription::set_auto_renew(&mut tx, id, auto_renew).await?;
        tx.commit().await?;

        info!(subscription_id = %id, auto_renew, "Auto-renew updated");
        Ok(updated)
    }

    /// Renews each subscription with the same input
    pub async fn bulk_renew(&self, ids: &[Uuid], input: RenewSubscription) -> EngineResult<BulkReport> {
        let ids = bulk_ids(ids)?;
        let mut report = BulkReport {
            requested: ids.len(),
            ..Default::default()
        };

        for id in ids {
            report.record(id, self.renew(id, input.clone()).await);
        }

        info!(requested = report.requested, failed = report.failed, "Bulk renewal finished");
        Ok(report)
    }

    /// Cancels each subscription; no refunds are recorded
    pub async fn bulk_cancel(&self, ids: &[Uuid], reason: &str, immediate: bool) -> EngineResult<BulkReport> {
        require_reason(reason)?;
        let ids = bulk_ids(ids)?;
        let mut report = BulkReport {
            requested: ids.len(),
            ..Default::default()
        };

        for id in ids {
            let input = CancelSubscription {
                reason: reason.to_string(),
                immediate,
                refund: None,
            };
            report.record(id, self.cancel(id, input).await);
        }

        info!(requested = report.requested, failed = report.failed, "Bulk cancellation finished");
        Ok(report)
    }

    /// Suspends each subscription
    pub async fn bulk_suspend(&self, ids: &[Uuid], reason: &str) -> EngineResult<BulkReport> {
        require_reason(reason)?;
        let ids = bulk_ids(ids)?;
        let mut report = BulkReport {
            requested: ids.len(),
            ..Default::default()
        };

        for id in ids {
            report.record(id, self.suspend(id, reason).await);
        }

        info!(requested = report.requested, failed = report.failed, "Bulk suspension finished");
        Ok(report)
    }

    pub async fn find_by_id(&self, id: Uuid) -> EngineResult<Subscription> {
        let mut conn = self.db.acquire().await?;
        Subscription::find_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))
    }

    /// A subscription with its derived figures at `now`
    pub async fn view(&self, id: Uuid, now: DateTime<Utc>) -> EngineResult<SubscriptionView> {
        let mut conn = self.db.acquire().await?;
        let subscription = Subscription::find_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))?;
        let plan = SubscriptionPlan::find_by_id(&mut conn, subscription.plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;

        Ok(SubscriptionView::new(subscription, &plan, now))
    }

    /// Most recent non-deleted subscription of a business
    pub async fn current_for_business(&self, business_id: Uuid) -> EngineResult<Option<Subscription>> {
        let mut conn = self.db.acquire().await?;
        Ok(Subscription::current_for_business(&mut conn, business_id).await?)
    }

    /// Every subscription of a business, newest first
    pub async fn history_for_business(&self, business_id: Uuid) -> EngineResult<Vec<Subscription>> {
        let mut conn = self.db.acquire().await?;
        Ok(Subscription::history_for_business(&mut conn, business_id).await?)
    }

    /// Active subscriptions ending within `days` of `now`
    pub async fn list_expiring(&self, now: DateTime<Utc>, days: i64) -> EngineResult<Vec<Subscription>> {
        if !(0..=i64::from(MAX_DURATION_DAYS)).contains(&days) {
            return Err(EngineError::validation(format!(
                "days must be between 0 and {}",
                MAX_DURATION_DAYS
            )));
        }

        let until = window_end(now, days)?;
        let mut conn = self.db.acquire().await?;
        Ok(Subscription::list_expiring(&mut conn, now, until).await?)
    }

    /// Subscriptions that have expired or are awaiting the expiry sweep
    pub async fn list_expired(&self, now: DateTime<Utc>) -> EngineResult<Vec<Subscription>> {
        let mut conn = self.db.acquire().await?;
        Ok(Subscription::list_expired(&mut conn, now).await?)
    }

    /// Expires or auto-renews every active subscription whose window ended by `now`
    ///
    /// Safe to re-run: handled rows no longer match the due predicate, and a
    /// row whose lock is held elsewhere is left for the next run.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let due = {
            let mut conn = self.db.acquire().await?;
            Subscription::list_due_ids(&mut conn, now).await?
        };

        let mut report = SweepReport::default();
        debug!(due = due.len(), "Expiry sweep started");

        for id in due {
            match self.process_due(id, now).await {
                Ok(DueOutcome::Renewed) => {
                    report.processed += 1;
                    report.renewed += 1;
                }
                Ok(DueOutcome::Expired) => {
                    report.processed += 1;
                    report.expired += 1;
                }
                Ok(DueOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(subscription_id = %id, error = %e, "Expiry sweep failed for subscription");
                    report.record_failure(id, &e);
                }
            }
        }

        info!(
            processed = report.processed,
            renewed = report.renewed,
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "Expiry sweep finished"
        );

        Ok(report)
    }

    async fn process_due(&self, id: Uuid, now: DateTime<Utc>) -> EngineResult<DueOutcome> {
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();

        let Some(candidate) = Subscription::find_by_id(&mut tx, id).await? else {
            return Ok(DueOutcome::Skipped);
        };
        let Some(business) = Business::lock_for_update(&mut tx, candidate.business_id).await? else {
            return Ok(DueOutcome::Skipped);
        };
        let Some(subscription) = Subscription::try_lock(&mut tx, id).await? else {
            debug!(subscription_id = %id, "Subscription locked elsewhere, skipping");
            return Ok(DueOutcome::Skipped);
        };

        if !subscription.is_due_at(now) {
            return Ok(DueOutcome::Skipped);
        }

        let outcome = if subscription.auto_renew {
            let plan = SubscriptionPlan::find_by_id(&mut tx, subscription.plan_id)
                .await?
                .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;

            let mut current = subscription;
            let mut periods = 0;
            loop {
                current = Self::supersede(&mut tx, &current, &plan, None).await?;
                periods += 1;
                if current.end_date > now || periods >= MAX_CATCH_UP_RENEWALS {
                    break;
                }
            }

            if current.end_date <= now {
                warn!(
                    subscription_id = %current.id,
                    periods,
                    "Auto-renewal catch-up limit reached; remaining periods left for the next sweep"
                );
            }

            Business::set_subscription_active(&mut tx, business.id, true).await?;
            outbox.push(renewal_notification(&business, &current, &plan));
            DueOutcome::Renewed
        } else {
            Subscription::set_state(&mut tx, id, SubscriptionState::Expired).await?;
            Business::set_subscription_active(&mut tx, business.id, false).await?;

            info!(subscription_id = %id, business_id = %business.id, "Subscription expired");
            outbox.push(Notification::new(
                business.owner_id,
                business.id,
                NotificationKind::SubscriptionExpired,
                serde_json::json!({
                    "subscription_id": id,
                    "business_name": business.name,
                    "end_date": subscription.end_date,
                }),
            ));
            DueOutcome::Expired
        };

        tx.commit().await?;
        dispatch(&self.notifier, outbox);

        Ok(outcome)
    }

    /// Sends one expiry reminder per subscription ending within `horizon_days`
    ///
    /// Each reminder is claimed by stamping `reminder_sent_at` before it is
    /// sent, so overlapping or repeated runs do not remind the same window
    /// twice.
    pub async fn sweep_reminders(
        &self,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> EngineResult<SweepReport> {
        if !(1..=i64::from(MAX_DURATION_DAYS)).contains(&horizon_days) {
            return Err(EngineError::validation(format!(
                "reminder horizon must be between 1 and {} days",
                MAX_DURATION_DAYS
            )));
        }

        let horizon = Duration::days(horizon_days);
        let until = window_end(now, horizon_days)?;

        let mut conn = self.db.acquire().await?;
        let candidates =
            Subscription::list_reminder_candidates(&mut conn, now, until, horizon).await?;

        let mut report = SweepReport::default();
        let mut outbox = Vec::new();

        for candidate in candidates {
            match Subscription::claim_reminder(&mut conn, candidate.subscription_id, now, horizon).await {
                Ok(true) => {
                    report.processed += 1;
                    report.reminded += 1;
                    outbox.push(Notification::new(
                        candidate.owner_id,
                        candidate.business_id,
                        NotificationKind::SubscriptionExpiringSoon,
                        serde_json::json!({
                            "subscription_id": candidate.subscription_id,
                            "business_name": candidate.business_name,
                            "plan_name": candidate.plan_name,
                            "end_date": candidate.end_date,
                            "days_remaining": days_remaining(candidate.end_date, now),
                        }),
                    ));
                }
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    let e = EngineError::from(e);
                    error!(
                        subscription_id = %candidate.subscription_id,
                        error = %e,
                        "Reminder sweep failed for subscription"
                    );
                    report.record_failure(candidate.subscription_id, &e);
                }
            }
        }

        dispatch(&self.notifier, outbox);

        info!(
            reminded = report.reminded,
            skipped = report.skipped,
            failed = report.failed,
            horizon_days,
            "Reminder sweep finished"
        );

        Ok(report)
    }

    /// Locks the owning business, then the subscription
    pub(crate) async fn lock_in(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> EngineResult<(Business, Subscription)> {
        let subscription = Subscription::find_by_id(conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))?;
        let business = Business::lock_for_update(conn, subscription.business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", subscription.business_id))?;
        let subscription = Subscription::find_for_update(conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", id))?;

        Ok((business, subscription))
    }

    /// Makes room for a new active row
    ///
    /// A live active subscription other than `except` is a conflict; a
    /// lapsed one the sweep has not reached yet is expired on the spot.
    /// Callers must hold the business lock.
    async fn clear_active_slot(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        business_id: Uuid,
        except: Option<Uuid>,
    ) -> EngineResult<()> {
        let Some(active) = Subscription::find_active_for_business(conn, business_id).await? else {
            return Ok(());
        };
        if Some(active.id) == except {
            return Ok(());
        }

        if active.is_live_at(now) {
            return Err(EngineError::Conflict(format!(
                "business already has an active subscription ({}) until {}; renew it instead",
                active.id, active.end_date
            )));
        }

        Subscription::set_state(conn, active.id, SubscriptionState::Expired).await?;
        info!(
            subscription_id = %active.id,
            business_id = %business_id,
            "Lapsed subscription expired ahead of sweep"
        );

        Ok(())
    }

    /// Marks `old` superseded and inserts its successor starting at `old.end_date`
    async fn supersede(
        conn: &mut PgConnection,
        old: &Subscription,
        plan: &SubscriptionPlan,
        custom_duration_days: Option<i32>,
    ) -> EngineResult<Subscription> {
        let days = resolve_duration(plan, custom_duration_days)?;

        Subscription::set_state(conn, old.id, SubscriptionState::Superseded).await?;

        let start_date = old.end_date;
        let renewed = Subscription::insert(
            conn,
            NewSubscription {
                business_id: old.business_id,
                plan_id: plan.id,
                start_date,
                end_date: window_end(start_date, i64::from(days))?,
                auto_renew: old.auto_renew,
                custom_duration_days,
                notes: None,
                renewed_from_id: Some(old.id),
            },
        )
        .await?;

        info!(
            subscription_id = %renewed.id,
            renewed_from = %old.id,
            business_id = %old.business_id,
            start_date = %renewed.start_date,
            end_date = %renewed.end_date,
            "Subscription renewed"
        );

        Ok(renewed)
    }
}

fn ensure_mutable(subscription: &Subscription) -> EngineResult<()> {
    if !subscription.state.is_mutable() {
        return Err(EngineError::invalid_state(
            "subscription",
            subscription.state,
            "only active or suspended subscriptions can be modified; renew instead",
        ));
    }
    Ok(())
}

fn renewal_notification(
    business: &Business,
    renewed: &Subscription,
    plan: &SubscriptionPlan,
) -> Notification {
    Notification::new(
        business.owner_id,
        business.id,
        NotificationKind::SubscriptionRenewed,
        serde_json::json!({
            "subscription_id": renewed.id,
            "business_name": business.name,
            "plan_name": plan.name,
            "start_date": renewed.start_date,
            "end_date": renewed.end_date,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::status::tests::subscription;
    use crate::models::plan::{PlanVisibility, UNLIMITED};
    use rust_decimal_macros::dec;

    fn plan(duration_days: i32) -> SubscriptionPlan {
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Pro".to_string(),
            description: None,
            price: dec!(30),
            duration_days,
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

    #[test]
    fn test_resolve_duration() {
        let plan = plan(30);
        assert_eq!(resolve_duration(&plan, None).unwrap(), 30);
        assert_eq!(resolve_duration(&plan, Some(45)).unwrap(), 45);
        assert!(matches!(resolve_duration(&plan, Some(0)), Err(EngineError::Validation(_))));
        assert!(matches!(resolve_duration(&plan, Some(-3)), Err(EngineError::Validation(_))));
        assert_eq!(resolve_duration(&plan, Some(MAX_DURATION_DAYS)).unwrap(), MAX_DURATION_DAYS);
        assert!(matches!(
            resolve_duration(&plan, Some(2_000_000_000)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_window_end_out_of_range() {
        let now = Utc::now();
        assert_eq!(window_end(now, 30).unwrap(), now + Duration::days(30));
        assert!(matches!(window_end(now, 2_000_000_000), Err(EngineError::Validation(_))));
        assert!(matches!(window_end(DateTime::<Utc>::MAX_UTC, 1), Err(EngineError::Validation(_))));
        assert!(matches!(window_end(now, i64::MAX), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_ensure_mutable() {
        let now = Utc::now();
        let end = now + Duration::days(10);

        assert!(ensure_mutable(&subscription(SubscriptionState::Active, now, end)).is_ok());
        assert!(ensure_mutable(&subscription(SubscriptionState::Suspended, now, end)).is_ok());

        let err = ensure_mutable(&subscription(SubscriptionState::Expired, now, end)).unwrap_err();
        match err {
            EngineError::InvalidState { current, .. } => assert_eq!(current, "expired"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_view_derivations() {
        let now = Utc::now();
        let sub = subscription(
            SubscriptionState::Active,
            now - Duration::days(25),
            now + Duration::days(5),
        );
        let view = SubscriptionView::new(sub, &plan(30), now);

        assert_eq!(view.days_remaining, 5);
        assert_eq!(view.days_active, 25);
        assert!(view.is_expiring_soon);
        assert_eq!(view.display_status, DisplayStatus::ExpiringSoon);
        assert_eq!(view.plan_name, "Pro");
    }

    #[test]
    fn test_view_serializes_flat() {
        let now = Utc::now();
        let sub = subscription(SubscriptionState::Active, now, now + Duration::days(30));
        let id = sub.id;
        let json = serde_json::to_value(SubscriptionView::new(sub, &plan(30), now)).unwrap();

        assert_eq!(json["id"], serde_json::json!(id));
        assert_eq!(json["state"], "ACTIVE");
        assert_eq!(json["display_status"], "ACTIVE");
    }

    #[test]
    fn test_cancel_request_defaults() {
        let input: CancelSubscription =
            serde_json::from_value(serde_json::json!({ "reason": "closing" })).unwrap();
        assert!(!input.immediate);
        assert!(input.refund.is_none());

        let refund: CancellationRefund =
            serde_json::from_value(serde_json::json!({ "amount": "10" })).unwrap();
        assert_eq!(refund.method, PaymentMethod::Cash);
    }

    #[test]
    fn test_bulk_ids_dedupes_and_bounds() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(bulk_ids(&[a, b, a]).unwrap(), vec![a, b]);

        assert!(matches!(bulk_ids(&[]), Err(EngineError::Validation(_))));

        let too_many: Vec<Uuid> = (0..=MAX_BULK_SIZE).map(|_| Uuid::new_v4()).collect();
        assert!(matches!(bulk_ids(&too_many), Err(EngineError::Validation(_))));
        assert!(bulk_ids(&too_many[..MAX_BULK_SIZE]).is_ok());
    }

    #[test]
    fn test_bulk_report_records_each_outcome() {
        let now = Utc::now();
        let ok = subscription(SubscriptionState::Suspended, now, now + Duration::days(10));
        let missing = Uuid::new_v4();

        let mut report = BulkReport {
            requested: 2,
            ..Default::default()
        };
        report.record(ok.id, Ok(ok.clone()));
        report.record(missing, Err(EngineError::not_found("subscription", missing)));

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].id, ok.id);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].subscription_id, missing);
    }

    #[test]
    fn test_bulk_reason_required() {
        assert!(require_reason("overdue").is_ok());
        assert!(matches!(require_reason("  "), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_sweep_report_failure() {
        let mut report = SweepReport::default();
        let id = Uuid::new_v4();
        report.record_failure(id, &EngineError::not_found("plan", id));

        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].subscription_id, id);
        assert!(report.errors[0].error.contains("plan not found"));
    }
}
