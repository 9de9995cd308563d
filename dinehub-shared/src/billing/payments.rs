/// Payment ledger
///
/// Records money movements against a subscription and derives the aggregate
/// figures the owner views show. Local-currency amounts are fixed at the rate
/// in force when the payment is recorded and never recalculated.
///
/// Refunds are separate rows with a negative amount and type `REFUND`; the
/// charge they refund is never edited.
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::billing::payments::{PaymentLedger, RecordPayment};
/// use dinehub_shared::models::payment::{PaymentMethod, PaymentType};
/// use dinehub_shared::notify::LogNotifier;
/// use rust_decimal::Decimal;
/// use sqlx::PgPool;
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, subscription_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = PaymentLedger::new(pool, Arc::new(LogNotifier));
///
/// let payment = ledger
///     .record(RecordPayment {
///         subscription_id,
///         amount: Decimal::from(30),
///         method: PaymentMethod::Cash,
///         payment_type: PaymentType::Subscription,
///         reference_number: Some("RCPT-0001".to_string()),
///         notes: None,
///         auto_complete: false,
///     })
///     .await?;
///
/// ledger.complete(payment.id).await?;
/// let summary = ledger.aggregate(subscription_id).await?;
/// println!("{} paid, status {}", summary.total_completed, summary.status);
/// # Ok(())
/// # }
/// ```

use super::exchange::{convert_amount, ExchangeRateLedger};
use super::money::{validate_amount, MAX_PAYMENT_AMOUNT};
use super::notification_for;
use super::status::{derive_billing_status, BillingStatus};
use crate::error::{EngineError, EngineResult};
use crate::models::business::Business;
use crate::models::payment::{
    BusinessPaymentTotals, NewPayment, Payment, PaymentMethod, PaymentStatus, PaymentTotals,
    PaymentType, RevenueTotals,
};
use crate::models::plan::SubscriptionPlan;
use crate::models::subscription::Subscription;
use crate::notify::{dispatch, Notification, NotificationKind, Notifier};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Days a pending payment may stay open before it counts as overdue
pub const PAYMENT_DUE_DAYS: i64 = 30;

/// Most rows the overdue listing returns
pub const MAX_OVERDUE_ROWS: i64 = 500;

/// Reference number for a charge recorded without one
///
/// `PAY-<UTC timestamp>-<8 hex digits>`, e.g. `PAY-20260101093000-3F9A1C2B`.
pub fn generate_reference_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("PAY-{}-{}", now.format("%Y%m%d%H%M%S"), suffix)
}

/// Input for recording a charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPayment {
    pub subscription_id: Uuid,

    /// USD amount, zero or positive
    pub amount: Decimal,

    pub method: PaymentMethod,

    #[serde(default = "default_payment_type")]
    pub payment_type: PaymentType,

    pub reference_number: Option<String>,
    pub notes: Option<String>,

    /// Record as `COMPLETED` right away
    #[serde(default)]
    pub auto_complete: bool,
}

fn default_payment_type() -> PaymentType {
    PaymentType::Subscription
}

/// Input for recording a refund
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRefund {
    pub subscription_id: Uuid,

    /// Positive USD amount to return; stored negated
    pub amount: Decimal,

    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub reason: String,
}

/// Payment totals of one subscription with the derived status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAggregate {
    pub subscription_id: Uuid,
    pub plan_price: Decimal,
    pub total_completed: Decimal,
    pub total_pending: Decimal,

    /// Plan price not yet covered by completed payments, never negative
    pub outstanding: Decimal,

    pub completed_count: i64,
    pub pending_count: i64,
    pub payment_count: i64,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub status: BillingStatus,
}

impl PaymentAggregate {
    /// Combines raw totals with the plan price
    pub fn from_totals(plan_price: Decimal, totals: PaymentTotals) -> Self {
        let outstanding = (plan_price - totals.total_completed).max(Decimal::ZERO);

        PaymentAggregate {
            subscription_id: totals.subscription_id,
            plan_price,
            total_completed: totals.total_completed,
            total_pending: totals.total_pending,
            outstanding,
            completed_count: totals.completed_count,
            pending_count: totals.pending_count,
            payment_count: totals.payment_count,
            last_payment_at: totals.last_payment_at,
            status: derive_billing_status(
                plan_price,
                totals.total_completed,
                totals.pending_count,
            ),
        }
    }
}

/// Completed revenue inside a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,

    /// `None` for every business
    pub business_id: Option<Uuid>,

    #[serde(flatten)]
    pub totals: RevenueTotals,
}

/// Payment ledger service
#[derive(Clone)]
pub struct PaymentLedger {
    db: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl PaymentLedger {
    pub fn new(db: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        PaymentLedger { db, notifier }
    }

    /// Records a charge against a subscription
    ///
    /// Stored as `PENDING` unless `auto_complete` is set or the plan is free.
    /// A charge without a reference number gets a generated one.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the subscription does not exist
    /// - `Validation` for a negative, sub-cent or oversized amount, a `REFUND`
    ///   type, or a reference number already in use
    pub async fn record(&self, input: RecordPayment) -> EngineResult<Payment> {
        let mut tx = self.db.begin().await?;
        let payment = Self::record_in(&mut tx, Utc::now(), input).await?;
        tx.commit().await?;

        Ok(payment)
    }

    /// [`record`](Self::record) inside a caller's transaction
    pub async fn record_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        input: RecordPayment,
    ) -> EngineResult<Payment> {
        if input.payment_type == PaymentType::Refund {
            return Err(EngineError::validation(
                "refunds must be recorded through the refund operation",
            ));
        }
        if input.amount < Decimal::ZERO {
            return Err(EngineError::validation("payment amount must not be negative"));
        }
        validate_amount("payment amount", input.amount, MAX_PAYMENT_AMOUNT)?;

        let subscription = Subscription::find_by_id(conn, input.subscription_id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", input.subscription_id))?;
        let plan = SubscriptionPlan::find_by_id(conn, subscription.plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;

        let reference_number = match Self::claim_reference(conn, input.reference_number).await? {
            Some(reference) => reference,
            None => generate_reference_number(now),
        };
        let current = ExchangeRateLedger::current_rate_in(conn, Some(subscription.business_id)).await?;

        let completed = input.auto_complete || plan.is_free();
        let status = if completed {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Pending
        };

        let payment = Payment::insert(
            conn,
            NewPayment {
                subscription_id: subscription.id,
                business_id: subscription.business_id,
                amount: input.amount,
                amount_local: convert_amount(input.amount, current.rate)?,
                exchange_rate: current.rate,
                method: input.method,
                payment_type: input.payment_type,
                status,
                reference_number: Some(reference_number),
                notes: input.notes,
                paid_at: completed.then_some(now),
            },
        )
        .await?;

        info!(
            payment_id = %payment.id,
            subscription_id = %subscription.id,
            amount = %payment.amount,
            status = %payment.status,
            rate = %current.rate,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Records a refund as a new negative `COMPLETED` payment
    ///
    /// # Errors
    ///
    /// - `NotFound` if the subscription does not exist
    /// - `Validation` if the amount is not positive, has sub-cent digits, or
    ///   the reference is taken
    pub async fn refund(&self, input: RecordRefund) -> EngineResult<Payment> {
        let mut tx = self.db.begin().await?;
        let mut outbox = Vec::new();
        let payment = Self::refund_in(&mut tx, Utc::now(), input, &mut outbox).await?;
        tx.commit().await?;

        dispatch(&self.notifier, outbox);
        Ok(payment)
    }

    /// [`refund`](Self::refund) inside a caller's transaction
    pub async fn refund_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        input: RecordRefund,
        outbox: &mut Vec<Notification>,
    ) -> EngineResult<Payment> {
        validate_amount("refund amount", input.amount, MAX_PAYMENT_AMOUNT)?;
        if input.amount <= Decimal::ZERO {
            return Err(EngineError::validation("refund amount must be positive"));
        }

        let subscription = Subscription::find_by_id(conn, input.subscription_id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", input.subscription_id))?;

        let reference_number = Self::claim_reference(conn, input.reference_number).await?;
        let current = ExchangeRateLedger::current_rate_in(conn, Some(subscription.business_id)).await?;
        let amount = -input.amount;

        let payment = Payment::insert(
            conn,
            NewPayment {
                subscription_id: subscription.id,
                business_id: subscription.business_id,
                amount,
                amount_local: convert_amount(amount, current.rate)?,
                exchange_rate: current.rate,
                method: input.method,
                payment_type: PaymentType::Refund,
                status: PaymentStatus::Completed,
                reference_number,
                notes: Some(format!("Refund: {}", input.reason)),
                paid_at: Some(now),
            },
        )
        .await?;

        info!(
            payment_id = %payment.id,
            subscription_id = %subscription.id,
            amount = %payment.amount,
            "Refund recorded"
        );

        outbox.push(
            notification_for(
                conn,
                subscription.business_id,
                NotificationKind::RefundRecorded,
                serde_json::json!({
                    "payment_id": payment.id,
                    "subscription_id": subscription.id,
                    "amount": input.amount,
                    "reason": input.reason,
                }),
            )
            .await?,
        );

        Ok(payment)
    }

    /// Marks a pending payment as paid
    pub async fn complete(&self, id: Uuid) -> EngineResult<Payment> {
        self.transition(id, PaymentStatus::Completed, None).await
    }

    /// Cancels a pending payment
    pub async fn cancel(&self, id: Uuid, reason: &str) -> EngineResult<Payment> {
        let note = format!("Cancelled: {}", reason);
        self.transition(id, PaymentStatus::Cancelled, Some(note)).await
    }

    /// Marks a pending payment as failed
    pub async fn fail(&self, id: Uuid, reason: &str) -> EngineResult<Payment> {
        let note = format!("Failed: {}", reason);
        self.transition(id, PaymentStatus::Failed, Some(note)).await
    }

    async fn transition(
        &self,
        id: Uuid,
        target: PaymentStatus,
        note: Option<String>,
    ) -> EngineResult<Payment> {
        let mut tx = self.db.begin().await?;
        let payment = Self::transition_in(&mut tx, Utc::now(), id, target, note.as_deref()).await?;
        tx.commit().await?;

        Ok(payment)
    }

    /// Moves a payment out of `PENDING`
    ///
    /// # Errors
    ///
    /// `InvalidState` when the payment is not pending.
    pub async fn transition_in(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        id: Uuid,
        target: PaymentStatus,
        note: Option<&str>,
    ) -> EngineResult<Payment> {
        let payment = Payment::find_for_update(conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment", id))?;

        if !payment.status.can_transition_to(target) {
            return Err(EngineError::invalid_state(
                "payment",
                payment.status,
                format!("cannot move a {} payment to {}", payment.status, target),
            ));
        }

        let paid_at = (target == PaymentStatus::Completed).then_some(now);
        let updated = Payment::set_status(conn, id, target, note, paid_at).await?;

        info!(
            payment_id = %id,
            from = %payment.status,
            to = %target,
            "Payment status changed"
        );

        Ok(updated)
    }

    /// Totals and derived status for one subscription
    pub async fn aggregate(&self, subscription_id: Uuid) -> EngineResult<PaymentAggregate> {
        let mut conn = self.db.acquire().await?;
        Self::aggregate_in(&mut conn, subscription_id).await
    }

    /// [`aggregate`](Self::aggregate) on a caller's connection
    pub async fn aggregate_in(
        conn: &mut PgConnection,
        subscription_id: Uuid,
    ) -> EngineResult<PaymentAggregate> {
        let subscription = Subscription::find_by_id(conn, subscription_id)
            .await?
            .ok_or_else(|| EngineError::not_found("subscription", subscription_id))?;
        let plan = SubscriptionPlan::find_by_id(conn, subscription.plan_id)
            .await?
            .ok_or_else(|| EngineError::not_found("plan", subscription.plan_id))?;

        let totals = Payment::totals_for_subscription(conn, subscription_id).await?;
        Ok(PaymentAggregate::from_totals(plan.price, totals))
    }

    /// Totals across every subscription of a business
    ///
    /// `total_paid` nets completed refunds against completed charges.
    pub async fn business_summary(&self, business_id: Uuid) -> EngineResult<BusinessPaymentTotals> {
        let mut conn = self.db.acquire().await?;
        Business::find_by_id(&mut conn, business_id)
            .await?
            .ok_or_else(|| EngineError::not_found("business", business_id))?;

        Ok(Payment::totals_for_business(&mut conn, business_id).await?)
    }

    /// Net completed amount a business has paid
    pub async fn business_total_paid(&self, business_id: Uuid) -> EngineResult<Decimal> {
        Ok(self.business_summary(business_id).await?.total_paid)
    }

    /// Completed revenue settled in `[from, to)`
    ///
    /// # Errors
    ///
    /// `Validation` when `from` is not before `to`.
    pub async fn revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        business_id: Option<Uuid>,
    ) -> EngineResult<RevenueReport> {
        if from >= to {
            return Err(EngineError::validation("revenue window start must be before its end"));
        }

        let mut conn = self.db.acquire().await?;
        let totals = Payment::revenue_between(&mut conn, from, to, business_id).await?;

        Ok(RevenueReport {
            from,
            to,
            business_id,
            totals,
        })
    }

    /// Pending payments older than [`PAYMENT_DUE_DAYS`], oldest first
    pub async fn overdue(&self, now: DateTime<Utc>, limit: i64) -> EngineResult<Vec<Payment>> {
        let cutoff = now - Duration::days(PAYMENT_DUE_DAYS);
        let mut conn = self.db.acquire().await?;
        Ok(Payment::list_pending_before(&mut conn, cutoff, limit.clamp(1, MAX_OVERDUE_ROWS)).await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> EngineResult<Payment> {
        let mut conn = self.db.acquire().await?;
        Payment::find_by_id(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment", id))
    }

    pub async fn find_by_reference(&self, reference_number: &str) -> EngineResult<Payment> {
        let mut conn = self.db.acquire().await?;
        Payment::find_by_reference(&mut conn, reference_number.trim())
            .await?
            .ok_or_else(|| EngineError::not_found("payment", reference_number))
    }

    /// Payments of one subscription, newest first
    pub async fn list_for_subscription(&self, subscription_id: Uuid) -> EngineResult<Vec<Payment>> {
        let mut conn = self.db.acquire().await?;
        Ok(Payment::list_for_subscription(&mut conn, subscription_id).await?)
    }

    /// Payments of one business, newest first
    pub async fn list_for_business(
        &self,
        business_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<Payment>> {
        let mut conn = self.db.acquire().await?;
        Ok(Payment::list_for_business(&mut conn, business_id, limit.clamp(1, 500), offset.max(0)).await?)
    }

    /// Tombstones a payment, freeing its reference number
    pub async fn soft_delete(&self, id: Uuid) -> EngineResult<()> {
        let mut conn = self.db.acquire().await?;
        if !Payment::soft_delete(&mut conn, id).await? {
            return Err(EngineError::not_found("payment", id));
        }

        info!(payment_id = %id, "Payment deleted");
        Ok(())
    }

    /// Normalizes a reference number and checks it is unused
    async fn claim_reference(
        conn: &mut PgConnection,
        reference_number: Option<String>,
    ) -> EngineResult<Option<String>> {
        let reference = match reference_number.map(|r| r.trim().to_string()) {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(None),
        };

        if Payment::reference_exists(conn, &reference).await? {
            return Err(EngineError::validation(format!(
                "payment reference number '{}' is already in use",
                reference
            )));
        }

        Ok(Some(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn totals(completed: Decimal, pending: Decimal, pending_count: i64) -> PaymentTotals {
        PaymentTotals {
            subscription_id: Uuid::new_v4(),
            total_completed: completed,
            total_pending: pending,
            completed_count: if completed.is_zero() { 0 } else { 1 },
            pending_count,
            payment_count: pending_count + 1,
            last_payment_at: None,
        }
    }

    #[test]
    fn test_aggregate_paid() {
        let aggregate = PaymentAggregate::from_totals(dec!(30), totals(dec!(30), dec!(0), 0));
        assert_eq!(aggregate.status, BillingStatus::Paid);
        assert_eq!(aggregate.outstanding, dec!(0));
    }

    #[test]
    fn test_aggregate_partial_and_outstanding() {
        let aggregate = PaymentAggregate::from_totals(dec!(30), totals(dec!(12.50), dec!(17.50), 1));
        assert_eq!(aggregate.status, BillingStatus::PartiallyPaid);
        assert_eq!(aggregate.outstanding, dec!(17.50));
        assert_eq!(aggregate.total_pending, dec!(17.50));
    }

    #[test]
    fn test_aggregate_overpaid_has_no_outstanding() {
        let aggregate = PaymentAggregate::from_totals(dec!(30), totals(dec!(40), dec!(0), 0));
        assert_eq!(aggregate.outstanding, dec!(0));
        assert_eq!(aggregate.status, BillingStatus::Paid);
    }

    #[test]
    fn test_aggregate_pending_only() {
        let aggregate = PaymentAggregate::from_totals(dec!(30), totals(dec!(0), dec!(30), 1));
        assert_eq!(aggregate.status, BillingStatus::Pending);
    }

    #[test]
    fn test_generated_reference_format() {
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 1, 1, 9, 30, 0).unwrap();
        let reference = generate_reference_number(now);

        assert!(reference.starts_with("PAY-20260101093000-"), "{reference}");
        assert_eq!(reference.len(), "PAY-20260101093000-".len() + 8);
        assert!(reference[19..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(reference, generate_reference_number(now));
    }

    #[test]
    fn test_revenue_report_serializes_flat() {
        let now = Utc::now();
        let report = RevenueReport {
            from: now - Duration::days(30),
            to: now,
            business_id: None,
            totals: RevenueTotals {
                gross: dec!(60.00),
                refunded: dec!(10.00),
                net: dec!(50.00),
                net_local: dec!(205000.00),
                payment_count: 2,
                refund_count: 1,
            },
        };

        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["net"], "50.00");
        assert_eq!(json["refund_count"], 1);
        assert!(json["business_id"].is_null());
    }

    #[test]
    fn test_record_payment_defaults() {
        let json = serde_json::json!({
            "subscription_id": Uuid::new_v4(),
            "amount": "30.00",
            "method": "CASH"
        });
        let input: RecordPayment = serde_json::from_value(json).unwrap();
        assert_eq!(input.payment_type, PaymentType::Subscription);
        assert!(!input.auto_complete);
        assert_eq!(input.amount, dec!(30.00));
    }
}
