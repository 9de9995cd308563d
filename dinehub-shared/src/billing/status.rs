/// Derived billing figures
///
/// Nothing in this module touches the database. Payment status, days
/// remaining and the display status shown to owners are computed from stored
/// values at read time, so they never drift from the rows they describe.

use crate::models::subscription::{Subscription, SubscriptionState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Window, in days, inside which an active subscription counts as expiring soon
pub const EXPIRING_SOON_DAYS: i64 = 7;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// How fully a subscription's price has been paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Paid,
    PartiallyPaid,
    Pending,
    Unpaid,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Paid => "PAID",
            BillingStatus::PartiallyPaid => "PARTIALLY_PAID",
            BillingStatus::Pending => "PENDING",
            BillingStatus::Unpaid => "UNPAID",
        }
    }

    /// Parses a status, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PAID" => Some(BillingStatus::Paid),
            "PARTIALLY_PAID" => Some(BillingStatus::PartiallyPaid),
            "PENDING" => Some(BillingStatus::Pending),
            "UNPAID" => Some(BillingStatus::Unpaid),
            _ => None,
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a subscription's payments against its plan price
///
/// Only a positive completed total can make a subscription paid, so a free
/// plan with no payments reads as `UNPAID`.
pub fn derive_billing_status(
    plan_price: Decimal,
    total_completed: Decimal,
    pending_count: i64,
) -> BillingStatus {
    if total_completed > Decimal::ZERO {
        if total_completed >= plan_price {
            BillingStatus::Paid
        } else {
            BillingStatus::PartiallyPaid
        }
    } else if pending_count > 0 {
        BillingStatus::Pending
    } else {
        BillingStatus::Unpaid
    }
}

/// Status shown to owners and used by list filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayStatus {
    Active,
    ExpiringSoon,
    Expired,
    Cancelled,
    Suspended,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Active => "ACTIVE",
            DisplayStatus::ExpiringSoon => "EXPIRING_SOON",
            DisplayStatus::Expired => "EXPIRED",
            DisplayStatus::Cancelled => "CANCELLED",
            DisplayStatus::Suspended => "SUSPENDED",
        }
    }

    /// Parses a status, accepting either case
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(DisplayStatus::Active),
            "EXPIRING_SOON" => Some(DisplayStatus::ExpiringSoon),
            "EXPIRED" => Some(DisplayStatus::Expired),
            "CANCELLED" => Some(DisplayStatus::Cancelled),
            "SUSPENDED" => Some(DisplayStatus::Suspended),
            _ => None,
        }
    }
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole days left until `end`, rounded up, never negative
pub fn days_remaining(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}

/// Whole days elapsed since `start`, rounded down, never negative
pub fn days_active(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_days().max(0)
}

/// Active, not yet lapsed, and ending within `days`
pub fn is_expiring_soon(subscription: &Subscription, now: DateTime<Utc>, days: i64) -> bool {
    subscription.is_live_at(now) && days_remaining(subscription.end_date, now) <= days
}

/// Display status of a subscription at `now`
pub fn display_status(subscription: &Subscription, now: DateTime<Utc>) -> DisplayStatus {
    match subscription.state {
        SubscriptionState::Cancelled => DisplayStatus::Cancelled,
        SubscriptionState::Suspended if subscription.end_date <= now => DisplayStatus::Expired,
        SubscriptionState::Suspended => DisplayStatus::Suspended,
        SubscriptionState::Expired | SubscriptionState::Superseded => DisplayStatus::Expired,
        SubscriptionState::Active if !subscription.is_live_at(now) => DisplayStatus::Expired,
        SubscriptionState::Active if is_expiring_soon(subscription, now, EXPIRING_SOON_DAYS) => {
            DisplayStatus::ExpiringSoon
        }
        SubscriptionState::Active => DisplayStatus::Active,
    }
}
