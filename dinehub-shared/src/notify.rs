/// Notification dispatch
///
/// The billing engine never talks to email or chat providers itself. It
/// hands a [`Notification`] to a [`Notifier`] after the transaction that
/// caused it has committed, on a spawned task, and only logs failures.
///
/// # Implementations
///
/// - [`LogNotifier`]: writes each notification to the tracing log
/// - [`WebhookNotifier`]: POSTs the JSON notification to a URL with an
///   HMAC-SHA256 signature in the `X-DineHub-Signature` header
///
/// # Example
///
/// ```no_run
/// use dinehub_shared::notify::{dispatch, LogNotifier, Notification, NotificationKind, Notifier};
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example() {
/// let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
/// let note = Notification::new(
///     Some(Uuid::new_v4()),
///     Uuid::new_v4(),
///     NotificationKind::SubscriptionRenewed,
///     serde_json::json!({ "plan": "Pro" }),
/// );
/// dispatch(&notifier, vec![note]);
/// # }
/// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying the hex HMAC of the request body
pub const SIGNATURE_HEADER: &str = "X-DineHub-Signature";

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    SubscriptionExpiringSoon,
    SubscriptionExpired,
    SubscriptionRenewed,
    SubscriptionCancelled,
    RefundRecorded,
    BusinessStatusChanged,
}

impl NotificationKind {
    /// Event name used in logs and webhook bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::SubscriptionExpiringSoon => "subscription.expiring_soon",
            NotificationKind::SubscriptionExpired => "subscription.expired",
            NotificationKind::SubscriptionRenewed => "subscription.renewed",
            NotificationKind::SubscriptionCancelled => "subscription.cancelled",
            NotificationKind::RefundRecorded => "payment.refund_recorded",
            NotificationKind::BusinessStatusChanged => "business.status_changed",
        }
    }
}

/// A message for one recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,

    /// Owner user to notify; `None` when the business has no owner on file
    pub recipient_id: Option<Uuid>,

    pub business_id: Uuid,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        recipient_id: Option<Uuid>,
        business_id: Uuid,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> Self {
        Notification {
            id: Uuid::new_v4(),
            recipient_id,
            business_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Delivery failure
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Rejected(u16),

    #[error("invalid signing secret")]
    InvalidSecret,
}

/// Delivers notifications to owners
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs notifications without delivering them anywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            notification_id = %notification.id,
            kind = notification.kind.as_str(),
            business_id = %notification.business_id,
            recipient_id = ?notification.recipient_id,
            payload = %notification.payload,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs notifications to an HTTP endpoint
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: Vec<u8>,
}

impl WebhookNotifier {
    /// Creates a notifier posting to `url`, signing bodies with `secret`
    pub fn new(url: impl Into<String>, secret: impl AsRef<[u8]>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(WebhookNotifier {
            client,
            url: url.into(),
            secret: secret.as_ref().to_vec(),
        })
    }

    /// Hex HMAC-SHA256 of `body`
    pub fn sign(&self, body: &[u8]) -> Result<String, NotifyError> {
        sign_payload(&self.secret, body)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(notification)?;
        let signature = self.sign(&body)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        tracing::debug!(
            notification_id = %notification.id,
            kind = notification.kind.as_str(),
            status = status.as_u16(),
            "Webhook delivered"
        );
        Ok(())
    }
}

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> Result<String, NotifyError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).map_err(|_| NotifyError::InvalidSecret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Webhook notifier when a URL is configured, log notifier otherwise
///
/// # Errors
///
/// `InvalidSecret` when a URL is given without a non-empty secret.
pub fn notifier_from_settings(
    webhook_url: Option<&str>,
    secret: Option<&str>,
) -> Result<Arc<dyn Notifier>, NotifyError> {
    match webhook_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            let secret = secret
                .filter(|s| !s.is_empty())
                .ok_or(NotifyError::InvalidSecret)?;
            Ok(Arc::new(WebhookNotifier::new(url, secret)?))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Sends notifications on a background task
///
/// Returns immediately. Delivery failures are logged and never reach the
/// caller.
pub fn dispatch(notifier: &Arc<dyn Notifier>, notifications: Vec<Notification>) {
    if notifications.is_empty() {
        return;
    }

    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        for notification in notifications {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    notification_id = %notification.id,
                    kind = notification.kind.as_str(),
                    business_id = %notification.business_id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
    });
}
