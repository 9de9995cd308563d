/// Error taxonomy for the billing engine
///
/// Every engine operation returns [`EngineResult`]. The variants map one to one
/// onto the categories callers are expected to handle:
///
/// - `Validation`: malformed input, uniqueness violations, out-of-band numbers
/// - `NotFound`: a referenced record is absent (or soft-deleted)
/// - `Conflict`: a second active subscription / exchange rate was attempted
/// - `InvalidState`: an illegal lifecycle transition, carrying the current state
/// - `Database`: anything else coming out of sqlx
///
/// # Example
///
/// ```
/// use dinehub_shared::error::EngineError;
///
/// let err = EngineError::invalid_state("payment", "completed", "only pending payments can be completed");
/// assert_eq!(
///     err.to_string(),
///     "Invalid payment state 'completed': only pending payments can be completed"
/// );
/// ```

use std::fmt::Display;
use thiserror::Error;

/// Result alias used throughout the engine
pub type EngineResult<T> = Result<T, EngineError>;

/// Unique indexes whose violation means "this value is already taken"
const VALIDATION_CONSTRAINTS: &[&str] = &[
    "users_identifier_key",
    "users_email_key",
    "businesses_email_key",
    "subscription_plans_name_key",
    "payments_reference_number_key",
];

/// Unique indexes guarding the one-active-per-scope invariants
const CONFLICT_CONSTRAINTS: &[&str] = &[
    "subscriptions_one_active_per_business",
    "exchange_rates_one_active_per_scope",
    "subscription_plans_single_default",
];

/// Engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected; the caller can fix it and retry
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another active record already occupies the slot
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transition not allowed from the record's current state
    #[error("Invalid {entity} state '{current}': {message}")]
    InvalidState {
        entity: &'static str,
        current: String,
        message: String,
    },

    /// Password hashing failed
    #[error("Credential error: {0}")]
    Credential(String),

    /// Unclassified database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl EngineError {
    /// Shorthand for [`EngineError::NotFound`]
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`EngineError::InvalidState`]
    pub fn invalid_state(
        entity: &'static str,
        current: impl Display,
        message: impl Into<String>,
    ) -> Self {
        EngineError::InvalidState {
            entity,
            current: current.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for [`EngineError::Validation`]
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    /// Stable machine-readable code, used by the HTTP layer and sweep reports
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::Credential(_) => "credential_error",
            EngineError::Database(_) => "database_error",
        }
    }
}

/// Unique violations on known indexes are promoted to their domain category;
/// everything else stays a database error.
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(constraint) = db_err.constraint() {
                if VALIDATION_CONSTRAINTS.contains(&constraint) {
                    return EngineError::Validation(format!(
                        "value already in use ({})",
                        constraint
                    ));
                }
                if CONFLICT_CONSTRAINTS.contains(&constraint) {
                    return EngineError::Conflict(format!(
                        "another active record exists ({})",
                        constraint
                    ));
                }
            }
        }

        EngineError::Database(err)
    }
}
