/// Owner credential preparation
///
/// Normalizes the identity fields supplied at onboarding and hashes the
/// password with Argon2id before any row is written.
///
/// # Hash parameters
///
/// - Algorithm: Argon2id, version 0x13
/// - Memory: 64 MB, 3 passes, 4 lanes, 32-byte output
/// - Salt: 16 random bytes from the OS RNG
///
/// # Example
///
/// ```
/// use dinehub_shared::credentials::{hash_password, verify_password, split_full_name};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("kitchen-open-9")?;
/// assert!(verify_password("kitchen-open-9", &hash)?);
///
/// assert_eq!(
///     split_full_name("Sok Dara Chan"),
///     (Some("Sok".to_string()), Some("Dara Chan".to_string()))
/// );
/// # Ok(())
/// # }
/// ```

use crate::error::{EngineError, EngineResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};

/// Shortest password accepted for a new owner account
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashError(String),

    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

impl From<PasswordError> for EngineError {
    fn from(err: PasswordError) -> Self {
        EngineError::Credential(err.to_string())
    }
}

/// Normalized owner identity ready to insert
#[derive(Debug, Clone)]
pub struct OwnerCredentials {
    pub identifier: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Hashes a password with Argon2id
///
/// # Errors
///
/// Returns `PasswordError::HashError` if the parameters are rejected or hashing fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = ParamsBuilder::new()
        .m_cost(65536)
        .t_cost(3)
        .p_cost(4)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(password_hash.to_string())
}

/// Verifies a password against a PHC hash string
///
/// # Errors
///
/// Returns an error if the hash cannot be parsed; a wrong password is `Ok(false)`.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}

/// Splits a full name into first name and the remainder
///
/// Blank input yields `(None, None)`; a single word yields no last name.
pub fn split_full_name(full_name: &str) -> (Option<String>, Option<String>) {
    let trimmed = full_name.trim();
    if trimmed.is_empty() {
        return (None, None);
    }

    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => {
            let rest = rest.trim();
            (
                Some(first.to_string()),
                (!rest.is_empty()).then(|| rest.to_string()),
            )
        }
        None => (Some(trimmed.to_string()), None),
    }
}

/// Trims and lower-cases an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Validates and normalizes owner identity fields, then hashes the password
///
/// # Errors
///
/// - `Validation` if the identifier is blank, the email is malformed, or the
///   password is shorter than [`MIN_PASSWORD_LENGTH`]
/// - `Credential` if hashing fails
pub fn prepare_owner_credentials(
    identifier: &str,
    email: &str,
    password: &str,
    full_name: &str,
) -> EngineResult<OwnerCredentials> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(EngineError::validation("owner identifier is required"));
    }

    let email = normalize_email(email);
    if !looks_like_email(&email) {
        return Err(EngineError::validation(format!(
            "owner email '{}' is not a valid address",
            email
        )));
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(EngineError::validation(format!(
            "password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }

    let (first_name, last_name) = split_full_name(full_name);
    let password_hash = hash_password(password)?;

    Ok(OwnerCredentials {
        identifier: identifier.to_string(),
        email,
        password_hash,
        first_name,
        last_name,
    })
}

/// Minimal structural check: one `@`, non-empty local part, dotted domain
pub(crate) fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
