//! Boundary to the auth/data provider.
//!
//! The dashboard never owns identities or business records; it asks a provider
//! for them. [`AuthProvider`] covers sessions and the sign-in/sign-up flows,
//! [`BusinessDirectory`] is the `businesses` table filtered by owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a provider.
///
/// The messages follow the provider's own wording; [`friendly_auth_message`]
/// relies on those substrings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Password should be at least {0} characters")]
    WeakPassword(usize),

    #[error("Unable to validate email address: invalid format")]
    InvalidEmail,

    #[error("Token has expired or is invalid")]
    InvalidToken,

    #[error("Email rate limit exceeded")]
    RateLimited,

    #[error("Business already exists for this user")]
    BusinessExists,

    #[error("{0}")]
    Backend(String),
}

/// Authenticated user as the provider describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub email_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Result of a sign-up; the account stays unconfirmed until the OTP is verified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSignUp {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessStatus {
    Active,
    Pending,
    Suspended,
}

impl BusinessStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BusinessStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub status: BusinessStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Session for a token, `None` when the token is unknown or expired
    async fn get_session(&self, token: &str) -> Result<Option<Session>, ProviderError>;

    async fn get_user(&self, token: &str) -> Result<Option<User>, ProviderError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<PendingSignUp, ProviderError>;

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError>;

    /// Confirm a sign-up code and open a session
    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, ProviderError>;

    async fn resend_otp(&self, email: &str) -> Result<(), ProviderError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<Business>, ProviderError>;

    async fn create(&self, owner_id: &str, name: &str) -> Result<Business, ProviderError>;
}

const AUTH_MESSAGES: &[(&str, &str)] = &[
    ("Invalid login credentials", "Incorrect email or password."),
    (
        "Email not confirmed",
        "Please verify your email address before signing in.",
    ),
    (
        "User already registered",
        "An account with this email already exists. Try signing in instead.",
    ),
    (
        "Password should be at least",
        "Your password is too short. Please choose a longer one.",
    ),
    (
        "Unable to validate email address",
        "Please enter a valid email address.",
    ),
    (
        "Token has expired or is invalid",
        "That code is invalid or has expired. Request a new one.",
    ),
    (
        "rate limit",
        "Too many attempts. Please wait a moment and try again.",
    ),
];

pub const GENERIC_AUTH_MESSAGE: &str = "Something went wrong. Please try again.";

/// Turn a raw provider error message into something a merchant can act on
///
/// # Examples
/// ```
/// use loyalty_dashboard::provider::friendly_auth_message;
///
/// assert_eq!(friendly_auth_message("Invalid login credentials"), "Incorrect email or password.");
/// assert_eq!(friendly_auth_message("socket hang up"), "Something went wrong. Please try again.");
/// ```
pub fn friendly_auth_message(raw: &str) -> &'static str {
    let lowered = raw.to_lowercase();
    AUTH_MESSAGES
        .iter()
        .find(|(needle, _)| lowered.contains(&needle.to_lowercase()))
        .map(|(_, message)| *message)
        .unwrap_or(GENERIC_AUTH_MESSAGE)
}
