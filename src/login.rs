use crate::app::AppState;
use crate::config::DashboardConfig;
use crate::guard::{SESSION_COOKIE, clear_auth_cookies, session_cookie};
use crate::mailer::{CodePurpose, Notifier, generate_code};
use crate::provider::{
    AuthProvider, PendingSignUp, ProviderError, Session, User, friendly_auth_message,
};
use crate::routes::{
    DASHBOARD_ROUTE, FORGOT_PASSWORD_ROUTE, LOGIN_ROUTE, REDIRECT_PARAM, RESET_PASSWORD_ROUTE,
    SIGNUP_ROUTE, VERIFY_OTP_ROUTE, is_auth_route, safe_return_path,
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use axum::{
    Form,
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use uuid::Uuid;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Minimum time between two codes sent to the same address
const RESEND_INTERVAL: Duration = Duration::from_secs(60);

/// A one-time code waiting to be used
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PendingCode {
    pub code: String,
    pub purpose: CodeKind,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    VerifyEmail,
    PasswordReset,
}

/// What [`LocalAuthProvider::issue_code`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeIssue {
    Sent,
    NoAccount,
    TooSoon,
}

impl From<CodeKind> for CodePurpose {
    fn from(kind: CodeKind) -> Self {
        match kind {
            CodeKind::VerifyEmail => CodePurpose::VerifyEmail,
            CodeKind::PasswordReset => CodePurpose::PasswordReset,
        }
    }
}

/// Registered merchant account as stored in `users.json`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredUser {
    pub id: String,
    pub email: String,
    /// Argon2 hash of the user's password
    pub password_hash: String,
    pub email_confirmed: bool,
    #[serde(default)]
    pub pending_code: Option<PendingCode>,
}

impl StoredUser {
    fn identity(&self) -> User {
        User {
            id: self.id.clone(),
            email: self.email.clone(),
            email_confirmed: self.email_confirmed,
        }
    }
}

/// Lifetimes and limits for [`LocalAuthProvider`]
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_duration: Duration,
    pub otp_lifetime: Duration,
    pub min_password_length: usize,
}

impl From<&DashboardConfig> for AuthSettings {
    fn from(config: &DashboardConfig) -> Self {
        AuthSettings {
            session_duration: config.session_duration,
            otp_lifetime: config.otp_lifetime,
            min_password_length: config.min_password_length,
        }
    }
}

/// File-backed [`AuthProvider`]
///
/// Accounts live in a JSON file keyed by lowercased email; sessions are
/// kept in memory and do not survive a restart.
pub struct LocalAuthProvider {
    users_file: PathBuf,
    settings: AuthSettings,
    notifier: Arc<dyn Notifier>,
    sessions: RwLock<HashMap<String, Session>>,
    users_lock: Mutex<()>,
}

fn backend(message: &str) -> ProviderError {
    ProviderError::Backend(message.to_string())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn after(duration: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// Create the users file (and its directory) if it does not exist yet
///
/// # Arguments
/// * `users_file` - Location of `users.json`
///
/// # Returns
/// * `std::io::Result<()>` - Success or an IO error
pub fn init_database(users_file: &Path) -> std::io::Result<()> {
    if let Some(dir) = users_file.parent() {
        fs::create_dir_all(dir)?;
    }
    if !users_file.exists() {
        let mut file = File::create(users_file)?;
        file.write_all(b"{}")?;
    }
    Ok(())
}

/// Hash a password using Argon2
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, ProviderError>` - The password hash or an error
fn hash_password(password: &str) -> Result<String, ProviderError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| backend("Password hashing failed"))
}

/// Verify a password against a stored Argon2 hash
///
/// # Returns
/// * `Result<bool, ProviderError>` - True if the password matches, false if
///   not, or an error when the stored hash is malformed
fn verify_password(password: &str, hash: &str) -> Result<bool, ProviderError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| backend("Invalid password hash format"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

impl LocalAuthProvider {
    pub fn new(
        users_file: impl Into<PathBuf>,
        settings: AuthSettings,
        notifier: Arc<dyn Notifier>,
    ) -> std::io::Result<Self> {
        let users_file = users_file.into();
        init_database(&users_file)?;
        Ok(LocalAuthProvider {
            users_file,
            settings,
            notifier,
            sessions: RwLock::new(HashMap::new()),
            users_lock: Mutex::new(()),
        })
    }

    /// Read every registered account
    ///
    /// # Returns
    /// * `Result<HashMap<String, StoredUser>, ProviderError>` - Accounts keyed by email
    pub fn get_users(&self) -> Result<HashMap<String, StoredUser>, ProviderError> {
        let contents =
            fs::read_to_string(&self.users_file).map_err(|_| backend("Failed to read users file"))?;
        serde_json::from_str(&contents).map_err(|_| backend("Failed to parse users data"))
    }

    fn save_users(&self, users: &HashMap<String, StoredUser>) -> Result<(), ProviderError> {
        let json = serde_json::to_string_pretty(users)
            .map_err(|_| backend("Failed to serialize users data"))?;
        fs::write(&self.users_file, json).map_err(|_| backend("Failed to write users data"))
    }

    /// Load, change and save the users file as one step
    fn update_users<T>(
        &self,
        change: impl FnOnce(&mut HashMap<String, StoredUser>) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let _guard = self
            .users_lock
            .lock()
            .map_err(|_| backend("users file lock poisoned"))?;
        let mut users = self.get_users()?;
        let result = change(&mut users)?;
        self.save_users(&users)?;
        Ok(result)
    }

    fn check_password_strength(&self, password: &str) -> Result<(), ProviderError> {
        if password.chars().count() < self.settings.min_password_length {
            return Err(ProviderError::WeakPassword(self.settings.min_password_length));
        }
        Ok(())
    }

    fn create_session(&self, user: User) -> Result<Session, ProviderError> {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user,
            expires_at: after(self.settings.session_duration),
        };
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| backend("session table lock poisoned"))?;
        sessions.retain(|_, s| !s.is_expired());
        sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    fn end_sessions_for(&self, user_id: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.retain(|_, s| s.user.id != user_id);
        }
    }

    /// Attach a fresh code to `email` and hand it to the notifier
    ///
    /// No code is sent when no account matches `accept`, or when the last one
    /// went out less than [`RESEND_INTERVAL`] ago.
    async fn issue_code(
        &self,
        email: &str,
        kind: CodeKind,
        accept: impl FnOnce(&StoredUser) -> bool,
    ) -> Result<CodeIssue, ProviderError> {
        let key = normalize_email(email);
        let lifetime = self.settings.otp_lifetime;
        let code = generate_code();

        let issued = self.update_users(|users| {
            let Some(user) = users.get_mut(&key).filter(|u| accept(u)) else {
                return Ok(CodeIssue::NoAccount);
            };
            if let Some(pending) = &user.pending_code {
                let since = Utc::now().signed_duration_since(pending.sent_at);
                if since.to_std().is_ok_and(|since| since < RESEND_INTERVAL) {
                    return Ok(CodeIssue::TooSoon);
                }
            }
            user.pending_code = Some(PendingCode {
                code: code.clone(),
                purpose: kind,
                sent_at: Utc::now(),
                expires_at: after(lifetime),
            });
            Ok(CodeIssue::Sent)
        })?;

        if issued == CodeIssue::Sent {
            self.notifier.send_code(&key, kind.into(), &code, lifetime).await?;
        }
        Ok(issued)
    }

    /// Consume the user's pending code if it matches `code`
    fn redeem_code(
        user: &mut StoredUser,
        kind: CodeKind,
        code: &str,
    ) -> Result<(), ProviderError> {
        let valid = user.pending_code.as_ref().is_some_and(|pending| {
            pending.purpose == kind
                && pending.expires_at > Utc::now()
                && pending.code.eq_ignore_ascii_case(code.trim())
        });
        if !valid {
            return Err(ProviderError::InvalidToken);
        }
        user.pending_code = None;
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, ProviderError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| backend("session table lock poisoned"))?;
        Ok(sessions.get(token).filter(|s| !s.is_expired()).cloned())
    }

    async fn get_user(&self, token: &str) -> Result<Option<User>, ProviderError> {
        Ok(self.get_session(token).await?.map(|session| session.user))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let users = self.get_users()?;
        let user = users
            .get(&normalize_email(email))
            .ok_or(ProviderError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash)? {
            return Err(ProviderError::InvalidCredentials);
        }
        if !user.email_confirmed {
            return Err(ProviderError::EmailNotConfirmed);
        }

        info!("user {} signed in", user.id);
        self.create_session(user.identity())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<PendingSignUp, ProviderError> {
        let key = normalize_email(email);
        if !EMAIL_REGEX.is_match(&key) {
            return Err(ProviderError::InvalidEmail);
        }
        self.check_password_strength(password)?;
        let password_hash = hash_password(password)?;

        let user_id = self.update_users(|users| match users.get_mut(&key) {
            Some(existing) if existing.email_confirmed => Err(ProviderError::AlreadyRegistered),
            Some(existing) => {
                // unconfirmed accounts may sign up again with a new password
                existing.password_hash = password_hash;
                existing.pending_code = None;
                Ok(existing.id.clone())
            }
            None => {
                let user = StoredUser {
                    id: Uuid::new_v4().to_string(),
                    email: key.clone(),
                    password_hash,
                    email_confirmed: false,
                    pending_code: None,
                };
                let id = user.id.clone();
                users.insert(key.clone(), user);
                Ok(id)
            }
        })?;

        self.issue_code(&key, CodeKind::VerifyEmail, |_| true).await?;
        info!("user {} signed up, awaiting email verification", user_id);
        Ok(PendingSignUp {
            user_id,
            email: key,
        })
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| backend("session table lock poisoned"))?;
        if let Some(session) = sessions.remove(token) {
            info!("user {} signed out", session.user.id);
        }
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, ProviderError> {
        let key = normalize_email(email);
        let user = self.update_users(|users| {
            let user = users.get_mut(&key).ok_or(ProviderError::InvalidToken)?;
            Self::redeem_code(user, CodeKind::VerifyEmail, code)?;
            user.email_confirmed = true;
            Ok(user.identity())
        })?;

        info!("user {} verified their email", user.id);
        self.create_session(user)
    }

    // Both answer the same whether or not the address has an account, and
    // whether or not a code actually went out.
    async fn resend_otp(&self, email: &str) -> Result<(), ProviderError> {
        match self
            .issue_code(email, CodeKind::VerifyEmail, |u| !u.email_confirmed)
            .await?
        {
            CodeIssue::Sent => {}
            CodeIssue::NoAccount => info!("no unconfirmed account for {}, nothing resent", email),
            CodeIssue::TooSoon => info!("code for {} was sent moments ago, not resending", email),
        }
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        match self
            .issue_code(email, CodeKind::PasswordReset, |u| u.email_confirmed)
            .await?
        {
            CodeIssue::Sent => {}
            CodeIssue::NoAccount => info!("password reset requested for unknown address {}", email),
            CodeIssue::TooSoon => info!("reset code for {} was sent moments ago, not resending", email),
        }
        Ok(())
    }

    async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        self.check_password_strength(new_password)?;
        let password_hash = hash_password(new_password)?;
        let key = normalize_email(email);

        let user_id = self.update_users(|users| {
            let user = users.get_mut(&key).ok_or(ProviderError::InvalidToken)?;
            Self::redeem_code(user, CodeKind::PasswordReset, code)?;
            user.password_hash = password_hash;
            Ok(user.id.clone())
        })?;

        self.end_sessions_for(&user_id);
        info!("user {} reset their password", user_id);
        Ok(())
    }
}

// Web handlers

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    #[serde(default, rename = "redirectTo")]
    pub redirect_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OtpForm {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// Redirect back to `route` with a user-facing error message
fn error_redirect(route: &str, message: &str, extra: &[(&str, &str)]) -> Response {
    let mut target = format!("{}?error={}", route, urlencoding::encode(message));
    for (name, value) in extra {
        target.push_str(&format!("&{}={}", name, urlencoding::encode(value)));
    }
    Redirect::to(&target).into_response()
}

fn provider_message(err: &ProviderError) -> &'static str {
    friendly_auth_message(&err.to_string())
}

pub async fn serve_login_page() -> Html<&'static str> {
    Html(include_str!("./static/login.html"))
}

pub async fn serve_signup_page() -> Html<&'static str> {
    Html(include_str!("./static/signup.html"))
}

pub async fn serve_verify_page() -> Html<&'static str> {
    Html(include_str!("./static/verify.html"))
}

/// Serve the password forgot/reset page
pub async fn serve_password_page() -> Html<&'static str> {
    Html(include_str!("./static/password.html"))
}

/// Handle login form submissions
///
/// On success the session token is stored in a signed cookie and the user is
/// sent back to the page they came from, or to the dashboard.
///
/// # Arguments
/// * `state` - Shared application state
/// * `jar` - Signed cookie jar for the session cookie
/// * `form` - Email, password and optional return path
///
/// # Returns
/// * `Response` - Redirect to the return path, or back to the login page with an error
pub async fn handle_login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.auth.sign_in(&form.email, &form.password).await {
        Ok(session) => {
            let target = safe_return_path(form.redirect_to.as_deref())
                .filter(|path| !is_auth_route(path))
                .unwrap_or(DASHBOARD_ROUTE)
                .to_string();
            let jar = clear_auth_cookies(jar).add(session_cookie(&session, &state.config));
            (jar, Redirect::to(&target)).into_response()
        }
        Err(ProviderError::EmailNotConfirmed) => error_redirect(
            VERIFY_OTP_ROUTE,
            provider_message(&ProviderError::EmailNotConfirmed),
            &[("email", form.email.trim())],
        ),
        Err(e) => {
            warn!("sign in for {} failed: {}", form.email, e);
            let redirect = form.redirect_to.unwrap_or_default();
            let extra: Vec<(&str, &str)> = if redirect.is_empty() {
                vec![]
            } else {
                vec![(REDIRECT_PARAM, redirect.as_str())]
            };
            error_redirect(LOGIN_ROUTE, provider_message(&e), &extra)
        }
    }
}

/// Handle sign-up form submissions
///
/// # Returns
/// * `Response` - Redirect to the OTP page for the new address, or back with an error
pub async fn handle_signup(State(state): State<AppState>, Form(form): Form<SignUpForm>) -> Response {
    if form
        .confirm_password
        .as_deref()
        .is_some_and(|confirm| confirm != form.password)
    {
        return error_redirect(SIGNUP_ROUTE, "Passwords do not match", &[]);
    }

    match state.auth.sign_up(&form.email, &form.password).await {
        Ok(pending) => Redirect::to(&format!(
            "{}?email={}",
            VERIFY_OTP_ROUTE,
            urlencoding::encode(&pending.email)
        ))
        .into_response(),
        Err(e) => {
            warn!("sign up for {} failed: {}", form.email, e);
            error_redirect(SIGNUP_ROUTE, provider_message(&e), &[])
        }
    }
}

/// Handle OTP verification; a verified user is signed in straight away
pub async fn handle_verify_otp(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<OtpForm>,
) -> Response {
    match state.auth.verify_otp(&form.email, &form.code).await {
        Ok(session) => {
            let jar = clear_auth_cookies(jar).add(session_cookie(&session, &state.config));
            (jar, Redirect::to(DASHBOARD_ROUTE)).into_response()
        }
        Err(e) => error_redirect(
            VERIFY_OTP_ROUTE,
            provider_message(&e),
            &[("email", form.email.trim())],
        ),
    }
}

pub async fn handle_resend_otp(State(state): State<AppState>, Form(form): Form<EmailForm>) -> Response {
    let email = form.email.trim();
    match state.auth.resend_otp(email).await {
        Ok(()) => Redirect::to(&format!(
            "{}?email={}&resent=true",
            VERIFY_OTP_ROUTE,
            urlencoding::encode(email)
        ))
        .into_response(),
        Err(e) => error_redirect(VERIFY_OTP_ROUTE, provider_message(&e), &[("email", email)]),
    }
}

/// Handle password reset requests by sending a reset code
///
/// The response is the same whether or not the address is registered.
pub async fn handle_forgot_password(
    State(state): State<AppState>,
    Form(form): Form<EmailForm>,
) -> Response {
    let email = form.email.trim();
    match state.auth.request_password_reset(email).await {
        Ok(()) => Redirect::to(&format!(
            "{}?email_sent=true&email={}",
            RESET_PASSWORD_ROUTE,
            urlencoding::encode(email)
        ))
        .into_response(),
        Err(e) => error_redirect(FORGOT_PASSWORD_ROUTE, provider_message(&e), &[]),
    }
}

/// Handle password reset confirmation
///
/// # Returns
/// * `Response` - Redirect to the login page on success or back to the reset page
pub async fn handle_reset_password(
    State(state): State<AppState>,
    Form(form): Form<ResetPasswordForm>,
) -> Response {
    match state
        .auth
        .reset_password(&form.email, &form.code, &form.new_password)
        .await
    {
        Ok(()) => Redirect::to(&format!(
            "{}?success={}",
            LOGIN_ROUTE,
            urlencoding::encode("Password reset successful")
        ))
        .into_response(),
        Err(e) => error_redirect(
            RESET_PASSWORD_ROUTE,
            provider_message(&e),
            &[("email", form.email.trim())],
        ),
    }
}

/// Handle user logout
///
/// Ends the session with the provider, clears the session and business
/// cookies and redirects to the login page.
pub async fn handle_logout(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(e) = state.auth.sign_out(cookie.value()).await {
            warn!("sign out failed: {}", e);
        }
    }
    (clear_auth_cookies(jar), Redirect::to(LOGIN_ROUTE)).into_response()
}
