#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum_extra::extract::cookie::Key;
use loyalty_dashboard::app::{AppState, router};
use loyalty_dashboard::config::DashboardConfig;
use loyalty_dashboard::login::{AuthSettings, LocalAuthProvider};
use loyalty_dashboard::mailer::{CodePurpose, Notifier};
use loyalty_dashboard::provider::{
    AuthProvider, Business, BusinessDirectory, PendingSignUp, ProviderError, Session, User,
};
use loyalty_dashboard::store::{FileBusinessDirectory, FileCustomerSource, FileOutbox};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "secret-password";

/// Notifier that keeps the last code sent to each address
#[derive(Default)]
pub struct CapturingNotifier {
    codes: Mutex<HashMap<String, String>>,
}

impl CapturingNotifier {
    pub fn last_code(&self, email: &str) -> String {
        self.codes
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .expect("no code was sent")
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_code(
        &self,
        to_email: &str,
        _: CodePurpose,
        code: &str,
        _: Duration,
    ) -> Result<(), ProviderError> {
        self.codes
            .lock()
            .unwrap()
            .insert(to_email.to_string(), code.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: DashboardConfig,
    pub key: Key,
    pub auth: Arc<LocalAuthProvider>,
    pub directory: Arc<FileBusinessDirectory>,
    pub notifier: Arc<CapturingNotifier>,
    pub state: AppState,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = DashboardConfig {
            database_dir: dir.path().to_path_buf(),
            ..DashboardConfig::default()
        };
        let notifier = Arc::new(CapturingNotifier::default());
        let auth = Arc::new(
            LocalAuthProvider::new(config.users_file(), AuthSettings::from(&config), notifier.clone())
                .unwrap(),
        );
        let directory = Arc::new(FileBusinessDirectory::new(config.businesses_file()));
        let key = Key::generate();
        let state = Self::state_with(&config, auth.clone(), directory.clone(), key.clone());

        Harness {
            dir,
            config,
            key,
            auth,
            directory,
            notifier,
            state,
        }
    }

    pub fn state_with(
        config: &DashboardConfig,
        auth: Arc<dyn AuthProvider>,
        directory: Arc<dyn BusinessDirectory>,
        key: Key,
    ) -> AppState {
        AppState::new(
            config.clone(),
            auth,
            directory,
            Arc::new(FileCustomerSource::new(config.customers_dir())),
            Arc::new(FileOutbox::new(config.outbox_dir())),
            key,
        )
    }

    /// Same users, sessions and key, but a business gate with an empty cache
    pub fn restarted_gate(&self) -> AppState {
        Self::state_with(&self.config, self.auth.clone(), self.directory.clone(), self.key.clone())
    }

    /// Same users, sessions and key behind providers that answer after
    /// `auth_delay` and `directory_delay`, with 20ms timeouts in front of both
    pub fn slow_state(&self, auth_delay: Duration, directory_delay: Duration) -> AppState {
        let config = DashboardConfig {
            auth_timeout: Duration::from_millis(20),
            business_check_timeout: Duration::from_millis(20),
            ..self.config.clone()
        };
        let auth = SlowAuth {
            inner: self.auth.clone(),
            delay: auth_delay,
        };
        let directory = SlowDirectory {
            inner: self.directory.clone(),
            delay: directory_delay,
        };
        Self::state_with(&config, Arc::new(auth), Arc::new(directory), self.key.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.send_to(&self.state, request).await
    }

    pub async fn send_to(&self, state: &AppState, request: Request<Body>) -> Response {
        router(state.clone()).oneshot(request).await.unwrap()
    }

    /// Sign up and verify `email`; returns the `Cookie` header for the session
    pub async fn sign_in(&self, email: &str) -> String {
        let response = self
            .send(post_form(
                "/signup",
                &format!("email={}&password={}", urlencoding::encode(email), PASSWORD),
                None,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let code = self.notifier.last_code(email);
        let response = self
            .send(post_form(
                "/verify-otp",
                &format!("email={}&code={}", urlencoding::encode(email), code),
                None,
            ))
            .await;
        assert_eq!(location(&response), Some("/dashboard"));
        cookie_header(&response)
    }

    /// Sign in and register a business
    ///
    /// Returns the `Cookie` header (session and business cookies) and the
    /// new business id.
    pub async fn sign_in_with_business(&self, email: &str) -> (String, String) {
        let session = self.sign_in(email).await;
        let response = self
            .send(post_form("/business-setup", "name=Corner+Cafe", Some(&session)))
            .await;
        assert_eq!(location(&response), Some("/dashboard"));

        let cookies = format!("{}; {}", session, cookie_header(&response));
        let business_id = self.business_id_of(email).await;
        (cookies, business_id)
    }

    pub async fn business_id_of(&self, email: &str) -> String {
        let users = self.auth.get_users().unwrap();
        let user = &users[email];
        self.directory
            .find_by_owner(&user.id)
            .await
            .unwrap()
            .expect("business was not created")
            .id
    }

    pub fn write_customers(&self, business_id: &str, csv: &str) {
        let dir = self.config.customers_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.csv", business_id)), csv).unwrap();
    }
}

/// Auth provider whose session lookups take `delay`
pub struct SlowAuth {
    pub inner: Arc<LocalAuthProvider>,
    pub delay: Duration,
}

#[async_trait]
impl AuthProvider for SlowAuth {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_session(token).await
    }

    async fn get_user(&self, token: &str) -> Result<Option<User>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_user(token).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<PendingSignUp, ProviderError> {
        self.inner.sign_up(email, password).await
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        self.inner.sign_out(token).await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, ProviderError> {
        self.inner.verify_otp(email, code).await
    }

    async fn resend_otp(&self, email: &str) -> Result<(), ProviderError> {
        self.inner.resend_otp(email).await
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        self.inner.request_password_reset(email).await
    }

    async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        self.inner.reset_password(email, code, new_password).await
    }
}

/// Business directory whose owner lookups take `delay`
pub struct SlowDirectory {
    pub inner: Arc<FileBusinessDirectory>,
    pub delay: Duration,
}

#[async_trait]
impl BusinessDirectory for SlowDirectory {
    async fn find_by_owner(&self, owner_id: &str) -> Result<Option<Business>, ProviderError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_by_owner(owner_id).await
    }

    async fn create(&self, owner_id: &str, name: &str) -> Result<Business, ProviderError> {
        self.inner.create(owner_id, name).await
    }
}

pub const CUSTOMERS_CSV: &str = "\
id,name,phone,totalSpend,visits,lastVisit,points,tag,rpi,lei,spendingScore
1,Ada,08010000001,\"255,000\",4,22/01/2024,\"1,500\",Regular,0.5,0.2,70
2,Bola,08010000002,\"350,000\",9,4/02/2025,900,VIP,0.9,0.7,88
3,Chidi,,\"150,000\",1,Never,200,New,0.1,0.1,20
";

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

/// `name=value` pairs from every `Set-Cookie` header
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(|pair| pair.to_string())
        .collect()
}

/// The `Set-Cookie` pairs of a response joined into a `Cookie` header
pub fn cookie_header(response: &Response) -> String {
    set_cookies(response)
        .into_iter()
        .filter(|pair| !pair.ends_with('='))
        .collect::<Vec<_>>()
        .join("; ")
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
