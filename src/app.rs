use crate::business::{BusinessCheck, BusinessGate};
use crate::config::{ConfigError, DashboardConfig};
use crate::customer::{Customer, CustomerRow};
use crate::downloader::{self, ExportFormat};
use crate::error::{DashboardError, Result};
use crate::guard::{SESSION_COOKIE, business_cookie, route_guard};
use crate::login::{self, AuthSettings, LocalAuthProvider};
use crate::mailer::{LogNotifier, Mailer, Notifier};
use crate::messaging::{self, BulkMessageRequest, MessageOutbox};
use crate::provider::{AuthProvider, Business, BusinessDirectory, User};
use crate::query::{FilterCriterion, FilterSurface, SortDirection, SortSpec, apply_query};
use crate::routes::{
    BUSINESS_SETUP_ROUTE, DASHBOARD_ROUTE, FORGOT_PASSWORD_ROUTE, LOGIN_ROUTE, LOGOUT_ROUTE,
    RESET_PASSWORD_ROUTE, SESSION_API_ROUTE, SIGNUP_ROUTE, VERIFY_OTP_ROUTE,
};
use crate::session::{SessionGate, SessionSnapshot};
use crate::store::{CustomerSource, FileBusinessDirectory, FileCustomerSource, FileOutbox};
use axum::{
    Extension, Form, Json, Router,
    extract::{FromRef, Path, Query, State},
    http::header,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

/// Shared state handed to every handler and to the route guard
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DashboardConfig>,
    pub auth: Arc<dyn AuthProvider>,
    pub business_gate: Arc<BusinessGate>,
    pub session_gate: Arc<SessionGate>,
    pub customers: Arc<dyn CustomerSource>,
    pub outbox: Arc<dyn MessageOutbox>,
    pub key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

/// Signing key for cookies
///
/// Without a configured secret a random key is generated, which signs out
/// everyone when the process restarts.
pub fn cookie_key(config: &DashboardConfig) -> std::result::Result<Key, ConfigError> {
    match &config.cookie_secret {
        Some(secret) => Key::try_from(secret.as_bytes()).map_err(|e| ConfigError::Invalid {
            key: "cookie_secret",
            reason: e.to_string(),
        }),
        None => {
            warn!("no cookie_secret configured, sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}

impl AppState {
    pub fn new(
        config: DashboardConfig,
        auth: Arc<dyn AuthProvider>,
        directory: Arc<dyn BusinessDirectory>,
        customers: Arc<dyn CustomerSource>,
        outbox: Arc<dyn MessageOutbox>,
        key: Key,
    ) -> Self {
        let business_gate = BusinessGate::new(
            directory,
            config.business_check_timeout,
            config.business_cache_ttl,
        );
        let session_gate = SessionGate::new(auth.clone(), config.auth_timeout);
        AppState {
            config: Arc::new(config),
            auth,
            business_gate: Arc::new(business_gate),
            session_gate: Arc::new(session_gate),
            customers,
            outbox,
            key,
        }
    }

    /// State backed by the file stores under `config.database_dir`
    pub fn from_config(config: DashboardConfig) -> Result<Self> {
        let notifier: Arc<dyn Notifier> = match &config.mail {
            Some(mail) => Arc::new(Mailer::new(mail)?),
            None => {
                info!("mail is not configured, one-time codes will be logged");
                Arc::new(LogNotifier)
            }
        };
        let auth = LocalAuthProvider::new(config.users_file(), AuthSettings::from(&config), notifier)?;
        let directory = FileBusinessDirectory::new(config.businesses_file());
        let customers = FileCustomerSource::new(config.customers_dir());
        let outbox = FileOutbox::new(config.outbox_dir());
        let key = cookie_key(&config)?;

        Ok(AppState::new(
            config,
            Arc::new(auth),
            Arc::new(directory),
            Arc::new(customers),
            Arc::new(outbox),
            key,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to(DASHBOARD_ROUTE) }))
        .route(LOGIN_ROUTE, get(login::serve_login_page).post(login::handle_login))
        .route(SIGNUP_ROUTE, get(login::serve_signup_page).post(login::handle_signup))
        .route(
            VERIFY_OTP_ROUTE,
            get(login::serve_verify_page).post(login::handle_verify_otp),
        )
        .route("/verify-otp/resend", post(login::handle_resend_otp))
        .route(
            FORGOT_PASSWORD_ROUTE,
            get(login::serve_password_page).post(login::handle_forgot_password),
        )
        .route(
            RESET_PASSWORD_ROUTE,
            get(login::serve_password_page).post(login::handle_reset_password),
        )
        .route(LOGOUT_ROUTE, get(login::handle_logout).post(login::handle_logout))
        .route(DASHBOARD_ROUTE, get(serve_dashboard))
        .route(
            BUSINESS_SETUP_ROUTE,
            get(serve_business_setup_page).post(handle_business_setup),
        )
        .route(SESSION_API_ROUTE, get(session_status))
        .route("/api/customers", get(list_customers))
        .route("/api/customers/query", post(query_customers))
        .route("/api/customers/export", post(export_customers))
        .route("/api/filters/:surface", get(filter_options))
        .route("/api/messages/bulk", post(send_bulk_message))
        .nest_service("/static", ServeDir::new("static"))
        .layer(middleware::from_fn_with_state(state.clone(), route_guard))
        .with_state(state)
}

/// Start the dashboard server and serve until the process is stopped
pub async fn run(config: DashboardConfig) -> Result<()> {
    let bind_address = config.bind_address.clone();
    let state = AppState::from_config(config)?;

    let listener = TcpListener::bind(&bind_address).await?;
    info!("Listening on http://{}", bind_address);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub route: Option<String>,
}

/// Session gate resolution for the view showing `route`
async fn session_status(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<SessionQuery>,
) -> Json<SessionSnapshot> {
    let route = query.route.unwrap_or_else(|| DASHBOARD_ROUTE.to_string());
    let token = jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string());
    Json(state.session_gate.resolve(token.as_deref(), &route).await)
}

/// Id of the business the guard let this request through for
///
/// An assumed check carries no id, so the directory is asked directly.
async fn business_id(state: &AppState, user: &User, check: &BusinessCheck) -> Result<String> {
    match check.business_id() {
        Some(id) => Ok(id.to_string()),
        None => Ok(active_business(state, user).await?.id),
    }
}

async fn active_business(state: &AppState, user: &User) -> Result<Business> {
    let timeout = state.config.business_check_timeout;
    let record = tokio::time::timeout(timeout, state.business_gate.directory().find_by_owner(&user.id))
        .await
        .map_err(|_| DashboardError::Timeout(timeout))??;
    record.ok_or_else(|| DashboardError::NotFound(format!("business for user {}", user.id)))
}

async fn load_customers(state: &AppState, user: &User, check: &BusinessCheck) -> Result<Vec<Customer>> {
    let business_id = business_id(state, user, check).await?;
    state.customers.customers(&business_id).await
}

/// Ordered customer view as the table shows it
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerView {
    /// Customers before filtering
    pub total: usize,
    pub customers: Vec<CustomerRow>,
}

impl CustomerView {
    fn new(total: usize, view: &[&Customer]) -> Self {
        CustomerView {
            total,
            customers: view.iter().map(|customer| CustomerRow::from(*customer)).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    #[serde(default)]
    pub criteria: Vec<FilterCriterion>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub criteria: Vec<FilterCriterion>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub format: ExportFormat,
}

async fn list_customers(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(check): Extension<BusinessCheck>,
    Query(query): Query<ListQuery>,
) -> Result<Json<CustomerView>> {
    let sort = match query.sort {
        Some(field) => {
            let direction = match query.direction.as_deref() {
                Some(direction) => direction.parse::<SortDirection>()?,
                None => SortDirection::default(),
            };
            Some(SortSpec::new(field, direction))
        }
        None => None,
    };

    let customers = load_customers(&state, &user, &check).await?;
    let view = apply_query(&customers, &[], sort.as_ref())?;
    Ok(Json(CustomerView::new(customers.len(), &view)))
}

async fn query_customers(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(check): Extension<BusinessCheck>,
    Json(query): Json<CustomerQuery>,
) -> Result<Json<CustomerView>> {
    let customers = load_customers(&state, &user, &check).await?;
    let view = apply_query(&customers, &query.criteria, query.sort.as_ref())?;
    Ok(Json(CustomerView::new(customers.len(), &view)))
}

/// Download the filtered and sorted view as CSV or XLSX
async fn export_customers(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(check): Extension<BusinessCheck>,
    Json(request): Json<ExportRequest>,
) -> Result<Response> {
    let customers = load_customers(&state, &user, &check).await?;
    let view = apply_query(&customers, &request.criteria, request.sort.as_ref())?;

    let format = request.format;
    let disposition = format!("attachment; filename=\"customers.{}\"", format.extension());
    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];

    info!("exporting {} customers as {}", view.len(), format.extension());
    Ok(match format {
        ExportFormat::Csv => (headers, downloader::to_csv(&view)?).into_response(),
        ExportFormat::Xlsx => (headers, downloader::to_xlsx(&view)?).into_response(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterOptions {
    pub surface: FilterSurface,
    pub options: Vec<String>,
}

async fn filter_options(Path(surface): Path<String>) -> Result<Json<FilterOptions>> {
    let surface = surface.parse::<FilterSurface>()?;
    Ok(Json(FilterOptions {
        surface,
        options: surface.options().iter().map(|label| label.to_string()).collect(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMessageReceipt {
    pub queued: usize,
    pub skipped: usize,
    pub created_at: DateTime<Utc>,
}

async fn send_bulk_message(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(check): Extension<BusinessCheck>,
    Json(request): Json<BulkMessageRequest>,
) -> Result<Json<BulkMessageReceipt>> {
    let business_id = business_id(&state, &user, &check).await?;
    let customers = state.customers.customers(&business_id).await?;
    let message = messaging::compose(&business_id, &customers, &request)?;
    state.outbox.enqueue(&message).await?;

    Ok(Json(BulkMessageReceipt {
        queued: message.recipients.len(),
        skipped: message.skipped,
        created_at: message.created_at,
    }))
}

/// Headline numbers shown on the dashboard
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    /// `None` when the directory was too slow to name the business
    pub business_name: Option<String>,
    pub customer_count: usize,
    pub total_spend: f64,
    pub average_spend: f64,
    pub total_points: i64,
    /// Customers with a phone number
    pub reachable: usize,
}

impl DashboardSummary {
    pub fn new(business_name: Option<&str>, customers: &[Customer]) -> Self {
        let total_spend: f64 = customers.iter().map(|c| c.total_spend).sum();
        DashboardSummary {
            business_name: business_name.map(str::to_string),
            customer_count: customers.len(),
            total_spend,
            average_spend: if customers.is_empty() {
                0.0
            } else {
                total_spend / customers.len() as f64
            },
            total_points: customers.iter().map(|c| c.points).sum(),
            reachable: customers.iter().filter(|c| !c.phone.trim().is_empty()).count(),
        }
    }
}

/// Render the dashboard with its summary embedded as `DASHBOARD_DATA`
///
/// A slow directory does not block the page: the summary is built from the
/// guard's check, without the business name, or left empty when the guard
/// only assumed the business.
async fn serve_dashboard(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(check): Extension<BusinessCheck>,
) -> Result<Html<String>> {
    let business = match active_business(&state, &user).await {
        Ok(business) => Some(business),
        Err(DashboardError::Timeout(after)) => {
            warn!("business for {} not named after {:?}, rendering without it", user.id, after);
            None
        }
        Err(e) => return Err(e),
    };

    let business_id = business.as_ref().map(|b| b.id.as_str()).or(check.business_id());
    let customers = match business_id {
        Some(id) => state.customers.customers(id).await?,
        None => Vec::new(),
    };
    let summary = DashboardSummary::new(business.as_ref().map(|b| b.name.as_str()), &customers);

    let data = serde_json::to_string(&summary)?;
    let template = include_str!("./static/dashboard.html").replace(
        "</head>",
        &format!("    <script>const DASHBOARD_DATA = {};</script>\n</head>", data),
    );
    Ok(Html(template))
}

async fn serve_business_setup_page() -> Html<&'static str> {
    Html(include_str!("./static/business_setup.html"))
}

#[derive(Debug, Deserialize)]
pub struct BusinessSetupForm {
    pub name: String,
}

/// Register the merchant's business and continue to the dashboard
async fn handle_business_setup(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Extension(user): Extension<User>,
    Form(form): Form<BusinessSetupForm>,
) -> Response {
    match state.business_gate.directory().create(&user.id, &form.name).await {
        Ok(business) => {
            let check = BusinessCheck::from_record(Some(&business));
            state.business_gate.store(&user.id, check.clone());
            let jar = match business_cookie(&user.id, &check, &state.config) {
                Some(cookie) => jar.add(cookie),
                None => jar,
            };
            (jar, Redirect::to(DASHBOARD_ROUTE)).into_response()
        }
        Err(e) => {
            warn!("business setup for {} failed: {}", user.id, e);
            Redirect::to(&format!(
                "{}?error={}",
                BUSINESS_SETUP_ROUTE,
                urlencoding::encode(&e.to_string())
            ))
            .into_response()
        }
    }
}
