//! Routing guard.
//!
//! Runs in front of every route and decides, from the session cookie and the
//! business check, whether the request may continue or where it should be
//! sent instead. The business check is cached in a signed cookie for the
//! configured TTL so most navigations do not touch the directory at all.

use crate::app::AppState;
use crate::business::BusinessCheck;
use crate::config::DashboardConfig;
use crate::error::DashboardError;
use crate::provider::{BusinessStatus, Session, User};
use crate::routes::{
    BUSINESS_SETUP_ROUTE, DASHBOARD_ROUTE, is_api_route, is_auth_route, is_public_route,
    login_redirect,
};
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SESSION_COOKIE: &str = "session";
pub const BUSINESS_COOKIE: &str = "business_check";

/// Business check as cached in the signed cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessCookie {
    pub user_id: String,
    pub has_business: bool,
    pub status: Option<BusinessStatus>,
    #[serde(default)]
    pub business_id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl BusinessCookie {
    /// Only directory answers are cached; an assumed check yields `None`
    pub fn from_check(user_id: &str, check: &BusinessCheck) -> Option<Self> {
        match check {
            BusinessCheck::Verified {
                has_business,
                status,
                business_id,
            } => Some(BusinessCookie {
                user_id: user_id.to_string(),
                has_business: *has_business,
                status: *status,
                business_id: business_id.clone(),
                timestamp: Utc::now().timestamp_millis(),
            }),
            BusinessCheck::Assumed => None,
        }
    }

    pub fn is_fresh_for(&self, user_id: &str, ttl: Duration) -> bool {
        let age_ms = Utc::now().timestamp_millis() - self.timestamp;
        self.user_id == user_id && age_ms >= 0 && (age_ms as u128) < ttl.as_millis()
    }

    pub fn check(&self) -> BusinessCheck {
        BusinessCheck::Verified {
            has_business: self.has_business,
            status: self.status,
            business_id: self.business_id.clone(),
        }
    }
}

fn max_age(duration: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

/// Signed cookie carrying the session token
pub fn session_cookie(session: &Session, config: &DashboardConfig) -> Cookie<'static> {
    let lifetime = (session.expires_at - Utc::now()).to_std().unwrap_or_default();
    Cookie::build((SESSION_COOKIE, session.token.clone()))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(max_age(lifetime))
        .build()
}

/// Signed cookie caching a directory answer, if the check is cacheable
pub fn business_cookie(
    user_id: &str,
    check: &BusinessCheck,
    config: &DashboardConfig,
) -> Option<Cookie<'static>> {
    let payload = BusinessCookie::from_check(user_id, check)?;
    let value = serde_json::to_string(&payload).ok()?;
    Some(
        Cookie::build((BUSINESS_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(config.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(max_age(config.business_cache_ttl))
            .build(),
    )
}

pub fn clear_auth_cookies(jar: SignedCookieJar) -> SignedCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
        .remove(Cookie::build(BUSINESS_COOKIE).path("/"))
}

/// Read the cached business check, dropping the cookie when it is unreadable
fn cached_business(jar: SignedCookieJar, user_id: &str, ttl: Duration) -> (SignedCookieJar, Option<BusinessCheck>) {
    let Some(cookie) = jar.get(BUSINESS_COOKIE) else {
        return (jar, None);
    };

    match serde_json::from_str::<BusinessCookie>(cookie.value()) {
        Ok(cached) if cached.is_fresh_for(user_id, ttl) => {
            debug!("business check for {} served from cookie", user_id);
            (jar, Some(cached.check()))
        }
        Ok(_) => (jar, None),
        Err(e) => {
            warn!("discarding malformed business cookie: {}", e);
            (jar.remove(Cookie::build(BUSINESS_COOKIE).path("/")), None)
        }
    }
}

/// What the provider said about the session cookie
enum SessionLookup {
    Found(Session),
    /// No cookie, or the provider answered that the session is gone
    Missing,
    /// The provider failed or did not answer in time
    Unavailable(DashboardError),
}

async fn current_session(state: &AppState, jar: &SignedCookieJar) -> SessionLookup {
    let Some(token) = jar.get(SESSION_COOKIE) else {
        return SessionLookup::Missing;
    };
    let timeout = state.config.auth_timeout;
    match tokio::time::timeout(timeout, state.auth.get_session(token.value())).await {
        Ok(Ok(Some(session))) if !session.is_expired() => SessionLookup::Found(session),
        Ok(Ok(_)) => SessionLookup::Missing,
        Ok(Err(e)) => {
            warn!("session lookup failed: {}", e);
            SessionLookup::Unavailable(e.into())
        }
        Err(_) => {
            warn!("session lookup timed out after {:?}", timeout);
            SessionLookup::Unavailable(DashboardError::Timeout(timeout))
        }
    }
}

/// Answer for a protected path while the session cannot be looked up
///
/// The cookies are left alone so the merchant stays signed in once the
/// provider recovers.
fn session_unavailable(api: bool, err: DashboardError) -> Response {
    if api {
        return err.into_response();
    }
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [(header::RETRY_AFTER, "3")],
        Html(include_str!("./static/unavailable.html")),
    )
        .into_response()
}

/// Business check for `user`, from the cookie, the gate's cache or the directory
///
/// A fresh directory answer is written back as a cookie when `remember` is set.
async fn business_check(
    state: &AppState,
    jar: SignedCookieJar,
    user: &User,
    remember: bool,
) -> (SignedCookieJar, BusinessCheck) {
    let (jar, cached) = cached_business(jar, &user.id, state.config.business_cache_ttl);
    if let Some(check) = cached {
        return (jar, check);
    }

    match state.business_gate.check(&user.id).await {
        Ok(check) => match business_cookie(&user.id, &check, &state.config).filter(|_| remember) {
            Some(cookie) => (jar.add(cookie), check),
            None => (jar, check),
        },
        Err(e) => {
            warn!("business check for {} failed, letting the request through: {}", user.id, e);
            (jar, BusinessCheck::Assumed)
        }
    }
}

/// No session: auth pages pass, `/api` answers `401`, other pages go to login
///
/// A session cookie the provider no longer knows is cleared.
async fn signed_out(jar: SignedCookieJar, request: Request, next: Next, path: &str, api: bool) -> Response {
    if is_auth_route(path) {
        return next.run(request).await;
    }
    let jar = if jar.get(SESSION_COOKIE).is_some() {
        clear_auth_cookies(jar)
    } else {
        jar
    };
    if api {
        return (jar, DashboardError::Unauthorized).into_response();
    }
    let original = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.to_string());
    let target = login_redirect(&original);
    info!("no session for {}, redirecting to {}", original, target);
    (jar, Redirect::to(&target)).into_response()
}

/// Route guard middleware
///
/// Public paths pass untouched. Without a session, auth pages pass and
/// everything else is sent to the login page (or answered with `401` under
/// `/api`). When the provider cannot tell, protected paths are answered with
/// `503` (`504` under `/api`) and the cookies are kept. With a session, auth
/// pages bounce to the dashboard and the business check decides between the
/// requested page and business setup (`403` under `/api`). Requests that
/// pass carry the [`User`] and the [`BusinessCheck`] in their extensions.
pub async fn route_guard(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_route(&path) {
        return next.run(request).await;
    }

    let api = is_api_route(&path);
    let session = match current_session(&state, &jar).await {
        SessionLookup::Found(session) => session,
        SessionLookup::Unavailable(_) if is_auth_route(&path) => return next.run(request).await,
        SessionLookup::Unavailable(err) => return session_unavailable(api, err),
        SessionLookup::Missing => return signed_out(jar, request, next, &path, api).await,
    };

    let user = session.user;
    if is_auth_route(&path) {
        debug!("user {} is signed in, leaving {}", user.id, path);
        return (jar, Redirect::to(DASHBOARD_ROUTE)).into_response();
    }

    // setup answers set their own business cookie once the business exists
    let on_setup = path == BUSINESS_SETUP_ROUTE;
    let (jar, check) = business_check(&state, jar, &user, !on_setup).await;

    if on_setup && check.allows_dashboard() && check != BusinessCheck::Assumed {
        return (jar, Redirect::to(DASHBOARD_ROUTE)).into_response();
    }
    if !on_setup && !check.allows_dashboard() {
        if api {
            let err = DashboardError::Forbidden("An active business is required".to_string());
            return (jar, err).into_response();
        }
        info!("user {} has no active business, redirecting to setup", user.id);
        return (jar, Redirect::to(BUSINESS_SETUP_ROUTE)).into_response();
    }

    request.extensions_mut().insert(user);
    request.extensions_mut().insert(check);
    (jar, next.run(request).await).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verified(active: bool) -> BusinessCheck {
        BusinessCheck::Verified {
            has_business: true,
            status: Some(if active {
                BusinessStatus::Active
            } else {
                BusinessStatus::Pending
            }),
            business_id: Some("biz-1".to_string()),
        }
    }

    #[test]
    fn assumed_checks_are_not_cached() {
        assert_eq!(BusinessCookie::from_check("u1", &BusinessCheck::Assumed), None);
        assert!(BusinessCookie::from_check("u1", &verified(true)).is_some());
    }

    #[test]
    fn cookie_is_bound_to_user_and_ttl() {
        let cookie = BusinessCookie::from_check("u1", &verified(true)).unwrap();
        assert!(cookie.is_fresh_for("u1", Duration::from_secs(120)));
        assert!(!cookie.is_fresh_for("u2", Duration::from_secs(120)));

        let stale = BusinessCookie {
            timestamp: cookie.timestamp - 121_000,
            ..cookie.clone()
        };
        assert!(!stale.is_fresh_for("u1", Duration::from_secs(120)));
        assert_eq!(cookie.check(), verified(true));
    }

    #[test]
    fn cookie_payload_uses_camel_case() {
        let cookie = BusinessCookie::from_check("u1", &verified(false)).unwrap();
        let json = serde_json::to_value(&cookie).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["hasBusiness"], true);
        assert_eq!(json["status"], "pending");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn business_cookie_lives_for_the_cache_ttl() {
        let config = DashboardConfig::default();
        let cookie = business_cookie("u1", &verified(true), &config).unwrap();
        assert_eq!(cookie.name(), BUSINESS_COOKIE);
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(120)));
        assert_eq!(cookie.http_only(), Some(true));
    }
}
