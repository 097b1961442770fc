//! Session gate.
//!
//! Resolves "who is looking at this page" the way the dashboard's views do on
//! mount: ask the provider for the session, but never wait longer than the
//! configured timeout. When the provider is slow on a protected page the
//! gate trusts the routing guard, which already let the request through, and
//! resolves to [`AuthState::AssumedAuthenticated`] instead of leaving the
//! view loading forever.

use crate::provider::{AuthProvider, User};
use crate::routes::{is_auth_route, login_redirect};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Identity the gate resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "user", rename_all = "camelCase")]
pub enum AuthState {
    Unauthenticated,
    Authenticated(User),
    /// The provider did not answer in time; the upstream guard's decision stands
    AssumedAuthenticated,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthState::Unauthenticated)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

/// What a view should do once the session is known
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub auth: AuthState,
    pub is_loading: bool,
    pub redirect: Option<String>,
    pub error: Option<String>,
}

impl SessionSnapshot {
    /// State of a view before the gate has answered
    pub fn loading() -> Self {
        SessionSnapshot {
            auth: AuthState::Unauthenticated,
            is_loading: true,
            redirect: None,
            error: None,
        }
    }

    fn resolved(auth: AuthState) -> Self {
        SessionSnapshot {
            auth,
            is_loading: false,
            redirect: None,
            error: None,
        }
    }
}

/// Mounted flag of the view that started a resolution
///
/// Clones share the flag; unmounting any clone unmounts them all.
#[derive(Debug, Clone)]
pub struct ViewHandle {
    mounted: Arc<AtomicBool>,
}

impl ViewHandle {
    pub fn mount() -> Self {
        ViewHandle {
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

pub struct SessionGate {
    provider: Arc<dyn AuthProvider>,
    timeout: Duration,
}

impl SessionGate {
    pub fn new(provider: Arc<dyn AuthProvider>, timeout: Duration) -> Self {
        SessionGate { provider, timeout }
    }

    /// Resolve the session for a view showing `route`
    ///
    /// `token` is the session token the client holds, if any.
    pub async fn resolve(&self, token: Option<&str>, route: &str) -> SessionSnapshot {
        let on_auth_route = is_auth_route(route);

        let Some(token) = token else {
            return Self::signed_out(route, on_auth_route);
        };

        match tokio::time::timeout(self.timeout, self.provider.get_session(token)).await {
            Err(_) if on_auth_route => {
                warn!("session check timed out after {:?} on {}", self.timeout, route);
                SessionSnapshot {
                    error: Some("Authentication check timed out. Please try again.".to_string()),
                    ..SessionSnapshot::resolved(AuthState::Unauthenticated)
                }
            }
            Err(_) => {
                warn!(
                    "session check timed out after {:?} on {}, trusting the route guard",
                    self.timeout, route
                );
                SessionSnapshot::resolved(AuthState::AssumedAuthenticated)
            }
            Ok(Ok(Some(session))) if !session.is_expired() => {
                debug!("session for user {} is valid", session.user.id);
                SessionSnapshot::resolved(AuthState::Authenticated(session.user))
            }
            Ok(Ok(_)) => Self::signed_out(route, on_auth_route),
            Ok(Err(e)) => {
                warn!("session check failed on {}: {}", route, e);
                SessionSnapshot {
                    error: Some(e.to_string()),
                    ..Self::signed_out(route, on_auth_route)
                }
            }
        }
    }

    /// Like [`SessionGate::resolve`], but drops the answer if the view went away
    pub async fn resolve_for(
        &self,
        view: &ViewHandle,
        token: Option<&str>,
        route: &str,
    ) -> Option<SessionSnapshot> {
        let snapshot = self.resolve(token, route).await;
        if view.is_mounted() {
            Some(snapshot)
        } else {
            debug!("view for {} unmounted, discarding session result", route);
            None
        }
    }

    fn signed_out(route: &str, on_auth_route: bool) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::resolved(AuthState::Unauthenticated);
        if !on_auth_route {
            let target = login_redirect(route);
            info!("no session on {}, redirecting to {}", route, target);
            snapshot.redirect = Some(target);
        }
        snapshot
    }
}
