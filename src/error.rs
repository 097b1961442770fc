use crate::config::ConfigError;
use crate::customer::RowError;
use crate::format::FormatError;
use crate::provider::ProviderError;
use crate::query::QueryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Export error: {0}")]
    Export(String),

    #[error("{0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Message safe to show to the merchant
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Provider(err) => {
                crate::provider::friendly_auth_message(&err.to_string()).to_string()
            }
            DashboardError::Io(_) | DashboardError::Csv(_) | DashboardError::Json(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for DashboardError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            DashboardError::Query(_)
            | DashboardError::Format(_)
            | DashboardError::Row(_)
            | DashboardError::Validation(_) => StatusCode::BAD_REQUEST,
            DashboardError::Provider(ProviderError::Backend(_)) => StatusCode::BAD_GATEWAY,
            DashboardError::Provider(ProviderError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            DashboardError::Provider(ProviderError::BusinessExists) => StatusCode::CONFLICT,
            DashboardError::Forbidden(_) => StatusCode::FORBIDDEN,
            DashboardError::Provider(_) | DashboardError::Unauthorized => StatusCode::UNAUTHORIZED,
            DashboardError::NotFound(_) => StatusCode::NOT_FOUND,
            DashboardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            log::error!("request failed: {}", self);
        } else {
            log::warn!("request rejected ({}): {}", status.as_u16(), self);
        }

        (
            status,
            axum::Json(serde_json::json!({ "error": self.user_message() })),
        )
            .into_response()
    }
}
