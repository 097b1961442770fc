//! Runtime configuration.
//!
//! Values come from an optional TOML file and are then overridden by
//! `LOYALTY_*` environment variables. Durations use humantime notation
//! (`"2s"`, `"2m"`, `"24h"`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Minimum length of a cookie signing secret, in bytes
pub const MIN_COOKIE_SECRET_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// SMTP settings for sending verification and reset codes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind_address: String,
    pub database_dir: PathBuf,

    /// How long the session gate waits for the provider before falling back
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub business_check_timeout: Duration,

    /// Lifetime of a cached "has a business" answer
    #[serde(with = "humantime_serde")]
    pub business_cache_ttl: Duration,

    #[serde(with = "humantime_serde")]
    pub session_duration: Duration,

    #[serde(with = "humantime_serde")]
    pub otp_lifetime: Duration,

    pub min_password_length: usize,
    pub cookie_secret: Option<String>,
    pub secure_cookies: bool,
    pub log_level: String,
    pub mail: Option<MailConfig>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            bind_address: "127.0.0.1:3000".to_string(),
            database_dir: PathBuf::from("database"),
            auth_timeout: Duration::from_secs(2),
            business_check_timeout: Duration::from_secs(2),
            business_cache_ttl: Duration::from_secs(2 * 60),
            session_duration: Duration::from_secs(24 * 60 * 60),
            otp_lifetime: Duration::from_secs(60 * 60),
            min_password_length: 6,
            cookie_secret: None,
            secure_cookies: false,
            log_level: "info".to_string(),
            mail: None,
        }
    }
}

impl DashboardConfig {
    /// Load the configuration file (if any), apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `LOYALTY_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LOYALTY_BIND_ADDRESS") {
            self.bind_address = bind;
        }
        if let Some(dir) = lookup("LOYALTY_DATABASE_DIR") {
            self.database_dir = PathBuf::from(dir);
        }
        if let Some(secret) = lookup("LOYALTY_COOKIE_SECRET") {
            self.cookie_secret = Some(secret);
        }
        if let Some(level) = lookup("LOYALTY_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = lookup("LOYALTY_AUTH_TIMEOUT") {
            self.auth_timeout = parse_duration("auth_timeout", &raw)?;
        }
        if let Some(raw) = lookup("LOYALTY_BUSINESS_CHECK_TIMEOUT") {
            self.business_check_timeout = parse_duration("business_check_timeout", &raw)?;
        }
        if let Some(raw) = lookup("LOYALTY_BUSINESS_CACHE_TTL") {
            self.business_cache_ttl = parse_duration("business_cache_ttl", &raw)?;
        }
        if let Some(raw) = lookup("LOYALTY_SECURE_COOKIES") {
            self.secure_cookies = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("auth_timeout", self.auth_timeout),
            ("business_check_timeout", self.business_check_timeout),
            ("session_duration", self.session_duration),
            ("otp_lifetime", self.otp_lifetime),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        // the business cookie's Max-Age is counted in whole seconds
        if self.business_cache_ttl < Duration::from_secs(1) {
            return Err(ConfigError::Invalid {
                key: "business_cache_ttl",
                reason: "must be at least one second".to_string(),
            });
        }

        if let Some(secret) = &self.cookie_secret {
            if secret.len() < MIN_COOKIE_SECRET_LEN {
                return Err(ConfigError::Invalid {
                    key: "cookie_secret",
                    reason: format!("must be at least {} bytes", MIN_COOKIE_SECRET_LEN),
                });
            }
        }

        if self.min_password_length == 0 {
            return Err(ConfigError::Invalid {
                key: "min_password_length",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    pub fn users_file(&self) -> PathBuf {
        self.database_dir.join("users.json")
    }

    pub fn businesses_file(&self) -> PathBuf {
        self.database_dir.join("businesses.json")
    }

    pub fn customers_dir(&self) -> PathBuf {
        self.database_dir.join("customers")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.database_dir.join("outbox")
    }
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_gate_constants() {
        let config = DashboardConfig::default();
        assert_eq!(config.auth_timeout, Duration::from_secs(2));
        assert_eq!(config.business_cache_ttl, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_durations_are_humantime() {
        let config = DashboardConfig::from_toml_str(
            r#"
            bind_address = "0.0.0.0:8080"
            auth_timeout = "500ms"
            business_cache_ttl = "5m"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.auth_timeout, Duration::from_millis(500));
        assert_eq!(config.business_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.min_password_length, 6);
    }

    #[test]
    fn mail_section_parses() {
        let config = DashboardConfig::from_toml_str(
            r#"
            [mail]
            host = "smtp.example.com"
            username = "mailer"
            password = "secret"
            from = "Loyalty <no-reply@example.com>"
            "#,
        )
        .unwrap();
        let mail = config.mail.unwrap();
        assert_eq!(mail.port, 465);
        assert_eq!(mail.host, "smtp.example.com");
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LOYALTY_BIND_ADDRESS", "127.0.0.1:9999"),
            ("LOYALTY_AUTH_TIMEOUT", "750ms"),
            ("LOYALTY_BUSINESS_CHECK_TIMEOUT", "3s"),
            ("LOYALTY_SECURE_COOKIES", "true"),
        ]);
        let mut config = DashboardConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9999");
        assert_eq!(config.auth_timeout, Duration::from_millis(750));
        assert_eq!(config.business_check_timeout, Duration::from_secs(3));
        assert!(config.secure_cookies);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = DashboardConfig::default();
        let err = config
            .apply_overrides(|key| (key == "LOYALTY_AUTH_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "auth_timeout", .. }));
    }

    #[test]
    fn short_cookie_secret_is_rejected() {
        let config = DashboardConfig {
            cookie_secret: Some("too short".to_string()),
            ..DashboardConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = DashboardConfig {
            auth_timeout: Duration::ZERO,
            ..DashboardConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sub_second_cache_ttl_is_rejected() {
        for ttl in [Duration::ZERO, Duration::from_millis(500)] {
            let config = DashboardConfig {
                business_cache_ttl: ttl,
                ..DashboardConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "business_cache_ttl", .. }));
        }
    }
}
