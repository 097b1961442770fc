use crate::config::MailConfig;
use crate::provider::ProviderError;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::info;
use rand::Rng;
use std::time::Duration;

/// Why a one-time code is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    VerifyEmail,
    PasswordReset,
}

impl CodePurpose {
    fn subject(&self) -> &'static str {
        match self {
            CodePurpose::VerifyEmail => "Confirm your email address",
            CodePurpose::PasswordReset => "Password Reset Request",
        }
    }

    fn body(&self, code: &str, lifetime: Duration) -> String {
        let minutes = (lifetime.as_secs() / 60).max(1);
        match self {
            CodePurpose::VerifyEmail => format!(
                "Your verification code is: {}\nThis code will expire in {} minutes.",
                code, minutes
            ),
            CodePurpose::PasswordReset => format!(
                "Your password reset code is: {}\nThis code will expire in {} minutes.",
                code, minutes
            ),
        }
    }
}

/// Delivers one-time codes to users
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_code(
        &self,
        to_email: &str,
        purpose: CodePurpose,
        code: &str,
        lifetime: Duration,
    ) -> Result<(), ProviderError>;
}

/// SMTP notifier
pub struct Mailer {
    smtp: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn new(config: &MailConfig) -> Result<Self, ProviderError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| ProviderError::Backend(format!("invalid sender address: {}", e)))?;

        let smtp = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .build();

        Ok(Mailer { smtp, from })
    }
}

#[async_trait]
impl Notifier for Mailer {
    async fn send_code(
        &self,
        to_email: &str,
        purpose: CodePurpose,
        code: &str,
        lifetime: Duration,
    ) -> Result<(), ProviderError> {
        let to = to_email
            .parse::<Mailbox>()
            .map_err(|_| ProviderError::InvalidEmail)?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(purpose.subject())
            .body(purpose.body(code, lifetime))
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        self.smtp
            .send(email)
            .await
            .map_err(|e| ProviderError::Backend(format!("failed to send email: {}", e)))?;
        info!("sent {:?} code to {}", purpose, to_email);
        Ok(())
    }
}

/// Writes codes to the log instead of mailing them, for local setups
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_code(
        &self,
        to_email: &str,
        purpose: CodePurpose,
        code: &str,
        lifetime: Duration,
    ) -> Result<(), ProviderError> {
        info!(
            "mail is not configured; {:?} code for {} is {} (valid {:?})",
            purpose, to_email, code, lifetime
        );
        Ok(())
    }
}

/// Random 8-character code of uppercase letters and digits
pub fn generate_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
