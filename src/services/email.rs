//! Transactional email delivery.
//!
//! Messages are rendered from an [`EmailTemplate`] and handed to an
//! [`EmailTransport`]. Delivery runs as a detached tokio task; failures are
//! retried with exponential backoff and the final failure is logged, never
//! returned to the request that enqueued the message.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{EmailConfig, EmailProvider};
use crate::error::AppError;
use crate::models::{EmailMessage, EmailTemplate};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email provider unreachable: {0}")]
    Transport(String),

    #[error("Email provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for EmailError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::upstream(err.to_string())
    }
}

/// Sends one rendered message
#[async_trait]
pub trait EmailTransport: Send + Sync + std::fmt::Debug {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Hosted email API reached over HTTPS
#[derive(Debug, Clone)]
pub struct HttpEmailTransport {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpEmailTransport {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        Ok(())
    }
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.text,
            "Email (log transport)"
        );
        Ok(())
    }
}

/// Keeps sent messages in memory; can be told to fail
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<EmailMessage>>,
    failures: AtomicU32,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Messages delivered so far
    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EmailTransport for MemoryTransport {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            return Err(EmailError::Transport("simulated failure".to_string()));
        }

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// Build the transport selected by configuration
pub fn transport_from_config(config: &EmailConfig) -> Result<Arc<dyn EmailTransport>, EmailError> {
    Ok(match config.provider {
        EmailProvider::Http => Arc::new(HttpEmailTransport::new(config)?),
        EmailProvider::Log => Arc::new(LogTransport),
    })
}

/// Renders templates and schedules delivery
#[derive(Debug, Clone)]
pub struct EmailService {
    transport: Arc<dyn EmailTransport>,
    from: String,
    max_attempts: u32,
    backoff: Duration,
}

impl EmailService {
    pub fn new(config: &EmailConfig, transport: Arc<dyn EmailTransport>) -> Self {
        Self {
            transport,
            from: config.from.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub fn build_message(&self, to: &str, template: &EmailTemplate) -> EmailMessage {
        let rendered = template.render();

        EmailMessage {
            from: self.from.clone(),
            to: to.to_string(),
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        }
    }

    /// Deliver now, retrying with exponential backoff
    pub async fn send(&self, to: &str, template: &EmailTemplate) -> Result<(), EmailError> {
        let message = self.build_message(to, template);
        let mut delay = self.backoff;
        let mut attempt = 1;

        loop {
            match self.transport.send(&message).await {
                Ok(()) => {
                    debug!(to = %to, template = template.name(), attempt, "Email delivered");
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        to = %to,
                        template = template.name(),
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Email delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Schedule delivery in the background and return the job id
    pub fn enqueue(&self, to: &str, template: EmailTemplate) -> Uuid {
        let job_id = Uuid::new_v4();
        let service = self.clone();
        let to = to.to_string();

        info!(job_id = %job_id, to = %to, template = template.name(), "Queued email");

        tokio::spawn(async move {
            if let Err(e) = service.send(&to, &template).await {
                error!(
                    job_id = %job_id,
                    to = %to,
                    template = template.name(),
                    attempts = service.max_attempts,
                    error = %e,
                    "Email delivery failed permanently"
                );
            }
        });

        job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> EmailConfig {
        EmailConfig {
            provider: EmailProvider::Log,
            api_url: String::new(),
            api_key: String::new(),
            from: "noreply@example.com".to_string(),
            max_attempts,
            backoff_ms: 1,
            timeout_seconds: 5,
        }
    }

    fn welcome() -> EmailTemplate {
        EmailTemplate::Welcome {
            name: Some("Ada".to_string()),
        }
    }

    #[tokio::test]
    async fn test_send_renders_message() {
        let transport = Arc::new(MemoryTransport::new());
        let service = EmailService::new(&config(3), transport.clone());

        service.send("ada@example.com", &welcome()).await.unwrap();

        let messages = transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "noreply@example.com");
        assert_eq!(messages[0].to, "ada@example.com");
        assert!(messages[0].text.contains("Welcome, Ada!"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_next(2);
        let service = EmailService::new(&config(3), transport.clone());

        service.send("ada@example.com", &welcome()).await.unwrap();
        assert_eq!(transport.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_next(3);
        let service = EmailService::new(&config(3), transport.clone());

        let err = service.send("ada@example.com", &welcome()).await.unwrap_err();
        assert!(matches!(err, EmailError::Transport(_)));
        assert!(transport.messages().is_empty());

        // The failure budget is spent, the next message goes through
        service.send("ada@example.com", &welcome()).await.unwrap();
        assert_eq!(transport.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_delivers_in_background() {
        let transport = Arc::new(MemoryTransport::new());
        let service = EmailService::new(&config(1), transport.clone());

        service.enqueue(
            "ada@example.com",
            EmailTemplate::UploadComplete {
                filename: "a.png".to_string(),
            },
        );

        for _ in 0..50 {
            if !transport.messages().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(transport.messages()[0].subject, "Upload finished: a.png");
    }

    #[test]
    fn test_upstream_error_message_is_kept() {
        let err: AppError = EmailError::Rejected {
            status: 422,
            body: "bad".to_string(),
        }
        .into();

        assert!(matches!(err, AppError::Upstream(ref m) if m.contains("422")));
    }
}
