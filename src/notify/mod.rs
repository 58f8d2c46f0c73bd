//! Outbound notification channels.

pub mod email;
pub mod webhook;

use crate::config::NotificationTarget;
use crate::errors::DeliveryError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use email::EmailNotifier;
pub use webhook::WebhookNotifier;

/// A file sent along with a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Notification {
    pub fn new(subject: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// 通知发送接口
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel label used in logs, e.g. `email:ops@example.com`.
    fn name(&self) -> String;

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Build one notifier per configured target.
///
/// A target that cannot be built (bad host, unset password variable) is a
/// `DeliveryError::Config`; the caller decides whether that is fatal.
pub fn build_notifier(target: &NotificationTarget) -> Result<Arc<dyn Notifier>, DeliveryError> {
    match target {
        NotificationTarget::Email {
            smtp_host,
            smtp_port,
            username,
            password_env,
            from,
            to,
            attach_artifacts,
        } => {
            let password = std::env::var(password_env)
                .map_err(|_| DeliveryError::Config(format!("environment variable {} is not set", password_env)))?;
            let notifier = EmailNotifier::new(smtp_host, *smtp_port, username, &password, from, to)?
                .with_attachments(*attach_artifacts);
            Ok(Arc::new(notifier))
        }
        NotificationTarget::Webhook { url, bearer_token_env } => {
            let token = match bearer_token_env {
                Some(var) => Some(
                    std::env::var(var)
                        .map_err(|_| DeliveryError::Config(format!("environment variable {} is not set", var)))?,
                ),
                None => None,
            };
            Ok(Arc::new(WebhookNotifier::new(url, token)?))
        }
    }
}

/// Builds every target, collecting the ones that failed instead of aborting.
pub fn build_notifiers(targets: &[NotificationTarget]) -> (Vec<Arc<dyn Notifier>>, Vec<(String, DeliveryError)>) {
    let mut notifiers = Vec::new();
    let mut failures = Vec::new();
    for target in targets {
        match build_notifier(target) {
            Ok(n) => notifiers.push(n),
            Err(e) => failures.push((target.describe(), e)),
        }
    }
    (notifiers, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_password_variable_is_config_error() {
        let target = NotificationTarget::Email {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "bot".into(),
            password_env: "STOCK_PIPELINE_TEST_UNSET_PASSWORD".into(),
            from: "bot@example.com".into(),
            to: vec!["ops@example.com".into()],
            attach_artifacts: true,
        };
        let (notifiers, failures) = build_notifiers(&[target]);
        assert!(notifiers.is_empty());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "email:ops@example.com");
        assert!(matches!(failures[0].1, DeliveryError::Config(_)));
    }

    #[test]
    fn webhook_without_token_builds() {
        let target = NotificationTarget::Webhook {
            url: "http://127.0.0.1:9/hook".into(),
            bearer_token_env: None,
        };
        let notifier = build_notifier(&target).unwrap();
        assert_eq!(notifier.name(), "webhook:http://127.0.0.1:9/hook");
    }
}
