use crate::errors::DeliveryError;
use crate::notify::{Notification, Notifier};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// JSON payload POSTed to the webhook. Attachment bodies are not sent,
/// only their names.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    text: &'a str,
    attachments: Vec<&'a str>,
}

pub struct WebhookNotifier {
    url: String,
    bearer_token: Option<String>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, bearer_token: Option<String>) -> Result<Self, DeliveryError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DeliveryError::Config(format!("Invalid webhook url: {}", url)));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            bearer_token,
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> String {
        format!("webhook:{}", self.url)
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = WebhookPayload {
            subject: &notification.subject,
            text: &notification.body,
            attachments: notification.attachments.iter().map(|a| a.filename.as_str()).collect(),
        };
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Platform(format!("webhook returned {}: {}", status, body)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            WebhookNotifier::new("ftp://example.com", None),
            Err(DeliveryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // nothing listens on the discard port
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", None).unwrap();
        let err = notifier.send(&Notification::new("s", "b")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Network(_)));
    }
}
