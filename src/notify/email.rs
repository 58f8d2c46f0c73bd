use crate::errors::DeliveryError;
use crate::notify::{Notification, Notifier};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP notifier. Port 465 uses implicit TLS, anything else STARTTLS.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
    attach_artifacts: bool,
}

fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e| DeliveryError::Config(format!("Invalid address {}: {}", address, e)))
}

impl EmailNotifier {
    pub fn new(
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
        from: &str,
        to: &[String],
    ) -> Result<Self, DeliveryError> {
        if to.is_empty() {
            return Err(DeliveryError::Config("no email recipients".to_string()));
        }
        let creds = Credentials::new(user.to_string(), pass.to_string());
        let builder = if port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(|e| DeliveryError::Config(format!("Invalid SMTP host: {}", e)))?;
        let mailer = builder
            .port(port)
            .credentials(creds)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            mailer,
            from: mailbox(from)?,
            to: to.iter().map(|t| mailbox(t)).collect::<Result<_, _>>()?,
            attach_artifacts: true,
        })
    }

    pub fn with_attachments(mut self, enabled: bool) -> Self {
        self.attach_artifacts = enabled;
        self
    }

    /// Plain-text body, plus one part per attachment when enabled.
    pub fn build_message(&self, notification: &Notification) -> Result<Message, DeliveryError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.subject.clone());
        for to in &self.to {
            builder = builder.to(to.clone());
        }

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(notification.body.clone()));
        if self.attach_artifacts {
            for a in &notification.attachments {
                let content_type = ContentType::parse(&a.content_type)
                    .map_err(|e| DeliveryError::Platform(format!("Bad content type {}: {}", a.content_type, e)))?;
                parts = parts.singlepart(MailAttachment::new(a.filename.clone()).body(a.data.clone(), content_type));
            }
        }

        builder
            .multipart(parts)
            .map_err(|e| DeliveryError::Platform(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> String {
        let to: Vec<String> = self.to.iter().map(|m| m.email.to_string()).collect();
        format!("email:{}", to.join(","))
    }

    async fn send(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let email = self.build_message(notification)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| DeliveryError::Network(format!("SMTP error: {}", e)))?;
        Ok(())
    }
}
