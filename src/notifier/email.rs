use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{debug, info};

use super::{Notifier, NotifyError, SlotDigest, format};
use crate::config::{CHANNEL_EMAIL, EmailConfig};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    SendGrid {
        http: reqwest::Client,
        api_key: SecretString,
    },
    /// Records the digest in the log and reports success.
    Log,
}

pub struct EmailNotifier {
    from_address: String,
    from_name: String,
    transport: Transport,
}

impl EmailNotifier {
    /// SMTP when credentials are configured, then SendGrid, then log-only.
    pub fn from_config(config: &EmailConfig, http: reqwest::Client) -> Result<Self, NotifyError> {
        let transport = if let Some(smtp) = &config.smtp {
            let credentials = Credentials::new(
                smtp.username.clone(),
                smtp.password.expose_secret().to_string(),
            );
            let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .map_err(|e| NotifyError::Smtp(format!("SMTP relay {}: {e}", smtp.host)))?
                .port(smtp.port)
                .credentials(credentials)
                .build();
            Transport::Smtp(mailer)
        } else if let Some(sendgrid) = &config.sendgrid {
            Transport::SendGrid {
                http,
                api_key: sendgrid.api_key.clone(),
            }
        } else {
            Transport::Log
        };

        Ok(Self {
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            transport,
        })
    }

    pub fn transport_name(&self) -> &'static str {
        match self.transport {
            Transport::Smtp(_) => "smtp",
            Transport::SendGrid { .. } => "sendgrid",
            Transport::Log => "log",
        }
    }

    fn build_message(&self, digest: &SlotDigest) -> Result<Message, NotifyError> {
        let from: Mailbox = format!("{} <{}>", self.from_name, self.from_address)
            .parse()
            .map_err(|e| NotifyError::Build(format!("invalid from address: {e}")))?;
        let to: Mailbox = digest
            .team_email
            .parse()
            .map_err(|e| NotifyError::Build(format!("invalid recipient {}: {e}", digest.team_email)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(format::subject(digest))
            .multipart(MultiPart::alternative_plain_html(
                format::text_body(digest),
                format::html_body(digest),
            ))
            .map_err(|e| NotifyError::Build(e.to_string()))
    }

    async fn send_sendgrid(
        &self,
        http: &reqwest::Client,
        api_key: &SecretString,
        digest: &SlotDigest,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "personalizations": [{
                "to": [{ "email": digest.team_email, "name": digest.team_name }],
                "subject": format::subject(digest),
            }],
            "from": { "email": self.from_address, "name": self.from_name },
            "content": [
                { "type": "text/plain", "value": format::text_body(digest) },
                { "type": "text/html", "value": format::html_body(digest) },
            ],
        });

        let response = http
            .post(SENDGRID_ENDPOINT)
            .bearer_auth(api_key.expose_secret())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                channel: "sendgrid",
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &str {
        CHANNEL_EMAIL
    }

    async fn send(&self, digest: &SlotDigest) -> Result<(), NotifyError> {
        if digest.slots.is_empty() {
            return Ok(());
        }
        if digest.team_email.trim().is_empty() {
            return Err(NotifyError::Build(format!(
                "team {} has no email address",
                digest.team_id
            )));
        }

        match &self.transport {
            Transport::Smtp(mailer) => {
                let message = self.build_message(digest)?;
                mailer
                    .send(message)
                    .await
                    .map_err(|e| NotifyError::Smtp(e.to_string()))?;
            }
            Transport::SendGrid { http, api_key } => {
                self.send_sendgrid(http, api_key, digest).await?;
            }
            Transport::Log => {
                info!(
                    team_id = %digest.team_id,
                    to = %digest.team_email,
                    subject = %format::subject(digest),
                    "Email transport not configured, logging notification"
                );
                for slot in &digest.slots {
                    info!(
                        ground = %slot.ground_name,
                        date = %slot.slot_date,
                        time = %slot.time_range(),
                        court = %slot.court_name,
                        "Slot"
                    );
                }
                return Ok(());
            }
        }

        debug!(team_id = %digest.team_id, to = %digest.team_email, "Email sent");
        Ok(())
    }
}
