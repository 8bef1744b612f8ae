//! Mail channel — async SMTP sending via lettre. The recipient is the
//! destination address.

use async_trait::async_trait;

use opspilot_core::config::MailChannelConfig;
use opspilot_core::error::{OpsPilotError, Result};
use opspilot_core::traits::DeliveryChannel;

pub struct MailChannel {
    config: MailChannelConfig,
}

impl MailChannel {
    pub fn new(config: MailChannelConfig) -> Self {
        Self { config }
    }

    /// Subject is the first line of the content, bounded.
    fn subject_for(content: &str) -> String {
        let first = content.lines().next().unwrap_or("").trim();
        if first.is_empty() {
            return "OpsPilot update".into();
        }
        first.chars().take(78).collect()
    }
}

#[async_trait]
impl DeliveryChannel for MailChannel {
    fn name(&self) -> &str {
        "mail"
    }

    async fn send(&self, recipient: &str, content: &str) -> Result<()> {
        use lettre::{
            message::header::ContentType, message::Mailbox,
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Message, Tokio1Executor,
        };

        let from_name = self.config.display_name.as_deref().unwrap_or("OpsPilot");
        let from_mailbox: Mailbox = format!("{from_name} <{}>", self.config.from_address)
            .parse()
            .map_err(|e| OpsPilotError::Channel(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = recipient
            .parse()
            .map_err(|e| OpsPilotError::Channel(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(Self::subject_for(content))
            .header(ContentType::TEXT_PLAIN)
            .body(content.to_string())
            .map_err(|e| OpsPilotError::Channel(format!("Build mail: {e}")))?;

        let creds = Credentials::new(
            self.config.from_address.clone(),
            self.config.password.clone(),
        );
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| OpsPilotError::Channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| OpsPilotError::Channel(format!("SMTP send: {e}")))?;
        Ok(())
    }
}
