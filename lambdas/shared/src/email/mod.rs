//! Templated email through SES
//!
//! Templates are stored in SES per language as `{template}-{language}` and
//! merged with JSON data at send time.

pub mod markdown;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ses::error::DisplayErrorContext;
use aws_sdk_ses::types::{Destination, Template};
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{Error, Result};

pub use markdown::{markdown_to_html, markdown_to_template, markdown_to_text, EmailTemplate};

/// A send request for a stored template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatedEmail {
    pub template: String,
    pub from: String,
    pub to: Vec<String>,
    /// Merge data, JSON encoded when sent
    pub data: Value,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_templated(&self, email: &TemplatedEmail) -> Result<()>;

    /// Create or replace a stored template
    async fn put_template(&self, template: &EmailTemplate) -> Result<()>;
}

pub struct SesMailer {
    client: aws_sdk_ses::Client,
}

impl SesMailer {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ses::Client::new(sdk_config),
        }
    }
}

fn ses_error<E: std::error::Error + 'static>(err: E) -> Error {
    Error::Email(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send_templated(&self, email: &TemplatedEmail) -> Result<()> {
        let destination = Destination::builder()
            .set_to_addresses(Some(email.to.clone()))
            .build();

        self.client
            .send_templated_email()
            .source(&email.from)
            .destination(destination)
            .template(&email.template)
            .template_data(email.data.to_string())
            .send()
            .await
            .map_err(ses_error)?;

        Ok(())
    }

    async fn put_template(&self, template: &EmailTemplate) -> Result<()> {
        let ses_template = Template::builder()
            .template_name(&template.name)
            .subject_part(&template.subject)
            .text_part(&template.text)
            .html_part(&template.html)
            .build()
            .map_err(|e| Error::Email(e.to_string()))?;

        let updated = self
            .client
            .update_template()
            .template(ses_template.clone())
            .send()
            .await;

        match updated {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_template_does_not_exist_exception()) =>
            {
                info!(template = %template.name, "Creating email template");
                self.client
                    .create_template()
                    .template(ses_template)
                    .send()
                    .await
                    .map_err(ses_error)?;
                Ok(())
            }
            Err(err) => Err(ses_error(err)),
        }
    }
}

/// Send `{template}-{language}` to the recipients
pub async fn send_templated_mail(
    mailer: &dyn Mailer,
    template: &str,
    language: &str,
    from: &str,
    to: Vec<String>,
    data: Value,
) -> Result<()> {
    let email = TemplatedEmail {
        template: format!("{}-{}", template, language),
        from: from.to_string(),
        to,
        data,
    };
    info!(template = %email.template, recipients = email.to.len(), "Sending email");
    mailer.send_templated(&email).await
}

/// Distinct non-empty addresses, compared ignoring case, in order of appearance
pub fn email_to<'a>(addresses: impl IntoIterator<Item = Option<&'a str>>) -> Vec<String> {
    let mut to: Vec<String> = Vec::new();
    for address in addresses.into_iter().flatten() {
        let address = address.trim();
        if address.is_empty() {
            continue;
        }
        if to.iter().any(|a| a.eq_ignore_ascii_case(address)) {
            continue;
        }
        to.push(address.to_string());
    }
    if to.is_empty() {
        warn!("No recipients for email");
    }
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMailer;
    use serde_json::json;

    #[test]
    fn test_email_to_dedups_ignoring_case() {
        let to = email_to([Some("Owner@Example.com"), Some("owner@example.com"), None, Some(" ")]);
        assert_eq!(to, vec!["Owner@Example.com".to_string()]);
    }

    #[test]
    fn test_email_to_keeps_distinct() {
        let to = email_to([Some("handler@example.com"), Some("owner@example.com")]);
        assert_eq!(to.len(), 2);
    }

    #[tokio::test]
    async fn test_send_templated_mail_names_template_by_language() {
        let mailer = RecordingMailer::new();
        send_templated_mail(
            &mailer,
            "registration",
            "sv",
            "from@example.com",
            vec!["to@example.com".into()],
            json!({"subject": "Hej"}),
        )
        .await
        .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "registration-sv");
        assert_eq!(sent[0].data["subject"], "Hej");
    }
}
