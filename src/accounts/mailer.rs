use std::{collections::BTreeMap, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use handlebars::Handlebars;
use lazy_static::lazy_static;
use lettre::{
    message::{header::ContentType, Mailbox}, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::config::{MailConfig, SmtpConfig, SmtpTls};

pub const ACTIVATION_TEMPLATE: &str = "emails/auth/activation";

/// Render context of a mail template, keyed by placeholder name.
pub type MailVars = BTreeMap<&'static str, String>;

/// Outbound mail dispatch.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        template: &str,
        vars: &MailVars,
        recipient: &str,
        subject: &str,
    ) -> anyhow::Result<()>;
}

const ACTIVATION_BODY: &str = "Здравствуйте!\n\n\
     Для активации аккаунта перейдите по ссылке:\n\
     {{activationUrl}}\n";

fn builtin_templates() -> Result<Handlebars<'static>, handlebars::TemplateError> {
    let mut engine = Handlebars::new();
    // Plain-text bodies: URLs must go out unescaped, and a missing variable is an error.
    engine.register_escape_fn(handlebars::no_escape);
    engine.set_strict_mode(true);
    engine.register_template_string(ACTIVATION_TEMPLATE, ACTIVATION_BODY)?;
    Ok(engine)
}

lazy_static! {
    static ref TEMPLATES: Handlebars<'static> =
        builtin_templates().expect("built-in mail templates must compile");
}

/// Render a registered template with `vars` as the context.
pub fn render(template: &str, vars: &MailVars) -> anyhow::Result<String> {
    if !TEMPLATES.has_template(template) {
        anyhow::bail!("unknown mail template {template}");
    }
    TEMPLATES
        .render(template, vars)
        .with_context(|| format!("render mail template {template}"))
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(smtp: &SmtpConfig, from: &str) -> anyhow::Result<Self> {
        let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
        let builder = match smtp.tls {
            SmtpTls::Wrapper => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host).context("smtp relay")?
            }
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
                .context("smtp starttls relay")?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host),
        };
        let transport = builder.port(smtp.port).credentials(creds).build();
        Ok(Self {
            transport,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        template: &str,
        vars: &MailVars,
        recipient: &str,
        subject: &str,
    ) -> anyhow::Result<()> {
        let body = render(template, vars)?;
        let email = Message::builder()
            .from(self.from.parse::<Mailbox>().context("parse from address")?)
            .to(recipient.parse::<Mailbox>().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        self.transport.send(email).await.context("smtp send")?;
        debug!(%recipient, %template, "mail sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured: the rendered mail only goes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        template: &str,
        vars: &MailVars,
        recipient: &str,
        subject: &str,
    ) -> anyhow::Result<()> {
        let body = render(template, vars)?;
        info!(%recipient, %subject, %template, %body, "mail not sent: smtp disabled");
        Ok(())
    }
}

pub fn from_config(config: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.from)?),
        None => Arc::new(LogMailer),
    };
    Ok(mailer)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct SentMail {
        pub template: String,
        pub vars: MailVars,
        pub recipient: String,
        pub subject: String,
    }

    /// Records every dispatched mail; fails every send when `failing` is set.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<SentMail>>,
        pub failing: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(
            &self,
            template: &str,
            vars: &MailVars,
            recipient: &str,
            subject: &str,
        ) -> anyhow::Result<()> {
            if self.failing {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(SentMail {
                template: template.to_string(),
                vars: vars.clone(),
                recipient: recipient.to_string(),
                subject: subject.to_string(),
            });
            Ok(())
        }
    }
}
