use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Implicit TLS from the first byte (port 465).
    Wrapper,
    /// Plaintext greeting upgraded with STARTTLS (port 587).
    StartTls,
    /// No encryption. Local relays only.
    None,
}

impl SmtpTls {
    /// `SMTP_TLS` wins when set; otherwise port 465 means implicit TLS and
    /// everything else STARTTLS.
    pub fn resolve(value: Option<&str>, port: u16) -> anyhow::Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("wrapper") | Some("tls") => Ok(Self::Wrapper),
            Some("starttls") => Ok(Self::StartTls),
            Some("none") | Some("off") => Ok(Self::None),
            Some(other) => anyhow::bail!("unknown SMTP_TLS mode {other:?}"),
            None if port == 465 => Ok(Self::Wrapper),
            None => Ok(Self::StartTls),
        }
    }
}

/// SMTP relay settings. Absent when `SMTP_HOST` is unset; mail is then only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls: SmtpTls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Public base URL used to build links sent by email.
    pub app_url: String,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let app_url = std::env::var("APP_URL")
            .unwrap_or_else(|_| "http://localhost:8080/api/v1".into())
            .trim_end_matches('/')
            .to_string();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "accounts".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "accounts-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
        };
        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => {
                let port = std::env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587);
                let tls = SmtpTls::resolve(std::env::var("SMTP_TLS").ok().as_deref(), port)?;
                Some(SmtpConfig {
                    host,
                    port,
                    username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                    password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                    tls,
                })
            }
            Err(_) => None,
        };
        let mail = MailConfig {
            from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "noreply@localhost".into()),
            smtp,
        };
        Ok(Self {
            database_url,
            app_url,
            jwt,
            mail,
        })
    }
}
