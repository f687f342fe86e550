use std::sync::Arc;

use crate::accounts::{
    mailer,
    password::Argon2Hasher,
    repo::PgUserStore,
    services::AccountService,
};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: AccountService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await;

        let mailer = mailer::from_config(&config.mail)?;
        if config.mail.smtp.is_none() {
            tracing::warn!("SMTP_HOST not set; outgoing mail is only logged");
        }

        let accounts = AccountService::new(
            Arc::new(PgUserStore::new(pool)),
            Arc::new(Argon2Hasher),
            mailer,
            config.app_url.clone(),
        );

        Ok(Self::from_parts(config, accounts))
    }

    pub fn from_parts(config: Arc<AppConfig>, accounts: AccountService) -> Self {
        Self { config, accounts }
    }
}
