use std::sync::Arc;

use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::{info, instrument, warn};

use crate::accounts::{
    error::AccountError,
    mailer::{MailVars, Mailer, ACTIVATION_TEMPLATE},
    password::PasswordHasher,
    repo::UserStore,
    repo_types::{Gender, NewUser, User},
};

const ACTIVATION_CODE_LEN: usize = 16;
const ACTIVATION_SUBJECT: &str = "Спасибо за регистрацию";

/// Random opaque token mailed to the user to confirm their address.
pub fn generate_activation_code() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(ACTIVATION_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Sign-up candidate that already passed the sign-up rules.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
}

/// Profile form values. `None` leaves the stored value alone,
/// `Some("")` on a text field and `Some(None)` on a date or choice clear it.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nick_name: Option<String>,
    pub birthday: Option<Option<time::Date>>,
    pub gender: Option<Option<Gender>>,
    pub about: Option<String>,
    pub password: Option<String>,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn Mailer>,
    base_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn Mailer>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            hasher,
            mailer,
            base_url: base_url.into(),
        }
    }

    pub fn store(&self) -> &dyn UserStore {
        self.store.as_ref()
    }

    pub fn activation_url(&self, user: &User) -> String {
        format!(
            "{}/activate/{}/{}",
            self.base_url, user.id, user.activation_code
        )
    }

    /// Store a pending user and mail them an activation link. Returns the new id.
    ///
    /// A failed mail is logged and does not undo the registration.
    #[instrument(skip(self, candidate), fields(email = %candidate.email))]
    pub async fn register(&self, candidate: Registration) -> Result<i64, AccountError> {
        let password_hash = self
            .hasher
            .hash(&candidate.password)
            .map_err(AccountError::Hash)?;

        let user = self
            .store
            .create(NewUser {
                email: candidate.email,
                password_hash,
                activation_code: generate_activation_code(),
                is_active: false,
            })
            .await?;

        info!(
            user_id = user.id,
            email = %user.email,
            activation_code = %user.activation_code,
            "user registered"
        );

        if let Err(e) = self.send_activation_mail(&user).await {
            warn!(error = %e, user_id = user.id, "activation mail failed");
        }

        Ok(user.id)
    }

    pub async fn send_activation_mail(&self, user: &User) -> anyhow::Result<()> {
        let mut vars = MailVars::new();
        vars.insert("activationUrl", self.activation_url(user));
        self.mailer
            .send(ACTIVATION_TEMPLATE, &vars, &user.email, ACTIVATION_SUBJECT)
            .await
    }

    /// Consume the activation code. `Ok(false)` when the account is already
    /// active or the code does not match; the record is left untouched then.
    #[instrument(skip(self, user, supplied_code), fields(user_id = user.id))]
    pub async fn activate(&self, user: &mut User, supplied_code: &str) -> Result<bool, AccountError> {
        if user.is_active {
            return Ok(false);
        }
        if supplied_code != user.activation_code {
            return Ok(false);
        }

        if !self.store.activate_pending(user.id, supplied_code).await? {
            warn!("activation lost a race with a concurrent request");
            return Ok(false);
        }

        user.activation_code.clear();
        user.is_active = true;

        info!(email = %user.email, "user successfully activated");
        Ok(true)
    }

    /// Load and activate. An unknown id is reported the same as a wrong code.
    pub async fn activate_by_id(&self, user_id: i64, supplied_code: &str) -> Result<bool, AccountError> {
        match self.store.find_by_id(user_id).await? {
            Some(mut user) => self.activate(&mut user, supplied_code).await,
            None => Ok(false),
        }
    }

    /// Check sign-in credentials. `Ok(None)` for an unknown email or a wrong password.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>, AccountError> {
        let Some(user) = self.store.find_by_email(email).await? else {
            return Ok(None);
        };
        let ok = self
            .hasher
            .verify(password, &user.password_hash)
            .map_err(AccountError::Hash)?;
        if !ok {
            return Ok(None);
        }
        if !user.is_active {
            return Err(AccountError::NotActivated);
        }
        Ok(Some(user))
    }

    /// Apply the profile form and persist.
    #[instrument(skip(self, user, update), fields(user_id = user.id))]
    pub async fn update_profile(&self, user: &mut User, update: ProfileUpdate) -> Result<(), AccountError> {
        if let Some(v) = update.first_name {
            user.first_name = non_empty(v);
        }
        if let Some(v) = update.last_name {
            user.last_name = non_empty(v);
        }
        if let Some(v) = update.nick_name {
            user.nick_name = non_empty(v);
        }
        if let Some(v) = update.about {
            user.about = non_empty(v);
        }
        if let Some(v) = update.birthday {
            user.birthday = v;
        }
        if let Some(v) = update.gender {
            user.gender = v;
        }
        if let Some(password) = update.password.filter(|p| !p.is_empty()) {
            user.password_hash = self.hasher.hash(&password).map_err(AccountError::Hash)?;
            info!("password changed");
        }

        self.store.save(user).await?;
        info!("profile updated");
        Ok(())
    }

    /// Resolve a profile URL key: a nick name, or a numeric id when no nick matches.
    pub async fn find_by_profile_key(&self, key: &str) -> Result<Option<User>, AccountError> {
        if let Some(user) = self.store.find_by_nick_name(key).await? {
            return Ok(Some(user));
        }
        match key.parse::<i64>() {
            Ok(id) => Ok(self
                .store
                .find_by_id(id)
                .await?
                .filter(|u| u.profile_key() == key)),
            Err(_) => Ok(None),
        }
    }
}
