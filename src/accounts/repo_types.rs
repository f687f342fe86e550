use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

/// Stored as plain TEXT guarded by a CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

/// User record in the database.
///
/// `password_hash`, `activation_code` and `remember_token` are never serialised;
/// anything leaving the service goes through [`PublicUser`](super::dto::PublicUser).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 PHC string
    #[serde(skip_serializing)]
    pub activation_code: String,      // empty once consumed
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub remember_token: Option<String>,
    pub nick_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birthday: Option<Date>,
    pub gender: Option<Gender>,
    pub about: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row about to be inserted; the store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub activation_code: String,
    pub is_active: bool,
}

impl User {
    /// Nick name when set, the email otherwise.
    pub fn display_name(&self) -> &str {
        match self.nick_name.as_deref() {
            Some(nick) if !nick.is_empty() => nick,
            _ => &self.email,
        }
    }

    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
    }

    /// Key used in profile URLs: the nick name when set, the id otherwise.
    pub fn profile_key(&self) -> String {
        match self.nick_name.as_deref() {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => self.id.to_string(),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_user(id: i64, email: &str, nick_name: Option<&str>) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id,
        email: email.to_string(),
        password_hash: "$argon2id$stub".to_string(),
        activation_code: "code".to_string(),
        is_active: false,
        remember_token: None,
        nick_name: nick_name.map(str::to_string),
        first_name: None,
        last_name: None,
        birthday: None,
        gender: None,
        about: None,
        created_at: now,
        updated_at: now,
    }
}
