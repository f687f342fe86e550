use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use time::{Date, OffsetDateTime};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::accounts::{
    repo_types::{Gender, User},
    services::{ProfileUpdate, Registration},
};

/// Sign-in rules: email required|email|min:5|max:30, password required|min:3|max:20.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(
        email(message = "must be a valid email"),
        length(min = 5, max = 30, message = "must be 5 to 30 characters")
    )]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 3, max = 20, message = "must be 3 to 20 characters"))]
    pub password: String,
}

/// Sign-up rules: email required|email|unique|min:5|max:30,
/// password required|confirmed|min:3|max:20. Uniqueness is checked against the store.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(
        email(message = "must be a valid email"),
        length(min = 5, max = 30, message = "must be 5 to 30 characters")
    )]
    pub email: String,
    #[serde(default)]
    #[validate(
        length(min = 3, max = 20, message = "must be 3 to 20 characters"),
        must_match(other = "password_confirmation", message = "confirmation does not match")
    )]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

impl From<RegisterRequest> for Registration {
    fn from(r: RegisterRequest) -> Self {
        Self {
            email: r.email,
            password: r.password,
        }
    }
}

lazy_static! {
    static ref NICK_RE: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]{0,29}$").unwrap();
}

// A nick doubles as the profile URL key, so it must never look like an id.
fn validate_nick_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || NICK_RE.is_match(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("nick_name");
        err.message = Some(
            "must start with a letter and contain only letters, digits, '_', '.' or '-' (max 30)"
                .into(),
        );
        Err(err)
    }
}

// Absent field -> `None` (keep), explicit `null` -> `Some(None)` (clear).
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Profile form. The read-only `email` field is ignored on submit.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProfileRequest {
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub first_name: Option<String>,
    #[validate(length(max = 50, message = "must be at most 50 characters"))]
    pub last_name: Option<String>,
    #[validate(custom(function = "validate_nick_name"))]
    pub nick_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub birthday: Option<Option<Date>>,
    #[serde(default, deserialize_with = "nullable")]
    pub gender: Option<Option<Gender>>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub about: Option<String>,
    #[validate(length(min = 3, max = 20, message = "must be 3 to 20 characters"))]
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
}

impl ProfileRequest {
    /// Field rules plus password confirmation. Blank password fields mean
    /// "keep the current password".
    pub fn check(&mut self) -> Result<(), ValidationErrors> {
        if self.password.as_deref() == Some("") {
            self.password = None;
        }
        if self.password_confirmation.as_deref() == Some("") {
            self.password_confirmation = None;
        }

        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };
        if self.password.is_some() && self.password != self.password_confirmation {
            let mut err = ValidationError::new("confirmed");
            err.message = Some("confirmation does not match".into());
            errors.add("password", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<ProfileRequest> for ProfileUpdate {
    fn from(r: ProfileRequest) -> Self {
        Self {
            first_name: r.first_name,
            last_name: r.last_name,
            nick_name: r.nick_name,
            birthday: r.birthday,
            gender: r.gender,
            about: r.about,
            password: r.password,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct ActivationResponse {
    pub activated: bool,
}

/// Response returned after login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: PublicUser,
}

/// The only shape in which a user leaves the service.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub nick_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birthday: Option<Date>,
    pub gender: Option<Gender>,
    pub about: Option<String>,
    pub is_active: bool,
    pub display_name: String,
    pub full_name: String,
    pub profile_key: String,
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            nick_name: u.nick_name.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            birthday: u.birthday,
            gender: u.gender,
            about: u.about.clone(),
            is_active: u.is_active,
            display_name: u.display_name().to_string(),
            full_name: u.full_name(),
            profile_key: u.profile_key(),
            created_at: u.created_at,
        }
    }
}

/// `{field: [message, ...]}` body returned with 422.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub fn field_errors(errors: &ValidationErrors) -> FieldErrors {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}
