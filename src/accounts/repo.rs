use async_trait::async_trait;
use sqlx::PgPool;

use crate::accounts::{
    error::StoreError,
    repo_types::{NewUser, User},
};

const USER_COLUMNS: &str = "id, email, password_hash, activation_code, is_active, remember_token, \
     nick_name, first_name, last_name, birthday, gender, about, created_at, updated_at";

/// Persistence for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with [`StoreError::EmailTaken`] on a duplicate email.
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;

    /// Write every mutable column of an existing user.
    async fn save(&self, user: &User) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_nick_name(&self, nick_name: &str) -> Result<Option<User>, StoreError>;

    /// Flip a pending user to active if `code` still matches.
    /// Returns `false` when another request got there first.
    async fn activate_pending(&self, id: i64, code: &str) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const NICK_NAME_KEY: &str = "users_nick_name_key";

/// Which unique index a violation hit. Email is the only other one on `users`.
fn unique_violation(constraint: Option<&str>) -> StoreError {
    match constraint {
        Some(NICK_NAME_KEY) => StoreError::NickTaken,
        _ => StoreError::EmailTaken,
    }
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return unique_violation(db_err.constraint());
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash, activation_code, is_active)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.activation_code)
            .bind(user.is_active)
            .fetch_one(&self.db)
            .await
            .map_err(map_write_error)
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, activation_code = $3, is_active = $4, remember_token = $5,
                nick_name = $6, first_name = $7, last_name = $8, birthday = $9,
                gender = $10, about = $11, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(&user.activation_code)
        .bind(user.is_active)
        .bind(&user.remember_token)
        .bind(&user.nick_name)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.birthday)
        .bind(user.gender)
        .bind(&user.about)
        .execute(&self.db)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user.id));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_nick_name(&self, nick_name: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE nick_name = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(nick_name)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn activate_pending(&self, id: i64, code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_active = TRUE, activation_code = '', updated_at = now()
            WHERE id = $1 AND is_active = FALSE AND activation_code = $2
            "#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
