use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use validator::{Validate, ValidationErrors};

use crate::{
    accounts::{
        dto::{
            field_errors, ActivationResponse, AuthResponse, LoginRequest, ProfileRequest,
            PublicUser, RegisterRequest, RegisteredResponse,
        },
        error::{AccountError, StoreError},
        jwt::{AuthUser, JwtKeys},
    },
    state::AppState,
};

type ApiError = (StatusCode, Json<Value>);

fn fail(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

fn invalid(errors: &ValidationErrors) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "errors": field_errors(errors) })),
    )
}

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    error!(error = %e, "internal error");
    fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn account_error(e: AccountError) -> ApiError {
    match e {
        AccountError::Store(StoreError::EmailTaken) => {
            fail(StatusCode::CONFLICT, "Email already registered")
        }
        AccountError::Store(StoreError::NickTaken) => {
            fail(StatusCode::CONFLICT, "Nick name already taken")
        }
        AccountError::Store(StoreError::NotFound(_)) => {
            fail(StatusCode::NOT_FOUND, "User not found")
        }
        AccountError::NotActivated => fail(StatusCode::FORBIDDEN, "Account is not activated"),
        other => internal(other),
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/activate/:user_id/:activation_code", get(activate))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me))
        .route("/profile/:key", get(show_profile).post(update_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredResponse>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if let Err(errors) = payload.validate() {
        warn!(email = %payload.email, "sign-up rejected by rules");
        return Err(invalid(&errors));
    }

    let taken = state
        .accounts
        .store()
        .find_by_email(&payload.email)
        .await
        .map_err(internal)?;
    if taken.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(fail(StatusCode::CONFLICT, "Email already registered"));
    }

    let id = state
        .accounts
        .register(payload.into())
        .await
        .map_err(account_error)?;

    Ok((StatusCode::CREATED, Json(RegisteredResponse { id })))
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn activate(
    State(state): State<AppState>,
    Path((user_id, activation_code)): Path<(i64, String)>,
) -> Result<(StatusCode, Json<ActivationResponse>), ApiError> {
    let activated = state
        .accounts
        .activate_by_id(user_id, &activation_code)
        .await
        .map_err(account_error)?;

    if !activated {
        warn!(user_id, "activation rejected");
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ActivationResponse { activated: false }),
        ));
    }
    Ok((StatusCode::OK, Json(ActivationResponse { activated: true })))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if let Err(errors) = payload.validate() {
        return Err(invalid(&errors));
    }

    let user = match state
        .accounts
        .authenticate(&payload.email, &payload.password)
        .await
    {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %payload.email, "login invalid credentials");
            return Err(fail(StatusCode::UNAUTHORIZED, "Invalid credentials"));
        }
        Err(e) => return Err(account_error(e)),
    };

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign(user.id).map_err(internal)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        access_token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .accounts
        .store()
        .find_by_id(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            warn!(user_id, "token for missing user");
            fail(StatusCode::UNAUTHORIZED, "User not found")
        })?;

    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state))]
pub async fn show_profile(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    let user = state
        .accounts
        .find_by_profile_key(&key)
        .await
        .map_err(account_error)?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "User not found"))?;

    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(key): Path<String>,
    Json(mut payload): Json<ProfileRequest>,
) -> Result<Json<PublicUser>, ApiError> {
    let mut user = state
        .accounts
        .find_by_profile_key(&key)
        .await
        .map_err(account_error)?
        .ok_or_else(|| fail(StatusCode::NOT_FOUND, "User not found"))?;

    if user.id != user_id {
        warn!(user_id, owner_id = user.id, "profile edit by non-owner");
        return Err(fail(StatusCode::FORBIDDEN, "Not your profile"));
    }

    if let Err(errors) = payload.check() {
        return Err(invalid(&errors));
    }

    state
        .accounts
        .update_profile(&mut user, payload.into())
        .await
        .map_err(account_error)?;

    Ok(Json(PublicUser::from(&user)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::util::ServiceExt;

    use super::*;
    use crate::{
        accounts::{
            mailer::testing::RecordingMailer, password::Argon2Hasher,
            repo::memory::MemoryUserStore, services::AccountService,
        },
        app::build_app,
        config::{AppConfig, JwtConfig, MailConfig},
    };

    struct Harness {
        store: Arc<MemoryUserStore>,
        state: AppState,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryUserStore::default());
        let config = Arc::new(AppConfig {
            database_url: "postgres://unused".into(),
            app_url: "http://test.local/api/v1".into(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
            },
            mail: MailConfig {
                from: "noreply@test.local".into(),
                smtp: None,
            },
        });
        let accounts = AccountService::new(
            store.clone(),
            Arc::new(Argon2Hasher),
            Arc::new(RecordingMailer::default()),
            config.app_url.clone(),
        );
        Harness {
            store,
            state: AppState::from_parts(config, accounts),
        }
    }

    async fn call(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let res = build_app(state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn sign_up(state: &AppState, email: &str) -> i64 {
        let (status, body) = call(
            state,
            post_json(
                "/api/v1/auth/register",
                json!({"email": email, "password": "secret", "password_confirmation": "secret"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn activated_token(h: &Harness, email: &str) -> (i64, String) {
        let id = sign_up(&h.state, email).await;
        let code = h.store.get(id).unwrap().activation_code;
        let (status, _) = call(&h.state, get(&format!("/api/v1/activate/{id}/{code}"), None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &h.state,
            post_json(
                "/api/v1/auth/login",
                json!({"email": email, "password": "secret"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (id, body["access_token"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn health_endpoint_works() {
        let h = harness();
        let res = build_app(h.state.clone())
            .oneshot(get("/api/v1/health", None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_activate_once() {
        let h = harness();
        let id = sign_up(&h.state, "Max@Example.com").await;
        let user = h.store.get(id).unwrap();
        assert_eq!(user.email, "max@example.com");
        assert!(!user.is_active);

        let uri = format!("/api/v1/activate/{id}/{}", user.activation_code);
        let (status, body) = call(&h.state, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activated"], true);

        let (status, body) = call(&h.state, get(&uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["activated"], false);
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() {
        let h = harness();
        sign_up(&h.state, "a@b.com").await;

        let (status, _) = call(
            &h.state,
            post_json(
                "/api/v1/auth/register",
                json!({"email": "A@b.com", "password": "secret", "password_confirmation": "secret"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &h.state,
            post_json(
                "/api/v1/auth/register",
                json!({"email": "nope", "password": "secret", "password_confirmation": "other"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["email"].is_array());
        assert!(body["errors"]["password"].is_array());
    }

    #[tokio::test]
    async fn missing_fields_come_back_as_field_errors() {
        let h = harness();
        let (status, body) = call(
            &h.state,
            post_json(
                "/api/v1/auth/register",
                json!({"password": "secret", "password_confirmation": "secret"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["email"].is_array());
        assert_eq!(h.store.len(), 0);

        let (status, body) = call(
            &h.state,
            post_json("/api/v1/auth/login", json!({"email": "a@b.com"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["errors"]["password"].is_array());
    }

    #[tokio::test]
    async fn login_requires_activation() {
        let h = harness();
        sign_up(&h.state, "a@b.com").await;
        let (status, _) = call(
            &h.state,
            post_json(
                "/api/v1/auth/login",
                json!({"email": "a@b.com", "password": "secret"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn me_hides_secret_fields() {
        let h = harness();
        let (id, token) = activated_token(&h, "a@b.com").await;
        let (status, body) = call(&h.state, get("/api/v1/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id);
        assert_eq!(body["display_name"], "a@b.com");
        assert!(body.get("password_hash").is_none());
        assert!(body.get("activation_code").is_none());

        let (status, _) = call(&h.state, get("/api/v1/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn owner_edits_profile_and_key_moves_to_nick() {
        let h = harness();
        let (id, token) = activated_token(&h, "a@b.com").await;

        let (status, body) = call(
            &h.state,
            post_json(
                &format!("/api/v1/profile/{id}"),
                json!({
                    "email": "ignored@b.com",
                    "first_name": "Ivan",
                    "last_name": "Petrov",
                    "nick_name": "Max",
                    "gender": "male",
                    "birthday": "1990-05-17"
                }),
                Some(&token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@b.com");
        assert_eq!(body["profile_key"], "Max");
        assert_eq!(body["full_name"], "Ivan Petrov");

        let (status, body) = call(&h.state, get("/api/v1/profile/Max", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id);
    }

    #[tokio::test]
    async fn stranger_cannot_edit_profile() {
        let h = harness();
        let (owner, _) = activated_token(&h, "a@b.com").await;
        let (_, stranger_token) = activated_token(&h, "c@d.com").await;

        let (status, _) = call(
            &h.state,
            post_json(
                &format!("/api/v1/profile/{owner}"),
                json!({"nick_name": "Hacker"}),
                Some(&stranger_token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(h.store.get(owner).unwrap().nick_name.is_none());
    }
}
