use crate::db::{self, DbUser, NewUser};
use crate::error::AppError;
use crate::middleware::rate_limit_middleware;
use crate::state::SharedState;
use crate::web::session::{self, UserSession};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use rand_core::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};

const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern must compile")
});

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub specialty: String,
    #[serde(default)]
    pub experience_level: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: DbUser,
    pub token: String,
}

pub fn router(state: SharedState) -> Router {
    let limited_login = post(login).route_layer(middleware::from_fn_with_state(
        state.login_limiter.clone(),
        rate_limit_middleware,
    ));
    Router::new()
        .route("/register", post(register))
        .route("/login", limited_login)
        .route("/me", get(me))
        .with_state(state)
}

fn require_fields(fields: &[(&str, &str)]) -> Result<(), AppError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Missing fields: {}", missing.join(", "))))
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {e}")))
}

fn with_session_cookie(state: &SharedState, token: &str) -> Result<HeaderMap, AppError> {
    let cookie = session::session_cookie(token, state.secure_cookies);
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(e.into()))?,
    );
    Ok(headers)
}

async fn register(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_fields(&[
        ("email", payload.email.as_str()),
        ("password", payload.password.as_str()),
        ("specialty", payload.specialty.as_str()),
        ("experience_level", payload.experience_level.as_str()),
    ])?;
    let email = payload.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email".to_string()));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    if db::find_user_by_email(&state.pool, &email).await?.is_some() {
        return Err(AppError::Validation("Email already registered".to_string()));
    }

    let user = db::create_user(
        &state.pool,
        &NewUser {
            email,
            password_hash: hash_password(&payload.password)?,
            specialty: payload.specialty.trim().to_string(),
            experience_level: payload.experience_level.trim().to_string(),
        },
    )
    .await?;

    let token = session::sign_session(user.id, &user.role, &state.session_key)
        .map_err(|e| AppError::Internal(e.into()))?;
    let headers = with_session_cookie(&state, &token)?;
    tracing::info!("User {} registered", user.id);

    Ok((StatusCode::CREATED, headers, Json(AuthResponse { user, token })))
}

async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_fields(&[
        ("email", payload.email.as_str()),
        ("password", payload.password.as_str()),
    ])?;
    let user = db::find_user_by_email(&state.pool, payload.email.trim())
        .await?
        .ok_or(AppError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password_hash).map_err(|_| AppError::Unauthorized)?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(AppError::Unauthorized);
    }

    let token = session::sign_session(user.id, &user.role, &state.session_key)
        .map_err(|e| AppError::Internal(e.into()))?;
    let headers = with_session_cookie(&state, &token)?;

    Ok((headers, Json(AuthResponse { user, token })))
}

#[derive(Serialize)]
struct MeResponse {
    user: DbUser,
}

async fn me(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
) -> Result<Json<MeResponse>, AppError> {
    let user = db::find_user_by_id(&state.pool, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(MeResponse { user }))
}
