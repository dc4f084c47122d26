use crate::domain::models::UserRole;
use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const SESSION_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub role: UserRole,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
    #[error("bad role")]
    Role,
}

pub fn sign_session(user_id: Uuid, role: &UserRole, key: &[u8]) -> Result<String, SessionError> {
    let exp = Utc::now() + Duration::hours(SESSION_HOURS);
    sign_payload(user_id, role, exp.timestamp(), key)
}

fn sign_payload(user_id: Uuid, role: &UserRole, exp: i64, key: &[u8]) -> Result<String, SessionError> {
    let payload = format!("{}|{}|{}", user_id, role_string(role), exp);
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::STANDARD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    let [user_id, role, exp] = pieces.as_slice() else {
        return Err(SessionError::Invalid);
    };
    let user_id = Uuid::parse_str(user_id).map_err(|_| SessionError::Invalid)?;
    let role = parse_role(role)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims { user_id, role })
}

/// Token from `Authorization: Bearer` or the `session` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|pair| pair.trim().strip_prefix("session="))
        .map(str::to_string)
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!(
        "session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure_flag}",
        SESSION_HOURS * 3600
    )
}

fn role_string(role: &UserRole) -> &'static str {
    match role {
        UserRole::User => "USER",
        UserRole::Admin => "ADMIN",
    }
}

fn parse_role(raw: &str) -> Result<UserRole, SessionError> {
    match raw {
        "USER" => Ok(UserRole::User),
        "ADMIN" => Ok(UserRole::Admin),
        _ => Err(SessionError::Role),
    }
}

/// Authenticated caller, taken from a valid signed token. The token alone is
/// trusted until it expires; no user lookup happens here.
///
/// ```ignore
/// async fn handler(UserSession { user_id, .. }: UserSession) { /* ... */ }
/// ```
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: Uuid,
    pub role: UserRole,
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared_state = SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = verify_session(&token, &shared_state.session_key).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            AppError::Unauthorized
        })?;

        Ok(UserSession {
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

/// Like [`UserSession`] but only admits admins.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = UserSession::from_request_parts(parts, state).await?;
        if session.role != UserRole::Admin {
            tracing::warn!("Non-admin {} tried an admin endpoint", session.user_id);
            return Err(AppError::Forbidden);
        }
        Ok(AdminSession(session.user_id))
    }
}
