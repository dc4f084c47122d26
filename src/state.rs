use crate::interview::InterviewEngine;
use crate::middleware::RateLimiter;
use sqlx::PgPool;
use std::sync::Arc;

/// Login attempts per client IP per minute.
pub const LOGIN_ATTEMPTS_PER_MINUTE: usize = 5;
/// Scored answers per user per minute; each one costs an oracle call.
pub const ANSWERS_PER_MINUTE: usize = 30;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub engine: Arc<InterviewEngine>,
    pub session_key: Vec<u8>,
    pub secure_cookies: bool,
    pub login_limiter: RateLimiter,
    pub answer_limiter: RateLimiter,
}

impl AppState {
    pub fn new(pool: PgPool, engine: Arc<InterviewEngine>, session_key: Vec<u8>, secure_cookies: bool) -> Self {
        Self {
            pool,
            engine,
            session_key,
            secure_cookies,
            login_limiter: RateLimiter::new(LOGIN_ATTEMPTS_PER_MINUTE, 60),
            answer_limiter: RateLimiter::new(ANSWERS_PER_MINUTE, 60),
        }
    }
}

pub type SharedState = Arc<AppState>;
