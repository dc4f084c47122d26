pub mod interviews;
#[cfg(test)]
pub mod memory;

use crate::domain::models::{
    AnsweredTurn, Entitlement, InterviewSession, InterviewTurn, NewSession, UserRole,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub use interviews::PgStore;

/// Everything the interview engine needs to persist. A session's turns are
/// always returned in creation order.
#[async_trait]
pub trait InterviewStore: Send + Sync {
    /// Creates the session together with its first pending turn, claiming
    /// the owner's unused trial when `consume_trial` is set. All or nothing:
    /// returns `TrialTaken` and writes nothing if the trial was already used.
    async fn create_session_with_seed(
        &self,
        new: NewSession,
        first_question: &str,
        consume_trial: bool,
    ) -> Result<CreateOutcome>;

    async fn find_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<InterviewSession>>;

    /// Newest first.
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<InterviewSession>>;

    /// Sets `ended_at` unless it is already set.
    async fn mark_session_ended(&self, id: Uuid) -> Result<()>;

    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<InterviewTurn>>;

    /// Persists one scored answer atomically. Returns `PendingTurnTaken` when
    /// the pending turn to update was answered concurrently.
    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<CommitOutcome>;

    /// Loads the entitlement, creating a `free/inactive` one on first use.
    async fn load_entitlement(&self, user_id: Uuid) -> Result<Entitlement>;
}

#[derive(Debug, Clone)]
pub struct AnswerCommit {
    pub session_id: Uuid,
    pub question: String,
    /// Pending turn asking `question`; updated in place when present.
    pub pending_turn_id: Option<Uuid>,
    /// Pending turn asking a different question, dropped before inserting.
    pub stale_turn_id: Option<Uuid>,
    pub answered: AnsweredTurn,
    /// `None` ends the session; otherwise a new pending turn is created.
    pub next_question: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created {
        session: InterviewSession,
        seed: InterviewTurn,
    },
    TrialTaken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed { next_turn: Option<InterviewTurn> },
    PendingTurnTaken,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub specialty: String,
    pub experience_level: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub specialty: String,
    pub experience_level: String,
}

pub async fn find_user_by_email(pool: &PgPool, email: &str) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(
        r#"
        SELECT id, email, password_hash, role, specialty, experience_level, created_at
        FROM users
        WHERE lower(email) = lower($1)
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_id(pool: &PgPool, id: Uuid) -> Result<Option<DbUser>> {
    let user = sqlx::query_as::<_, DbUser>(
        r#"
        SELECT id, email, password_hash, role, specialty, experience_level, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Creates the user and their free entitlement in one transaction.
pub async fn create_user(pool: &PgPool, new: &NewUser) -> Result<DbUser> {
    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, DbUser>(
        r#"
        INSERT INTO users (id, email, password_hash, specialty, experience_level)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, email, password_hash, role, specialty, experience_level, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(&new.specialty)
    .bind(&new.experience_level)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO entitlements (user_id, plan, status, trial_used)
        VALUES ($1, 'free', 'inactive', FALSE)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(user)
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub felt_real: i16,
    pub helpful_feedback: i16,
    pub score_fair: i16,
    pub issues: Vec<String>,
    pub would_use_again: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<Uuid>,
    pub felt_real: i16,
    pub helpful_feedback: i16,
    pub score_fair: i16,
    pub issues: Vec<String>,
    pub would_use_again: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_feedback(pool: &PgPool, feedback: &NewFeedback) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO feedback
            (id, user_id, session_id, felt_real, helpful_feedback, score_fair, issues, would_use_again, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(feedback.user_id)
    .bind(feedback.session_id)
    .bind(feedback.felt_real)
    .bind(feedback.helpful_feedback)
    .bind(feedback.score_fair)
    .bind(&feedback.issues)
    .bind(&feedback.would_use_again)
    .bind(&feedback.note)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Latest feedback entries, newest first.
pub async fn list_feedback(pool: &PgPool, limit: i64) -> Result<Vec<FeedbackRecord>> {
    let rows = sqlx::query_as::<_, FeedbackRecord>(
        r#"
        SELECT id, user_id, session_id, felt_real, helpful_feedback, score_fair,
               issues, would_use_again, note, created_at
        FROM feedback
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
