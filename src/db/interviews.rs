use super::{AnswerCommit, CommitOutcome, CreateOutcome, InterviewStore};
use crate::domain::models::{
    AnsweredTurn, Entitlement, InterviewSession, InterviewTurn, NewSession, ScoreTriple,
    TurnFeedback, TurnState,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

const SESSION_COLUMNS: &str =
    "id, user_id, mode, specialty, experience_level, hospital_name, job_text, created_at, ended_at";
const TURN_COLUMNS: &str =
    "id, session_id, question, user_answer, ai_feedback, ai_improved_answer, scores, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Row shape of interview_turns; a NULL answer marks the pending turn.
#[derive(Debug, FromRow)]
struct TurnRow {
    id: Uuid,
    session_id: Uuid,
    question: String,
    user_answer: Option<String>,
    ai_feedback: Option<Json<TurnFeedback>>,
    ai_improved_answer: String,
    scores: Json<ScoreTriple>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TurnRow> for InterviewTurn {
    type Error = anyhow::Error;

    fn try_from(row: TurnRow) -> Result<Self> {
        let state = match row.user_answer {
            None => TurnState::Seed,
            Some(answer) => {
                let Json(feedback) = row
                    .ai_feedback
                    .with_context(|| format!("answered turn {} has no feedback", row.id))?;
                let Json(scores) = row.scores;
                TurnState::Answered(Box::new(AnsweredTurn {
                    answer,
                    feedback,
                    improved_answer: row.ai_improved_answer,
                    scores,
                }))
            }
        };
        Ok(InterviewTurn {
            id: row.id,
            session_id: row.session_id,
            question: row.question,
            state,
            created_at: row.created_at,
        })
    }
}

async fn insert_pending_turn(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    question: &str,
) -> Result<InterviewTurn> {
    let row = sqlx::query_as::<_, TurnRow>(&format!(
        r#"
        INSERT INTO interview_turns (id, session_id, question, created_at, updated_at)
        VALUES ($1, $2, $3, clock_timestamp(), clock_timestamp())
        RETURNING {TURN_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(session_id)
    .bind(question)
    .fetch_one(&mut **tx)
    .await?;
    row.try_into()
}

#[async_trait]
impl InterviewStore for PgStore {
    async fn create_session_with_seed(
        &self,
        new: NewSession,
        first_question: &str,
        consume_trial: bool,
    ) -> Result<CreateOutcome> {
        let mut tx = self.pool.begin().await?;

        if consume_trial {
            // Only one concurrent start may flip the flag.
            let claimed = sqlx::query(
                r#"
                UPDATE entitlements
                SET trial_used = TRUE, updated_at = NOW()
                WHERE user_id = $1 AND trial_used = FALSE
                "#,
            )
            .bind(new.user_id)
            .execute(&mut *tx)
            .await?;

            if claimed.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(CreateOutcome::TrialTaken);
            }
        }

        let session = sqlx::query_as::<_, InterviewSession>(&format!(
            r#"
            INSERT INTO interview_sessions
                (id, user_id, mode, specialty, experience_level, hospital_name, job_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(new.mode)
        .bind(&new.specialty)
        .bind(&new.experience_level)
        .bind(&new.hospital_name)
        .bind(&new.job_text)
        .fetch_one(&mut *tx)
        .await?;

        let seed = insert_pending_turn(&mut tx, session.id, first_question).await?;

        tx.commit().await?;
        Ok(CreateOutcome::Created { session, seed })
    }

    async fn find_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<InterviewSession>> {
        let session = sqlx::query_as::<_, InterviewSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM interview_sessions WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<InterviewSession>> {
        let sessions = sqlx::query_as::<_, InterviewSession>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM interview_sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn mark_session_ended(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE interview_sessions SET ended_at = NOW() WHERE id = $1 AND ended_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<InterviewTurn>> {
        let rows = sqlx::query_as::<_, TurnRow>(&format!(
            r#"
            SELECT {TURN_COLUMNS}
            FROM interview_turns
            WHERE session_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InterviewTurn::try_from).collect()
    }

    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        let answered = &commit.answered;
        let feedback = Json(&answered.feedback);
        let scores = Json(answered.scores);

        if let Some(stale_id) = commit.stale_turn_id {
            sqlx::query("DELETE FROM interview_turns WHERE id = $1 AND user_answer IS NULL")
                .bind(stale_id)
                .execute(&mut *tx)
                .await?;
        }

        match commit.pending_turn_id {
            Some(pending_id) => {
                let updated = sqlx::query(
                    r#"
                    UPDATE interview_turns
                    SET user_answer = $2,
                        ai_feedback = $3,
                        ai_improved_answer = $4,
                        scores = $5,
                        updated_at = NOW()
                    WHERE id = $1 AND user_answer IS NULL
                    "#,
                )
                .bind(pending_id)
                .bind(&answered.answer)
                .bind(&feedback)
                .bind(&answered.improved_answer)
                .bind(&scores)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() == 0 {
                    tx.rollback().await?;
                    return Ok(CommitOutcome::PendingTurnTaken);
                }
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO interview_turns
                        (id, session_id, question, user_answer, ai_feedback, ai_improved_answer, scores, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp(), clock_timestamp())
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(commit.session_id)
                .bind(&commit.question)
                .bind(&answered.answer)
                .bind(&feedback)
                .bind(&answered.improved_answer)
                .bind(&scores)
                .execute(&mut *tx)
                .await?;
            }
        }

        let next_turn = match &commit.next_question {
            Some(question) => Some(insert_pending_turn(&mut tx, commit.session_id, question).await?),
            None => {
                sqlx::query(
                    "UPDATE interview_sessions SET ended_at = NOW() WHERE id = $1 AND ended_at IS NULL",
                )
                .bind(commit.session_id)
                .execute(&mut *tx)
                .await?;
                None
            }
        };

        tx.commit().await?;
        Ok(CommitOutcome::Committed { next_turn })
    }

    async fn load_entitlement(&self, user_id: Uuid) -> Result<Entitlement> {
        let entitlement = sqlx::query_as::<_, Entitlement>(
            r#"
            INSERT INTO entitlements (user_id, plan, status, trial_used)
            VALUES ($1, 'free', 'inactive', FALSE)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING plan, status, trial_used
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(entitlement)
    }
}
