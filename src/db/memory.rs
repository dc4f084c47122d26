//! In-memory store for engine tests. Mirrors the Postgres constraints that
//! matter to the engine: one pending turn per session and answer-once
//! updates.

use super::{AnswerCommit, CommitOutcome, CreateOutcome, InterviewStore};
use crate::domain::models::{
    AnsweredTurn, Entitlement, InterviewSession, InterviewTurn, NewSession, TurnState,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, InterviewSession>>,
    turns: RwLock<Vec<InterviewTurn>>,
    entitlements: RwLock<HashMap<Uuid, Entitlement>>,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_entitlement(&self, user_id: Uuid, entitlement: Entitlement) {
        self.entitlements.write().await.insert(user_id, entitlement);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of successful `commit_answer` calls.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Answers a pending turn behind the engine's back, as a concurrent
    /// writer would.
    pub async fn steal_pending_turn(&self, turn_id: Uuid, answered: AnsweredTurn) {
        let mut turns = self.turns.write().await;
        if let Some(turn) = turns.iter_mut().find(|t| t.id == turn_id) {
            turn.state = TurnState::Answered(Box::new(answered));
        }
    }

    fn push_pending(turns: &mut Vec<InterviewTurn>, session_id: Uuid, question: &str) -> Result<InterviewTurn> {
        if turns.iter().any(|t| t.session_id == session_id && t.is_seed()) {
            bail!("session {session_id} already has a pending turn");
        }
        let turn = InterviewTurn {
            id: Uuid::new_v4(),
            session_id,
            question: question.to_string(),
            state: TurnState::Seed,
            created_at: next_timestamp(turns),
        };
        turns.push(turn.clone());
        Ok(turn)
    }
}

// Strictly increasing timestamps so creation order is unambiguous.
fn next_timestamp(turns: &[InterviewTurn]) -> chrono::DateTime<Utc> {
    let now = Utc::now();
    match turns.iter().map(|t| t.created_at).max() {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl InterviewStore for MemoryStore {
    async fn create_session_with_seed(
        &self,
        new: NewSession,
        first_question: &str,
        consume_trial: bool,
    ) -> Result<CreateOutcome> {
        // Held for the whole creation so claiming the trial is atomic.
        let mut entitlements = self.entitlements.write().await;
        if consume_trial {
            let entitlement = entitlements.entry(new.user_id).or_insert_with(free_entitlement);
            if entitlement.trial_used {
                return Ok(CreateOutcome::TrialTaken);
            }
        }

        let session = InterviewSession {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            mode: new.mode,
            specialty: new.specialty,
            experience_level: new.experience_level,
            hospital_name: new.hospital_name,
            job_text: new.job_text,
            created_at: Utc::now(),
            ended_at: None,
        };
        let seed = {
            let mut turns = self.turns.write().await;
            Self::push_pending(&mut turns, session.id, first_question)?
        };
        if consume_trial {
            entitlements
                .entry(new.user_id)
                .or_insert_with(free_entitlement)
                .trial_used = true;
        }
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(CreateOutcome::Created { session, seed })
    }

    async fn find_session(&self, id: Uuid, user_id: Uuid) -> Result<Option<InterviewSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&id)
            .filter(|s| s.user_id == user_id)
            .cloned())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<InterviewSession>> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn mark_session_ended(&self, id: Uuid) -> Result<()> {
        if let Some(session) = self.sessions.write().await.get_mut(&id) {
            session.ended_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<InterviewTurn>> {
        let mut turns: Vec<_> = self
            .turns
            .read()
            .await
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        Ok(turns)
    }

    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<CommitOutcome> {
        let mut turns = self.turns.write().await;

        if let Some(pending_id) = commit.pending_turn_id {
            let still_pending = turns.iter().any(|t| t.id == pending_id && t.is_seed());
            if !still_pending {
                return Ok(CommitOutcome::PendingTurnTaken);
            }
        }

        if let Some(stale_id) = commit.stale_turn_id {
            turns.retain(|t| !(t.id == stale_id && t.is_seed()));
        }

        let answered = TurnState::Answered(Box::new(commit.answered.clone()));
        match commit.pending_turn_id {
            Some(pending_id) => {
                if let Some(turn) = turns.iter_mut().find(|t| t.id == pending_id) {
                    turn.state = answered;
                }
            }
            None => {
                let turn = InterviewTurn {
                    id: Uuid::new_v4(),
                    session_id: commit.session_id,
                    question: commit.question.clone(),
                    state: answered,
                    created_at: next_timestamp(&turns),
                };
                turns.push(turn);
            }
        }

        let next_turn = match &commit.next_question {
            Some(question) => Some(Self::push_pending(&mut turns, commit.session_id, question)?),
            None => {
                drop(turns);
                self.mark_session_ended(commit.session_id).await?;
                None
            }
        };

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(CommitOutcome::Committed { next_turn })
    }

    async fn load_entitlement(&self, user_id: Uuid) -> Result<Entitlement> {
        let mut entitlements = self.entitlements.write().await;
        Ok(entitlements
            .entry(user_id)
            .or_insert_with(free_entitlement)
            .clone())
    }
}

fn free_entitlement() -> Entitlement {
    Entitlement {
        plan: "free".to_string(),
        status: "inactive".to_string(),
        trial_used: false,
    }
}
