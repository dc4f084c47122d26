use crate::db::{AnswerCommit, CommitOutcome, CreateOutcome, InterviewStore};
use crate::domain::entitlement::{access_for, SessionAccess, TRIAL_USED_MESSAGE};
use crate::domain::models::{
    AnsweredTurn, AnswerTier, EvidenceQuotes, InterviewMode, InterviewSession, InterviewTurn,
    NewSession, ScoreTriple, ScoringDebug, SessionSummary, TurnFeedback,
};
use crate::interview::questions::{is_same_question, FallbackBank, DEFAULT_FALLBACK_QUESTIONS};
use crate::interview::report::{build_report, SessionReport};
use crate::scoring::{reconcile::reconcile, tuner::tune_improved_answer};
use crate::services::ai::{InterviewOracle, OracleError, OracleRequest, OracleTurn, PriorTurn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

const ALREADY_ANSWERED: &str = "This question was already answered. Reload the session to continue.";
const NONSENSE_STRENGTH: &str = "Shows willingness to answer";
const NONSENSE_IMPROVEMENTS: [&str; 3] = [
    "Response is too short or lacks clinical detail.",
    "Add assessment data, actions taken, and outcomes tied to the question.",
    "Avoid filler; provide a specific scenario with actions and result.",
];

#[derive(Debug, thiserror::Error)]
pub enum InterviewError {
    #[error("{0}")]
    Validation(String),
    #[error("Mode must be quick or full (got \"{0}\")")]
    InvalidMode(String),
    #[error("Session not found")]
    SessionNotFound,
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fallback_questions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_questions: DEFAULT_FALLBACK_QUESTIONS
                .iter()
                .map(|q| q.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub specialty: String,
    #[serde(default)]
    pub experience_level: String,
    pub hospital_name: Option<String>,
    pub job_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStart {
    pub session: InterviewSession,
    pub question: String,
    pub next_question_preview: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitAnswerRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

/// Feedback for one scored answer, as returned to the candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerFeedback {
    pub scores: ScoreTriple,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub improved_answer: String,
    pub evidence: EvidenceQuotes,
    pub missing: Vec<String>,
    pub summary: Option<SessionSummary>,
    #[serde(rename = "_debug")]
    pub debug: ScoringDebug,
}

impl From<&AnsweredTurn> for AnswerFeedback {
    fn from(answered: &AnsweredTurn) -> Self {
        let feedback = &answered.feedback;
        Self {
            scores: answered.scores,
            strengths: feedback.strengths.clone(),
            improvements: feedback.improvements.clone(),
            improved_answer: answered.improved_answer.clone(),
            evidence: feedback.evidence.clone(),
            missing: feedback.missing.clone(),
            summary: feedback.summary.clone(),
            debug: feedback.debug.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub status: SessionStatus,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub next_question_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedback>,
}

impl SubmitOutcome {
    fn completed(session_id: Uuid, feedback: Option<AnswerFeedback>) -> Self {
        Self {
            status: SessionStatus::Completed,
            session_id,
            question: None,
            next_question_preview: String::new(),
            feedback,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListItem {
    pub id: Uuid,
    pub mode: InterviewMode,
    pub specialty: String,
    pub experience_level: String,
    pub hospital_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl From<InterviewSession> for SessionListItem {
    fn from(session: InterviewSession) -> Self {
        let status = if session.is_ended() {
            SessionStatus::Completed
        } else {
            SessionStatus::InProgress
        };
        Self {
            id: session.id,
            mode: session.mode,
            specialty: session.specialty,
            experience_level: session.experience_level,
            hospital_name: session.hospital_name,
            created_at: session.created_at,
            ended_at: session.ended_at,
            status,
        }
    }
}

impl From<&InterviewTurn> for PriorTurn {
    fn from(turn: &InterviewTurn) -> Self {
        let answered = turn.answered();
        Self {
            question: turn.question.clone(),
            user_answer: answered.map(|a| a.answer.clone()),
            improved_answer: answered
                .map(|a| a.improved_answer.clone())
                .unwrap_or_default(),
            scores: turn.scores(),
        }
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn missing_fields(fields: &[(&str, &str)]) -> Option<InterviewError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        None
    } else {
        Some(InterviewError::Validation(format!(
            "Missing fields: {}",
            missing.join(", ")
        )))
    }
}

/// Drives interview sessions: opening, scoring answers, progression and
/// reports. Answer submissions for one session are serialized.
pub struct InterviewEngine {
    store: Arc<dyn InterviewStore>,
    oracle: Arc<dyn InterviewOracle>,
    bank: FallbackBank,
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InterviewEngine {
    pub fn new(
        store: Arc<dyn InterviewStore>,
        oracle: Arc<dyn InterviewOracle>,
        config: EngineConfig,
    ) -> Self {
        let bank = FallbackBank::new(config.fallback_questions);
        let bank = if bank.is_empty() {
            FallbackBank::default()
        } else {
            bank
        };
        Self {
            store,
            oracle,
            bank,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start_session(
        &self,
        user_id: Uuid,
        request: StartSessionRequest,
    ) -> Result<SessionStart, InterviewError> {
        if let Some(err) = missing_fields(&[
            ("mode", request.mode.as_str()),
            ("specialty", request.specialty.as_str()),
            ("experience_level", request.experience_level.as_str()),
        ]) {
            return Err(err);
        }
        let mode = InterviewMode::try_from(request.mode.as_str())
            .map_err(|_| InterviewError::InvalidMode(request.mode.clone()))?;

        let entitlement = self.store.load_entitlement(user_id).await?;
        let consume_trial = match access_for(&entitlement, mode) {
            SessionAccess::Granted { consumes_trial } => consumes_trial,
            SessionAccess::Denied { message } => {
                tracing::info!(%user_id, mode = mode.as_str(), "session start denied by entitlement");
                return Err(InterviewError::PaymentRequired(message));
            }
        };

        let new = NewSession {
            user_id,
            mode,
            specialty: request.specialty.trim().to_string(),
            experience_level: request.experience_level.trim().to_string(),
            hospital_name: blank_to_none(request.hospital_name),
            job_text: blank_to_none(request.job_text),
        };

        let opening = self
            .oracle
            .generate_turn(&OracleRequest {
                mode,
                specialty: new.specialty.clone(),
                experience_level: new.experience_level.clone(),
                hospital_name: new.hospital_name.clone().unwrap_or_default(),
                job_text: new.job_text.clone().unwrap_or_default(),
                previous_turns: Vec::new(),
                user_answer: String::new(),
                current_question: String::new(),
                force_different_next_question_from: String::new(),
            })
            .await?;

        let question = match opening.question.trim() {
            "" => {
                tracing::warn!("oracle returned no opening question, using fallback bank");
                self.bank.pick(std::iter::empty::<&str>())
            }
            q => q.to_string(),
        };

        let session = match self
            .store
            .create_session_with_seed(new, &question, consume_trial)
            .await?
        {
            CreateOutcome::Created { session, .. } => session,
            CreateOutcome::TrialTaken => {
                tracing::info!(%user_id, "trial claimed by a concurrent start");
                return Err(InterviewError::PaymentRequired(TRIAL_USED_MESSAGE.to_string()));
            }
        };

        tracing::info!(
            session_id = %session.id,
            %user_id,
            mode = mode.as_str(),
            consume_trial,
            "interview session started"
        );

        Ok(SessionStart {
            session,
            question,
            next_question_preview: opening.next_question_preview,
        })
    }

    pub async fn submit_answer(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        request: SubmitAnswerRequest,
    ) -> Result<SubmitOutcome, InterviewError> {
        if let Some(err) = missing_fields(&[
            ("answer", request.answer.as_str()),
            ("question", request.question.as_str()),
        ]) {
            return Err(err);
        }

        // Locks are only created for sessions the caller owns.
        if self.store.find_session(session_id, user_id).await?.is_none() {
            return Err(InterviewError::SessionNotFound);
        }
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;

        let session = self
            .store
            .find_session(session_id, user_id)
            .await?
            .ok_or(InterviewError::SessionNotFound)?;

        if session.is_ended() {
            return Ok(SubmitOutcome::completed(session.id, None));
        }

        let turns = self.store.list_turns(session.id).await?;
        let answered_before = turns.iter().filter(|t| !t.is_seed()).count();
        let target = session.mode.target_questions();
        if answered_before >= target {
            self.store.mark_session_ended(session.id).await?;
            tracing::info!(session_id = %session.id, answered_before, "late answer on a full session, closing it");
            return Ok(SubmitOutcome::completed(session.id, None));
        }

        let question = request.question.trim();
        let answer = request.answer.as_str();
        let pending = turns.iter().find(|t| t.is_seed());

        if let Some(outcome) = replay(&turns, pending, session.id, question, answer)? {
            tracing::info!(session_id = %session.id, "answer already scored, replaying stored feedback");
            return Ok(outcome);
        }

        let mut oracle_request = OracleRequest {
            mode: session.mode,
            specialty: session.specialty.clone(),
            experience_level: session.experience_level.clone(),
            hospital_name: session.hospital_name.clone().unwrap_or_default(),
            job_text: session.job_text.clone().unwrap_or_default(),
            previous_turns: turns.iter().map(PriorTurn::from).collect(),
            user_answer: answer.to_string(),
            current_question: question.to_string(),
            force_different_next_question_from: String::new(),
        };
        let mut oracle_turn = self.oracle.generate_turn(&oracle_request).await?;

        let asked: Vec<&str> = turns
            .iter()
            .map(|t| t.question.as_str())
            .chain(std::iter::once(question))
            .collect();
        let ends_by_count = answered_before + 1 >= target;

        let mut next_question_preview = oracle_turn.next_question_preview.trim().to_string();
        if !ends_by_count && !oracle_turn.done && repeats_asked(&oracle_turn, &asked) {
            tracing::warn!(session_id = %session.id, "oracle repeated a question, retrying with a hint");
            oracle_request.force_different_next_question_from = question.to_string();
            oracle_turn = self.oracle.generate_turn(&oracle_request).await?;
            next_question_preview = oracle_turn.next_question_preview.trim().to_string();
        }

        let completed = ends_by_count || oracle_turn.done;
        let next_question = if completed {
            None
        } else if repeats_asked(&oracle_turn, &asked) {
            let pick = self.bank.pick(asked.iter().copied());
            tracing::warn!(session_id = %session.id, next_question = %pick, "oracle repeated a question again, using fallback bank");
            next_question_preview.clear();
            Some(pick)
        } else {
            Some(oracle_turn.next_question.trim().to_string())
        };

        let answered = score_answer(answer, question, oracle_turn);
        tracing::info!(
            session_id = %session.id,
            tier = ?answered.feedback.debug.detected_tier,
            raw = ?answered.feedback.debug.raw_ai_scores,
            final_scores = ?answered.scores,
            "answer scored"
        );

        let (pending_turn_id, stale_turn_id) = match pending {
            Some(p) if is_same_question(&p.question, question) => (Some(p.id), None),
            Some(p) => (None, Some(p.id)),
            None => (None, None),
        };

        let commit = AnswerCommit {
            session_id: session.id,
            question: question.to_string(),
            pending_turn_id,
            stale_turn_id,
            answered,
            next_question,
        };
        let next_turn = match self.store.commit_answer(&commit).await? {
            CommitOutcome::Committed { next_turn } => next_turn,
            CommitOutcome::PendingTurnTaken => {
                tracing::warn!(session_id = %session.id, "pending turn was answered concurrently");
                return Err(InterviewError::Conflict(ALREADY_ANSWERED.to_string()));
            }
        };

        let feedback = AnswerFeedback::from(&commit.answered);
        match next_turn {
            Some(turn) => Ok(SubmitOutcome {
                status: SessionStatus::InProgress,
                session_id: session.id,
                question: Some(turn.question),
                next_question_preview,
                feedback: Some(feedback),
            }),
            None => {
                tracing::info!(session_id = %session.id, answered = answered_before + 1, "interview session completed");
                Ok(SubmitOutcome::completed(session.id, Some(feedback)))
            }
        }
    }

    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionListItem>, InterviewError> {
        let sessions = self.store.list_sessions(user_id).await?;
        Ok(sessions.into_iter().map(SessionListItem::from).collect())
    }

    pub async fn session_report(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<SessionReport, InterviewError> {
        let session = self
            .store
            .find_session(session_id, user_id)
            .await?
            .ok_or(InterviewError::SessionNotFound)?;
        let turns = self.store.list_turns(session.id).await?;
        Ok(build_report(session, &turns))
    }

    async fn session_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(&session_id) {
            return lock.clone();
        }
        self.locks
            .write()
            .await
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops per-session locks nobody is holding or waiting on. Returns the
    /// number removed.
    pub async fn prune_idle_locks(&self) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}

fn repeats_asked(turn: &OracleTurn, asked: &[&str]) -> bool {
    let next = turn.next_question.trim();
    next.is_empty() || asked.iter().any(|q| is_same_question(q, next))
}

/// A question is answered at most once per session. Resubmitting the same
/// answer returns the stored result, so a client retry never re-scores or
/// duplicates a turn; a different answer to it is a conflict.
fn replay(
    turns: &[InterviewTurn],
    pending: Option<&InterviewTurn>,
    session_id: Uuid,
    question: &str,
    answer: &str,
) -> Result<Option<SubmitOutcome>, InterviewError> {
    let Some(previous) = turns
        .iter()
        .rev()
        .filter(|t| is_same_question(&t.question, question))
        .find_map(InterviewTurn::answered)
    else {
        return Ok(None);
    };
    if previous.answer.trim() != answer.trim() {
        return Err(InterviewError::Conflict(ALREADY_ANSWERED.to_string()));
    }
    Ok(Some(SubmitOutcome {
        status: SessionStatus::InProgress,
        session_id,
        question: pending.map(|p| p.question.clone()),
        next_question_preview: String::new(),
        feedback: Some(AnswerFeedback::from(previous)),
    }))
}

fn score_answer(answer: &str, question: &str, oracle_turn: OracleTurn) -> AnsweredTurn {
    let reconciled = reconcile(answer, question, oracle_turn.scores, &oracle_turn.evidence);
    let scores = reconciled.final_scores;

    let (strengths, improvements) = if reconciled.is_nonsense() {
        let strengths = if oracle_turn.strengths.is_empty() {
            vec![NONSENSE_STRENGTH.to_string()]
        } else {
            oracle_turn.strengths
        };
        let improvements = NONSENSE_IMPROVEMENTS.iter().map(|s| s.to_string()).collect();
        (strengths, improvements)
    } else {
        (oracle_turn.strengths, oracle_turn.improvements)
    };

    let improved_answer = tune_improved_answer(&oracle_turn.improved_answer, &scores, question);
    let detected_tier: AnswerTier = reconciled.verdict.tier;

    AnsweredTurn {
        answer: answer.to_string(),
        feedback: TurnFeedback {
            strengths,
            improvements,
            evidence: oracle_turn.evidence,
            missing: oracle_turn.missing,
            summary: oracle_turn.session_summary,
            flags: reconciled.analysis,
            final_adjusted_scores: scores,
            debug: ScoringDebug {
                detected_tier,
                safety_signals_count: reconciled.safety.count,
                raw_ai_scores: oracle_turn.scores,
                final_scores: scores,
            },
        },
        improved_answer,
        scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::domain::models::{Entitlement, RawScores};
    use crate::interview::questions::normalize_question;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;

    const OPENING: &str = "Tell me about yourself and why you chose nursing.";
    const STRONG_ANSWER: &str = "During a night shift on the med-surg floor my patient became hypotensive. \
        I assessed his vitals and noticed a drop in blood pressure to 82/50. \
        I escalated to the charge nurse, notified the provider using SBAR, and started the fluid bolus that was ordered. \
        I reassessed every 15 minutes and the patient stabilized within the hour.";

    /// Oracle that replays scripted responses, then falls back to a stream of
    /// fresh questions.
    #[derive(Default)]
    struct ScriptedOracle {
        script: StdMutex<VecDeque<Result<OracleTurn, OracleError>>>,
        requests: StdMutex<Vec<OracleRequest>>,
    }

    impl ScriptedOracle {
        fn push(&self, response: Result<OracleTurn, OracleError>) {
            self.script.lock().unwrap().push_back(response);
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> OracleRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn scored_turn(next_question: &str) -> OracleTurn {
        OracleTurn {
            question: OPENING.to_string(),
            scores: RawScores {
                clarity: 7.0,
                confidence: 7.0,
                clinical_reasoning: 7.0,
            },
            strengths: vec!["Clear structure".to_string()],
            improvements: vec!["Quantify the outcome".to_string()],
            improved_answer: "I assessed the patient and escalated using SBAR.".to_string(),
            next_question: next_question.to_string(),
            ..Default::default()
        }
    }

    #[async_trait]
    impl InterviewOracle for ScriptedOracle {
        async fn generate_turn(&self, request: &OracleRequest) -> Result<OracleTurn, OracleError> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            if let Some(response) = self.script.lock().unwrap().pop_front() {
                return response;
            }
            Ok(scored_turn(&format!("Generated question number {call}?")))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        oracle: Arc<ScriptedOracle>,
        engine: InterviewEngine,
        user_id: Uuid,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(ScriptedOracle::default());
        let engine = InterviewEngine::new(store.clone(), oracle.clone(), EngineConfig::default());
        Harness {
            store,
            oracle,
            engine,
            user_id: Uuid::new_v4(),
        }
    }

    fn start_request(mode: &str) -> StartSessionRequest {
        StartSessionRequest {
            mode: mode.to_string(),
            specialty: "ICU".to_string(),
            experience_level: "new_grad".to_string(),
            hospital_name: Some("  ".to_string()),
            job_text: None,
        }
    }

    fn answer(question: &str, text: &str) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question: question.to_string(),
            answer: text.to_string(),
        }
    }

    async fn activate(h: &Harness) {
        h.store
            .set_entitlement(
                h.user_id,
                Entitlement {
                    plan: "pro".to_string(),
                    status: "active".to_string(),
                    trial_used: true,
                },
            )
            .await;
    }

    async fn start(h: &Harness, mode: &str) -> SessionStart {
        h.oracle.push(Ok(OracleTurn {
            question: OPENING.to_string(),
            ..Default::default()
        }));
        h.engine.start_session(h.user_id, start_request(mode)).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_creates_seed_turn_and_consumes_trial() {
        let h = harness();
        let started = start(&h, "quick").await;
        assert_eq!(started.question, OPENING);
        assert!(started.session.hospital_name.is_none());

        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].is_seed());
        assert_eq!(turns[0].scores(), ScoreTriple::uniform(0));

        let entitlement = h.store.load_entitlement(h.user_id).await.unwrap();
        assert!(entitlement.trial_used);
    }

    #[tokio::test]
    async fn test_start_validation() {
        let h = harness();
        let err = h
            .engine
            .start_session(
                h.user_id,
                StartSessionRequest {
                    mode: "quick".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing fields: specialty, experience_level");

        let err = h
            .engine
            .start_session(h.user_id, start_request("marathon"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::InvalidMode(_)));
        assert_eq!(h.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_trial_allows_one_quick_session() {
        let h = harness();
        start(&h, "quick").await;

        let err = h
            .engine
            .start_session(h.user_id, start_request("quick"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::PaymentRequired(ref m) if m == "Trial used. Please upgrade to continue."));

        let err = h
            .engine
            .start_session(Uuid::new_v4(), start_request("full"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::PaymentRequired(_)));
        assert_eq!(h.store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_opening_question_uses_bank() {
        let h = harness();
        h.oracle.push(Ok(OracleTurn::default()));
        let started = h.engine.start_session(h.user_id, start_request("quick")).await.unwrap();
        assert_eq!(started.question, DEFAULT_FALLBACK_QUESTIONS[0]);
    }

    #[tokio::test]
    async fn test_nonsense_answer_gets_floor_scores_and_coaching() {
        let h = harness();
        let started = start(&h, "quick").await;

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, "idk"))
            .await
            .unwrap();

        assert_eq!(outcome.status, SessionStatus::InProgress);
        let feedback = outcome.feedback.unwrap();
        assert_eq!(feedback.scores, ScoreTriple::uniform(1));
        assert_eq!(feedback.improvements, NONSENSE_IMPROVEMENTS.to_vec());
        assert_eq!(feedback.strengths, vec!["Clear structure".to_string()]);
        assert_eq!(feedback.debug.detected_tier, AnswerTier::Nonsense);
        assert!(feedback.improved_answer.starts_with("The answer needs concrete detail"));
    }

    #[tokio::test]
    async fn test_nonsense_answer_without_strengths_gets_default() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.oracle.push(Ok(OracleTurn {
            next_question: "Why ICU?".to_string(),
            ..Default::default()
        }));

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, "asdf"))
            .await
            .unwrap();
        assert_eq!(outcome.feedback.unwrap().strengths, vec![NONSENSE_STRENGTH.to_string()]);
    }

    #[tokio::test]
    async fn test_quick_session_completes_on_fifth_answer() {
        let h = harness();
        let started = start(&h, "quick").await;
        let session_id = started.session.id;
        let mut question = started.question;

        for n in 1..=5 {
            let outcome = h
                .engine
                .submit_answer(h.user_id, session_id, answer(&question, STRONG_ANSWER))
                .await
                .unwrap();
            if n < 5 {
                assert_eq!(outcome.status, SessionStatus::InProgress, "answer {n}");
                question = outcome.question.unwrap();
            } else {
                assert_eq!(outcome.status, SessionStatus::Completed);
                assert!(outcome.question.is_none());
                assert!(outcome.feedback.is_some());
            }
        }

        let turns = h.store.list_turns(session_id).await.unwrap();
        assert_eq!(turns.len(), 5);
        assert!(turns.iter().all(|t| !t.is_seed()));
        let session = h.store.find_session(session_id, h.user_id).await.unwrap().unwrap();
        assert!(session.is_ended());
    }

    #[tokio::test]
    async fn test_full_session_completes_on_twelfth_answer() {
        let h = harness();
        activate(&h).await;
        let started = start(&h, "full").await;
        let mut question = started.question;

        for n in 1..=12 {
            let outcome = h
                .engine
                .submit_answer(h.user_id, started.session.id, answer(&question, STRONG_ANSWER))
                .await
                .unwrap();
            let expected = if n < 12 {
                SessionStatus::InProgress
            } else {
                SessionStatus::Completed
            };
            assert_eq!(outcome.status, expected, "answer {n}");
            if let Some(next) = outcome.question {
                question = next;
            }
        }
    }

    #[tokio::test]
    async fn test_oracle_done_ends_session_early() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.oracle.push(Ok(OracleTurn {
            done: true,
            ..scored_turn("")
        }));

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();
        assert_eq!(outcome.status, SessionStatus::Completed);
        assert_eq!(h.oracle.calls(), 2);
    }

    #[tokio::test]
    async fn test_answers_after_completion_short_circuit() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.oracle.push(Ok(OracleTurn {
            done: true,
            ..scored_turn("")
        }));
        h.engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();
        let calls = h.oracle.calls();

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer("Anything else?", "More text here please"))
            .await
            .unwrap();
        assert_eq!(outcome.status, SessionStatus::Completed);
        assert!(outcome.feedback.is_none());
        assert_eq!(h.oracle.calls(), calls);
    }

    #[tokio::test]
    async fn test_duplicate_next_question_is_retried_with_hint() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.oracle.push(Ok(scored_turn(&format!("  {}  ", OPENING.to_uppercase()))));
        h.oracle.push(Ok(scored_turn("How do you use SBAR?")));

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();

        assert_eq!(outcome.question.as_deref(), Some("How do you use SBAR?"));
        assert_eq!(h.oracle.calls(), 3);
        assert_eq!(h.oracle.last_request().force_different_next_question_from, OPENING);
    }

    #[tokio::test]
    async fn test_repeated_duplicate_falls_back_to_unused_bank_question() {
        let h = harness();
        h.oracle.push(Ok(OracleTurn {
            question: DEFAULT_FALLBACK_QUESTIONS[0].to_string(),
            ..Default::default()
        }));
        let started = h.engine.start_session(h.user_id, start_request("quick")).await.unwrap();
        h.oracle.push(Ok(scored_turn(DEFAULT_FALLBACK_QUESTIONS[0])));
        h.oracle.push(Ok(scored_turn("")));

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(&started.question, STRONG_ANSWER))
            .await
            .unwrap();

        assert_eq!(outcome.question.as_deref(), Some(DEFAULT_FALLBACK_QUESTIONS[1]));
        assert!(outcome.next_question_preview.is_empty());
    }

    #[tokio::test]
    async fn test_no_question_repeats_across_a_session() {
        let h = harness();
        activate(&h).await;
        let started = start(&h, "full").await;
        let mut question = started.question;

        for _ in 0..12 {
            // the oracle insists on the opening question every time
            h.oracle.push(Ok(scored_turn(OPENING)));
            h.oracle.push(Ok(scored_turn(OPENING)));
            let outcome = h
                .engine
                .submit_answer(h.user_id, started.session.id, answer(&question, STRONG_ANSWER))
                .await
                .unwrap();
            match outcome.question {
                Some(next) => question = next,
                None => break,
            }
        }

        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 12);
        let distinct: HashSet<String> = turns.iter().map(|t| normalize_question(&t.question)).collect();
        assert_eq!(distinct.len(), turns.len());
    }

    #[tokio::test]
    async fn test_oracle_failure_persists_nothing_and_retry_updates_same_turn() {
        let h = harness();
        let started = start(&h, "quick").await;
        let seed_id = h.store.list_turns(started.session.id).await.unwrap()[0].id;
        h.oracle.push(Err(OracleError::Malformed("not json".to_string())));

        let err = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::Oracle(_)));
        assert_eq!(h.store.commit_count(), 0);
        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert!(turns[0].is_seed());

        h.engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();
        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].id, seed_id);
        assert_eq!(turns[0].answered().unwrap().answer, STRONG_ANSWER);
        assert!(turns[1].is_seed());
    }

    #[tokio::test]
    async fn test_resubmitting_same_answer_replays_feedback() {
        let h = harness();
        let started = start(&h, "quick").await;

        let first = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();
        let calls = h.oracle.calls();

        let again = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, &format!("{STRONG_ANSWER}  ")))
            .await
            .unwrap();

        assert_eq!(h.oracle.calls(), calls);
        assert_eq!(h.store.commit_count(), 1);
        assert_eq!(again.feedback, first.feedback);
        assert_eq!(again.question, first.question);
        let answered = h
            .store
            .list_turns(started.session.id)
            .await
            .unwrap()
            .iter()
            .filter(|t| !t.is_seed())
            .count();
        assert_eq!(answered, 1);
    }

    #[tokio::test]
    async fn test_edited_answer_to_answered_question_is_a_conflict() {
        let h = harness();
        let started = start(&h, "quick").await;
        let first = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();
        let calls = h.oracle.calls();

        let err = h
            .engine
            .submit_answer(
                h.user_id,
                started.session.id,
                answer(&format!("  {} ", OPENING.to_uppercase()), &format!("{STRONG_ANSWER} Then I reassessed.")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::Conflict(ref m) if m == ALREADY_ANSWERED));
        assert_eq!(h.oracle.calls(), calls);
        assert_eq!(h.store.commit_count(), 1);

        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns.iter().filter(|t| !t.is_seed()).count(), 1);
        let pending = turns.iter().find(|t| t.is_seed()).unwrap();
        assert_eq!(Some(pending.question.clone()), first.question);
        assert!(!is_same_question(&turns[0].question, &turns[1].question));
    }

    /// Spends the caller's trial from "another request" while the opening
    /// question is being generated.
    struct TrialRacingOracle {
        store: Arc<MemoryStore>,
        user_id: Uuid,
    }

    #[async_trait]
    impl InterviewOracle for TrialRacingOracle {
        async fn generate_turn(&self, _request: &OracleRequest) -> Result<OracleTurn, OracleError> {
            self.store
                .set_entitlement(
                    self.user_id,
                    Entitlement {
                        plan: "free".to_string(),
                        status: "inactive".to_string(),
                        trial_used: true,
                    },
                )
                .await;
            Ok(OracleTurn {
                question: OPENING.to_string(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_trial_spent_during_start_is_payment_required() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let engine = InterviewEngine::new(
            store.clone(),
            Arc::new(TrialRacingOracle {
                store: store.clone(),
                user_id,
            }),
            EngineConfig::default(),
        );

        let err = engine
            .start_session(user_id, start_request("quick"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::PaymentRequired(ref m) if m == TRIAL_USED_MESSAGE));
        assert_eq!(store.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unowned_session_creates_no_lock() {
        let h = harness();
        let started = start(&h, "quick").await;

        for session_id in [Uuid::new_v4(), started.session.id] {
            let err = h
                .engine
                .submit_answer(Uuid::new_v4(), session_id, answer(OPENING, STRONG_ANSWER))
                .await
                .unwrap_err();
            assert!(matches!(err, InterviewError::SessionNotFound));
        }
        assert_eq!(h.engine.prune_idle_locks().await, 0);
    }

    #[tokio::test]
    async fn test_answer_to_other_question_replaces_stale_pending_turn() {
        let h = harness();
        let started = start(&h, "quick").await;

        let outcome = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer("Why the ICU?", STRONG_ANSWER))
            .await
            .unwrap();
        assert_eq!(outcome.status, SessionStatus::InProgress);

        let turns = h.store.list_turns(started.session.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question, "Why the ICU?");
        assert!(!turns[0].is_seed());
        assert_eq!(turns.iter().filter(|t| t.is_seed()).count(), 1);
    }

    #[tokio::test]
    async fn test_session_of_another_user_is_not_found() {
        let h = harness();
        let started = start(&h, "quick").await;

        let err = h
            .engine
            .submit_answer(Uuid::new_v4(), started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::SessionNotFound));

        let err = h
            .engine
            .session_report(Uuid::new_v4(), started.session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::SessionNotFound));
    }

    #[tokio::test]
    async fn test_missing_answer_is_rejected() {
        let h = harness();
        let started = start(&h, "quick").await;
        let err = h
            .engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing fields: answer");
    }

    /// Answers the pending turn from "another process" while the engine is
    /// waiting on the oracle.
    struct RacingOracle {
        store: Arc<MemoryStore>,
        turn_id: Uuid,
    }

    #[async_trait]
    impl InterviewOracle for RacingOracle {
        async fn generate_turn(&self, _request: &OracleRequest) -> Result<OracleTurn, OracleError> {
            let answered = score_answer(STRONG_ANSWER, OPENING, scored_turn("Why ICU?"));
            self.store.steal_pending_turn(self.turn_id, answered).await;
            Ok(scored_turn("Why ICU?"))
        }
    }

    #[tokio::test]
    async fn test_concurrently_answered_turn_is_a_conflict() {
        let h = harness();
        let started = start(&h, "quick").await;
        let seed_id = h.store.list_turns(started.session.id).await.unwrap()[0].id;

        let racing = InterviewEngine::new(
            h.store.clone(),
            Arc::new(RacingOracle {
                store: h.store.clone(),
                turn_id: seed_id,
            }),
            EngineConfig::default(),
        );
        let err = racing
            .submit_answer(h.user_id, started.session.id, answer(OPENING, "A different answer entirely here"))
            .await
            .unwrap_err();
        assert!(matches!(err, InterviewError::Conflict(_)));
        assert_eq!(h.store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();

        let held = h.engine.session_lock(Uuid::new_v4()).await;
        assert_eq!(h.engine.prune_idle_locks().await, 1);
        drop(held);
        assert_eq!(h.engine.prune_idle_locks().await, 1);
    }

    #[tokio::test]
    async fn test_list_sessions_and_report() {
        let h = harness();
        let started = start(&h, "quick").await;
        h.engine
            .submit_answer(h.user_id, started.session.id, answer(OPENING, STRONG_ANSWER))
            .await
            .unwrap();

        let sessions = h.engine.list_sessions(h.user_id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::InProgress);

        let report = h.engine.session_report(h.user_id, started.session.id).await.unwrap();
        assert_eq!(report.turns.len(), 2);
        assert!(report.turns[1].is_seed_turn);
        assert!(report.average_scores.clinical_reasoning >= 1.0);
    }
}
