use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "interview_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InterviewMode {
    Quick,
    Full,
}

impl InterviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewMode::Quick => "quick",
            InterviewMode::Full => "full",
        }
    }

    /// Number of answered turns after which the session ends.
    pub fn target_questions(&self) -> usize {
        match self {
            InterviewMode::Quick => 5,
            InterviewMode::Full => 12,
        }
    }
}

impl TryFrom<&str> for InterviewMode {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "quick" => Ok(InterviewMode::Quick),
            "full" => Ok(InterviewMode::Full),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InterviewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub mode: InterviewMode,
    pub specialty: String,
    pub experience_level: String,
    pub hospital_name: Option<String>,
    pub job_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl InterviewSession {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub mode: InterviewMode,
    pub specialty: String,
    pub experience_level: String,
    pub hospital_name: Option<String>,
    pub job_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreTriple {
    pub clarity: i32,
    pub confidence: i32,
    pub clinical_reasoning: i32,
}

impl ScoreTriple {
    pub const fn uniform(value: i32) -> Self {
        Self {
            clarity: value,
            confidence: value,
            clinical_reasoning: value,
        }
    }
}

/// Scores exactly as the oracle proposed them, before reconciliation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawScores {
    pub clarity: f64,
    pub confidence: f64,
    pub clinical_reasoning: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvidenceQuotes {
    pub clarity: Vec<String>,
    pub confidence: Vec<String>,
    pub clinical_reasoning: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSummary {
    pub overall: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub next_focus: String,
}

impl SessionSummary {
    pub fn is_blank(&self) -> bool {
        self.overall.trim().is_empty()
            && self.next_focus.trim().is_empty()
            && self.strengths.iter().all(|s| s.trim().is_empty())
            && self.improvements.iter().all(|s| s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerTier {
    Nonsense,
    Generic,
}

/// Lexical flags recorded with every answered turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisFlags {
    pub has_example: bool,
    pub has_actions: bool,
    pub has_outcome: bool,
    pub red_flags: Vec<String>,
    pub word_count: usize,
    pub is_vague: bool,
    pub specificity_signals: usize,
    pub numeric_tokens: usize,
    pub clinical_keywords: usize,
    pub ethics_signals: usize,
    pub education_signals: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringDebug {
    pub detected_tier: AnswerTier,
    pub safety_signals_count: usize,
    pub raw_ai_scores: RawScores,
    pub final_scores: ScoreTriple,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnFeedback {
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub evidence: EvidenceQuotes,
    pub missing: Vec<String>,
    pub summary: Option<SessionSummary>,
    pub flags: AnalysisFlags,
    pub final_adjusted_scores: ScoreTriple,
    #[serde(rename = "_debug")]
    pub debug: ScoringDebug,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnsweredTurn {
    pub answer: String,
    pub feedback: TurnFeedback,
    pub improved_answer: String,
    pub scores: ScoreTriple,
}

/// A turn is either still waiting for its answer or has been scored.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    Seed,
    Answered(Box<AnsweredTurn>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterviewTurn {
    pub id: Uuid,
    pub session_id: Uuid,
    pub question: String,
    pub state: TurnState,
    pub created_at: DateTime<Utc>,
}

impl InterviewTurn {
    pub fn is_seed(&self) -> bool {
        matches!(self.state, TurnState::Seed)
    }

    pub fn answered(&self) -> Option<&AnsweredTurn> {
        match &self.state {
            TurnState::Answered(answered) => Some(answered),
            TurnState::Seed => None,
        }
    }

    /// Seed turns report zero scores.
    pub fn scores(&self) -> ScoreTriple {
        self.answered().map(|a| a.scores).unwrap_or_default()
    }
}

/// Wire view of a turn, flattening the seed/answered variant.
#[derive(Debug, Serialize)]
pub struct TurnView {
    pub id: Uuid,
    pub question: String,
    pub user_answer: Option<String>,
    pub ai_feedback: Option<TurnFeedback>,
    pub ai_improved_answer: String,
    pub scores: ScoreTriple,
    pub is_seed_turn: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&InterviewTurn> for TurnView {
    fn from(turn: &InterviewTurn) -> Self {
        let answered = turn.answered();
        Self {
            id: turn.id,
            question: turn.question.clone(),
            user_answer: answered.map(|a| a.answer.clone()),
            ai_feedback: answered.map(|a| a.feedback.clone()),
            ai_improved_answer: answered
                .map(|a| a.improved_answer.clone())
                .unwrap_or_default(),
            scores: turn.scores(),
            is_seed_turn: turn.is_seed(),
            created_at: turn.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    pub plan: String,
    pub status: String,
    pub trial_used: bool,
}

impl Entitlement {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
