use crate::domain::models::{
    EvidenceQuotes, InterviewMode, RawScores, ScoreTriple, SessionSummary,
};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = r#"You interview nurses and other healthcare professionals for practice.
Reply with STRICT JSON only, using exactly these keys:
{
  "question": "...",
  "scores": {"clarity": 7, "confidence": 6, "clinical_reasoning": 8},
  "strengths": ["..."],
  "improvements": ["..."],
  "improved_answer": "...",
  "next_question": "...",
  "next_question_preview": "",
  "done": false,
  "session_summary": {"overall": "", "strengths": [], "improvements": [], "next_focus": ""},
  "hasExample": false,
  "hasActions": false,
  "hasOutcome": false,
  "redFlags": [],
  "evidence": {"clarity": [], "confidence": [], "clinical_reasoning": []},
  "missing": []
}
Rules:
- Scores are integers from 1 to 10.
- Each score must be backed by quotes copied verbatim from the candidate's answer in "evidence". If a category has nothing to quote, keep its score low and list what is missing in "missing".
- hasExample: a specific past event with first-person actions and situational detail. hasActions: concrete clinical actions. hasOutcome: a stated result.
- redFlags: concerning phrases such as "I just follow orders", "I waited", "I can't think of".
- improved_answer: a complete first-person answer of 90-150 words with context, 2-3 concrete actions, how understanding was checked, and the outcome. No meta-coaching, no bullet lists.
- next_question must cover a different competency than currentQuestion and every question in previousTurns. Never repeat or rephrase. If forceDifferentNextQuestionFrom is set, the next question must differ from it.
- next_question_preview is the question after next, or "".
- Set done=true only when the interview should end; then next_question is "".
- On the first turn (empty userAnswer) return the opening question, zero scores, empty lists, and an empty improved_answer."#;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(String),
    #[error("oracle response malformed: {0}")]
    Malformed(String),
}

/// Prior turn as shown to the oracle.
#[derive(Debug, Clone, Serialize)]
pub struct PriorTurn {
    pub question: String,
    pub user_answer: Option<String>,
    pub improved_answer: String,
    pub scores: ScoreTriple,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleRequest {
    pub mode: InterviewMode,
    pub specialty: String,
    pub experience_level: String,
    pub hospital_name: String,
    pub job_text: String,
    pub previous_turns: Vec<PriorTurn>,
    pub user_answer: String,
    pub current_question: String,
    pub force_different_next_question_from: String,
}

/// Structured record returned by the oracle. Every field is optional on
/// the wire; nothing in it is trusted without local validation.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleTurn {
    pub question: String,
    pub scores: RawScores,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub improved_answer: String,
    pub next_question: String,
    pub next_question_preview: String,
    pub done: bool,
    pub session_summary: Option<SessionSummary>,
    #[serde(rename = "hasExample")]
    pub has_example: bool,
    #[serde(rename = "hasActions")]
    pub has_actions: bool,
    #[serde(rename = "hasOutcome")]
    pub has_outcome: bool,
    #[serde(rename = "redFlags")]
    pub red_flags: Vec<String>,
    pub evidence: EvidenceQuotes,
    pub missing: Vec<String>,
}

#[async_trait]
pub trait InterviewOracle: Send + Sync {
    async fn generate_turn(&self, request: &OracleRequest) -> Result<OracleTurn, OracleError>;
}

#[derive(Clone)]
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOracle {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);
        Self { client, model }
    }
}

#[async_trait]
impl InterviewOracle for OpenAiOracle {
    async fn generate_turn(&self, request: &OracleRequest) -> Result<OracleTurn, OracleError> {
        let payload = serde_json::to_string(request)
            .map_err(|e| OracleError::Transport(format!("request encoding: {e}")))?;

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(|e| OracleError::Transport(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(payload)
                .build()
                .map_err(|e| OracleError::Transport(e.to_string()))?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .temperature(0.4)
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| OracleError::Transport(format!("OpenAI error: {e}")))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        parse_oracle_content(&content)
    }
}

/// Parses the model's reply, tolerating a Markdown code fence around the
/// JSON object.
pub fn parse_oracle_content(content: &str) -> Result<OracleTurn, OracleError> {
    let body = strip_code_fence(content.trim());
    if body.is_empty() {
        return Err(OracleError::Malformed("empty response".to_string()));
    }
    let mut turn: OracleTurn = serde_json::from_str(body)
        .map_err(|e| OracleError::Malformed(format!("Failed to parse OpenAI response: {e}")))?;
    if turn.session_summary.as_ref().is_some_and(SessionSummary::is_blank) {
        turn.session_summary = None;
    }
    Ok(turn)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
