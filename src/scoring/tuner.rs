//! Shapes the suggested "improved answer" to the candidate's score band.

use crate::domain::models::ScoreTriple;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const QUESTION_SNIPPET_CHARS: usize = 160;
const MAX_TOPIC_KEYWORDS: usize = 6;

static FILLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)this (reinforced|highlighted) the importance of\s*")
        .expect("static filler pattern must compile")
});
static CONCLUSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)in conclusion[:,]?\s*").expect("static conclusion pattern must compile")
});
static TOPIC_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[a-z]{4,}\b").expect("static topic pattern must compile")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovedAnswerMode {
    /// Coaching checklist only, no model answer.
    Guided,
    /// Short, deliberately imperfect first-person example.
    PartialExample,
    /// The oracle's own draft, minus filler.
    OracleDraft,
}

impl ImprovedAnswerMode {
    pub fn for_average(average: f64) -> Self {
        if average <= 2.0 {
            ImprovedAnswerMode::Guided
        } else if average <= 5.0 {
            ImprovedAnswerMode::PartialExample
        } else {
            ImprovedAnswerMode::OracleDraft
        }
    }
}

/// Band average used for mode selection.
///
/// Kept bit-for-bit compatible with the production formula, which only
/// divides clarity by three and falls back to clinical reasoning when that
/// is zero. The session report averages all three categories properly; the
/// two paths are intentionally independent until product decides on one.
pub fn band_average(scores: &ScoreTriple) -> f64 {
    let average = f64::from(scores.clarity) / 3.0;
    if average == 0.0 {
        f64::from(scores.clinical_reasoning)
    } else {
        average
    }
}

fn question_snippet(question: &str) -> String {
    if question.is_empty() {
        "the question".to_string()
    } else {
        question.chars().take(QUESTION_SNIPPET_CHARS).collect()
    }
}

pub fn render_for_mode(mode: ImprovedAnswerMode, draft: &str, question: &str) -> String {
    let snippet = question_snippet(question);
    match mode {
        ImprovedAnswerMode::Guided => [
            format!("The answer needs concrete detail for \"{snippet}\"."),
            "To improve next time, include:".to_string(),
            "- What you assessed (specific findings or risks).".to_string(),
            "- One or two actions you actually took.".to_string(),
            "- Who you communicated with and why.".to_string(),
            "- The result or how you would reassess.".to_string(),
        ]
        .join(" "),
        ImprovedAnswerMode::PartialExample => [
            format!("Example tied to \"{snippet}\":"),
            "I checked the patient's key findings, escalated one concern to the nurse/charge, and started a basic intervention.".to_string(),
            "I let the team know what I saw and asked for help early, then reassessed to confirm the patient was stable.".to_string(),
        ]
        .join(" "),
        ImprovedAnswerMode::OracleDraft => {
            let stripped = FILLER_RE.replace_all(draft.trim(), "");
            CONCLUSION_RE.replace_all(&stripped, "").trim().to_string()
        }
    }
}

/// First few 4+ letter words of the question, used as a topic check.
pub fn topic_keywords(question: &str) -> Vec<String> {
    TOPIC_WORD_RE
        .find_iter(question)
        .take(MAX_TOPIC_KEYWORDS)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn generic_answer(question: &str) -> String {
    format!(
        "In response to \"{question}\", I first summarize the situation, perform a focused assessment, take 2-3 clear actions, communicate with the appropriate nurse/provider, and describe the outcome or reassessment tied to this scenario."
    )
}

/// Picks the improved-answer text for a scored turn and makes sure it is
/// still about the question that was asked.
pub fn tune_improved_answer(draft: &str, scores: &ScoreTriple, question: &str) -> String {
    let mode = ImprovedAnswerMode::for_average(band_average(scores));
    let candidate = render_for_mode(mode, draft, question);

    let keywords = topic_keywords(question);
    let lowered = candidate.to_lowercase();
    let off_topic = !keywords.is_empty() && keywords.iter().all(|k| !lowered.contains(k.as_str()));
    if off_topic {
        tracing::debug!(?mode, "improved answer lost the question topic, using generic answer");
        generic_answer(question)
    } else {
        candidate
    }
}
