use crate::domain::models::{InterviewSession, InterviewTurn, SessionSummary, TurnView};
use serde::Serialize;
use std::collections::HashMap;

const TOP_ITEMS: usize = 3;
const DEFAULT_NEXT_FOCUS: &str = "Practice stating one concrete action and outcome for each scenario.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AverageScores {
    pub clarity: f64,
    pub confidence: f64,
    pub clinical_reasoning: f64,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session: InterviewSession,
    pub turns: Vec<TurnView>,
    pub average_scores: AverageScores,
    pub overall_level: &'static str,
    pub session_summary: SessionSummary,
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Label derived from the clinical reasoning average.
pub fn overall_level(clinical_reasoning_avg: f64) -> &'static str {
    if clinical_reasoning_avg >= 9.0 {
        "Strong candidate"
    } else if clinical_reasoning_avg >= 7.0 {
        "Interview-ready"
    } else if clinical_reasoning_avg >= 4.0 {
        "Developing"
    } else {
        "Needs improvement"
    }
}

pub fn average_scores(turns: &[InterviewTurn]) -> AverageScores {
    let scores: Vec<_> = turns
        .iter()
        .filter_map(InterviewTurn::answered)
        .map(|a| a.scores)
        .collect();
    if scores.is_empty() {
        return AverageScores::default();
    }
    let count = scores.len() as f64;
    let (clarity, confidence, reasoning) = scores.iter().fold((0.0, 0.0, 0.0), |acc, s| {
        (
            acc.0 + f64::from(s.clarity),
            acc.1 + f64::from(s.confidence),
            acc.2 + f64::from(s.clinical_reasoning),
        )
    });
    AverageScores {
        clarity: round_one_decimal(clarity / count),
        confidence: round_one_decimal(confidence / count),
        clinical_reasoning: round_one_decimal(reasoning / count),
    }
}

/// Most frequent distinct items, compared trimmed and lowercased. Ties keep
/// first-seen order.
pub fn top_items<'a, I>(items: I, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for item in items {
        let key = item.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    // stable sort keeps first-seen order among equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(n);
    order
}

fn summarize(session: &InterviewSession, turns: &[InterviewTurn]) -> SessionSummary {
    let latest = turns
        .iter()
        .rev()
        .filter_map(InterviewTurn::answered)
        .find_map(|a| a.feedback.summary.clone());
    if let Some(summary) = latest {
        return summary;
    }

    let answered: Vec<_> = turns.iter().filter_map(InterviewTurn::answered).collect();
    let specialty = match session.specialty.trim() {
        "" => "your role",
        s => s,
    };
    let experience = match session.experience_level.trim() {
        "" => "experience",
        s => s,
    };
    SessionSummary {
        overall: format!("Interview summary for {specialty} ({experience})."),
        strengths: top_items(answered.iter().copied().flat_map(|a| &a.feedback.strengths), TOP_ITEMS),
        improvements: top_items(answered.iter().copied().flat_map(|a| &a.feedback.improvements), TOP_ITEMS),
        next_focus: DEFAULT_NEXT_FOCUS.to_string(),
    }
}

pub fn build_report(session: InterviewSession, turns: &[InterviewTurn]) -> SessionReport {
    let average_scores = average_scores(turns);
    let session_summary = summarize(&session, turns);
    SessionReport {
        overall_level: overall_level(average_scores.clinical_reasoning),
        turns: turns.iter().map(TurnView::from).collect(),
        average_scores,
        session_summary,
        session,
    }
}
