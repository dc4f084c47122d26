//! Turns the oracle's raw scores into the authoritative, bounded scores.
//!
//! The oracle is not trusted: its scores are floored, capped and penalised
//! against the lexical signals of the answer itself. Stage order matters and
//! is fixed: floor, ceilings, domain caps, red-flag caps, clarity rules,
//! round/clamp, evidence caps (with the vagueness penalty), safety floor,
//! missing-evidence penalty, nonsense override.

use crate::domain::models::{AnalysisFlags, AnswerTier, EvidenceQuotes, RawScores, ScoreTriple};
use crate::scoring::signals::{self, EvidencePoints, QualityVerdict, SafetySignals};
use serde::Serialize;

const MISSING_EVIDENCE_PENALTY: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub verdict: QualityVerdict,
    pub analysis: AnalysisFlags,
    pub evidence_points: EvidencePoints,
    pub safety: SafetySignals,
    pub vagueness_penalty: i32,
    pub missing_evidence_penalty: i32,
    /// After floors, ceilings and red-flag caps.
    pub capped: ScoreTriple,
    /// After evidence caps, the vagueness penalty and the safety floor.
    pub evidence_capped: ScoreTriple,
    pub final_scores: ScoreTriple,
}

impl Reconciliation {
    pub fn is_nonsense(&self) -> bool {
        self.verdict.tier == AnswerTier::Nonsense
    }
}

pub fn reconcile(
    answer: &str,
    question: &str,
    raw: RawScores,
    quotes: &EvidenceQuotes,
) -> Reconciliation {
    let verdict = signals::classify_quality(answer);
    let nonsense = verdict.tier == AnswerTier::Nonsense;
    let analysis = signals::analyze_answer(answer);
    let evidence_points = signals::evidence_points(answer);
    let safety = signals::safety_signals(answer);
    let vague = vagueness_penalty(answer, analysis.has_actions);

    let capped = apply_score_caps(raw, &analysis, question);
    let mut evidence_capped = apply_evidence_caps(capped, evidence_points, nonsense, vague);
    if !nonsense {
        evidence_capped = apply_safety_floor(evidence_capped, safety);
    }

    let missing = missing_evidence_penalty(answer, quotes);
    let final_scores = if nonsense {
        ScoreTriple::uniform(1)
    } else {
        ScoreTriple {
            clarity: (evidence_capped.clarity - missing).max(1),
            confidence: (evidence_capped.confidence - missing).max(1),
            clinical_reasoning: (evidence_capped.clinical_reasoning - missing).max(1),
        }
    };

    Reconciliation {
        verdict,
        analysis,
        evidence_points,
        safety,
        vagueness_penalty: vague,
        missing_evidence_penalty: missing,
        capped,
        evidence_capped,
        final_scores,
    }
}

fn clamp_score(value: f64) -> i32 {
    value.round().clamp(0.0, 10.0) as i32
}

/// Floors and ceilings derived from the answer analysis and the question.
pub fn apply_score_caps(raw: RawScores, analysis: &AnalysisFlags, question: &str) -> ScoreTriple {
    let mut clarity = raw.clarity;
    let mut confidence = raw.confidence;
    let mut reasoning = raw.clinical_reasoning;
    let red_flagged = !analysis.red_flags.is_empty();

    let mut floor = 1.0;
    if analysis.has_actions {
        floor = 3.0;
    }
    if analysis.has_example {
        floor = 4.0;
    }
    if analysis.has_actions && analysis.has_outcome {
        floor = 5.0;
    }
    if red_flagged {
        floor = 1.0;
    }
    reasoning = reasoning.max(floor);

    // education-heavy answers count as having actions
    let effective_actions = analysis.has_actions || analysis.education_signals >= 2;

    if !analysis.has_example {
        reasoning = reasoning.min(4.0);
    }
    if !effective_actions {
        reasoning = reasoning.min(4.0);
    }
    if analysis.word_count < 40 {
        clarity = clarity.min(4.0);
    }
    if analysis.is_vague {
        reasoning = reasoning.min(4.0);
        confidence = confidence.min(5.0);
    }

    let ethical = signals::is_ethical_question(question);
    if ethical {
        let cap = if analysis.ethics_signals >= 2 { 7.0 } else { 5.0 };
        reasoning = reasoning.min(cap);
    } else if !analysis.has_outcome {
        reasoning = reasoning.min(5.0);
    }
    if !ethical && analysis.education_signals >= 3 && analysis.word_count >= 45 {
        reasoning = reasoning.min(6.0);
    }

    if red_flagged {
        confidence = confidence.min(4.0);
        reasoning = reasoning.min(3.0);
    }

    if analysis.word_count >= 20 {
        clarity = clarity.max(2.0);
    }
    if !signals::has_sequencing_cue(question) && !effective_actions {
        clarity = clarity.min(5.0);
    }

    ScoreTriple {
        clarity: clamp_score(clarity),
        confidence: clamp_score(confidence),
        clinical_reasoning: clamp_score(reasoning),
    }
}

/// 3 for heavy hedging without actions, otherwise 2/1/0 by hedge count.
pub fn vagueness_penalty(answer: &str, has_actions: bool) -> i32 {
    let hedges = signals::hedge_phrase_count(answer);
    if !has_actions && hedges >= 3 {
        3
    } else if hedges >= 2 {
        2
    } else if hedges >= 1 {
        1
    } else {
        0
    }
}

/// Caps each score at `base + 2 * points` and keeps it within [1, 10].
pub fn apply_evidence_caps(
    scores: ScoreTriple,
    points: EvidencePoints,
    nonsense: bool,
    vagueness_penalty: i32,
) -> ScoreTriple {
    let mut scores = scores;
    if nonsense {
        scores.clarity = scores.clarity.min(2);
        scores.confidence = scores.confidence.min(2);
        scores.clinical_reasoning = scores.clinical_reasoning.min(2);
    }

    let cap = |value: i32, max: i32| value.min(max).clamp(1, 10);
    let clarity_max = 2 + points.clarity_points * 2;
    let confidence_max = 2 + points.confidence_points * 2;
    let reasoning_max = 1 + points.reasoning_points * 2;

    let mut capped = ScoreTriple {
        clarity: cap(scores.clarity, clarity_max),
        confidence: cap(scores.confidence, confidence_max),
        clinical_reasoning: cap(scores.clinical_reasoning, reasoning_max),
    };

    if vagueness_penalty > 0 {
        capped = ScoreTriple {
            clarity: cap(capped.clarity - vagueness_penalty, clarity_max),
            confidence: cap(capped.confidence - vagueness_penalty, confidence_max),
            clinical_reasoning: cap(
                capped.clinical_reasoning - vagueness_penalty,
                reasoning_max,
            ),
        };
    }
    capped
}

/// Relevance floor for otherwise generic answers that show safety habits.
pub fn apply_safety_floor(scores: ScoreTriple, safety: SafetySignals) -> ScoreTriple {
    if safety.count == 0 {
        return scores;
    }
    let confidence_floor = if safety.asked_for_help { 3 } else { 2 };
    let reasoning_floor = if safety.count >= 3 { 3 } else { 2 };
    ScoreTriple {
        clarity: scores.clarity.max(2),
        confidence: scores.confidence.max(confidence_floor),
        clinical_reasoning: scores.clinical_reasoning.max(reasoning_floor),
    }
}

/// Flat penalty when any category has no oracle quote that actually
/// appears in the answer.
pub fn missing_evidence_penalty(answer: &str, quotes: &EvidenceQuotes) -> i32 {
    let lowered = answer.to_lowercase();
    let grounded = |category: &[String]| {
        category
            .iter()
            .filter(|quote| !quote.is_empty() && lowered.contains(&quote.to_lowercase()))
            .count()
    };

    let categories = [
        quotes.clarity.as_slice(),
        quotes.confidence.as_slice(),
        quotes.clinical_reasoning.as_slice(),
    ];
    categories
        .iter()
        .map(|category| {
            if grounded(category) == 0 {
                MISSING_EVIDENCE_PENALTY
            } else {
                0
            }
        })
        .max()
        .unwrap_or(0)
}
