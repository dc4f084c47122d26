//! Deterministic lexical signals extracted from a free-text answer.
//!
//! Every check here is case-insensitive and side-effect free; the same
//! answer always yields the same signals.

use crate::domain::models::{AnalysisFlags, AnswerTier};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const FILLER_ANSWERS: [&str; 10] = [
    "idk",
    "i don't know",
    "n/a",
    "na",
    "none",
    "asdf",
    "test",
    "aaa",
    "???",
    "...",
];

const ACTION_VERBS: [&str; 28] = [
    "assessed",
    "evaluated",
    "monitored",
    "escalated",
    "delegated",
    "intervened",
    "administered",
    "reassessed",
    "educated",
    "coached",
    "triaged",
    "stabilized",
    "prioritized",
    "notified",
    "coordinated",
    "collaborated",
    "responded",
    "de-escalated",
    // education and communication
    "explained",
    "taught",
    "instructed",
    "demonstrated",
    "reinforced",
    "counseled",
    "teach-back",
    "verified",
    "provided discharge instructions",
    "used interpreter",
];

const RED_FLAG_PHRASES: [&str; 13] = [
    "i just follow orders",
    "i waited",
    "i can't think of",
    "i cannot think of",
    "doctors already know",
    "not really had to",
    "hope things slow down",
    "wait and see",
    "not sure",
    "i guess",
    "nothing specific",
    "i didn't do much",
    "would probably",
];

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("static scoring pattern must compile")
}

static STRUCTURE_RE: Lazy<Regex> = Lazy::new(|| ci(r"first|second|then|next|after|finally|step"));
static DETAIL_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"who|what|when|where|why|because|during|after|while"));
static DECISIVE_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"i (did|escalated|reassessed|administered|called|notified|communicated)")
});
static HEDGING_RE: Lazy<Regex> = Lazy::new(|| ci(r"maybe|i think|i would|i guess"));
static COMMUNICATION_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"notified|called|spoke with|updated|communicated|escalated"));
static ASSESSMENT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"bp|hr|rr|spo2|map|vitals|assessment|symptom|pain|respiratory|neuro")
});
static PRIORITIZATION_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"abc|priority|unstable|stable|safety|time-sensitive|triage"));
static ESCALATION_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"provider|rapid response|charge nurse|team|collaborat|consult"));
static OUTCOME_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"outcome|reassess|improved|worsened|stabilized|resolved"));

static ACTION_VERB_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ACTION_VERBS
        .iter()
        .map(|verb| ci(&format!(r"\b{}\b", regex::escape(verb))))
        .collect()
});

static SPECIFICITY_RES: Lazy<[Regex; 5]> = Lazy::new(|| {
    [
        ci(r"bp|blood pressure|hr|heart rate|rr|respiratory rate|spo2|map"),
        ci(r"vent|ventilator|drip|iv|line|central line|abg"),
        ci(r"\d+(\.\d+)?\s?(mg|mcg|ml|units)"),
        ci(r"rt|respiratory therapist|charge|rapid response"),
        ci(r"teach-back|interpreter|education|instruction|explain"),
    ]
});

static SITUATION_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"patient|family|provider|nurse|unit|shift|symptom|pain|meds|refusal|concern|clinic|floor|room|discharge|education")
});
static OUTCOME_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"stabilized|improved|resolved|avoided|reduced|decreased|controlled|prevented|de-?escalated|escalated appropriately|better|worse")
});
static UNDERSTANDING_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"verbalized understanding|teach-back|able to repeat instructions|demonstrated technique|agreed to plan|asked appropriate questions|follow-up plan confirmed")
});
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| ci(r"\b\d+(\.\d+)?\b"));
static CLINICAL_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| ci(r"bp|hr|rr|spo2|map|vent|drip|iv|abg"));
static ETHICS_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"autonomy|consent|goals of care|family|advocacy|document|advance directive|dnr|capacity|surrogate|values|preferences|power of attorney|guardian|shared decision")
});
static EDUCATION_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"educated|explained|taught|instructed|demonstrated|reinforced|counseled|teach-back|discharge instructions|interpreter|verified understanding")
});
static ETHICAL_QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"ethical|goals of care|end-of-life|family disagreement|consent|autonomy|dnr|advance directive")
});
static HEDGE_PHRASE_RE: Lazy<Regex> = Lazy::new(|| ci(r"i would|i think|maybe|try to|just"));
static SEQUENCING_CUE_RE: Lazy<Regex> = Lazy::new(|| ci(r"first|then|after|when|for example"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityVerdict {
    pub tier: AnswerTier,
    pub reason: &'static str,
}

/// Separates throwaway answers (filler, keyboard mashing, a word or two)
/// from answers that deserve normal scoring.
pub fn classify_quality(answer: &str) -> QualityVerdict {
    let trimmed = answer.trim().to_lowercase();
    let word_count = trimmed.split_whitespace().count();
    let clean: Vec<char> = trimmed.chars().filter(|c| !c.is_whitespace()).collect();

    let dominant = clean
        .iter()
        .map(|ch| clean.iter().filter(|other| *other == ch).count())
        .max()
        .unwrap_or(0);
    let total = clean.len().max(1);

    let nonsense = trimmed.chars().count() < 8
        || word_count < 2
        || FILLER_ANSWERS.contains(&trimmed.as_str())
        || dominant as f64 / total as f64 > 0.8
        || has_char_run(&trimmed, 3);

    if nonsense {
        QualityVerdict {
            tier: AnswerTier::Nonsense,
            reason: "Too short or filler",
        }
    } else {
        QualityVerdict {
            tier: AnswerTier::Generic,
            reason: "",
        }
    }
}

fn is_line_break(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

// Runs of line breaks are paragraph gaps, not keyboard mashing.
fn has_char_run(text: &str, run: usize) -> bool {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(run)
        .any(|window| !is_line_break(window[0]) && window.iter().all(|c| *c == window[0]))
}

/// Per-category evidence points bounding how high a score may rise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvidencePoints {
    pub clarity_points: i32,
    pub confidence_points: i32,
    pub reasoning_points: i32,
}

pub fn evidence_points(answer: &str) -> EvidencePoints {
    let has_structure = STRUCTURE_RE.is_match(answer);
    let has_details = DETAIL_RE.is_match(answer);
    let long_enough = answer.chars().count() > 120;
    let clarity = [has_structure, has_details, long_enough]
        .iter()
        .filter(|hit| **hit)
        .count() as i32;

    let decisive = DECISIVE_RE.is_match(answer);
    let hedging_only = HEDGING_RE.is_match(answer) && !decisive;
    let communicates = COMMUNICATION_RE.is_match(answer);
    let confidence = [decisive, !hedging_only, communicates]
        .iter()
        .filter(|hit| **hit)
        .count() as i32;

    let reasoning = [
        &*ASSESSMENT_RE,
        &*PRIORITIZATION_RE,
        &*ESCALATION_RE,
        &*OUTCOME_MENTION_RE,
    ]
    .iter()
    .filter(|re| re.is_match(answer))
    .count() as i32;

    EvidencePoints {
        clarity_points: clarity.min(3),
        confidence_points: confidence.min(3),
        reasoning_points: reasoning.min(4),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SafetySignals {
    pub count: usize,
    pub asked_for_help: bool,
}

/// Counts nursing-safety behaviours: patient/medication checks, the five
/// rights, allergies, asking for help, monitoring, and order/MAR checks.
pub fn safety_signals(answer: &str) -> SafetySignals {
    let text = answer.to_lowercase();
    let asked_for_help =
        text.contains("ask") && (text.contains("nurse") || text.contains("preceptor"));

    let checks = [
        text.contains("check") && (text.contains("patient") || text.contains("medication")),
        text.contains("five rights") || text.contains("rights"),
        text.contains("allergy"),
        asked_for_help,
        text.contains("monitor") || text.contains("side effects") || text.contains("reassess"),
        text.contains("order") || text.contains("mar"),
    ];

    SafetySignals {
        count: checks.iter().filter(|hit| **hit).count(),
        asked_for_help,
    }
}

pub fn action_verb_matches(answer: &str) -> usize {
    ACTION_VERB_RES.iter().filter(|re| re.is_match(answer)).count()
}

pub fn analyze_answer(answer: &str) -> AnalysisFlags {
    let lowered = answer.to_lowercase();
    let word_count = answer.split_whitespace().count();
    let actions = action_verb_matches(answer);

    let specificity_signals = SPECIFICITY_RES.iter().filter(|re| re.is_match(answer)).count();
    let has_actions = actions >= 2;
    let has_example = has_actions && SITUATION_RE.is_match(answer);
    let has_outcome = OUTCOME_RE.is_match(answer) || UNDERSTANDING_RE.is_match(answer);

    let red_flags: Vec<String> = RED_FLAG_PHRASES
        .iter()
        .filter(|phrase| lowered.contains(*phrase))
        .map(|phrase| phrase.to_string())
        .collect();

    let numeric_tokens = NUMERIC_RE.find_iter(answer).count();
    let clinical_keywords = CLINICAL_KEYWORD_RE.find_iter(answer).count();
    let is_vague = specificity_signals < 2 && numeric_tokens + clinical_keywords < 2;

    AnalysisFlags {
        has_example,
        has_actions,
        has_outcome,
        red_flags,
        word_count,
        is_vague,
        specificity_signals,
        numeric_tokens,
        clinical_keywords,
        ethics_signals: ETHICS_RE.find_iter(answer).count(),
        education_signals: EDUCATION_RE.find_iter(answer).count(),
    }
}

pub fn is_ethical_question(question: &str) -> bool {
    ETHICAL_QUESTION_RE.is_match(question)
}

/// Whether the question itself prompts for a sequence or an example.
pub fn has_sequencing_cue(question: &str) -> bool {
    SEQUENCING_CUE_RE.is_match(question)
}

/// Number of hedging phrases ("i would", "i think", "maybe", "try to", "just").
pub fn hedge_phrase_count(answer: &str) -> usize {
    HEDGE_PHRASE_RE.find_iter(answer).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_ANSWER: &str = "First I assessed the patient's vitals because her BP dropped. \
        Then I notified the charge nurse and escalated to the provider. \
        I reassessed and she stabilized.";

    #[test]
    fn test_filler_and_short_answers_are_nonsense() {
        for answer in ["idk", "  N/A ", "i don't know", "ok", "okay"] {
            assert_eq!(
                classify_quality(answer).tier,
                AnswerTier::Nonsense,
                "{answer:?} should be nonsense"
            );
        }
    }

    #[test]
    fn test_repeated_characters_are_nonsense() {
        assert_eq!(classify_quality("hello zzz there").tier, AnswerTier::Nonsense);
        assert_eq!(classify_quality("aaaa aaaa ab").tier, AnswerTier::Nonsense);
    }

    #[test]
    fn test_paragraph_gaps_are_not_a_character_run() {
        let answer = "I checked the patient first.\n\n\nThen I told my preceptor.";
        assert_eq!(classify_quality(answer).tier, AnswerTier::Generic);
        assert_eq!(classify_quality("line one\r\n\r\nline two").tier, AnswerTier::Generic);
        assert!(has_char_run("fine\n\n\n!!!", 3));
    }

    #[test]
    fn test_plain_sentence_is_generic() {
        let verdict = classify_quality("I checked the patient and told my preceptor");
        assert_eq!(verdict.tier, AnswerTier::Generic);
        assert_eq!(verdict.reason, "");
    }

    #[test]
    fn test_evidence_points_for_structured_answer() {
        let points = evidence_points(STRONG_ANSWER);
        assert_eq!(points.clarity_points, 3);
        assert_eq!(points.confidence_points, 3);
        assert_eq!(points.reasoning_points, 3);
    }

    #[test]
    fn test_hedging_answer_loses_confidence_point() {
        let points = evidence_points("maybe I would look at things");
        assert_eq!(points.confidence_points, 0);
        assert_eq!(points.clarity_points, 0);
    }

    #[test]
    fn test_safety_signals() {
        let signals = safety_signals(
            "I would check the patient's allergy band and ask my preceptor before giving it",
        );
        assert_eq!(signals.count, 3);
        assert!(signals.asked_for_help);

        let none = safety_signals("I like working here");
        assert_eq!(none.count, 0);
        assert!(!none.asked_for_help);
    }

    #[test]
    fn test_analysis_of_strong_answer() {
        let flags = analyze_answer(STRONG_ANSWER);
        assert!(flags.has_actions);
        assert!(flags.has_example);
        assert!(flags.has_outcome);
        assert!(flags.red_flags.is_empty());
        assert!(!flags.is_vague);
    }

    #[test]
    fn test_red_flags_detected() {
        let flags = analyze_answer("Honestly I just follow orders and I waited for the doctor");
        assert_eq!(
            flags.red_flags,
            vec!["i just follow orders".to_string(), "i waited".to_string()]
        );
        assert!(!flags.has_actions);
    }

    #[test]
    fn test_vague_answer() {
        let flags = analyze_answer("I would try to help the patient feel better");
        assert!(flags.is_vague);
        assert_eq!(flags.numeric_tokens, 0);
    }

    #[test]
    fn test_education_signals_are_counted() {
        let flags = analyze_answer(
            "I explained the insulin schedule, demonstrated the pen, and used teach-back.",
        );
        assert_eq!(flags.education_signals, 3);
        assert!(flags.has_actions);
    }

    #[test]
    fn test_ethical_question_detection() {
        assert!(is_ethical_question(
            "How would you handle a family disagreement about goals of care?"
        ));
        assert!(!is_ethical_question("How do you prioritize two admissions?"));
    }

    #[test]
    fn test_hedge_phrase_count() {
        assert_eq!(hedge_phrase_count("I think maybe I would try to call"), 4);
        assert_eq!(hedge_phrase_count("I called the provider"), 0);
    }
}
