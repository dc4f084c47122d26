use std::collections::HashSet;

/// Built-in fallback questions, used when the oracle keeps proposing a
/// question the candidate has already been asked.
pub const DEFAULT_FALLBACK_QUESTIONS: [&str; 12] = [
    "Tell me about a time you had to escalate care for a deteriorating patient. What did you notice and what did you do?",
    "How do you communicate critical changes to providers using SBAR? Give an example.",
    "Describe a medication safety situation you handled. What checks did you perform?",
    "How do you respond to a conflict with a provider or team member while advocating for a patient?",
    "Describe a time you managed a sudden change in patient status. What assessments and interventions did you prioritize?",
    "How do you handle an ethical concern when family wishes conflict with patient goals of care?",
    "Walk me through how you prioritize care when two of your patients need you at the same time.",
    "Tell me about a time you taught a patient or family member something important before discharge. How did you confirm they understood?",
    "Describe how you keep a patient safe from falls or pressure injuries during a busy shift.",
    "Tell me about a time you noticed an error or near miss. What did you do and who did you tell?",
    "How do you support a patient who is anxious, in pain, or refusing care?",
    "Describe a handoff you gave or received that went poorly. What would you change and why?",
];

/// Trim, collapse internal whitespace and lowercase.
pub fn normalize_question(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Two questions are the same when both are non-empty after normalization
/// and equal.
pub fn is_same_question(a: &str, b: &str) -> bool {
    let a = normalize_question(a);
    let b = normalize_question(b);
    !a.is_empty() && a == b
}

#[derive(Debug, Clone)]
pub struct FallbackBank {
    questions: Vec<String>,
}

impl Default for FallbackBank {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_QUESTIONS.iter().map(|q| q.to_string()).collect())
    }
}

impl FallbackBank {
    pub fn new(questions: Vec<String>) -> Self {
        let questions = questions
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .collect();
        Self { questions }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// First bank question not already asked. When every bank question has
    /// been used, the first one is reissued with a scenario marker so that
    /// it still differs from everything asked so far.
    pub fn pick<'a, I>(&self, asked: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let used: HashSet<String> = asked.into_iter().map(normalize_question).collect();

        if let Some(fresh) = self
            .questions
            .iter()
            .find(|q| !used.contains(&normalize_question(q)))
        {
            return fresh.clone();
        }

        let base = self
            .questions
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_FALLBACK_QUESTIONS[0]);
        (2..)
            .map(|n| format!("{base} (Scenario {n})"))
            .find(|candidate| !used.contains(&normalize_question(candidate)))
            .unwrap_or_else(|| base.to_string())
    }
}
