//! Canned prompts and checks used by the command-line runners.

/// Reply printed when the interactive loop ends.
pub const FAREWELL: &str =
    "It's been wonderful talking with you! Take care and remember that your feelings matter.";

/// Messages shown before interactive chat starts.
pub const EXAMPLE_PROMPTS: [&str; 5] = [
    "I'm feeling really anxious about my presentation tomorrow.",
    "I just got some great news and I'm so excited!",
    "I'm feeling overwhelmed with all my work lately.",
    "I'm really grateful for my friends and family.",
    "I'm not sure what I want to do with my career.",
];

/// Prompt used when probing candidate models.
pub const PROBE_PROMPT: &str = "I'm feeling really stressed about my presentation tomorrow.";

/// A prompt and words an empathetic reply is expected to use.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationCase {
    pub input: &'static str,
    pub expected_keywords: &'static [&'static str],
}

pub const EVALUATION_CASES: [EvaluationCase; 5] = [
    EvaluationCase {
        input: "I'm feeling really anxious about my job interview tomorrow.",
        expected_keywords: &["understand", "anxious", "natural", "stress", "nervous"],
    },
    EvaluationCase {
        input: "I just got promoted at work and I'm so excited!",
        expected_keywords: &["wonderful", "excited", "congratulations", "proud", "achievement"],
    },
    EvaluationCase {
        input: "I'm feeling overwhelmed with all my responsibilities.",
        expected_keywords: &["understand", "overwhelmed", "responsibilities", "help", "manage"],
    },
    EvaluationCase {
        input: "I'm really grateful for my friends and family.",
        expected_keywords: &["grateful", "beautiful", "appreciate", "wonderful", "support"],
    },
    EvaluationCase {
        input: "I'm not sure what I want to do with my life.",
        expected_keywords: &["common", "natural", "uncertain", "figure", "challenge"],
    },
];

impl EvaluationCase {
    /// Expected keywords present in `reply`, case-insensitively.
    pub fn found_keywords(&self, reply: &str) -> Vec<&'static str> {
        let reply = reply.to_lowercase();
        self.expected_keywords
            .iter()
            .copied()
            .filter(|keyword| reply.contains(keyword))
            .collect()
    }
}

/// A candidate base model for `brello options`.
#[derive(Debug, Clone, Copy)]
pub struct ModelOption {
    pub model_id: &'static str,
    pub description: &'static str,
}

pub const MODEL_OPTIONS: [ModelOption; 3] = [
    ModelOption {
        model_id: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        description: "Public model (recommended for quick start)",
    },
    ModelOption {
        model_id: "meta-llama/Llama-3.2-3B-Instruct",
        description: "Larger gated model (better responses)",
    },
    ModelOption {
        model_id: "meta-llama/Llama-3.2-1B-Instruct",
        description: "Smaller gated model (faster)",
    },
];

/// Whether `input` ends the interactive loop.
pub fn is_farewell(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "quit" | "exit" | "bye")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keyword_matching_ignores_case() {
        let case = EVALUATION_CASES[0];
        let found = case.found_keywords("I UNDERSTAND. Feeling nervous is natural.");
        assert_eq!(found, vec!["understand", "natural", "nervous"]);
        assert!(case.found_keywords("Okay.").is_empty());
    }

    #[test]
    fn test_farewell_words() {
        assert!(is_farewell("quit"));
        assert!(is_farewell("  Bye "));
        assert!(is_farewell("EXIT"));
        assert!(!is_farewell("goodbye for now"));
    }
}
