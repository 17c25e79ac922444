//! Prompt scaffolding and reply post-processing.
//!
//! Every prompt has the same three sections:
//!
//! ```text
//! <|system|>
//! {persona}
//! </s>
//! <|user|>
//! {user text}
//! </s>
//! <|assistant|>
//! ```
//!
//! User text is inserted verbatim. A user message that itself contains one of
//! the markers will break the section structure; nothing guards against that.

use serde::{Deserialize, Serialize};

use crate::config::ResponsePolicy;

pub const SYSTEM_MARKER: &str = "<|system|>";
pub const USER_MARKER: &str = "<|user|>";
pub const ASSISTANT_MARKER: &str = "<|assistant|>";
pub const END_OF_TURN: &str = "</s>";

/// Persona used at inference time.
pub const DEFAULT_PERSONA: &str = "You are Brello EI 0, an emotionally intelligent AI created by Epic Systems and engineered by Rehan Temkar. You provide empathetic, understanding responses that show emotional awareness and genuine care for the user's feelings and experiences. You are part of the Brello AI family, designed to bring emotional intelligence to AI conversations.";

/// One completed user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl Exchange {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    system: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::with_system(DEFAULT_PERSONA)
    }
}

impl PromptTemplate {
    pub fn with_system(system: impl Into<String>) -> Self {
        Self { system: system.into() }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Single-turn prompt ending with the assistant marker.
    pub fn format_prompt(&self, user_text: &str) -> String {
        self.format_conversation(&[], user_text)
    }

    /// Prompt with earlier exchanges rendered as completed turns before the
    /// current user message.
    pub fn format_conversation(&self, history: &[Exchange], user_text: &str) -> String {
        let mut out = self.system_section();
        for exchange in history {
            push_user_turn(&mut out, &exchange.user);
            push_assistant_turn(&mut out, &exchange.assistant);
        }
        push_user_turn(&mut out, user_text);
        out.push_str(ASSISTANT_MARKER);
        out
    }

    /// A fully closed exchange, as used for training text.
    pub fn render_exchange(&self, exchange: &Exchange) -> String {
        let mut out = self.system_section();
        push_user_turn(&mut out, &exchange.user);
        push_assistant_turn(&mut out, &exchange.assistant);
        // drop the newline after the final end-of-turn marker
        out.pop();
        out
    }

    fn system_section(&self) -> String {
        format!("{SYSTEM_MARKER}\n{}\n{END_OF_TURN}\n", self.system)
    }
}

fn push_user_turn(out: &mut String, text: &str) {
    out.push_str(USER_MARKER);
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out.push_str(END_OF_TURN);
    out.push('\n');
}

fn push_assistant_turn(out: &mut String, text: &str) {
    out.push_str(ASSISTANT_MARKER);
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out.push_str(END_OF_TURN);
    out.push('\n');
}

/// Text after the last assistant marker, or the whole text when there is
/// none, trimmed.
pub fn extract_reply(decoded: &str) -> &str {
    match decoded.rsplit_once(ASSISTANT_MARKER) {
        Some((_, reply)) => reply.trim(),
        None => decoded.trim(),
    }
}

/// Wraps replies shorter than `policy.min_chars` characters in the filler
/// sentences; longer replies pass through untouched.
pub fn pad_short_reply(reply: &str, policy: &ResponsePolicy) -> String {
    if reply.chars().count() >= policy.min_chars {
        return reply.to_string();
    }

    let mut out = String::with_capacity(
        policy.filler_prefix.len() + reply.len() + policy.filler_suffix.len() + 2,
    );
    out.push_str(&policy.filler_prefix);
    out.push(' ');
    out.push_str(reply);
    if !policy.filler_suffix.is_empty() {
        out.push(' ');
        out.push_str(&policy.filler_suffix);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_prompt_layout() {
        let template = PromptTemplate::with_system("Be kind.");
        assert_eq!(
            template.format_prompt("I'm sad."),
            "<|system|>\nBe kind.\n</s>\n<|user|>\nI'm sad.\n</s>\n<|assistant|>"
        );
    }

    #[test]
    fn test_format_prompt_is_deterministic() {
        let template = PromptTemplate::default();
        let a = template.format_prompt("I'm feeling overwhelmed with all my work lately.");
        let b = template.format_prompt("I'm feeling overwhelmed with all my work lately.");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_single_user_section_and_trailing_marker() {
        let prompt = PromptTemplate::default().format_prompt("hello there");
        assert_eq!(prompt.matches(USER_MARKER).count(), 1);
        assert_eq!(prompt.matches(SYSTEM_MARKER).count(), 1);
        assert!(prompt.ends_with(ASSISTANT_MARKER));
        assert!(prompt.contains(DEFAULT_PERSONA));
    }

    #[test]
    fn test_conversation_renders_history_in_order() {
        let template = PromptTemplate::with_system("sys");
        let history = vec![Exchange::new("first", "reply one"), Exchange::new("second", "reply two")];
        let prompt = template.format_conversation(&history, "third");

        assert_eq!(prompt.matches(USER_MARKER).count(), 3);
        assert_eq!(prompt.matches(ASSISTANT_MARKER).count(), 3);
        let first = prompt.find("reply one").unwrap();
        let second = prompt.find("reply two").unwrap();
        let third = prompt.find("third").unwrap();
        assert!(first < second && second < third);
        assert!(prompt.ends_with(ASSISTANT_MARKER));
    }

    #[test]
    fn test_render_exchange_is_closed() {
        let text = PromptTemplate::with_system("sys").render_exchange(&Exchange::new("hi", "hello"));
        assert_eq!(
            text,
            "<|system|>\nsys\n</s>\n<|user|>\nhi\n</s>\n<|assistant|>\nhello\n</s>"
        );
    }

    #[test]
    fn test_extract_reply() {
        assert_eq!(extract_reply("<|assistant|>I understand."), "I understand.");
        assert_eq!(extract_reply("  no marker here \n"), "no marker here");
        assert_eq!(
            extract_reply("<|user|> a <|assistant|> first <|assistant|>  last one "),
            "last one"
        );
    }

    #[test]
    fn test_short_reply_is_padded() {
        let policy = ResponsePolicy::default();
        let padded = pad_short_reply("I understand.", &policy);
        assert!(padded.starts_with("I understand how you might be feeling."));
        assert!(padded.contains("I understand."));
        assert_eq!(
            padded,
            "I understand how you might be feeling. I understand. It's important to acknowledge our emotions and experiences."
        );
    }

    #[test]
    fn test_threshold_counts_characters() {
        let policy = ResponsePolicy::default();
        let exactly_twenty = "abcdefghijklmnopqrst";
        assert_eq!(pad_short_reply(exactly_twenty, &policy), exactly_twenty);

        // 19 characters, more than 20 bytes
        let accented = "ééééééééééééééééééé";
        assert!(accented.len() > 20);
        assert!(pad_short_reply(accented, &policy).starts_with(&policy.filler_prefix));
    }
}
