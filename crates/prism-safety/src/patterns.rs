//! Pattern tier of the safety pipeline.
//!
//! Decision order:
//!   1. Prompt-injection patterns (template literals, env references,
//!      system-prompt / tool-schema / history leak phrases).
//!   2. Suspicious repetition (low unique-token ratio on long inputs).
//!   3. Suspicious Unicode (control, zero-width, line separators).
//!
//! The first match wins and carries a reason for the log line.

use std::sync::LazyLock;

use regex::Regex;

use crate::sanitize::is_suspicious_codepoint;

/// Repetition flags inputs longer than this many tokens.
const REPETITION_MIN_TOKENS: usize = 20;
/// Unique-token ratio below this is suspicious.
const REPETITION_MIN_UNIQUE_RATIO: f64 = 0.30;

static INJECTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Template literals and environment references.
        (r"\$\{[^}]*\}", "template literal"),
        (r"process\.env", "environment variable reference"),
        (r"\bprintenv\b", "environment dump request"),
        (r"\$[A-Z_]{4,}", "environment variable reference"),
        // System-prompt leaks.
        (
            r"(?i)ignore\s+(?:all\s+)?(?:previous|prior|above)\s+instructions",
            "system prompt override",
        ),
        (r"(?i)\bsystem\s+prompt\b", "system prompt leak"),
        (
            r"(?i)reveal\s+(?:your\s+)?(?:instructions|prompt|rules)",
            "system prompt leak",
        ),
        (r"(?i)you\s+are\s+now\s+(?:a|an|in)\b", "role override"),
        // Tool-schema leaks.
        (r"(?i)\btool\s+schemas?\b", "tool schema leak"),
        (
            r"(?i)(?:list|show|dump)\s+(?:me\s+)?(?:all\s+)?(?:your\s+)?(?:tools|functions)\b",
            "tool schema leak",
        ),
        (r"(?i)\bfunction\s+definitions\b", "tool schema leak"),
        // Conversation-history leaks.
        (r"(?i)\bconversation\s+history\b", "history leak"),
        (
            r"(?i)(?:print|dump|repeat)\s+(?:the\s+)?(?:previous|earlier)\s+messages",
            "history leak",
        ),
    ]
    .into_iter()
    .map(|(pattern, reason)| (Regex::new(pattern).unwrap(), reason))
    .collect()
});

/// First injection pattern matching `text`, with its reason.
pub fn find_injection(text: &str) -> Option<&'static str> {
    INJECTION_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, reason)| *reason)
}

/// Low lexical diversity on a long input: the unique-token ratio drops
/// below 30% once the text exceeds twenty tokens.
pub fn is_suspicious_repetition(text: &str) -> bool {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() <= REPETITION_MIN_TOKENS {
        return false;
    }
    let unique: std::collections::HashSet<&str> = tokens.iter().copied().collect();
    (unique.len() as f64 / tokens.len() as f64) < REPETITION_MIN_UNIQUE_RATIO
}

/// Any codepoint in the flagged ranges (control, zero-width, separators).
pub fn has_suspicious_unicode(text: &str) -> bool {
    text.chars().any(is_suspicious_codepoint)
}
