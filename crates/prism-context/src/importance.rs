//! Message importance scoring from simple lexical cues.

use prism_core::Role;

const DECISION_CUES: &[&str] = &[
    "decide", "decided", "choose", "chose", "commit", "agree", "confirmed", "will do",
    "quyết định", "chọn", "đồng ý", "xác nhận", "chốt",
];

const URGENCY_CUES: &[&str] = &[
    "urgent", "asap", "immediately", "right now", "deadline", "gấp", "ngay", "khẩn cấp",
];

/// Compute a message's importance in [0, 1].
///
/// Base 0.5; a question adds 0.1, decision or commitment verbs add 0.2,
/// urgency markers add 0.15, a user turn adds 0.1.
pub fn score(text: &str, role: Role) -> f64 {
    let lower = text.to_lowercase();
    let mut score: f64 = 0.5;

    if lower.contains('?') {
        score += 0.1;
    }
    if DECISION_CUES.iter().any(|c| lower.contains(c)) {
        score += 0.2;
    }
    if URGENCY_CUES.iter().any(|c| lower.contains(c)) {
        score += 0.15;
    }
    if role == Role::User {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}
