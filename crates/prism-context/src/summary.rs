//! Running summarization.
//!
//! The summarizer is pure and deterministic: no model call, no clock reads.
//! A summary names the message/time span it covers, counts turns per role,
//! quotes the opening and closing line, and lists the entities mentioned.

use std::collections::BTreeSet;

use prism_core::{estimate_tokens, Message, Role};
use prism_memory::vectorizer::extract_entities;

use crate::window::Summary;

/// Longest rendered summary body.
const MAX_SUMMARY_CHARS: usize = 600;
/// Longest quoted fragment from a single message.
const MAX_QUOTE_CHARS: usize = 120;

/// Fold a batch of consecutive messages into one summary.
///
/// The batch must be non-empty and in chronological order.
pub fn summarize(id: u64, batch: &[Message]) -> Summary {
    let first = batch.first().expect("summarize requires a non-empty batch");
    let last = batch.last().expect("summarize requires a non-empty batch");

    let user_count = batch.iter().filter(|m| m.role == Role::User).count();
    let assistant_count = batch.iter().filter(|m| m.role == Role::Assistant).count();

    let mut entities: BTreeSet<String> = BTreeSet::new();
    for msg in batch {
        entities.extend(extract_entities(&msg.content.as_text()));
    }

    let mut text = format!(
        "Earlier segment ({} user / {} assistant turns). Opened with: \"{}\".",
        user_count,
        assistant_count,
        quote(&first.content.as_text()),
    );
    if batch.len() > 1 {
        text.push_str(&format!(" Closed with: \"{}\".", quote(&last.content.as_text())));
    }
    if !entities.is_empty() {
        let list: Vec<String> = entities.into_iter().take(8).collect();
        text.push_str(&format!(" Mentioned: {}.", list.join(", ")));
    }
    truncate_chars(&mut text, MAX_SUMMARY_CHARS);

    let tokens = estimate_tokens(&text);
    Summary {
        id,
        text,
        message_range: (first.id, last.id),
        time_range: (first.timestamp, last.timestamp),
        tokens,
    }
}

/// First sentence of `text`, capped at `MAX_QUOTE_CHARS`.
fn quote(text: &str) -> String {
    let first_sentence = text
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(text)
        .trim();
    let mut out = first_sentence.to_string();
    truncate_chars(&mut out, MAX_QUOTE_CHARS);
    out
}

fn truncate_chars(s: &mut String, max: usize) {
    if s.chars().count() > max {
        *s = s.chars().take(max).collect();
        s.push('…');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{ChatId, MessageContent, MessageId};

    fn msg(id: u64, role: Role, text: &str) -> Message {
        let mut m = Message::new(
            ChatId::from("c1"),
            MessageId(id),
            role,
            MessageContent::from(text),
        );
        m.timestamp = id as i64 * 1000;
        m
    }

    #[test]
    fn summary_covers_range_and_counts_roles() {
        let batch = vec![
            msg(1, Role::User, "Let's plan the Hanoi Trip. It starts 2024-06-01."),
            msg(2, Role::Assistant, "Sure. Flights are about $450 per person."),
            msg(3, Role::User, "Book it."),
        ];
        let s = summarize(1, &batch);
        assert_eq!(s.message_range, (MessageId(1), MessageId(3)));
        assert_eq!(s.time_range, (1000, 3000));
        assert!(s.text.contains("2 user / 1 assistant"));
        assert!(s.text.contains("Hanoi Trip"));
        assert!(s.text.contains("Book it."));
        assert!(s.tokens > 0);
    }

    #[test]
    fn summarize_is_deterministic() {
        let batch = vec![msg(1, Role::User, "hello there"), msg(2, Role::Assistant, "hi")];
        assert_eq!(summarize(1, &batch).text, summarize(1, &batch).text);
    }

    #[test]
    fn long_content_is_capped() {
        let long = "word ".repeat(500);
        let batch = vec![msg(1, Role::User, &long)];
        let s = summarize(1, &batch);
        assert!(s.text.chars().count() <= MAX_SUMMARY_CHARS + 1);
    }
}
