//! LLM-assisted safety classification and verdict recovery.
//!
//! The classifier is a seam: the gateway wires an LLM-backed implementation,
//! tests plug in canned ones. Model replies are supposed to be one strict
//! JSON object, but malformed output is routine, so `parse_verdict` runs a
//! recovery chain: direct parse, first balanced object, fenced block, field
//! regexes, then a keyword heuristic biased toward safe.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SafetyCategory};

/// System prompt for the classifier model. The category list is the closed
/// set from [`SafetyCategory`].
pub const CLASSIFIER_SYSTEM_PROMPT: &str = concat!(
    "You are a content safety classifier. Judge whether the given text is safe ",
    "for a general-audience assistant to process. Respond with ONLY a JSON ",
    r#"object: {"isSafe": boolean, "reason": string, "category": string}. "#,
    "category must be one of: medical_advice, financial_advice, legal_advice, ",
    "product_marketing, harmful_content, adult_content, gambling, drugs, ",
    "prompt_injection. A bare JSON object or one inside a fenced code block ",
    "are both acceptable."
);

/// Parsed classifier decision.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub reason: String,
    pub category: Option<SafetyCategory>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            reason: String::new(),
            category: None,
        }
    }
}

/// Something that can ask a model for a safety verdict. Returns the raw
/// model reply; parsing stays here so every implementation benefits from
/// the recovery chain.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct RawVerdict {
    #[serde(rename = "isSafe")]
    is_safe: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    category: Option<String>,
}

impl From<RawVerdict> for SafetyVerdict {
    fn from(raw: RawVerdict) -> Self {
        SafetyVerdict {
            is_safe: raw.is_safe,
            reason: raw.reason,
            category: raw.category.and_then(|c| c.parse().ok()),
        }
    }
}

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static IS_SAFE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""isSafe"\s*:\s*(true|false)"#).unwrap());
static REASON_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""reason"\s*:\s*"([^"]*)""#).unwrap());
static CATEGORY_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""category"\s*:\s*"([^"]*)""#).unwrap());

/// Recover a verdict from a model reply.
pub fn parse_verdict(reply: &str) -> SafetyVerdict {
    let trimmed = reply.trim();

    // (a) The reply is the object.
    if let Ok(raw) = serde_json::from_str::<RawVerdict>(trimmed) {
        return raw.into();
    }

    // (b) First balanced object inside the reply.
    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(raw) = serde_json::from_str::<RawVerdict>(candidate) {
            return raw.into();
        }
    }

    // (c) Object inside a fenced code block.
    if let Some(caps) = FENCED_JSON.captures(trimmed) {
        if let Ok(raw) = serde_json::from_str::<RawVerdict>(&caps[1]) {
            return raw.into();
        }
    }

    // (d) Field-by-field regex extraction.
    if let Some(caps) = IS_SAFE_FIELD.captures(trimmed) {
        let is_safe = &caps[1] == "true";
        let reason = REASON_FIELD
            .captures(trimmed)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let category = CATEGORY_FIELD
            .captures(trimmed)
            .and_then(|c| c[1].parse().ok());
        return SafetyVerdict {
            is_safe,
            reason,
            category,
        };
    }

    // (e) Keyword heuristic, biased toward safe.
    let lower = trimmed.to_lowercase();
    if lower.contains("unsafe") || lower.contains("not safe") {
        SafetyVerdict {
            is_safe: false,
            reason: "keyword heuristic".to_string(),
            category: Some(SafetyCategory::HarmfulContent),
        }
    } else {
        SafetyVerdict::safe()
    }
}

/// Find the first balanced `{…}` substring, respecting JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_json_parses() {
        let v = parse_verdict(r#"{"isSafe": true, "reason": "fine", "category": ""}"#);
        assert!(v.is_safe);
        assert_eq!(v.reason, "fine");
    }

    #[test]
    fn fenced_block_parses() {
        let reply = "```json\n{\"isSafe\":false,\"reason\":\"medical\",\"category\":\"medical_advice\"}\n```";
        let v = parse_verdict(reply);
        assert!(!v.is_safe);
        assert_eq!(v.category, Some(SafetyCategory::MedicalAdvice));
    }

    #[test]
    fn balanced_object_inside_prose_parses() {
        let reply = r#"Here is my verdict: {"isSafe": false, "reason": "ads", "category": "product_marketing"} — hope that helps."#;
        let v = parse_verdict(reply);
        assert!(!v.is_safe);
        assert_eq!(v.category, Some(SafetyCategory::ProductMarketing));
    }

    #[test]
    fn nested_braces_in_strings_do_not_confuse_the_scanner() {
        let reply = r#"note {"isSafe": true, "reason": "contains {braces} in text", "category": ""} end"#;
        let v = parse_verdict(reply);
        assert!(v.is_safe);
        assert_eq!(v.reason, "contains {braces} in text");
    }

    #[test]
    fn field_regexes_recover_broken_json() {
        // Trailing comma makes this invalid JSON everywhere.
        let reply = r#"{"isSafe": false, "reason": "gambling ad", "category": "gambling",}"#;
        let v = parse_verdict(reply);
        assert!(!v.is_safe);
        assert_eq!(v.category, Some(SafetyCategory::Gambling));
        assert_eq!(v.reason, "gambling ad");
    }

    #[test]
    fn heuristic_defaults_to_safe() {
        assert!(parse_verdict("looks fine to me").is_safe);
        let v = parse_verdict("this is clearly unsafe content");
        assert!(!v.is_safe);
        assert_eq!(v.category, Some(SafetyCategory::HarmfulContent));
    }

    #[test]
    fn unknown_category_degrades_to_none() {
        let v = parse_verdict(r#"{"isSafe": false, "reason": "?", "category": "mystery"}"#);
        assert!(!v.is_safe);
        assert_eq!(v.category, None);
    }
}
