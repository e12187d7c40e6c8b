//! Response language handling.
//!
//! The gateway serves a bilingual user base; safety messages and context
//! notes are rendered in the conversation's language. Detection is a cheap
//! diacritic scan, not a classifier: Vietnamese text is reliably marked by
//! its extended Latin range, and everything else falls back to English.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Vi,
    #[default]
    En,
}

impl Language {
    pub fn as_str(&self) -> &str {
        match self {
            Language::Vi => "vi",
            Language::En => "en",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vi" => Ok(Language::Vi),
            "en" => Ok(Language::En),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

/// Characters unique to Vietnamese orthography (beyond plain ASCII and the
/// common Western European accents).
const VI_MARKERS: &[char] = &[
    'ă', 'â', 'đ', 'ê', 'ô', 'ơ', 'ư', 'á', 'à', 'ả', 'ã', 'ạ', 'ắ', 'ằ', 'ẳ', 'ẵ', 'ặ', 'ấ',
    'ầ', 'ẩ', 'ẫ', 'ậ', 'é', 'è', 'ẻ', 'ẽ', 'ẹ', 'ế', 'ề', 'ể', 'ễ', 'ệ', 'í', 'ì', 'ỉ', 'ĩ',
    'ị', 'ó', 'ò', 'ỏ', 'õ', 'ọ', 'ố', 'ồ', 'ổ', 'ỗ', 'ộ', 'ớ', 'ờ', 'ở', 'ỡ', 'ợ', 'ú', 'ù',
    'ủ', 'ũ', 'ụ', 'ứ', 'ừ', 'ử', 'ữ', 'ự', 'ý', 'ỳ', 'ỷ', 'ỹ', 'ỵ',
];

/// Guess the language of `text`. Biased toward English: a single Vietnamese
/// marker character is enough to flip, since those never occur in English.
pub fn detect(text: &str) -> Language {
    let lower = text.to_lowercase();
    if lower.chars().any(|c| VI_MARKERS.contains(&c)) {
        Language::Vi
    } else {
        Language::En
    }
}
