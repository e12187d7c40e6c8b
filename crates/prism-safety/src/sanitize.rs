//! Input/output sanitizer.
//!
//! Order: NFKC normalization, flagged-codepoint removal, HTML stripping,
//! fenced-code and LaTeX stripping, backtick removal, whitespace collapse.
//! The whole function is idempotent: sanitizing sanitized text is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").unwrap());
static FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static LATEX_DELIMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\\[|\\\]|\\\(|\\\)|\$\$").unwrap());

/// Zero-width and joiner codepoints, removed outright.
fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}')
}

/// Invisible space variants, mapped to a plain space.
fn is_invisible_space(c: char) -> bool {
    matches!(
        c,
        '\u{00A0}' | '\u{2000}'..='\u{200A}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
    )
}

/// Line/paragraph separators, mapped to a plain space.
fn is_line_separator(c: char) -> bool {
    matches!(c, '\u{2028}' | '\u{2029}')
}

/// Control characters other than the tab/newline family, removed outright.
fn is_flagged_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\n' | '\r' | '\t')
}

/// True when `c` falls in any of the suspicious ranges the validator flags.
pub(crate) fn is_suspicious_codepoint(c: char) -> bool {
    is_zero_width(c) || is_line_separator(c) || is_flagged_control(c)
}

/// Sanitize one piece of text. Idempotent.
pub fn sanitize_content(text: &str) -> String {
    // 1. Unicode compatibility normalization.
    let mut out: String = text.nfkc().collect();

    // 2. Flagged codepoints. NFKC already folds most invisible spaces to
    // U+0020, the rest are handled explicitly.
    out = out
        .chars()
        .filter_map(|c| {
            if is_zero_width(c) || is_flagged_control(c) {
                None
            } else if is_invisible_space(c) || is_line_separator(c) {
                Some(' ')
            } else {
                Some(c)
            }
        })
        .collect();

    // 3. Script/style blocks including their payload, then remaining tags.
    // Stripping runs to a fixpoint so tags reassembled from removed inner
    // tags ("<<b>script>") cannot survive a single pass.
    loop {
        let stripped = HTML_TAG
            .replace_all(&SCRIPT_BLOCK.replace_all(&out, " "), "")
            .into_owned();
        if stripped == out {
            break;
        }
        out = stripped;
    }

    // 4. Fenced code blocks, LaTeX delimiters, stray backticks.
    out = FENCED_CODE.replace_all(&out, " ").into_owned();
    out = LATEX_DELIMS.replace_all(&out, " ").into_owned();
    out = out.replace('`', " ");

    // 5. Whitespace collapse.
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        assert_eq!(sanitize_content("  hello \n\n   world \t "), "hello world");
    }

    #[test]
    fn removes_zero_width_and_control_characters() {
        assert_eq!(sanitize_content("he\u{200B}llo\u{0007} wor\u{FEFF}ld"), "hello world");
    }

    #[test]
    fn invisible_spaces_become_regular_spaces() {
        assert_eq!(sanitize_content("a\u{00A0}b\u{2009}c"), "a b c");
        assert_eq!(sanitize_content("line\u{2028}break"), "line break");
    }

    #[test]
    fn strips_html_and_script_payloads() {
        assert_eq!(
            sanitize_content("<p>hi</p><script>alert('x')</script> there"),
            "hi there"
        );
        // A script tag reassembled from a removed inner tag is still caught,
        // payload included.
        assert_eq!(sanitize_content("<<b>script>alert(1)<</b>/script>"), "");
    }

    #[test]
    fn strips_fences_latex_and_backticks() {
        assert_eq!(sanitize_content("before ```rust\nlet x = 1;\n``` after"), "before after");
        assert_eq!(sanitize_content(r"\[x^2\] and \(y\) and $$z$$"), "x^2 and y and z");
        assert_eq!(sanitize_content("use `rm -rf`"), "use rm -rf");
    }

    #[test]
    fn nfkc_folds_compatibility_forms() {
        // Fullwidth letters fold to ASCII under NFKC.
        assert_eq!(sanitize_content("ｈｅｌｌｏ"), "hello");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "plain text",
            "  spaced\u{00A0}out\u{200B} text  ",
            "<div>html <script>bad()</script></div>",
            "```code``` and `ticks` and $$math$$",
            "mixed <b>bold</b> ```x``` \u{2028} ok",
            "Tiếng Việt có dấu ổn định",
        ];
        for s in samples {
            let once = sanitize_content(s);
            let twice = sanitize_content(&once);
            assert_eq!(once, twice, "not idempotent for {s:?}");
        }
    }
}
