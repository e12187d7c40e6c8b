//! Display formatting for tool invocations.
//!
//! Serialized shape:
//!
//! ```text
//! <tool-call data-tool='NAME' data-expanded='false' data-error='true'>
//! <tool-header>NAME</tool-header>
//! <tool-arguments>{ escaped JSON, two-space indent }</tool-arguments>
//! <tool-result>escaped result</tool-result>
//! </tool-call>
//! ```
//!
//! Attributes use single quotes; text content uses HTML entity escaping for
//! `&`, `<`, `>`.

use prism_provider::ToolCall;

/// HTML entity escaping for text content.
fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Attribute values additionally escape the single quote that delimits them.
fn escape_attr(text: &str) -> String {
    escape_html(text).replace('\'', "&#39;")
}

/// Render one tool invocation (and its result, once available) as the
/// structured display block.
pub fn format_tool_call(
    call: &ToolCall,
    result: Option<&str>,
    expanded: bool,
    is_error: bool,
) -> String {
    let arguments =
        serde_json::to_string_pretty(&call.input).unwrap_or_else(|_| "{}".to_string());

    let mut out = format!(
        "<tool-call data-tool='{}' data-expanded='{}'",
        escape_attr(&call.name),
        expanded
    );
    if is_error {
        out.push_str(" data-error='true'");
    }
    out.push_str(">\n");
    out.push_str(&format!(
        "<tool-header>{}</tool-header>\n",
        escape_html(&call.name)
    ));
    out.push_str(&format!(
        "<tool-arguments>{}</tool-arguments>\n",
        escape_html(&arguments)
    ));
    if let Some(result) = result {
        out.push_str(&format!(
            "<tool-result>{}</tool-result>\n",
            escape_html(result)
        ));
    }
    out.push_str("</tool-call>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCall {
        ToolCall {
            id: "toolu_1".into(),
            name: "get_weather".into(),
            input: serde_json::json!({ "city": "Hanoi", "units": "metric" }),
        }
    }

    #[test]
    fn renders_attributes_with_single_quotes() {
        let block = format_tool_call(&call(), Some("28C"), false, false);
        assert!(block.starts_with("<tool-call data-tool='get_weather' data-expanded='false'>"));
        assert!(block.ends_with("</tool-call>"));
        assert!(!block.contains("data-error"));
    }

    #[test]
    fn error_flag_is_optional_attribute() {
        let block = format_tool_call(&call(), Some("city not found"), true, true);
        assert!(block.contains("data-expanded='true'"));
        assert!(block.contains("data-error='true'"));
    }

    #[test]
    fn arguments_use_two_space_indent_and_escaping() {
        let block = format_tool_call(&call(), None, false, false);
        // serde_json pretty-printing indents with two spaces; double quotes
        // are not part of the escaped entity set.
        assert!(block.contains("\n  \"city\""));
    }

    #[test]
    fn html_in_results_is_escaped() {
        let block = format_tool_call(&call(), Some("<b>bold & dangerous</b>"), false, false);
        assert!(block.contains("&lt;b&gt;bold &amp; dangerous&lt;/b&gt;"));
        assert!(!block.contains("<b>"));
    }
}
