//! Shared text helpers

use lexflow_storage::models::InboundMessage;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

/// `{Field_Name}` placeholders
pub(crate) fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid placeholder pattern"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"))
}

/// Reduce HTML to its text content
pub(crate) fn strip_html(html: &str) -> String {
    let text = tag_regex().replace_all(html, " ");
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// The body text matching and extraction read from: plain text when present,
/// otherwise the text content of the HTML part
pub(crate) fn message_body(message: &InboundMessage) -> Cow<'_, str> {
    if !message.body_text.trim().is_empty() {
        return Cow::Borrowed(&message.body_text);
    }
    match &message.body_html {
        Some(html) => Cow::Owned(strip_html(html)),
        None => Cow::Borrowed(""),
    }
}

/// Names of placeholders left in `text`
pub(crate) fn placeholders(text: &str) -> impl Iterator<Item = &str> {
    placeholder_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html() {
        let text = strip_html("<p>Case&nbsp;No: <b>2024-17</b></p>");
        assert_eq!(text.split_whitespace().collect::<Vec<_>>(), vec!["Case", "No:", "2024-17"]);
    }

    #[test]
    fn test_placeholders() {
        let found: Vec<_> = placeholders("Dear {Client_Name}, re {Case_No} {not valid}").collect();
        assert_eq!(found, vec!["Client_Name", "Case_No"]);
    }
}
