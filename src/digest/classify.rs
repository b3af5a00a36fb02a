use crate::models::ContentItem;

/// Phrases a model uses when it had nothing real to summarize.
const NO_CONTENT_MARKERS: &[&str] = &[
    "no meaningful newsletter content to summarize",
    "no meaningful content",
    "i'm unable to provide a newsletter summary",
    "content to summarize",
    "the only information provided is a subject line",
];

/// Text a provider client returns in place of a summary when the call failed.
const ERROR_PREFIXES: &[&str] = &["error generating summary", "error:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextVerdict {
    Usable,
    Empty,
    ProviderError,
    /// Matched a "nothing to summarize" marker.
    NoContent(&'static str),
}

pub fn classify_text(text: &str) -> TextVerdict {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return TextVerdict::Empty;
    }

    let lower = trimmed.to_lowercase();
    if ERROR_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return TextVerdict::ProviderError;
    }
    match NO_CONTENT_MARKERS.iter().find(|m| lower.contains(*m)) {
        Some(marker) => TextVerdict::NoContent(*marker),
        None => TextVerdict::Usable,
    }
}

/// Total body characters of the items that individually clear `min_chars`.
pub fn substantive_chars(items: &[ContentItem], min_chars: usize) -> usize {
    items
        .iter()
        .map(|i| i.body.trim().chars().count())
        .filter(|&n| n > min_chars)
        .sum()
}

pub fn has_substantive_content(items: &[ContentItem], min_chars: usize) -> bool {
    substantive_chars(items, min_chars) > min_chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::{ContentKind, Disposition};

    fn item(body: &str) -> ContentItem {
        ContentItem {
            id: 1,
            kind: ContentKind::Email,
            title: "t".into(),
            body: body.into(),
            source_url: None,
            source_timestamp: Utc::now(),
            email_ref: None,
            content_hash: "h".into(),
            processed_at: Utc::now(),
            disposition: Disposition::Pending,
        }
    }

    #[test]
    fn test_usable_text() {
        assert_eq!(
            classify_text("<h2>AI NEWS</h2><p>Three labs shipped models.</p>"),
            TextVerdict::Usable
        );
    }

    #[test]
    fn test_empty_and_error_text() {
        assert_eq!(classify_text("  \n "), TextVerdict::Empty);
        assert_eq!(
            classify_text("Error generating summary: timeout"),
            TextVerdict::ProviderError
        );
        assert_eq!(classify_text("error: bad key"), TextVerdict::ProviderError);
    }

    #[test]
    fn test_no_content_markers_are_case_insensitive() {
        assert!(matches!(
            classify_text("NO MEANINGFUL NEWSLETTER CONTENT TO SUMMARIZE\n\nReceived 2 items"),
            TextVerdict::NoContent(_)
        ));
        assert!(matches!(
            classify_text("Sorry, the only information provided is a subject line."),
            TextVerdict::NoContent(_)
        ));
    }

    #[test]
    fn test_substantive_content_threshold() {
        let short = item("tiny");
        let long = item(&"word ".repeat(40));
        assert!(!has_substantive_content(&[short.clone(), short.clone()], 100));
        assert!(has_substantive_content(&[short, long], 100));
        assert!(!has_substantive_content(&[], 100));
    }
}
