use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup;

/// Where a content item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Email,
    Article,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Email => "email",
            ContentKind::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "article" => ContentKind::Article,
            _ => ContentKind::Email,
        }
    }
}

/// What happened to an item after it was persisted.
///
/// `Summarized` and `Suppressed` both count as "summarized" for eligibility,
/// but only `Summarized` points at a summary that was actually delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Pending,
    Summarized { summary_id: i64 },
    Suppressed { reason: String },
}

#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: i64,
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub source_url: Option<String>,
    pub source_timestamp: DateTime<Utc>,
    pub email_ref: Option<String>,
    pub content_hash: String,
    pub processed_at: DateTime<Utc>,
    pub disposition: Disposition,
}

impl ContentItem {
    pub fn is_summarized(&self) -> bool {
        !matches!(self.disposition, Disposition::Pending)
    }

    pub fn summary_ref(&self) -> Option<i64> {
        match self.disposition {
            Disposition::Summarized { summary_id } => Some(summary_id),
            _ => None,
        }
    }

    pub fn body_chars(&self) -> usize {
        self.body.chars().count()
    }
}

/// A normalized item that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContentItem {
    pub kind: ContentKind,
    pub title: String,
    pub body: String,
    pub source_url: Option<String>,
    pub source_timestamp: DateTime<Utc>,
    pub email_ref: Option<String>,
}

impl NewContentItem {
    /// Trims both fields; an empty title becomes "Untitled" so the title
    /// similarity guard sees it as generic.
    pub fn new(
        kind: ContentKind,
        title: impl Into<String>,
        body: impl Into<String>,
        source_timestamp: DateTime<Utc>,
    ) -> Self {
        let title = title.into().trim().to_string();
        Self {
            kind,
            title: if title.is_empty() {
                "Untitled".to_string()
            } else {
                title
            },
            body: body.into().trim().to_string(),
            source_url: None,
            source_timestamp,
            email_ref: None,
        }
    }

    pub fn with_source_url(mut self, url: Option<String>) -> Self {
        self.source_url = url;
        self
    }

    pub fn with_email_ref(mut self, message_id: impl Into<String>) -> Self {
        self.email_ref = Some(message_id.into());
        self
    }

    pub fn content_hash(&self) -> String {
        dedup::content_hash(&self.title, &self.body)
    }

    pub fn body_chars(&self) -> usize {
        self.body.chars().count()
    }
}
