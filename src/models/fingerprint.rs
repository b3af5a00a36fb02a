use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintKind {
    /// Hash of title plus the start of the body.
    Primary,
    /// Hash of the lead paragraph alone.
    Paragraph,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Primary => "primary",
            FingerprintKind::Paragraph => "paragraph",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paragraph" => FingerprintKind::Paragraph,
            _ => FingerprintKind::Primary,
        }
    }
}

/// History record for content that went out in a delivered summary.
#[derive(Debug, Clone)]
pub struct ContentFingerprint {
    pub id: i64,
    pub content_hash: String,
    pub kind: FingerprintKind,
    pub title_text: String,
    pub body_prefix: String,
    pub summary_id: i64,
    pub content_id: Option<i64>,
    pub summarized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFingerprint {
    pub content_hash: String,
    pub kind: FingerprintKind,
    pub title_text: String,
    pub body_prefix: String,
    pub content_id: i64,
}
