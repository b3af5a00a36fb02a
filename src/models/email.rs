use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message handed over by the mail fetch stage, together with whatever the
/// crawler pulled from its links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEmail {
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub articles: Vec<CrawledArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledArticle {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub clean_text: String,
    #[serde(default)]
    pub is_advertisement: bool,
}
