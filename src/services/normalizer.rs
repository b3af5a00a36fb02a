//! Turns fetched messages and their crawled articles into content items.

use url::Url;

use crate::config::ContentConfig;
use crate::models::{ContentKind, CrawledArticle, IncomingEmail, NewContentItem};

const TRACKING_DOMAINS: &[&str] = &[
    "mail.beehiiv.com",
    "link.mail.beehiiv.com",
    "email.mailchimpapp.com",
    "mailchi.mp",
    "click.convertkit-mail.com",
    "track.constantcontact.com",
    "links.substack.com",
    "tracking.mailerlite.com",
    "sendgrid.net",
    "email.mg.substack.com",
];

const TRACKING_PATTERNS: &[&str] = &[
    "/redirect/",
    "/track/",
    "/click?",
    "utm_source=",
    "utm_medium=",
    "utm_campaign=",
    "referrer=",
    "/ss/c/",
];

const FORWARD_PREFIXES: &[&str] = &["fwd:", "fw:"];

const FORWARD_MARKER: &str = "---------- Forwarded message ---------";

/// True for click-tracking and redirect links, which must never be used as
/// an item's source.
pub fn is_tracking_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if let Some(host) = url.host_str() {
        let host = host.to_ascii_lowercase();
        if TRACKING_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        {
            return true;
        }
    }
    let lower = raw.to_ascii_lowercase();
    TRACKING_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Strips any number of leading `Fwd:` / `Fw:` prefixes.
pub fn strip_forward_prefix(subject: &str) -> (String, bool) {
    let mut rest = subject.trim();
    let mut forwarded = false;
    loop {
        let lower = rest.to_ascii_lowercase();
        match FORWARD_PREFIXES.iter().find(|p| lower.starts_with(*p)) {
            Some(prefix) => {
                rest = rest[prefix.len()..].trim_start();
                forwarded = true;
            }
            None => return (rest.to_string(), forwarded),
        }
    }
}

/// Drops the forwarding header block (marker line plus the From/Date/Subject
/// lines up to the first blank line).
fn strip_forward_header(body: &str) -> String {
    let Some(start) = body.find(FORWARD_MARKER) else {
        return body.to_string();
    };
    let after = &body[start + FORWARD_MARKER.len()..];
    let rest = match after.find("\n\n") {
        Some(end) => &after[end + 2..],
        None => "",
    };
    format!("{}{}", &body[..start], rest)
}

fn html_to_text(html: &str) -> Option<String> {
    let text = match html2text::from_read(html.as_bytes(), 100) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    // Clean up the text - collapse runs of blank lines, keep paragraph breaks
    let mut cleaned = String::with_capacity(text.len());
    let mut blank = false;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank = true;
            continue;
        }
        if !cleaned.is_empty() {
            cleaned.push_str(if blank { "\n\n" } else { "\n" });
        }
        cleaned.push_str(line);
        blank = false;
    }
    Some(cleaned)
}

pub struct ContentNormalizer {
    ad_keywords: Vec<String>,
}

impl ContentNormalizer {
    pub fn new(config: &ContentConfig) -> Self {
        Self {
            ad_keywords: config
                .ad_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    fn is_advertisement(&self, article: &CrawledArticle) -> bool {
        if article.is_advertisement {
            return true;
        }
        let title = article.title.to_lowercase();
        self.ad_keywords.iter().any(|k| title.contains(k.as_str()))
    }

    /// Email body plus each usable crawled article, all linked to the message.
    pub fn normalize(&self, email: &IncomingEmail) -> Vec<NewContentItem> {
        let (subject, forwarded) = strip_forward_prefix(&email.subject);
        if forwarded {
            tracing::info!(subject = %subject, "forwarded newsletter");
        }

        let mut items = Vec::new();

        let body = email
            .body_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .or_else(|| email.body_html.as_deref().and_then(html_to_text))
            .unwrap_or_default();
        let body = if forwarded {
            strip_forward_header(&body)
        } else {
            body
        };

        if body.trim().is_empty() {
            tracing::warn!(message_id = %email.message_id, "email has no readable body");
        } else {
            items.push(
                NewContentItem::new(ContentKind::Email, &subject, body, email.received_at)
                    .with_email_ref(&email.message_id),
            );
        }

        for article in &email.articles {
            if self.is_advertisement(article) {
                tracing::debug!(url = %article.url, "skipping advertisement");
                continue;
            }
            if article.clean_text.trim().is_empty() {
                tracing::warn!(url = %article.url, "crawled article has no text");
                continue;
            }
            let source_url = if is_tracking_url(&article.url) {
                tracing::warn!(url = %article.url, "dropping tracking URL");
                None
            } else {
                Some(article.url.clone())
            };
            let title = if article.title.trim().is_empty() {
                subject.as_str()
            } else {
                article.title.as_str()
            };
            items.push(
                NewContentItem::new(ContentKind::Article, title, &article.clean_text, email.received_at)
                    .with_source_url(source_url)
                    .with_email_ref(&email.message_id),
            );
        }

        items
    }
}
