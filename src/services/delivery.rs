use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Summary;

/// Sends a finished summary to the reader.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, summary: &Summary) -> Result<()>;
}

pub fn subject_line(summary: &Summary) -> String {
    let label = match summary.summary_type.as_str() {
        "daily" => "Daily",
        "monthly" => "Monthly",
        _ => "Weekly",
    };
    format!(
        "Your {} Newsletter Digest - {}",
        label,
        summary.period_end.format("%Y-%m-%d")
    )
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    summary_id: i64,
    summary_type: &'a str,
    subject: String,
    period_start: String,
    period_end: String,
    forced: bool,
    html: &'a str,
}

/// POSTs the summary as JSON to a mail relay or automation endpoint.
pub struct WebhookDeliverer {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookDeliverer {
    pub fn new(url: String, token: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        let payload = WebhookPayload {
            summary_id: summary.id,
            summary_type: &summary.summary_type,
            subject: subject_line(summary),
            period_start: summary.period_start.to_rfc3339(),
            period_end: summary.period_end.to_rfc3339(),
            forced: summary.forced,
            html: &summary.text,
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::Delivery(format!(
                "webhook returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!(summary_id = summary.id, "summary delivered to webhook");
        Ok(())
    }
}

/// Writes each summary as an HTML file for pickup by another tool.
pub struct OutboxDeliverer {
    dir: PathBuf,
}

impl OutboxDeliverer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, summary: &Summary) -> PathBuf {
        self.dir.join(format!(
            "digest-{}-{}.html",
            summary.period_end.format("%Y%m%d"),
            summary.id
        ))
    }
}

#[async_trait]
impl Deliverer for OutboxDeliverer {
    async fn deliver(&self, summary: &Summary) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(summary);
        let html = format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}\n</body>\n</html>\n",
            subject_line(summary),
            summary.text
        );
        tokio::fs::write(&path, html).await?;
        tracing::info!(summary_id = summary.id, path = %path.display(), "summary written to outbox");
        Ok(())
    }
}
