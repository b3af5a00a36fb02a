use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::digest::Batch;
use crate::error::{AppError, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// System instruction for digest generation.
pub const DIGEST_INSTRUCTION: &str = r#"You are a newsletter summarization assistant.
Write one comprehensive digest of the newsletter content you are given.
Include every meaningful story, article and insight; do not skip items.
Organize by topic rather than by source and remove redundancy between sources.
Leave out anything that reads as advertising or sponsored content.
Keep important details such as dates, figures and key findings, and do not add opinions.
Format for an HTML email: <h2> for sections, <h3> for subsections, <ul>/<li> for lists, compact spacing.
After each story add a link to its source as <a href="URL">Read more →</a>, using the SOURCE LINK of its block.
If there is no real content to summarize, reply only with: NO MEANINGFUL NEWSLETTER CONTENT TO SUMMARIZE"#;

const COMBINE_INSTRUCTION: &str = r#"You are a newsletter summarization assistant.
The summaries below were produced from separate batches of the same period's newsletters.
Combine them into a single digest: remove redundancy, organize by topic instead of by batch,
keep every significant story and every link, and keep the HTML formatting."#;

const PART_RULE: &str = "============================================================";

/// Turns batches of content into digest text.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, instruction: &str, batches: &[Batch]) -> Result<String>;

    fn model_version(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

impl MessageResponse {
    fn text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct ClaudeSummarizer {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeSummarizer {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            max_tokens,
        })
    }

    async fn complete(&self, system: &str, user_message: String) -> Result<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(system.to_string()),
        };

        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::Summarizer(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let message_response: MessageResponse = response.json().await?;
        Ok(message_response.text())
    }
}

#[async_trait]
impl SummaryProvider for ClaudeSummarizer {
    async fn summarize(&self, instruction: &str, batches: &[Batch]) -> Result<String> {
        let mut partials = Vec::with_capacity(batches.len());
        for (index, batch) in batches.iter().enumerate() {
            tracing::info!(
                batch = index + 1,
                of = batches.len(),
                items = batch.items.len(),
                est_tokens = batch.estimated_tokens(),
                "summarizing batch"
            );
            let message = format!("CONTENT TO SUMMARIZE:\n\n{}", batch.render());
            partials.push(self.complete(instruction, message).await?);
        }

        match partials.len() {
            0 => Ok(String::new()),
            1 => Ok(partials.remove(0)),
            n => {
                tracing::info!(parts = n, "combining batch summaries");
                match self.complete(COMBINE_INSTRUCTION, combine_message(&partials)).await {
                    Ok(text) if !text.trim().is_empty() => Ok(text),
                    Ok(_) => {
                        tracing::warn!("combine step returned nothing, joining batch summaries");
                        Ok(join_partials(&partials))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "combine step failed, joining batch summaries");
                        Ok(join_partials(&partials))
                    }
                }
            }
        }
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

fn combine_message(partials: &[String]) -> String {
    let mut message = String::from("SUMMARIES TO COMBINE:\n\n");
    for part in partials {
        message.push_str(&format!("{PART_RULE}\n{part}\n{PART_RULE}\n\n"));
    }
    message.push_str(
        "Provide a single well-organized digest that combines all of the above, \
         preserving every significant story and link.",
    );
    message
}

/// Fallback when the combine call fails: each part under its own header.
fn join_partials(partials: &[String]) -> String {
    let mut text = String::from("# COMBINED NEWSLETTER SUMMARY\n\n");
    for (i, part) in partials.iter().enumerate() {
        text.push_str(&format!("## Batch {} Summary\n\n{}\n\n---\n\n", i + 1, part));
    }
    text
}
