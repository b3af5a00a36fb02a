use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::IncomingEmail;

const PROCESSED_DIR: &str = "processed";
const FAILED_DIR: &str = "failed";

/// Where new messages come from, and where they are acknowledged once the
/// summary covering them went out.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn fetch_new(&self) -> Result<Vec<IncomingEmail>>;

    async fn mark_processed(&self, message_ids: &[String]) -> Result<()>;
}

/// Reads one JSON file per message from a spool directory written by the
/// mailbox fetcher and crawler.
pub struct SpoolSource {
    dir: PathBuf,
}

impl SpoolSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read(path: &Path) -> Result<IncomingEmail> {
        let content = tokio::fs::read_to_string(path).await?;
        let email: IncomingEmail = serde_json::from_str(&content)?;
        if email.message_id.trim().is_empty() {
            return Err(AppError::Source(format!(
                "{} has no message_id",
                path.display()
            )));
        }
        Ok(email)
    }

    async fn move_into(&self, path: &Path, subdir: &str) -> Result<()> {
        let target_dir = self.dir.join(subdir);
        tokio::fs::create_dir_all(&target_dir).await?;
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        tokio::fs::rename(path, target_dir.join(name)).await?;
        Ok(())
    }
}

#[async_trait]
impl MailSource for SpoolSource {
    async fn fetch_new(&self) -> Result<Vec<IncomingEmail>> {
        let mut emails = Vec::new();
        for path in self.pending_files().await? {
            match Self::read(&path).await {
                Ok(email) => emails.push(email),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "unreadable spool file, moving aside");
                    self.move_into(&path, FAILED_DIR).await?;
                }
            }
        }
        emails.sort_by_key(|e| e.received_at);
        Ok(emails)
    }

    async fn mark_processed(&self, message_ids: &[String]) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let wanted: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        let mut moved = 0;
        for path in self.pending_files().await? {
            let Ok(email) = Self::read(&path).await else {
                continue;
            };
            if wanted.contains(email.message_id.as_str()) {
                self.move_into(&path, PROCESSED_DIR).await?;
                moved += 1;
            }
        }
        tracing::info!(moved, requested = message_ids.len(), "marked messages processed");
        Ok(())
    }
}
