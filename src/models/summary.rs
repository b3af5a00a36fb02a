use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary_type: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent: bool,
    pub status: SummaryStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub forced: bool,
}

impl Summary {
    /// Generated, not yet delivered, and still inside its retry allowance.
    pub fn is_retryable(&self) -> bool {
        !self.sent
            && matches!(self.status, SummaryStatus::Draft | SummaryStatus::PendingRetry)
            && self.retry_count < self.max_retries
    }
}

/// Lifecycle of a summary row.
///
/// `Draft -> Sending -> Sent` is the happy path. A failed send goes to
/// `PendingRetry` until `retry_count` reaches `max_retries`, then to
/// `Abandoned`. `GenerationFailed` and `Suppressed` rows never get sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SummaryStatus {
    #[default]
    Draft,
    Sending,
    PendingRetry,
    Sent,
    Abandoned,
    GenerationFailed,
    Suppressed,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Draft => "draft",
            SummaryStatus::Sending => "sending",
            SummaryStatus::PendingRetry => "pending_retry",
            SummaryStatus::Sent => "sent",
            SummaryStatus::Abandoned => "abandoned",
            SummaryStatus::GenerationFailed => "generation_failed",
            SummaryStatus::Suppressed => "suppressed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "draft" => SummaryStatus::Draft,
            "sending" => SummaryStatus::Sending,
            "pending_retry" => SummaryStatus::PendingRetry,
            "sent" => SummaryStatus::Sent,
            "abandoned" => SummaryStatus::Abandoned,
            "generation_failed" => SummaryStatus::GenerationFailed,
            "suppressed" => SummaryStatus::Suppressed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SummaryStatus::Sent
                | SummaryStatus::Abandoned
                | SummaryStatus::GenerationFailed
                | SummaryStatus::Suppressed
        )
    }
}

/// Values for a summary row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub summary_type: String,
    pub text: String,
    pub status: SummaryStatus,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub forced: bool,
}
