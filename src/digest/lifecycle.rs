//! Summary lifecycle.
//!
//! One tick: retry undelivered summaries, then (if the schedule allows and
//! nothing is still waiting for delivery) pick eligible content, drop what
//! went out before, generate a draft and deliver it. Every state change is a
//! single repository transaction, so a crash between steps leaves either the
//! old state or the new one.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::ai::{SummaryProvider, DIGEST_INSTRUCTION};
use crate::config::{DedupConfig, DigestConfig};
use crate::db::Repository;
use crate::dedup::{DedupEngine, History};
use crate::error::Result;
use crate::models::{ContentItem, NewSummary, Summary, SummaryStatus};
use crate::schedule::DeliverySchedule;
use crate::services::Deliverer;

use super::batcher::TokenBudget;
use super::classify::{classify_text, has_substantive_content, TextVerdict};

/// A claim older than this is assumed to belong to a tick that died before
/// recording the result.
const CLAIM_TIMEOUT_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Sent {
        summary_id: i64,
        items: usize,
        message_ids: Vec<String>,
    },
    Failed {
        summary_id: i64,
        status: SummaryStatus,
        error: String,
    },
    /// Already sent, being sent elsewhere, or out of retries.
    Skipped { summary_id: i64 },
}

/// What the generation half of a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    NotDue,
    /// Older summaries are still waiting for delivery.
    Deferred { retryable: usize },
    NothingEligible,
    Suppressed {
        summary_id: Option<i64>,
        items: usize,
        reason: String,
    },
    Failed {
        summary_id: i64,
        error: String,
    },
    Drafted { summary_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub deliveries: Vec<DeliveryOutcome>,
    pub generation: Generation,
}

pub struct SummaryLifecycle {
    repo: Arc<Repository>,
    dedup: DedupEngine,
    budget: TokenBudget,
    schedule: DeliverySchedule,
    settings: DigestConfig,
    provider: Arc<dyn SummaryProvider>,
    deliverer: Arc<dyn Deliverer>,
}

impl SummaryLifecycle {
    pub fn new(
        repo: Arc<Repository>,
        schedule: DeliverySchedule,
        dedup: &DedupConfig,
        settings: &DigestConfig,
        provider: Arc<dyn SummaryProvider>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Self {
        Self {
            repo,
            dedup: DedupEngine::new(dedup.clone()),
            budget: TokenBudget::new(settings.token_budget),
            schedule,
            settings: settings.clone(),
            provider,
            deliverer,
        }
    }

    /// One scheduler tick. `now` stamps the records; `local` is the same
    /// instant on the wall clock the schedule is written for.
    pub async fn tick(&self, now: DateTime<Utc>, local: NaiveDateTime, force: bool) -> Result<TickReport> {
        let released = self
            .repo
            .release_stale_claims(now - Duration::minutes(CLAIM_TIMEOUT_MINUTES))
            .await?;
        if released > 0 {
            tracing::warn!(released, "released stale delivery claims");
        }

        let mut deliveries = self.retry_sweep(now).await?;

        let retryable = self.repo.retryable_summaries().await?.len();
        if retryable > 0 {
            tracing::info!(retryable, "undelivered summaries pending, not generating a new one");
            return Ok(TickReport {
                deliveries,
                generation: Generation::Deferred { retryable },
            });
        }

        let has_content = self.repo.has_unsummarized_content(now).await?;
        if !self.schedule.should_trigger(local, has_content, force) {
            tracing::debug!(has_content, %local, "not a delivery moment");
            return Ok(TickReport {
                deliveries,
                generation: Generation::NotDue,
            });
        }

        tracing::info!(
            forced = force,
            cadence = self.schedule.cadence.label(),
            "delivery window open, generating summary"
        );
        let (generation, delivered) = self.generate(now, force).await?;
        deliveries.extend(delivered);

        Ok(TickReport {
            deliveries,
            generation,
        })
    }

    /// Re-attempts delivery of every summary still inside its retry allowance.
    pub async fn retry_sweep(&self, now: DateTime<Utc>) -> Result<Vec<DeliveryOutcome>> {
        let pending = self.repo.retryable_summaries().await?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "retrying undelivered summaries");
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for summary in pending {
            outcomes.push(self.deliver(summary.id, now).await?);
        }
        Ok(outcomes)
    }

    /// Sends a summary once. A summary that is already sent, or claimed by a
    /// concurrent tick, is left untouched. If the result cannot be recorded
    /// the claim is handed back, so the summary is sent again later.
    pub async fn deliver(&self, summary_id: i64, now: DateTime<Utc>) -> Result<DeliveryOutcome> {
        let Some(summary) = self.repo.claim_for_delivery(summary_id, now).await? else {
            tracing::info!(summary_id, "summary already sent or in flight, skipping");
            return Ok(DeliveryOutcome::Skipped { summary_id });
        };

        match self.send_claimed(&summary, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                match self.repo.release_claim(summary_id).await {
                    Ok(_) => tracing::warn!(
                        summary_id,
                        error = %e,
                        "could not record delivery result, summary back in the retry queue"
                    ),
                    Err(release) => tracing::error!(
                        summary_id,
                        error = %e,
                        release_error = %release,
                        timeout_min = CLAIM_TIMEOUT_MINUTES,
                        "could not record delivery result, claim left to expire"
                    ),
                }
                Err(e)
            }
        }
    }

    async fn send_claimed(&self, summary: &Summary, now: DateTime<Utc>) -> Result<DeliveryOutcome> {
        let summary_id = summary.id;
        match self.deliverer.deliver(summary).await {
            Ok(()) => {
                let items = self.repo.summary_items(summary_id).await?;
                let fingerprints = items
                    .iter()
                    .flat_map(|item| self.dedup.fingerprints_for(item))
                    .collect::<Vec<_>>();
                let written = fingerprints.len();
                self.repo
                    .complete_delivery(summary_id, now, fingerprints)
                    .await?;
                let message_ids = self.repo.message_ids_for_summary(summary_id).await?;

                tracing::info!(
                    summary_id,
                    items = items.len(),
                    fingerprints = written,
                    "summary delivered"
                );
                Ok(DeliveryOutcome::Sent {
                    summary_id,
                    items: items.len(),
                    message_ids,
                })
            }
            Err(e) => {
                let error = e.to_string();
                let status = self
                    .repo
                    .record_delivery_failure(summary_id, now, error.clone())
                    .await?;
                if status == SummaryStatus::Abandoned {
                    tracing::error!(
                        summary_id,
                        error = %error,
                        "delivery failed for the last time, summary left unsent"
                    );
                } else {
                    tracing::warn!(summary_id, error = %error, "delivery failed, will retry");
                }
                Ok(DeliveryOutcome::Failed {
                    summary_id,
                    status,
                    error,
                })
            }
        }
    }

    async fn load_history(&self, now: DateTime<Utc>) -> History {
        let since = now - Duration::days(i64::from(self.dedup.lookback_days()));
        match self.repo.fingerprint_history(since).await {
            Ok(fingerprints) => History::new(fingerprints),
            Err(e) => {
                tracing::warn!(error = %e, "could not load fingerprint history, treating content as novel");
                History::default()
            }
        }
    }

    async fn generate(
        &self,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<(Generation, Option<DeliveryOutcome>)> {
        let items = self.repo.eligible_content().await?;
        if items.is_empty() {
            tracing::info!("no eligible content to summarize");
            return Ok((Generation::NothingEligible, None));
        }

        let history = self.load_history(now).await;
        let filtered = self.dedup.novel(items, &history);
        for (item, duplicate) in &filtered.dropped {
            let reason = duplicate.describe();
            tracing::info!(content_id = item.id, title = %item.title, reason = %reason, "suppressing duplicate");
            self.repo.suppress_content(vec![item.id], reason).await?;
        }

        let items = filtered.kept;
        if items.is_empty() {
            return Ok((
                Generation::Suppressed {
                    summary_id: None,
                    items: filtered.dropped.len(),
                    reason: "all content was already summarized".to_string(),
                },
                None,
            ));
        }

        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        let (period_start, period_end) = period_of(&items, now);
        let draft = |status: SummaryStatus, text: String, error: Option<String>| NewSummary {
            period_start,
            period_end,
            summary_type: self.schedule.cadence.label().to_string(),
            text,
            status,
            max_retries: self.settings.max_retries,
            error_message: error,
            forced,
        };

        let min_chars = self.settings.min_substantive_content_length;
        if !has_substantive_content(&items, min_chars) {
            let reason = format!("no substantive content (nothing over {} chars)", min_chars);
            let summary_id = self
                .repo
                .record_suppressed(
                    draft(SummaryStatus::Suppressed, String::new(), Some(reason.clone())),
                    ids.clone(),
                    reason.clone(),
                    now,
                )
                .await?;
            tracing::warn!(summary_id, items = ids.len(), "suppressed empty content window");
            return Ok((
                Generation::Suppressed {
                    summary_id: Some(summary_id),
                    items: ids.len(),
                    reason,
                },
                None,
            ));
        }

        let batches = self.budget.batch(items);
        tracing::info!(
            items = ids.len(),
            batches = batches.len(),
            model = self.provider.model_version(),
            "requesting summary"
        );

        let text = match self.provider.summarize(DIGEST_INSTRUCTION, &batches).await {
            Ok(text) => text,
            Err(e) => {
                return self
                    .generation_failed(draft(SummaryStatus::GenerationFailed, String::new(), Some(e.to_string())), ids, now)
                    .await;
            }
        };

        match classify_text(&text) {
            TextVerdict::Usable => {}
            TextVerdict::Empty => {
                let error = "provider returned empty text".to_string();
                return self
                    .generation_failed(draft(SummaryStatus::GenerationFailed, text, Some(error)), ids, now)
                    .await;
            }
            TextVerdict::ProviderError => {
                let error = text.lines().next().unwrap_or_default().trim().to_string();
                return self
                    .generation_failed(draft(SummaryStatus::GenerationFailed, text, Some(error)), ids, now)
                    .await;
            }
            TextVerdict::NoContent(marker) => {
                let reason = format!("summary reported no content ({})", marker);
                let summary_id = self
                    .repo
                    .record_suppressed(
                        draft(SummaryStatus::Suppressed, text, Some(reason.clone())),
                        ids.clone(),
                        reason.clone(),
                        now,
                    )
                    .await?;
                tracing::warn!(summary_id, items = ids.len(), "summary had no content, suppressing items");
                return Ok((
                    Generation::Suppressed {
                        summary_id: Some(summary_id),
                        items: ids.len(),
                        reason,
                    },
                    None,
                ));
            }
        }

        let summary_id = self
            .repo
            .create_summary(draft(SummaryStatus::Draft, text, None), ids.clone(), now)
            .await?;
        tracing::info!(summary_id, items = ids.len(), "summary drafted");

        let outcome = self.deliver(summary_id, now).await?;
        Ok((Generation::Drafted { summary_id }, Some(outcome)))
    }

    /// Records the attempt and leaves the items eligible for the next tick.
    async fn generation_failed(
        &self,
        summary: NewSummary,
        ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<(Generation, Option<DeliveryOutcome>)> {
        let error = summary.error_message.clone().unwrap_or_default();
        let summary_id = self.repo.create_summary(summary, ids, now).await?;
        tracing::error!(summary_id, error = %error, "summary generation failed, content stays eligible");
        Ok((Generation::Failed { summary_id, error }, None))
    }
}

fn period_of(items: &[ContentItem], now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = items.iter().map(|i| i.source_timestamp).min().unwrap_or(now);
    let end = items.iter().map(|i| i.source_timestamp).max().unwrap_or(now);
    (start, end)
}
