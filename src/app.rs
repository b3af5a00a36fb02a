use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Utc};

use crate::ai::{ClaudeSummarizer, SummaryProvider};
use crate::config::Config;
use crate::db::{Repository, StatusCounts};
use crate::dedup::{DedupEngine, History};
use crate::digest::{DeliveryOutcome, SummaryLifecycle, TickReport};
use crate::error::{AppError, Result};
use crate::schedule::DeliverySchedule;
use crate::services::{
    ContentNormalizer, Deliverer, MailSource, OutboxDeliverer, SpoolSource, WebhookDeliverer,
};

/// Counts from one ingest pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub emails: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct App {
    repository: Arc<Repository>,
    source: Arc<dyn MailSource>,
    normalizer: ContentNormalizer,
    dedup: DedupEngine,
    lifecycle: SummaryLifecycle,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let repository = Repository::open(
            &config.db_path,
            Duration::from_millis(config.database.busy_timeout_ms),
            config.database.retry_policy(),
        )
        .await?;

        let api_key = config.claude_api_key.clone().ok_or_else(|| {
            AppError::Config(format!(
                "claude_api_key is not set in {}",
                Config::config_path().display()
            ))
        })?;
        let provider = Arc::new(ClaudeSummarizer::new(
            api_key,
            config.digest.model.clone(),
            config.digest.max_output_tokens,
        )?);

        let deliverer: Arc<dyn Deliverer> = match &config.delivery.webhook_url {
            Some(url) => Arc::new(WebhookDeliverer::new(
                url.clone(),
                config.delivery.webhook_token.clone(),
            )?),
            None => Arc::new(OutboxDeliverer::new(&config.delivery.outbox_dir)),
        };
        let source = Arc::new(SpoolSource::new(&config.spool_dir));

        let app = Self::with_parts(Arc::new(repository), source, provider, deliverer, config)?;

        let released = app.repository.release_stale_claims(Utc::now()).await?;
        if released > 0 {
            tracing::warn!(released, "summaries left mid-delivery by a previous run will be retried");
        }
        Ok(app)
    }

    pub fn with_parts(
        repository: Arc<Repository>,
        source: Arc<dyn MailSource>,
        provider: Arc<dyn SummaryProvider>,
        deliverer: Arc<dyn Deliverer>,
        config: &Config,
    ) -> Result<Self> {
        let schedule = DeliverySchedule::from_config(&config.schedule)?;
        let lifecycle = SummaryLifecycle::new(
            Arc::clone(&repository),
            schedule,
            &config.dedup,
            &config.digest,
            provider,
            deliverer,
        );

        Ok(Self {
            repository,
            source,
            normalizer: ContentNormalizer::new(&config.content),
            dedup: DedupEngine::new(config.dedup.clone()),
            lifecycle,
        })
    }

    /// Pulls new messages from the source and stores their novel content.
    pub async fn ingest(&self, now: DateTime<Utc>) -> Result<IngestReport> {
        let emails = self.source.fetch_new().await?;
        let mut report = IngestReport::default();

        let history = if emails.is_empty() {
            History::default()
        } else {
            self.history(now).await
        };

        for email in emails {
            if self.repository.email_known(&email.message_id).await? {
                continue;
            }
            report.emails += 1;

            let filtered = self.dedup.novel(self.normalizer.normalize(&email), &history);
            for (item, duplicate) in &filtered.dropped {
                tracing::debug!(title = %item.title, reason = %duplicate.describe(), "dropping duplicate at ingest");
            }
            report.duplicates += filtered.dropped.len();

            self.repository.record_email(&email, now).await?;

            if filtered.kept.is_empty() {
                // Nothing left to summarize, so nothing will ever acknowledge it.
                self.acknowledge(vec![email.message_id.clone()]).await?;
                self.repository.mark_email_ingested(&email.message_id).await?;
                continue;
            }

            // The message only counts as known once every item is stored; a
            // partly stored message is picked up again on the next fetch.
            let mut complete = true;
            for item in filtered.kept {
                if self
                    .repository
                    .content_stored(&email.message_id, &item.content_hash())
                    .await?
                {
                    continue;
                }
                let title = item.title.clone();
                match self.repository.insert_content(item, now).await {
                    Ok(_) => report.stored += 1,
                    Err(e) if is_contention(&e) => return Err(e),
                    Err(e) => {
                        tracing::warn!(message_id = %email.message_id, title = %title, error = %e, "failed to store content item");
                        report.failed += 1;
                        complete = false;
                    }
                }
            }
            if complete {
                self.repository.mark_email_ingested(&email.message_id).await?;
            }
        }

        self.repository.set_last_fetch(now).await?;
        tracing::info!(
            emails = report.emails,
            stored = report.stored,
            duplicates = report.duplicates,
            failed = report.failed,
            "ingest finished"
        );
        Ok(report)
    }

    async fn history(&self, now: DateTime<Utc>) -> History {
        let since = now - chrono::Duration::days(i64::from(self.dedup.lookback_days()));
        match self.repository.fingerprint_history(since).await {
            Ok(fingerprints) => History::new(fingerprints),
            Err(e) => {
                tracing::warn!(error = %e, "could not load fingerprint history, keeping all new content");
                History::default()
            }
        }
    }

    /// One scheduler tick plus acknowledgement of what it settled.
    pub async fn run_tick(
        &self,
        now: DateTime<Utc>,
        local: NaiveDateTime,
        force: bool,
    ) -> Result<TickReport> {
        let report = self.lifecycle.tick(now, local, force).await?;
        self.acknowledge_disposed().await;
        Ok(report)
    }

    /// Retries undelivered summaries without generating a new one.
    pub async fn send_pending(&self) -> Result<Vec<DeliveryOutcome>> {
        let outcomes = self.lifecycle.retry_sweep(Utc::now()).await?;
        self.acknowledge_disposed().await;
        Ok(outcomes)
    }

    /// Acknowledges every message whose items were all delivered or
    /// suppressed. Failures are retried on the next tick.
    async fn acknowledge_disposed(&self) {
        let result = match self.repository.fully_disposed_message_ids().await {
            Ok(ids) => self.acknowledge(ids).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "could not mark source messages processed");
        }
    }

    pub async fn status(&self) -> Result<StatusCounts> {
        self.repository.status_counts().await
    }

    async fn acknowledge(&self, message_ids: Vec<String>) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        self.source.mark_processed(&message_ids).await?;
        self.repository.mark_emails_processed(message_ids).await
    }

    /// Fetch loop body. Errors are logged; the loop keeps going.
    pub async fn fetch_cycle(&self) {
        if let Err(e) = self.ingest(Utc::now()).await {
            log_cycle_error("fetch", &e);
        }
    }

    /// Delivery loop body. Errors are logged; the loop keeps going.
    pub async fn delivery_cycle(&self, force: bool) {
        match self
            .run_tick(Utc::now(), Local::now().naive_local(), force)
            .await
        {
            Ok(report) => tracing::debug!(generation = ?report.generation, deliveries = report.deliveries.len(), "tick finished"),
            Err(e) => log_cycle_error("delivery", &e),
        }
    }
}

fn is_contention(e: &AppError) -> bool {
    matches!(e, AppError::StillLocked { .. }) || e.is_locked()
}

fn log_cycle_error(task: &str, e: &AppError) {
    if is_contention(e) {
        tracing::warn!(task, error = %e, "database busy, skipping this cycle");
    } else {
        tracing::error!(task, error = %e, "cycle failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::db::RetryPolicy;
    use crate::digest::{Batch, Generation};
    use crate::models::{Disposition, Summary};

    struct EchoProvider;

    #[async_trait]
    impl SummaryProvider for EchoProvider {
        async fn summarize(&self, _instruction: &str, batches: &[Batch]) -> Result<String> {
            Ok(format!("<p>{} items this week.</p>", batches.iter().map(|b| b.items.len()).sum::<usize>()))
        }

        fn model_version(&self) -> &str {
            "echo"
        }
    }

    #[derive(Default)]
    struct RecordingDeliverer {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Deliverer for RecordingDeliverer {
        async fn deliver(&self, summary: &Summary) -> Result<()> {
            self.sent.lock().unwrap().push(summary.text.clone());
            Ok(())
        }
    }

    const LONG_BODY: &str = "Europe logged its hottest March on record, and three national \
        grids ran almost entirely on renewables for a full day. Analysts expect storage \
        deployments to double again this year.";

    fn write_message(dir: &Path, file: &str, id: &str, subject: &str, body: &str) {
        let json = serde_json::json!({
            "message_id": id,
            "subject": subject,
            "sender": "news@example.com",
            "received_at": "2026-03-01T09:00:00Z",
            "body_text": body,
        });
        std::fs::write(dir.join(file), json.to_string()).unwrap();
    }

    async fn app(spool: &Path) -> (App, Arc<Repository>, Arc<RecordingDeliverer>) {
        let repository = Arc::new(
            Repository::open_in_memory(RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::ZERO,
            })
            .await
            .unwrap(),
        );
        let deliverer = Arc::new(RecordingDeliverer::default());
        let app = App::with_parts(
            Arc::clone(&repository),
            Arc::new(SpoolSource::new(spool)),
            Arc::new(EchoProvider),
            deliverer.clone(),
            &Config::default(),
        )
        .unwrap();
        (app, repository, deliverer)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_each_message_once() {
        let spool = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Climate Weekly: record heat", LONG_BODY);
        let (app, repository, _) = app(spool.path()).await;

        let first = app.ingest(now()).await.unwrap();
        assert_eq!(first.emails, 1);
        assert_eq!(first.stored, 1);

        let second = app.ingest(now()).await.unwrap();
        assert_eq!(second, IngestReport::default());
        assert_eq!(repository.eligible_content().await.unwrap().len(), 1);
        assert_eq!(repository.last_fetch().await.unwrap(), Some(now()));
    }

    #[tokio::test]
    async fn test_empty_message_is_acknowledged_at_once() {
        let spool = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Blank newsletter issue", "   ");
        let (app, repository, _) = app(spool.path()).await;

        let report = app.ingest(now()).await.unwrap();
        assert_eq!(report.stored, 0);
        assert!(spool.path().join("processed").join("a.json").exists());
        assert!(repository.eligible_content().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forced_tick_delivers_and_acknowledges() {
        let spool = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Climate Weekly: record heat", LONG_BODY);
        write_message(spool.path(), "b.json", "m2", "Fwd: Climate Weekly: record heat", LONG_BODY);
        let (app, repository, deliverer) = app(spool.path()).await;

        app.ingest(now()).await.unwrap();
        let report = app.run_tick(now(), now().naive_utc(), true).await.unwrap();

        let Generation::Drafted { summary_id } = report.generation else {
            panic!("expected a draft, got {:?}", report.generation);
        };
        assert_eq!(deliverer.sent.lock().unwrap().as_slice(), ["<p>1 items this week.</p>"]);

        let items = repository.summary_items(summary_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].disposition, Disposition::Summarized { summary_id });
        let acknowledged = ["a.json", "b.json"]
            .iter()
            .filter(|f| spool.path().join("processed").join(f).exists())
            .count();
        // One message went out in the digest, the other was suppressed as a
        // repeat; both are settled.
        assert_eq!(acknowledged, 2);

        let counts = app.status().await.unwrap();
        assert_eq!(counts.sent_summaries, 1);
        assert_eq!(counts.pending_items, 0);
    }

    #[tokio::test]
    async fn test_send_pending_with_nothing_queued() {
        let spool = tempfile::tempdir().unwrap();
        let (app, _, deliverer) = app(spool.path()).await;
        assert!(app.send_pending().await.unwrap().is_empty());
        assert!(deliverer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_thin_message_is_acknowledged_after_suppression() {
        let spool = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Quick note from the editor", "See you next week!");
        let (app, repository, deliverer) = app(spool.path()).await;

        app.ingest(now()).await.unwrap();
        assert!(spool.path().join("a.json").exists());

        let report = app.run_tick(now(), now().naive_utc(), true).await.unwrap();
        assert!(matches!(report.generation, Generation::Suppressed { items: 1, .. }));
        assert!(deliverer.sent.lock().unwrap().is_empty());
        assert!(spool.path().join("processed").join("a.json").exists());
        assert!(repository.fully_disposed_message_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partly_stored_message_is_completed_on_next_fetch() {
        let spool = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Climate Weekly: record heat", LONG_BODY);
        let (app, repository, _) = app(spool.path()).await;

        // A previous fetch recorded the message, then stopped before storing
        // its item.
        let email = SpoolSource::new(spool.path()).fetch_new().await.unwrap().remove(0);
        repository.record_email(&email, now()).await.unwrap();
        assert!(!repository.email_known("m1").await.unwrap());

        let report = app.ingest(now()).await.unwrap();
        assert_eq!(report.emails, 1);
        assert_eq!(report.stored, 1);
        assert!(repository.email_known("m1").await.unwrap());

        // Re-running never stores the same item twice.
        assert_eq!(app.ingest(now()).await.unwrap().stored, 0);
        assert_eq!(repository.eligible_content().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_locked_database_fails_ingest_without_losing_messages() {
        let spool = tempfile::tempdir().unwrap();
        let db = tempfile::tempdir().unwrap();
        write_message(spool.path(), "a.json", "m1", "Climate Weekly: record heat", LONG_BODY);

        let path = db.path().join("digest.db");
        let repository = Arc::new(
            Repository::open(
                path.to_str().unwrap(),
                Duration::ZERO,
                RetryPolicy {
                    max_retries: 1,
                    base_delay: Duration::from_millis(1),
                    max_jitter: Duration::ZERO,
                },
            )
            .await
            .unwrap(),
        );
        let app = App::with_parts(
            Arc::clone(&repository),
            Arc::new(SpoolSource::new(spool.path())),
            Arc::new(EchoProvider),
            Arc::new(RecordingDeliverer::default()),
            &Config::default(),
        )
        .unwrap();

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();
        let result = app.ingest(now()).await;
        assert!(matches!(result, Err(AppError::StillLocked { .. })));
        assert!(!repository.email_known("m1").await.unwrap());

        blocker.execute_batch("ROLLBACK;").unwrap();
        assert_eq!(app.ingest(now()).await.unwrap().stored, 1);
        assert!(repository.email_known("m1").await.unwrap());
    }
}
