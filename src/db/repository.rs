use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    ContentFingerprint, ContentItem, ContentKind, Disposition, FingerprintKind, IncomingEmail,
    NewContentItem, NewFingerprint, NewSummary, Summary, SummaryStatus,
};

use super::schema::SCHEMA;
use super::transaction::{run_in_transaction, RetryPolicy};

const CONTENT_COLUMNS: &str = "c.id, c.kind, c.title, c.body, c.source_url, c.source_timestamp, \
     c.email_ref, c.content_hash, c.processed_at, c.is_summarized, c.summary_id, c.suppressed, \
     c.suppression_reason";

const SUMMARY_COLUMNS: &str = "id, period_start, period_end, summary_type, text, created_at, \
     sent_at, sent, status, retry_count, max_retries, last_retry_at, error_message, forced";

/// Counts shown by `--status`.
#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub pending_items: i64,
    pub summarized_items: i64,
    pub suppressed_items: i64,
    pub retryable_summaries: i64,
    pub sent_summaries: i64,
    pub abandoned_summaries: i64,
    pub failed_generations: i64,
    pub fingerprints: i64,
    pub last_fetch: Option<DateTime<Utc>>,
}

pub struct Repository {
    conn: Connection,
    policy: RetryPolicy,
}

impl Repository {
    pub async fn open(db_path: &str, busy_timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn, busy_timeout, policy).await
    }

    pub async fn open_in_memory(policy: RetryPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn, Duration::ZERO, policy).await
    }

    async fn init(conn: Connection, busy_timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        conn.call(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, policy })
    }

    /// Runs `work` as one retried `BEGIN IMMEDIATE` transaction.
    pub async fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Transaction<'_>) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        run_in_transaction(&self.conn, &self.policy, work).await
    }

    // Email operations

    /// True once every item of the message has been stored.
    pub async fn email_known(&self, message_id: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        let known = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM processed_emails WHERE message_id = ?1 AND ingested = 1",
                    params![message_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(known)
    }

    pub async fn record_email(&self, email: &IncomingEmail, now: DateTime<Utc>) -> Result<()> {
        let message_id = email.message_id.clone();
        let subject = email.subject.clone();
        let sender = email.sender.clone();
        let received_at = to_sql_time(email.received_at);
        let processed_at = to_sql_time(now);
        self.transaction(move |tx| {
            tx.execute(
                r#"INSERT OR IGNORE INTO processed_emails (message_id, subject, sender, received_at, processed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![message_id, subject, sender, received_at, processed_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_email_ingested(&self, message_id: &str) -> Result<()> {
        let message_id = message_id.to_string();
        self.transaction(move |tx| {
            tx.execute(
                "UPDATE processed_emails SET ingested = 1 WHERE message_id = ?1",
                params![message_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Messages not yet acknowledged whose items have all been either
    /// delivered or suppressed.
    pub async fn fully_disposed_message_ids(&self) -> Result<Vec<String>> {
        let ids = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT e.message_id
                       FROM processed_emails e
                       WHERE e.marked_processed = 0
                         AND e.ingested = 1
                         AND EXISTS (SELECT 1 FROM content_items c WHERE c.email_ref = e.message_id)
                         AND NOT EXISTS (
                             SELECT 1 FROM content_items c
                             WHERE c.email_ref = e.message_id AND c.is_summarized = 0
                         )
                       ORDER BY e.message_id"#,
                )?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn mark_emails_processed(&self, message_ids: Vec<String>) -> Result<()> {
        self.transaction(move |tx| {
            for id in &message_ids {
                tx.execute(
                    "UPDATE processed_emails SET marked_processed = 1 WHERE message_id = ?1",
                    params![id],
                )?;
            }
            Ok(())
        })
        .await
    }

    // Content operations

    pub async fn insert_content(&self, item: NewContentItem, now: DateTime<Utc>) -> Result<i64> {
        let hash = item.content_hash();
        let processed_at = to_sql_time(now);
        self.transaction(move |tx| {
            tx.execute(
                r#"INSERT INTO content_items
                       (kind, title, body, source_url, source_timestamp, email_ref, content_hash, processed_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                params![
                    item.kind.as_str(),
                    item.title,
                    item.body,
                    item.source_url,
                    to_sql_time(item.source_timestamp),
                    item.email_ref,
                    hash,
                    processed_at,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })
        .await
    }

    /// Whether this message already produced an item with this hash.
    pub async fn content_stored(&self, email_ref: &str, content_hash: &str) -> Result<bool> {
        let email_ref = email_ref.to_string();
        let content_hash = content_hash.to_string();
        let stored = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM content_items WHERE email_ref = ?1 AND content_hash = ?2",
                    params![email_ref, content_hash],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(stored)
    }

    pub async fn content_item(&self, id: i64) -> Result<Option<ContentItem>> {
        let item = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_items c WHERE c.id = ?1");
                let item = conn
                    .query_row(&sql, params![id], content_from_row)
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// Unsummarized, unsuppressed items not already covered by a summary that
    /// may still be delivered. Newest first.
    pub async fn eligible_content(&self) -> Result<Vec<ContentItem>> {
        let items = self
            .conn
            .call(|conn| {
                let sql = format!(
                    r#"SELECT {CONTENT_COLUMNS}
                       FROM content_items c
                       WHERE c.is_summarized = 0
                         AND c.suppressed = 0
                         AND NOT EXISTS (
                             SELECT 1 FROM summary_items si
                             JOIN summaries s ON s.id = si.summary_id
                             WHERE si.content_id = c.id
                               AND s.status IN ('draft', 'sending', 'pending_retry')
                         )
                       ORDER BY c.source_timestamp DESC, c.id DESC"#
                );
                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map([], content_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// True when any item is still unsummarized, or when anything was
    /// processed in the 24 hours before `now` (items may be mid-flight).
    pub async fn has_unsummarized_content(&self, now: DateTime<Utc>) -> Result<bool> {
        let recent = to_sql_time(now - chrono::Duration::hours(24));
        let found = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    r#"SELECT COUNT(*) FROM content_items
                       WHERE is_summarized = 0 OR processed_at >= ?1"#,
                    params![recent],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(found)
    }

    /// Marks items as handled without sending them. Keeps the reason for audit.
    pub async fn suppress_content(&self, ids: Vec<i64>, reason: String) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.transaction(move |tx| {
            for id in &ids {
                suppress_item(tx, *id, &reason)?;
            }
            Ok(())
        })
        .await
    }

    // Fingerprint operations

    pub async fn fingerprint_history(&self, since: DateTime<Utc>) -> Result<Vec<ContentFingerprint>> {
        let since = to_sql_time(since);
        let fingerprints = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, content_hash, kind, title_text, body_prefix, summary_id, content_id, summarized_at
                       FROM fingerprints
                       WHERE summarized_at >= ?1
                       ORDER BY summarized_at DESC"#,
                )?;
                let fingerprints = stmt
                    .query_map(params![since], fingerprint_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(fingerprints)
            })
            .await?;
        Ok(fingerprints)
    }

    // Summary operations

    /// Inserts a summary row and links the items it covers.
    pub async fn create_summary(
        &self,
        summary: NewSummary,
        item_ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let created_at = to_sql_time(now);
        self.transaction(move |tx| {
            let id = insert_summary(tx, &summary, &created_at)?;
            link_items(tx, id, &item_ids)?;
            Ok(id)
        })
        .await
    }

    /// Records a summary whose text says there was nothing to send, and
    /// suppresses the items it covered, in one transaction.
    pub async fn record_suppressed(
        &self,
        summary: NewSummary,
        item_ids: Vec<i64>,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let created_at = to_sql_time(now);
        self.transaction(move |tx| {
            let id = insert_summary(tx, &summary, &created_at)?;
            link_items(tx, id, &item_ids)?;
            for item_id in &item_ids {
                suppress_item(tx, *item_id, &reason)?;
            }
            Ok(id)
        })
        .await
    }

    pub async fn summary(&self, id: i64) -> Result<Option<Summary>> {
        let summary = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1");
                let summary = conn
                    .query_row(&sql, params![id], summary_from_row)
                    .optional()?;
                Ok(summary)
            })
            .await?;
        Ok(summary)
    }

    /// Items linked to a summary, newest first.
    pub async fn summary_items(&self, summary_id: i64) -> Result<Vec<ContentItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {CONTENT_COLUMNS}
                       FROM content_items c
                       JOIN summary_items si ON si.content_id = c.id
                       WHERE si.summary_id = ?1
                       ORDER BY c.source_timestamp DESC, c.id DESC"#
                );
                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(params![summary_id], content_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Undelivered summaries still inside their retry allowance, oldest first.
    pub async fn retryable_summaries(&self) -> Result<Vec<Summary>> {
        let summaries = self
            .conn
            .call(|conn| {
                let sql = format!(
                    r#"SELECT {SUMMARY_COLUMNS} FROM summaries
                       WHERE sent = 0
                         AND status IN ('draft', 'pending_retry')
                         AND retry_count < max_retries
                       ORDER BY created_at, id"#
                );
                let mut stmt = conn.prepare(&sql)?;
                let summaries = stmt
                    .query_map([], summary_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(summaries)
            })
            .await?;
        Ok(summaries)
    }

    /// Atomically moves a deliverable summary to `sending`.
    ///
    /// Returns `None` when the summary is already sent, already being sent by
    /// another tick, or out of retries. Only the caller that gets `Some` may
    /// deliver.
    pub async fn claim_for_delivery(&self, id: i64, now: DateTime<Utc>) -> Result<Option<Summary>> {
        let claimed_at = to_sql_time(now);
        self.transaction(move |tx| {
            let changed = tx.execute(
                r#"UPDATE summaries SET status = 'sending', claimed_at = ?2
                   WHERE id = ?1
                     AND sent = 0
                     AND status IN ('draft', 'pending_retry')
                     AND retry_count < max_retries"#,
                params![id, claimed_at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let sql = format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1");
            tx.query_row(&sql, params![id], summary_from_row).map(Some)
        })
        .await
    }

    /// Marks a claimed summary sent, flags every item it covered, and appends
    /// the fingerprints of those items to history.
    pub async fn complete_delivery(
        &self,
        id: i64,
        now: DateTime<Utc>,
        fingerprints: Vec<NewFingerprint>,
    ) -> Result<bool> {
        let sent_at = to_sql_time(now);
        self.transaction(move |tx| {
            let changed = tx.execute(
                r#"UPDATE summaries SET sent = 1, sent_at = ?2, status = 'sent'
                   WHERE id = ?1 AND sent = 0 AND status = 'sending'"#,
                params![id, sent_at],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            tx.execute(
                r#"UPDATE content_items SET is_summarized = 1, summary_id = ?1
                   WHERE id IN (SELECT content_id FROM summary_items WHERE summary_id = ?1)"#,
                params![id],
            )?;
            for fp in &fingerprints {
                tx.execute(
                    r#"INSERT OR IGNORE INTO fingerprints
                           (content_hash, kind, title_text, body_prefix, summary_id, content_id, summarized_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        fp.content_hash,
                        fp.kind.as_str(),
                        fp.title_text,
                        fp.body_prefix,
                        id,
                        fp.content_id,
                        sent_at,
                    ],
                )?;
            }
            Ok(true)
        })
        .await
    }

    /// Books a failed send against a claimed summary. Returns the new status:
    /// `PendingRetry`, or `Abandoned` once the allowance is used up.
    pub async fn record_delivery_failure(
        &self,
        id: i64,
        now: DateTime<Utc>,
        error: String,
    ) -> Result<SummaryStatus> {
        let at = to_sql_time(now);
        self.transaction(move |tx| {
            tx.execute(
                r#"UPDATE summaries SET
                       retry_count = retry_count + 1,
                       last_retry_at = ?2,
                       error_message = ?3,
                       status = CASE WHEN retry_count + 1 >= max_retries
                                     THEN 'abandoned' ELSE 'pending_retry' END
                   WHERE id = ?1 AND sent = 0 AND status = 'sending'"#,
                params![id, at, error],
            )?;
            let status: String =
                tx.query_row("SELECT status FROM summaries WHERE id = ?1", params![id], |row| {
                    row.get(0)
                })?;
            Ok(SummaryStatus::parse(&status).unwrap_or(SummaryStatus::PendingRetry))
        })
        .await
    }

    /// Message ids behind the items of a summary.
    pub async fn message_ids_for_summary(&self, summary_id: i64) -> Result<Vec<String>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT c.email_ref
                       FROM content_items c
                       JOIN summary_items si ON si.content_id = c.id
                       WHERE si.summary_id = ?1 AND c.email_ref IS NOT NULL
                       ORDER BY c.email_ref"#,
                )?;
                let ids = stmt
                    .query_map(params![summary_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Hands a claimed summary back to the retry sweep without booking a
    /// failed attempt against it.
    pub async fn release_claim(&self, id: i64) -> Result<bool> {
        self.transaction(move |tx| {
            let changed = tx.execute(
                r#"UPDATE summaries SET status = 'pending_retry', claimed_at = NULL
                   WHERE id = ?1 AND status = 'sending' AND sent = 0"#,
                params![id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Returns summaries claimed at or before `before` and never settled to
    /// `pending_retry`.
    pub async fn release_stale_claims(&self, before: DateTime<Utc>) -> Result<usize> {
        let before = to_sql_time(before);
        self.transaction(move |tx| {
            tx.execute(
                r#"UPDATE summaries SET status = 'pending_retry', claimed_at = NULL
                   WHERE status = 'sending' AND sent = 0
                     AND (claimed_at IS NULL OR claimed_at <= ?1)"#,
                params![before],
            )
        })
        .await
    }

    // Fetch status

    pub async fn last_fetch(&self) -> Result<Option<DateTime<Utc>>> {
        let last = self
            .conn
            .call(|conn| {
                let last: Option<Option<String>> = conn
                    .query_row("SELECT last_fetch_at FROM fetch_status WHERE id = 1", [], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(last.flatten())
            })
            .await?;
        Ok(last.and_then(|s| parse_datetime(&s)))
    }

    pub async fn set_last_fetch(&self, at: DateTime<Utc>) -> Result<()> {
        let at = to_sql_time(at);
        self.transaction(move |tx| {
            tx.execute(
                r#"INSERT INTO fetch_status (id, last_fetch_at) VALUES (1, ?1)
                   ON CONFLICT(id) DO UPDATE SET last_fetch_at = excluded.last_fetch_at"#,
                params![at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let mut counts = self
            .conn
            .call(|conn| {
                let count = |sql: &str| -> rusqlite::Result<i64> {
                    conn.query_row(sql, [], |row| row.get(0))
                };
                Ok(StatusCounts {
                    pending_items: count("SELECT COUNT(*) FROM content_items WHERE is_summarized = 0")?,
                    summarized_items: count(
                        "SELECT COUNT(*) FROM content_items WHERE is_summarized = 1 AND suppressed = 0",
                    )?,
                    suppressed_items: count("SELECT COUNT(*) FROM content_items WHERE suppressed = 1")?,
                    retryable_summaries: count(
                        r#"SELECT COUNT(*) FROM summaries
                           WHERE sent = 0 AND status IN ('draft', 'pending_retry', 'sending')"#,
                    )?,
                    sent_summaries: count("SELECT COUNT(*) FROM summaries WHERE sent = 1")?,
                    abandoned_summaries: count(
                        "SELECT COUNT(*) FROM summaries WHERE status = 'abandoned'",
                    )?,
                    failed_generations: count(
                        "SELECT COUNT(*) FROM summaries WHERE status = 'generation_failed'",
                    )?,
                    fingerprints: count("SELECT COUNT(*) FROM fingerprints")?,
                    last_fetch: None,
                })
            })
            .await?;
        counts.last_fetch = self.last_fetch().await?;
        Ok(counts)
    }
}

fn insert_summary(tx: &Transaction<'_>, summary: &NewSummary, created_at: &str) -> rusqlite::Result<i64> {
    tx.execute(
        r#"INSERT INTO summaries
               (period_start, period_end, summary_type, text, created_at, status, max_retries, error_message, forced)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            to_sql_time(summary.period_start),
            to_sql_time(summary.period_end),
            summary.summary_type,
            summary.text,
            created_at,
            summary.status.as_str(),
            summary.max_retries,
            summary.error_message,
            summary.forced,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn link_items(tx: &Transaction<'_>, summary_id: i64, item_ids: &[i64]) -> rusqlite::Result<()> {
    for item_id in item_ids {
        tx.execute(
            "INSERT OR IGNORE INTO summary_items (summary_id, content_id) VALUES (?1, ?2)",
            params![summary_id, item_id],
        )?;
    }
    Ok(())
}

fn suppress_item(tx: &Transaction<'_>, id: i64, reason: &str) -> rusqlite::Result<()> {
    tx.execute(
        r#"UPDATE content_items
           SET is_summarized = 1, suppressed = 1, suppression_reason = ?2, summary_id = NULL
           WHERE id = ?1 AND is_summarized = 0"#,
        params![id, reason],
    )?;
    Ok(())
}

fn to_sql_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn datetime_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| bad_column(idx, format!("bad timestamp {raw:?}")))
}

fn opt_datetime_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| parse_datetime(&s)))
}

fn content_from_row(row: &Row) -> rusqlite::Result<ContentItem> {
    let is_summarized: bool = row.get(9)?;
    let summary_id: Option<i64> = row.get(10)?;
    let suppressed: bool = row.get(11)?;
    let reason: Option<String> = row.get(12)?;

    let disposition = match (is_summarized, suppressed, summary_id) {
        (_, true, _) => Disposition::Suppressed {
            reason: reason.unwrap_or_default(),
        },
        (true, false, Some(summary_id)) => Disposition::Summarized { summary_id },
        (true, false, None) => Disposition::Suppressed {
            reason: reason.unwrap_or_else(|| "unspecified".to_string()),
        },
        (false, false, _) => Disposition::Pending,
    };

    Ok(ContentItem {
        id: row.get(0)?,
        kind: ContentKind::parse(&row.get::<_, String>(1)?),
        title: row.get(2)?,
        body: row.get(3)?,
        source_url: row.get(4)?,
        source_timestamp: datetime_at(row, 5)?,
        email_ref: row.get(6)?,
        content_hash: row.get(7)?,
        processed_at: datetime_at(row, 8)?,
        disposition,
    })
}

fn summary_from_row(row: &Row) -> rusqlite::Result<Summary> {
    let status: String = row.get(8)?;
    let status = SummaryStatus::parse(&status)
        .ok_or_else(|| bad_column(8, format!("unknown summary status {status:?}")))?;

    Ok(Summary {
        id: row.get(0)?,
        period_start: datetime_at(row, 1)?,
        period_end: datetime_at(row, 2)?,
        summary_type: row.get(3)?,
        text: row.get(4)?,
        created_at: datetime_at(row, 5)?,
        sent_at: opt_datetime_at(row, 6)?,
        sent: row.get(7)?,
        status,
        retry_count: row.get(9)?,
        max_retries: row.get(10)?,
        last_retry_at: opt_datetime_at(row, 11)?,
        error_message: row.get(12)?,
        forced: row.get(13)?,
    })
}

fn fingerprint_from_row(row: &Row) -> rusqlite::Result<ContentFingerprint> {
    Ok(ContentFingerprint {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        kind: FingerprintKind::parse(&row.get::<_, String>(2)?),
        title_text: row.get(3)?,
        body_prefix: row.get(4)?,
        summary_id: row.get(5)?,
        content_id: row.get(6)?,
        summarized_at: datetime_at(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn repo() -> Repository {
        Repository::open_in_memory(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_jitter: Duration::ZERO,
        })
        .await
        .unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn draft(max_retries: u32) -> NewSummary {
        NewSummary {
            period_start: at(1, 0),
            period_end: at(2, 0),
            summary_type: "weekly".into(),
            text: "digest text".into(),
            status: SummaryStatus::Draft,
            max_retries,
            error_message: None,
            forced: false,
        }
    }

    async fn add_item(repo: &Repository, title: &str, ts: DateTime<Utc>) -> i64 {
        let item = NewContentItem::new(ContentKind::Email, title, format!("{title} body"), ts);
        repo.insert_content(item, ts).await.unwrap()
    }

    #[tokio::test]
    async fn test_eligible_content_is_newest_first() {
        let repo = repo().await;
        add_item(&repo, "older", at(1, 8)).await;
        add_item(&repo, "newer", at(3, 8)).await;
        add_item(&repo, "middle", at(2, 8)).await;

        let titles: Vec<_> = repo
            .eligible_content()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, ["newer", "middle", "older"]);
    }

    #[tokio::test]
    async fn test_items_in_live_summary_are_not_eligible() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        add_item(&repo, "b", at(1, 9)).await;
        repo.create_summary(draft(3), vec![a], at(2, 0)).await.unwrap();

        let eligible = repo.eligible_content().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].title, "b");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        let id = repo.create_summary(draft(3), vec![a], at(2, 0)).await.unwrap();

        assert!(repo.claim_for_delivery(id, at(2, 1)).await.unwrap().is_some());
        assert!(repo.claim_for_delivery(id, at(2, 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_delivery_marks_items_and_writes_history() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        let b = add_item(&repo, "b", at(1, 9)).await;
        let id = repo.create_summary(draft(3), vec![a, b], at(2, 0)).await.unwrap();
        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();

        let fp = NewFingerprint {
            content_hash: "hash-a".into(),
            kind: FingerprintKind::Primary,
            title_text: "a".into(),
            body_prefix: "a body".into(),
            content_id: a,
        };
        assert!(repo
            .complete_delivery(id, at(2, 8), vec![fp.clone(), fp])
            .await
            .unwrap());

        let summary = repo.summary(id).await.unwrap().unwrap();
        assert!(summary.sent);
        assert_eq!(summary.status, SummaryStatus::Sent);
        assert_eq!(summary.sent_at, Some(at(2, 8)));

        let item = repo.content_item(b).await.unwrap().unwrap();
        assert_eq!(item.disposition, Disposition::Summarized { summary_id: id });
        assert!(repo.eligible_content().await.unwrap().is_empty());

        let history = repo.fingerprint_history(at(1, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].summary_id, id);

        // Second completion is a no-op.
        assert!(!repo.complete_delivery(id, at(3, 8), vec![]).await.unwrap());
        let again = repo.summary(id).await.unwrap().unwrap();
        assert_eq!(again.sent_at, Some(at(2, 8)));
    }

    #[tokio::test]
    async fn test_delivery_failures_abandon_after_max_retries() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        let id = repo.create_summary(draft(2), vec![a], at(2, 0)).await.unwrap();

        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();
        let status = repo
            .record_delivery_failure(id, at(2, 8), "smtp down".into())
            .await
            .unwrap();
        assert_eq!(status, SummaryStatus::PendingRetry);
        assert_eq!(repo.retryable_summaries().await.unwrap().len(), 1);
        assert!(repo.eligible_content().await.unwrap().is_empty());

        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();
        let status = repo
            .record_delivery_failure(id, at(2, 9), "smtp still down".into())
            .await
            .unwrap();
        assert_eq!(status, SummaryStatus::Abandoned);

        let summary = repo.summary(id).await.unwrap().unwrap();
        assert_eq!(summary.retry_count, 2);
        assert!(!summary.sent);
        assert_eq!(summary.error_message.as_deref(), Some("smtp still down"));
        assert!(repo.retryable_summaries().await.unwrap().is_empty());
        assert!(repo.claim_for_delivery(id, at(2, 1)).await.unwrap().is_none());

        // Content of an abandoned summary is eligible again.
        assert_eq!(repo.eligible_content().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_stale_claims() {
        let repo = repo().await;
        let id = repo.create_summary(draft(3), vec![], at(2, 0)).await.unwrap();
        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();

        assert_eq!(repo.release_stale_claims(at(2, 0)).await.unwrap(), 0);
        assert_eq!(repo.summary(id).await.unwrap().unwrap().status, SummaryStatus::Sending);

        assert_eq!(repo.release_stale_claims(at(2, 1)).await.unwrap(), 1);
        let summary = repo.summary(id).await.unwrap().unwrap();
        assert_eq!(summary.status, SummaryStatus::PendingRetry);
        assert_eq!(summary.retry_count, 0);
        assert_eq!(repo.retryable_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_claim_only_touches_sending() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        let id = repo.create_summary(draft(3), vec![a], at(2, 0)).await.unwrap();

        assert!(!repo.release_claim(id).await.unwrap());
        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();
        assert!(repo.release_claim(id).await.unwrap());

        let summary = repo.summary(id).await.unwrap().unwrap();
        assert_eq!(summary.status, SummaryStatus::PendingRetry);
        assert!(repo.claim_for_delivery(id, at(2, 2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_suppression_is_auditable() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        repo.suppress_content(vec![a], "too short".into()).await.unwrap();

        let item = repo.content_item(a).await.unwrap().unwrap();
        assert!(item.is_summarized());
        assert_eq!(item.summary_ref(), None);
        assert_eq!(
            item.disposition,
            Disposition::Suppressed {
                reason: "too short".into()
            }
        );
    }

    #[tokio::test]
    async fn test_has_unsummarized_content_falls_back_to_recent_items() {
        let repo = repo().await;
        assert!(!repo.has_unsummarized_content(at(5, 0)).await.unwrap());

        let a = add_item(&repo, "a", at(4, 12)).await;
        assert!(repo.has_unsummarized_content(at(5, 0)).await.unwrap());

        repo.suppress_content(vec![a], "empty".into()).await.unwrap();
        // Processed 12 hours ago, so still counts.
        assert!(repo.has_unsummarized_content(at(5, 0)).await.unwrap());
        assert!(!repo.has_unsummarized_content(at(6, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fingerprint_history_respects_window() {
        let repo = repo().await;
        let a = add_item(&repo, "a", at(1, 8)).await;
        let id = repo.create_summary(draft(3), vec![a], at(1, 9)).await.unwrap();
        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();
        let fp = NewFingerprint {
            content_hash: "h".into(),
            kind: FingerprintKind::Paragraph,
            title_text: "a".into(),
            body_prefix: "p".into(),
            content_id: a,
        };
        repo.complete_delivery(id, at(1, 10), vec![fp]).await.unwrap();

        assert_eq!(repo.fingerprint_history(at(1, 0)).await.unwrap().len(), 1);
        assert!(repo.fingerprint_history(at(2, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emails_and_fetch_status() {
        let repo = repo().await;
        let email = IncomingEmail {
            message_id: "<m1@example.com>".into(),
            subject: "Hello".into(),
            sender: "news@example.com".into(),
            received_at: at(1, 7),
            body_html: None,
            body_text: Some("hi".into()),
            articles: vec![],
        };
        assert!(!repo.email_known(&email.message_id).await.unwrap());
        repo.record_email(&email, at(1, 8)).await.unwrap();
        repo.record_email(&email, at(1, 9)).await.unwrap();
        assert!(!repo.email_known(&email.message_id).await.unwrap());
        repo.mark_email_ingested(&email.message_id).await.unwrap();
        assert!(repo.email_known(&email.message_id).await.unwrap());

        let item = NewContentItem::new(ContentKind::Email, "Hello", "hi", at(1, 7))
            .with_email_ref(email.message_id.clone());
        let item_id = repo.insert_content(item, at(1, 8)).await.unwrap();
        let id = repo.create_summary(draft(3), vec![item_id], at(1, 9)).await.unwrap();
        assert_eq!(
            repo.message_ids_for_summary(id).await.unwrap(),
            vec![email.message_id.clone()]
        );

        assert_eq!(repo.last_fetch().await.unwrap(), None);
        repo.set_last_fetch(at(1, 8)).await.unwrap();
        repo.set_last_fetch(at(1, 9)).await.unwrap();
        assert_eq!(repo.last_fetch().await.unwrap(), Some(at(1, 9)));

        let counts = repo.status_counts().await.unwrap();
        assert_eq!(counts.pending_items, 1);
        assert_eq!(counts.retryable_summaries, 1);
        assert_eq!(counts.last_fetch, Some(at(1, 9)));
    }

    #[tokio::test]
    async fn test_fully_disposed_message_ids() {
        let repo = repo().await;
        let mut items = Vec::new();
        for id in ["m1", "m2", "m3"] {
            let email = IncomingEmail {
                message_id: id.into(),
                subject: format!("Subject {id}"),
                sender: "news@example.com".into(),
                received_at: at(1, 7),
                body_html: None,
                body_text: None,
                articles: vec![],
            };
            repo.record_email(&email, at(1, 8)).await.unwrap();
            let item = NewContentItem::new(ContentKind::Email, email.subject.clone(), "body", at(1, 7))
                .with_email_ref(id);
            items.push(repo.insert_content(item, at(1, 8)).await.unwrap());
        }
        repo.mark_email_ingested("m1").await.unwrap();
        repo.mark_email_ingested("m2").await.unwrap();

        // m3 is not fully ingested yet, so it never qualifies.
        repo.suppress_content(vec![items[0], items[2]], "duplicate".into())
            .await
            .unwrap();
        assert_eq!(repo.fully_disposed_message_ids().await.unwrap(), ["m1"]);

        let id = repo.create_summary(draft(3), vec![items[1]], at(2, 0)).await.unwrap();
        repo.claim_for_delivery(id, at(2, 1)).await.unwrap();
        assert_eq!(repo.fully_disposed_message_ids().await.unwrap(), ["m1"]);
        repo.complete_delivery(id, at(2, 2), vec![]).await.unwrap();
        assert_eq!(repo.fully_disposed_message_ids().await.unwrap(), ["m1", "m2"]);

        repo.mark_emails_processed(vec!["m1".into()]).await.unwrap();
        assert_eq!(repo.fully_disposed_message_ids().await.unwrap(), ["m2"]);
    }
}
