pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- processed_emails table (one row per message handed over by the fetch stage)
CREATE TABLE IF NOT EXISTS processed_emails (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    subject TEXT NOT NULL,
    sender TEXT NOT NULL,
    received_at TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    ingested INTEGER NOT NULL DEFAULT 0,
    marked_processed INTEGER NOT NULL DEFAULT 0
);

-- summaries table
CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    summary_type TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    sent_at TEXT,
    sent INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'draft',
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 5,
    last_retry_at TEXT,
    error_message TEXT,
    forced INTEGER NOT NULL DEFAULT 0,
    claimed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_summaries_status ON summaries(status, sent);

-- content_items table
CREATE TABLE IF NOT EXISTS content_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    source_url TEXT,
    source_timestamp TEXT NOT NULL,
    email_ref TEXT REFERENCES processed_emails(message_id),
    content_hash TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    is_summarized INTEGER NOT NULL DEFAULT 0,
    summary_id INTEGER REFERENCES summaries(id),
    suppressed INTEGER NOT NULL DEFAULT 0,
    suppression_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_content_items_pending ON content_items(is_summarized, suppressed);
CREATE INDEX IF NOT EXISTS idx_content_items_hash ON content_items(content_hash);
CREATE INDEX IF NOT EXISTS idx_content_items_processed_at ON content_items(processed_at);

-- summary_items table (which items a summary covers, before and after delivery)
CREATE TABLE IF NOT EXISTS summary_items (
    summary_id INTEGER NOT NULL REFERENCES summaries(id),
    content_id INTEGER NOT NULL REFERENCES content_items(id),
    PRIMARY KEY (summary_id, content_id)
);

CREATE INDEX IF NOT EXISTS idx_summary_items_content ON summary_items(content_id);

-- fingerprints table (append-only history of delivered content)
CREATE TABLE IF NOT EXISTS fingerprints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    title_text TEXT NOT NULL,
    body_prefix TEXT NOT NULL,
    summary_id INTEGER NOT NULL REFERENCES summaries(id),
    content_id INTEGER REFERENCES content_items(id),
    summarized_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_summarized_at ON fingerprints(summarized_at);

-- fetch_status table (single row, crash recovery for the fetch loop)
CREATE TABLE IF NOT EXISTS fetch_status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_fetch_at TEXT
);
"#;
