//! Token-budget batcher.
//!
//! Packs content items into batches that fit the summarization provider's
//! input limit. Size is estimated from character count, the same rough
//! four-characters-per-token rule used for chunking elsewhere.

use crate::models::ContentItem;

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Every item keeps at least this many characters when scaled down.
pub const TRUNCATION_FLOOR_CHARS: usize = 500;

pub const ABBREVIATION_MARKER: &str = "\n\n[...CONTENT ABBREVIATED...]\n\n";

const ITEM_SEPARATOR: &str = "\n\n--------------------------------------------------\n\n";

/// An ordered group of items summarized in one provider call.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<ContentItem>,
    /// How many item bodies were cut down to fit.
    pub truncated: usize,
}

impl Batch {
    pub fn body_chars(&self) -> usize {
        self.items.iter().map(|i| i.body_chars()).sum()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.body_chars() / CHARS_PER_TOKEN
    }

    pub fn item_ids(&self) -> Vec<i64> {
        self.items.iter().map(|i| i.id).collect()
    }

    /// Provider input: one block per item, separated by a rule.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(render_item)
            .collect::<Vec<_>>()
            .join(ITEM_SEPARATOR)
    }
}

fn render_item(item: &ContentItem) -> String {
    let mut text = format!(
        "SOURCE: {}\nDATE: {}\n\nCONTENT:\n{}\n",
        item.title,
        item.source_timestamp.format("%Y-%m-%d"),
        item.body
    );
    if let Some(url) = &item.source_url {
        text.push_str(&format!("\nSOURCE LINK: {}\n", url));
    }
    text
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    max_tokens: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn max_chars(&self) -> usize {
        self.max_tokens * CHARS_PER_TOKEN
    }

    /// Splits `items` into batches, newest first. Items are never split; an
    /// item that alone exceeds the budget gets a batch of its own and is
    /// scaled down to fit.
    pub fn batch(&self, mut items: Vec<ContentItem>) -> Vec<Batch> {
        items.sort_by(|a, b| b.source_timestamp.cmp(&a.source_timestamp));

        let max_chars = self.max_chars();
        let mut batches = Vec::new();
        let mut current = Batch::default();
        let mut current_chars = 0;

        for item in items {
            let chars = item.body_chars();

            if chars > max_chars {
                if !current.items.is_empty() {
                    batches.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                batches.push(Batch {
                    items: vec![item],
                    truncated: 0,
                });
                continue;
            }

            if current_chars + chars > max_chars && !current.items.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            current_chars += chars;
            current.items.push(item);
        }

        if !current.items.is_empty() {
            batches.push(current);
        }

        for batch in &mut batches {
            self.scale_to_fit(batch);
        }

        tracing::debug!(
            batches = batches.len(),
            max_tokens = self.max_tokens,
            "prepared summary batches"
        );
        batches
    }

    /// Truncates each item in proportion to its share of the batch when the
    /// batch is over budget, never below the floor.
    pub fn scale_to_fit(&self, batch: &mut Batch) {
        let available = self.max_chars();
        let total = batch.body_chars();
        if total <= available || total == 0 {
            return;
        }

        tracing::warn!(
            total_chars = total,
            available_chars = available,
            "batch over budget, scaling content down"
        );

        for item in &mut batch.items {
            let len = item.body_chars();
            let scaled = (len as u128 * available as u128 / total as u128) as usize;
            let target = scaled.max(len.min(TRUNCATION_FLOOR_CHARS));
            if len > target {
                item.body = abbreviate(&item.body, target);
                batch.truncated += 1;
            }
        }
    }
}

/// Keeps the head and tail of `text`, `max_chars` in total, around the
/// abbreviation marker.
pub fn abbreviate(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}{ABBREVIATION_MARKER}{tail}")
}
