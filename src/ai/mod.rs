mod summarizer;

pub use summarizer::{ClaudeSummarizer, SummaryProvider, DIGEST_INSTRUCTION};
