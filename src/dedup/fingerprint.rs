use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Body characters that go into the primary content hash.
pub const HASH_BODY_CHARS: usize = 100;

/// Body characters compared for similarity and stored in history.
pub const COMPARE_BODY_CHARS: usize = 1000;

/// Longest lead paragraph kept for a paragraph fingerprint.
pub const PARAGRAPH_MAX_CHARS: usize = 300;

/// A lead paragraph must be longer than this to get its own fingerprint.
pub const PARAGRAPH_MIN_CHARS: usize = 100;

/// Titles shorter than this (after normalization) never match anything.
pub const MIN_TITLE_CHARS: usize = 10;

/// Stands in for a missing or blank body so all empty items hash alike.
const EMPTY_BODY_SENTINEL: &str = "\u{0}empty-body\u{0}";

fn emoji_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"[\x{1F000}-\x{1FAFF}\x{2600}-\x{27BF}\x{2300}-\x{23FF}\x{2B00}-\x{2BFF}\x{FE00}-\x{FE0F}\x{200D}\x{20E3}\x{E0020}-\x{E007F}]",
        )
        .expect("emoji pattern is valid")
    })
}

fn paragraph_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n").expect("paragraph pattern is valid"))
}

fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// First `n` characters of `text`, never splitting a code point.
pub fn prefix_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn body_or_sentinel(body: &str, n: usize) -> &str {
    let body = body.trim();
    if body.is_empty() {
        EMPTY_BODY_SENTINEL
    } else {
        prefix_chars(body, n)
    }
}

/// Primary signature: title plus the first 100 body characters.
pub fn content_hash(title: &str, body: &str) -> String {
    sha256_hex(&[title.trim(), "\n", body_or_sentinel(body, HASH_BODY_CHARS)])
}

/// Signature of the first 1000 body characters, used for in-batch dedup.
pub fn body_hash(body: &str) -> String {
    sha256_hex(&[body_or_sentinel(body, COMPARE_BODY_CHARS)])
}

/// Signature of a lead paragraph. Prefixed so it can never collide with a
/// primary hash in the shared history table.
pub fn paragraph_hash(paragraph: &str) -> String {
    sha256_hex(&["paragraph\n", paragraph])
}

/// The body's first paragraph (capped at 300 chars) when it is substantial
/// enough to identify a repost on its own.
pub fn lead_paragraph(body: &str) -> Option<String> {
    let first = paragraph_break_re().split(body.trim()).next()?.trim();
    let capped = prefix_chars(first, PARAGRAPH_MAX_CHARS);
    if capped.chars().count() > PARAGRAPH_MIN_CHARS {
        Some(capped.to_string())
    } else {
        None
    }
}

/// Strips emoji/pictographs and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    let stripped = emoji_re().replace_all(title, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
