//! Ratcliff/Obershelp sequence similarity.
//!
//! `ratio` is `2*M / (|a| + |b|)` where `M` is the number of characters in
//! matching blocks, found by taking the longest common substring and
//! recursing on the pieces left and right of it. Works on `char`s, so
//! multi-byte text is measured the way a reader sees it.

use std::collections::HashMap;

/// Similarity in `[0.0, 1.0]`. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// `ratio(a, b) >= threshold`, skipping the full computation when a cheap
/// upper bound already rules the pair out.
pub fn ratio_at_least(a: &str, b: &str, threshold: f64) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return threshold <= 1.0;
    }

    // Length bound: can't match more than the shorter string.
    let length_bound = 2.0 * a.len().min(b.len()) as f64 / total as f64;
    if length_bound < threshold {
        return false;
    }

    // Multiset bound: can't match characters the other side doesn't have.
    if 2.0 * shared_chars(&a, &b) as f64 / (total as f64) < threshold {
        return false;
    }

    2.0 * matching_chars(&a, &b) as f64 / (total as f64) >= threshold
}

fn shared_chars(a: &[char], b: &[char]) -> usize {
    let mut avail: HashMap<char, isize> = HashMap::new();
    for &c in b {
        *avail.entry(c).or_insert(0) += 1;
    }
    let mut shared = 0;
    for &c in a {
        let n = avail.entry(c).or_insert(0);
        if *n > 0 {
            shared += 1;
        }
        *n -= 1;
    }
    shared
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        b2j.entry(c).or_default().push(j);
    }

    let mut matched = 0;
    let mut queue = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        let (i, j, k) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            queue.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            queue.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest block `a[i..i+k] == b[j..j+k]` inside the given window. Ties go
/// to the earliest block in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // j2len[j] = length of the match ending at a[i-1], b[j]
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = if j > 0 {
                    j2len.get(&(j - 1)).copied().unwrap_or(0)
                } else {
                    0
                } + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        j2len = next;
    }

    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_identical_and_disjoint() {
        assert!(close(ratio("newsletter", "newsletter"), 1.0));
        assert!(close(ratio("abc", "xyz"), 0.0));
        assert!(close(ratio("", ""), 1.0));
        assert!(close(ratio("abc", ""), 0.0));
    }

    #[test]
    fn test_known_ratios() {
        // Matching blocks "ab" and "d": 2*3 / 8
        assert!(close(ratio("abcd", "abed"), 0.75));
        // "WIKIM" + "IA": 2*7 / 18
        assert!(close(ratio("WIKIMEDIA", "WIKIMANIA"), 14.0 / 18.0));
    }

    #[test]
    fn test_symmetric_for_simple_inputs() {
        let a = "The Morning Brief: markets rally";
        let b = "The Morning Brief: markets slump";
        assert!(close(ratio(a, b), ratio(b, a)));
    }

    #[test]
    fn test_small_edit_stays_above_threshold() {
        let base = "Apple announced a new chip today, claiming large gains in battery life and speed for laptops.";
        let edited = "Apple announced a new chip today, claiming large gains in battery life and speed for its laptops.";
        assert!(ratio(base, edited) >= 0.95);
        assert!(ratio_at_least(base, edited, 0.95));
    }

    #[test]
    fn test_bounds_agree_with_full_ratio() {
        let pairs = [
            ("short", "a much much longer string"),
            ("aaaa", "bbbb"),
            ("weekly digest", "weekly digest!"),
            ("", "x"),
        ];
        for (a, b) in pairs {
            for t in [0.0, 0.5, 0.9, 0.95, 1.0] {
                assert_eq!(ratio_at_least(a, b, t), ratio(a, b) >= t, "{a:?} {b:?} {t}");
            }
        }
    }

    #[test]
    fn test_multiset_bound_rejects_equal_length_strangers() {
        // Same length, so only the character multiset rules these out.
        assert!(!ratio_at_least("abcdef", "uvwxyz", 0.5));
        assert!(!ratio_at_least("abcdef", "abcxyz", 0.9));
        assert!(ratio_at_least("abcdef", "abcxyz", 0.5));
        // Every character shared but out of order: the full ratio decides.
        assert!(!ratio_at_least("listen", "silent", 0.9));
    }

    #[test]
    fn test_multibyte_characters_count_once() {
        assert!(close(ratio("café", "cafe"), 0.75));
    }
}
