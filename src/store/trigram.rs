//! Trigram similarity with the same semantics as Postgres `pg_trgm`.
//!
//! Each alphanumeric word is lowercased, padded with two leading spaces and
//! one trailing space, and cut into three-character windows. Similarity is
//! the Jaccard index of the two trigram sets.

use std::collections::HashSet;

pub fn trigrams(text: &str) -> HashSet<String> {
    let mut set = HashSet::new();
    let lower = text.to_lowercase();
    for word in lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = format!("  {} ", word).chars().collect();
        for window in padded.windows(3) {
            set.insert(window.iter().collect());
        }
    }
    set
}

pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    shared as f64 / union as f64
}
