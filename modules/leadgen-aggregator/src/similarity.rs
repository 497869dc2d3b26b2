//! String similarity scores on a 0–100 scale.
//!
//! `ratio` is the rapidfuzz Indel similarity scaled to 100. The token
//! variants pre-process both inputs (lowercase, punctuation to spaces) and
//! compare token arrangements, so word order does not matter.

use std::collections::BTreeSet;

use rapidfuzz::distance::indel;

/// Lowercase, replace non-alphanumerics with spaces, collapse whitespace.
pub fn process(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Indel similarity of two strings as given. Empty input scores 0.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    100.0 * indel::normalized_similarity(a.chars(), b.chars())
}

/// Similarity after sorting each side's tokens ("Plumbing Acme" == "Acme Plumbing").
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Similarity of token sets: shared tokens are compared against each
/// side's shared-plus-remaining tokens, and the best pairing wins.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let a = process(a);
    let b = process(b);
    let set_a: BTreeSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let set_b: BTreeSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let shared = join(set_a.intersection(&set_b));
    let only_a = join(set_a.difference(&set_b));
    let only_b = join(set_b.difference(&set_a));

    let with_a = join_nonempty(&shared, &only_a);
    let with_b = join_nonempty(&shared, &only_b);

    ratio(&shared, &with_a)
        .max(ratio(&shared, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn sorted_tokens(s: &str) -> String {
    let processed = process(s);
    let mut tokens: Vec<&str> = processed.split(' ').filter(|t| !t.is_empty()).collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join<T: AsRef<str>>(tokens: impl Iterator<Item = T>) -> String {
    tokens
        .map(|t| t.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_lowercases_and_strips_punctuation() {
        assert_eq!(process("  ACME Plumbing, LLC. "), "acme plumbing llc");
        assert_eq!(process("12  Oak St."), "12 oak st");
    }

    #[test]
    fn ratio_of_identical_strings_is_100() {
        assert_eq!(ratio("acme", "acme"), 100.0);
    }

    #[test]
    fn ratio_with_empty_side_is_zero() {
        assert_eq!(ratio("", "acme"), 0.0);
        assert_eq!(ratio("", ""), 0.0);
    }

    #[test]
    fn ratio_counts_common_subsequence() {
        // LCS("abcd", "abed") = 3 → 2*3 / 8
        assert!((ratio("abcd", "abed") - 75.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_counts_chars_not_bytes() {
        // "café" vs "cafe": 3 of 4 chars shared on each side → 6 / 8
        assert!((ratio("café", "cafe") - 75.0).abs() < 1e-9);
        assert!((ratio("this is a test", "this is a test!") - 96.551_724_137_931_03).abs() < 1e-9);
    }

    #[test]
    fn token_sort_ignores_word_order() {
        assert_eq!(token_sort_ratio("Plumbing Acme", "acme plumbing"), 100.0);
    }

    #[test]
    fn token_sort_scores_suffix_variants_above_85() {
        let score = token_sort_ratio("Acme Plumbing LLC", "ACME Plumbing");
        assert!(score >= 85.0, "score = {score}");
        assert!(score < 100.0);
    }

    #[test]
    fn token_sort_scores_unrelated_names_low() {
        let score = token_sort_ratio("Acme Plumbing", "Zenith Roofing Co");
        assert!(score < 85.0, "score = {score}");
    }

    #[test]
    fn token_set_ignores_repetition_and_order() {
        assert_eq!(token_set_ratio("oak st 12 oak", "12 Oak St"), 100.0);
    }

    #[test]
    fn token_set_matches_abbreviated_street() {
        let score = token_set_ratio("12 Oak Street", "12 oak st.");
        assert!(score >= 75.0, "score = {score}");
    }

    #[test]
    fn token_set_of_different_addresses_is_low() {
        let score = token_set_ratio("12 Oak St", "99 Elm Ave");
        assert!(score < 75.0, "score = {score}");
    }

    #[test]
    fn token_set_with_empty_side_is_zero() {
        assert_eq!(token_set_ratio("", "12 Oak St"), 0.0);
        assert_eq!(token_set_ratio("...", "12 Oak St"), 0.0);
    }
}
