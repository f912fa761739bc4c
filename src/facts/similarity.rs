//! Fact similarity strategies
//!
//! Dedup during ingestion needs a "are these the same fact?" answer. The
//! matcher is pluggable: `SubstringSlice` reproduces the legacy behavior of
//! comparing a fixed slice of the candidate against stored text, while
//! `TokenOverlap` matches on shared vocabulary and is the better default for
//! new deployments.

use std::collections::HashSet;

/// Trait for candidate-vs-stored fact matching
pub trait SimilarityStrategy: Send + Sync {
    fn is_match(&self, candidate: &str, existing: &str) -> bool;
}

/// Case-sensitive containment of a fixed character slice of the candidate.
pub struct SubstringSlice {
    pub start: usize,
    pub len: usize,
}

impl SubstringSlice {
    pub fn new() -> Self {
        Self { start: 5, len: 10 }
    }
}

impl Default for SubstringSlice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityStrategy for SubstringSlice {
    fn is_match(&self, candidate: &str, existing: &str) -> bool {
        let slice: String = candidate.chars().skip(self.start).take(self.len).collect();

        // Short candidates produce an empty slice, which would match every
        // stored fact. Compare the whole candidate instead.
        if slice.is_empty() {
            return existing.contains(candidate);
        }

        existing.contains(&slice)
    }
}

/// Jaccard overlap of lowercase word sets.
pub struct TokenOverlap {
    pub threshold: f64,
}

impl TokenOverlap {
    pub fn new() -> Self {
        Self { threshold: 0.5 }
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl Default for TokenOverlap {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityStrategy for TokenOverlap {
    fn is_match(&self, candidate: &str, existing: &str) -> bool {
        let a = Self::tokens(candidate);
        let b = Self::tokens(existing);

        if a.is_empty() || b.is_empty() {
            return false;
        }

        let intersection = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;

        intersection / union >= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_slice_matches_shared_middle() {
        let strategy = SubstringSlice::new();
        // chars 5..15 of the candidate: "ite color "
        assert!(strategy.is_match(
            "Favorite color is blue",
            "The user's favorite color is blue, probably"
        ));
        assert!(!strategy.is_match("Favorite color is blue", "Owns three cats"));
    }

    #[test]
    fn test_substring_slice_is_case_sensitive() {
        let strategy = SubstringSlice::new();
        assert!(!strategy.is_match("Favorite color is blue", "FAVORITE COLOR IS BLUE"));
    }

    #[test]
    fn test_substring_slice_short_candidate() {
        let strategy = SubstringSlice::new();
        assert!(strategy.is_match("Hi", "Hi there, says the user"));
        assert!(!strategy.is_match("Hi", "Owns three cats"));
    }

    #[test]
    fn test_substring_slice_multibyte_text_does_not_panic() {
        let strategy = SubstringSlice::new();
        // Char-based slicing; byte offsets would split the é here.
        assert!(strategy.is_match("Préfère le café noir", "Il préfère le café noir"));
    }

    #[test]
    fn test_token_overlap() {
        let strategy = TokenOverlap::new();
        assert!(strategy.is_match("likes black coffee", "Likes black coffee a lot"));
        assert!(!strategy.is_match("likes black coffee", "plays chess on weekends"));
    }

    #[test]
    fn test_token_overlap_empty_text_never_matches() {
        let strategy = TokenOverlap::new();
        assert!(!strategy.is_match("", "plays chess"));
        assert!(!strategy.is_match("plays chess", "   "));
    }
}
