//! Task text similarity
//!
//! Scores measure how much of the query's salient term set a candidate
//! covers. Salient terms are lower-cased alphanumeric tokens longer than
//! one character that are not stop words.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "for", "from", "how", "in", "into",
    "is", "it", "its", "of", "on", "or", "that", "the", "then", "this", "to", "using", "with",
    "write", "create", "make", "function", "program", "script", "code", "which", "should",
    "returns", "return",
];

/// Salient terms of `text`
pub fn salient_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|token| token.to_lowercase())
        .filter(|token| token.chars().count() > 1 && !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Similarity of `candidate` to `query` in [0, 1]
///
/// The score is `(shared + jaccard) / (|query| + 1)`. For a fixed query a
/// candidate sharing more terms never scores lower than one sharing fewer,
/// however many extra terms it carries; among candidates sharing the same
/// number of terms the tighter match wins. Identical term sets score 1.
/// Texts with no salient terms score 0 against everything, themselves
/// included.
pub fn similarity(query: &str, candidate: &str) -> f64 {
    let query = salient_terms(query);
    let candidate = salient_terms(candidate);
    if query.is_empty() || candidate.is_empty() {
        return 0.0;
    }

    let shared = query.intersection(&candidate).count();
    if shared == 0 {
        return 0.0;
    }
    let union = query.union(&candidate).count();
    let jaccard = shared as f64 / union as f64;
    (shared as f64 + jaccard) / (query.len() + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salient_terms_drop_noise() {
        let terms = salient_terms("Write a function that parses the CSV file, then sums column 2");
        assert!(terms.contains("parses"));
        assert!(terms.contains("csv"));
        assert!(terms.contains("column"));
        assert!(!terms.contains("the"));
        assert!(!terms.contains("a"));
        assert!(!terms.contains("2"));
    }

    #[test]
    fn test_identical_tasks_score_one() {
        assert_eq!(similarity("sort a list of numbers", "Sort a LIST of numbers!"), 1.0);
    }

    #[test]
    fn test_unrelated_tasks_score_zero() {
        assert_eq!(similarity("parse json config", "download weather forecast"), 0.0);
    }

    #[test]
    fn test_partial_overlap_is_between_bounds() {
        let a = "fetch a web page and count words";
        let b = "count words in a local file";
        assert!(similarity(a, b) > 0.0 && similarity(a, b) < 1.0);
        assert!(similarity(b, a) > 0.0 && similarity(b, a) < 1.0);
    }

    #[test]
    fn test_extra_terms_never_outweigh_shared_terms() {
        let query = "sort numbers";
        let short = "sort";
        let long = "sort numbers quickly using merge heap tree";
        assert!(similarity(query, long) > similarity(query, short));
    }

    #[test]
    fn test_score_never_drops_as_shared_terms_grow() {
        let query = "parse csv rows into json records";
        let candidates = [
            "parse",
            "parse csv with extra tokio serde regex noise terms",
            "parse csv rows plus lots of unrelated padding words here",
            "parse csv rows into json",
            "parse csv rows into json records",
        ];
        let scores: Vec<f64> = candidates.iter().map(|c| similarity(query, c)).collect();
        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0], "scores not monotonic: {:?}", scores);
        }
    }

    #[test]
    fn test_tighter_match_breaks_ties() {
        let query = "resize png images";
        let tight = "resize png";
        let loose = "resize png files and upload them somewhere remote";
        assert!(similarity(query, tight) > similarity(query, loose));
    }

    #[test]
    fn test_more_shared_terms_rank_higher() {
        let query = "plot sales data with matplotlib";
        let close = "plot sales data";
        let far = "plot temperatures";
        assert!(similarity(query, close) > similarity(query, far));
    }

    #[test]
    fn test_stop_words_only() {
        assert_eq!(similarity("the of and", "the of and"), 0.0);
        assert_eq!(similarity("", "anything"), 0.0);
    }
}
