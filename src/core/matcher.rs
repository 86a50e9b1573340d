use crate::core::recognizer::cosine_similarity;
use crate::storage::Identity;

/// Best candidate for a query embedding. The matcher never applies a
/// threshold; callers decide whether `score` is good enough.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: Option<String>,
    pub score: f32,
}

impl MatchResult {
    pub fn none() -> Self {
        Self { name: None, score: -1.0 }
    }

    /// Name of the match when `score` reaches `threshold`.
    pub fn accepted(&self, threshold: f32) -> Option<&str> {
        if self.score >= threshold {
            self.name.as_deref()
        } else {
            None
        }
    }
}

/// Cosine similarity against every identity; the first maximal score wins.
pub fn best_match(query: &[f32], identities: &[Identity]) -> MatchResult {
    let mut best = MatchResult::none();

    for identity in identities {
        let score = cosine_similarity(query, &identity.centroid);
        if best.name.is_none() || score > best.score {
            best = MatchResult {
                name: Some(identity.name.clone()),
                score,
            };
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, centroid: Vec<f32>) -> Identity {
        Identity { name: name.to_string(), centroid }
    }

    #[test]
    fn test_empty_identities_score_minus_one() {
        let result = best_match(&[0.1, 0.2, 0.3], &[]);
        assert_eq!(result.name, None);
        assert_eq!(result.score, -1.0);
        assert_eq!(result.accepted(0.88), None);
    }

    #[test]
    fn test_identical_query_is_accepted() {
        let identities = vec![
            identity("Grace Hopper", vec![0.9, -0.2, 0.1]),
            identity("Ada Lovelace", vec![0.3, 0.4, 0.5]),
        ];
        let result = best_match(&[0.3, 0.4, 0.5], &identities);
        assert_eq!(result.name.as_deref(), Some("Ada Lovelace"));
        assert!((result.score - 1.0).abs() < 1e-5);
        assert_eq!(result.accepted(0.88), Some("Ada Lovelace"));
    }

    #[test]
    fn test_first_maximal_score_wins_ties() {
        let identities = vec![
            identity("First", vec![1.0, 0.0]),
            identity("Second", vec![2.0, 0.0]),
        ];
        let result = best_match(&[1.0, 0.0], &identities);
        assert_eq!(result.name.as_deref(), Some("First"));
    }

    #[test]
    fn test_best_candidate_reported_below_threshold() {
        let identities = vec![identity("Ada Lovelace", vec![1.0, 0.0])];
        let result = best_match(&[1.0, 1.0], &identities);
        assert_eq!(result.name.as_deref(), Some("Ada Lovelace"));
        assert!((result.score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert_eq!(result.accepted(0.88), None);
    }

    #[test]
    fn test_opposite_vector_still_reported() {
        let identities = vec![identity("Opposite", vec![-1.0, 0.0])];
        let result = best_match(&[1.0, 0.0], &identities);
        assert_eq!(result.name.as_deref(), Some("Opposite"));
        assert!((result.score + 1.0).abs() < 1e-6);
    }
}
