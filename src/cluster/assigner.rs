use std::cmp::Ordering;

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::linalg::cosine_similarity;
use crate::{AppError, AppResult};

/// Thresholds steering multi-cluster assignment.
///
/// Every knob is a parameter so recalibration never needs a code change.
/// Rank 1 is unconditional. Rank 2 requires either a score within
/// `gap_threshold_fraction` of the best score or a score of at least
/// `rank2_absolute_threshold`. Rank 3 and beyond are threshold-only against
/// `rank3_absolute_threshold`. `max_ranks` caps the result length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignerConfig {
    pub gap_threshold_fraction: f64,
    pub rank2_absolute_threshold: f64,
    pub rank3_absolute_threshold: f64,
    pub max_ranks: usize,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        AssignerConfig {
            gap_threshold_fraction: 0.10,
            rank2_absolute_threshold: 0.35,
            rank3_absolute_threshold: 0.30,
            max_ranks: 3,
        }
    }
}

impl AssignerConfig {
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("gap_threshold_fraction", self.gap_threshold_fraction),
            ("rank2_absolute_threshold", self.rank2_absolute_threshold),
            ("rank3_absolute_threshold", self.rank3_absolute_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::InvalidConfiguration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.max_ranks == 0 {
            return Err(AppError::InvalidConfiguration(
                "max_ranks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One cluster membership for a dicho: rank 1 is the strongest match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedAssignment {
    pub cluster_id: i64,
    pub rank: u8,
    pub score: f64,
}

/// Rank a dicho's embedding against every cluster representative.
///
/// Returns between 1 and `max_ranks` assignments with strictly increasing
/// ranks and non-increasing scores. Pure: persistence is the caller's job.
pub fn rank_clusters(
    item_embedding: ArrayView1<f64>,
    cluster_embeddings: &[(i64, Array1<f64>)],
    config: &AssignerConfig,
) -> AppResult<Vec<RankedAssignment>> {
    config.validate()?;
    if cluster_embeddings.is_empty() {
        return Err(AppError::InvalidConfiguration(
            "no cluster embeddings supplied".to_string(),
        ));
    }

    let mut scored: Vec<(i64, f64)> = Vec::with_capacity(cluster_embeddings.len());
    for (cluster_id, embedding) in cluster_embeddings {
        let score = cosine_similarity(item_embedding, embedding.view())?;
        scored.push((*cluster_id, score));
    }

    // Descending by score, ascending cluster id on ties so reprocessing an
    // unchanged corpus reproduces the exact same assignment order.
    scored.sort_by(|(id_a, score_a), (id_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then(id_a.cmp(id_b))
    });

    Ok(select_ranked(&scored, config))
}

/// Threshold selection over already-sorted `(cluster_id, score)` pairs.
fn select_ranked(scored: &[(i64, f64)], config: &AssignerConfig) -> Vec<RankedAssignment> {
    let (best_cluster, best_score) = scored[0];
    let mut assignments = vec![RankedAssignment {
        cluster_id: best_cluster,
        rank: 1,
        score: best_score,
    }];

    for &(cluster_id, score) in scored.iter().skip(1) {
        if assignments.len() >= config.max_ranks {
            break;
        }
        let rank = assignments.len() + 1;
        let qualifies = if rank == 2 {
            let gap = best_score - score;
            gap <= config.gap_threshold_fraction * best_score
                || score >= config.rank2_absolute_threshold
        } else {
            score >= config.rank3_absolute_threshold
        };
        if !qualifies {
            break;
        }
        assignments.push(RankedAssignment {
            cluster_id,
            rank: rank as u8,
            score,
        });
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn axis(dim: usize, i: usize) -> Array1<f64> {
        let mut v = Array1::<f64>::zeros(dim);
        v[i] = 1.0;
        v
    }

    fn assert_invariants(assignments: &[RankedAssignment]) {
        assert!(!assignments.is_empty());
        assert!(assignments.len() <= 3);
        for (i, a) in assignments.iter().enumerate() {
            assert_eq!(a.rank as usize, i + 1);
            if i > 0 {
                assert!(assignments[i - 1].score >= a.score);
            }
        }
    }

    #[test]
    fn exact_match_scores_one_and_stands_alone() {
        let item = axis(3, 0);
        let clusters = vec![(1_i64, axis(3, 0)), (2, axis(3, 1)), (3, axis(3, 2))];
        let out = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap();
        assert_invariants(&out);
        // Orthogonal runners-up score 0.0: outside the 10% gap and below 0.35.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cluster_id, 1);
        assert!((out[0].score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn near_duplicate_cluster_takes_rank_two() {
        // Second cluster at cosine ~0.92 against the item: within 10% of 1.0.
        let item = arr1(&[1.0, 0.0]);
        let near = arr1(&[0.92, (1.0_f64 - 0.92 * 0.92).sqrt()]);
        let clusters = vec![(1_i64, item.clone()), (2, near)];
        let out = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap();
        assert_invariants(&out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].cluster_id, 2);
        assert!(out[1].score > 0.90);
    }

    #[test]
    fn weak_single_cluster_still_gets_rank_one() {
        let item = arr1(&[1.0, 0.0]);
        let weak = arr1(&[0.20, (1.0_f64 - 0.20 * 0.20).sqrt()]);
        let clusters = vec![(7_i64, weak)];
        let out = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].cluster_id, 7);
        assert_eq!(out[0].rank, 1);
    }

    #[test]
    fn ties_break_by_cluster_id_and_all_three_qualify() {
        // Scores 0.50, 0.50, 0.49: rank 1 and 2 tie-broken by id, gap = 0
        // admits rank 2, and 0.49 >= 0.30 admits rank 3.
        let cfg = AssignerConfig::default();
        let out = select_ranked(&[(4, 0.50), (2, 0.50), (9, 0.49)], &cfg);
        assert_eq!(
            out.iter().map(|a| a.cluster_id).collect::<Vec<_>>(),
            vec![2, 4, 9]
        );
        assert_eq!(out[2].rank, 3);
    }

    #[test]
    fn tie_break_is_deterministic_through_the_public_api() {
        let item = arr1(&[1.0, 0.0, 0.0]);
        let same = arr1(&[0.5, 0.5, (0.5_f64).sqrt()]);
        let clusters = vec![(12_i64, same.clone()), (3, same.clone()), (8, same)];
        let first = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap();
        let second = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|a| a.cluster_id).collect::<Vec<_>>(),
            vec![3, 8, 12]
        );
    }

    #[test]
    fn rank_two_boundaries_are_inclusive() {
        let cfg = AssignerConfig::default();

        // Exactly at the absolute threshold: 0.35 qualifies.
        let out = select_ranked(&[(1, 0.80), (2, 0.35)], &cfg);
        assert_eq!(out.len(), 2);

        // Exactly at the gap boundary: 0.50 - 0.45 == 0.10 * 0.50.
        let out = select_ranked(&[(1, 0.50), (2, 0.45)], &cfg);
        assert_eq!(out.len(), 2);

        // Just past both: neither gap nor absolute threshold holds.
        let out = select_ranked(&[(1, 0.80), (2, 0.3499)], &cfg);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn rank_three_is_threshold_only() {
        let cfg = AssignerConfig::default();

        // 0.30 exactly qualifies for rank 3.
        let out = select_ranked(&[(1, 0.60), (2, 0.55), (3, 0.30)], &cfg);
        assert_eq!(out.len(), 3);

        // Below it does not, however close to rank 2 the score sits.
        let out = select_ranked(&[(1, 0.60), (2, 0.55), (3, 0.2999)], &cfg);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn rank_three_requires_rank_two() {
        // Candidate 2 fails both rank-2 rules; candidate 3 would clear the
        // rank-3 threshold but must never be reached.
        let cfg = AssignerConfig {
            rank3_absolute_threshold: 0.0,
            ..AssignerConfig::default()
        };
        let out = select_ranked(&[(1, 0.90), (2, 0.20), (3, 0.19)], &cfg);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn raising_rank2_threshold_never_adds_assignments() {
        let scored = [(1_i64, 0.80), (2, 0.40), (3, 0.36)];
        let mut last_len = usize::MAX;
        for threshold in [0.0, 0.35, 0.39, 0.41, 0.85] {
            let cfg = AssignerConfig {
                gap_threshold_fraction: 0.0,
                rank2_absolute_threshold: threshold,
                ..AssignerConfig::default()
            };
            let len = select_ranked(&scored, &cfg).len();
            assert!(len <= last_len, "threshold {} grew the result", threshold);
            last_len = len;
        }
    }

    #[test]
    fn result_is_capped_at_max_ranks() {
        let scored = [(1_i64, 0.9), (2, 0.89), (3, 0.88), (4, 0.87), (5, 0.86)];
        let out = select_ranked(&scored, &AssignerConfig::default());
        assert_eq!(out.len(), 3);

        let cfg = AssignerConfig {
            max_ranks: 2,
            ..AssignerConfig::default()
        };
        let out = select_ranked(&scored, &cfg);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn empty_cluster_set_is_invalid_configuration() {
        let item = arr1(&[1.0, 0.0]);
        let err = rank_clusters(item.view(), &[], &AssignerConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfiguration(_)));
    }

    #[test]
    fn nonsensical_thresholds_are_invalid_configuration() {
        let item = arr1(&[1.0, 0.0]);
        let clusters = vec![(1_i64, arr1(&[1.0, 0.0]))];
        for cfg in [
            AssignerConfig {
                gap_threshold_fraction: -0.1,
                ..AssignerConfig::default()
            },
            AssignerConfig {
                rank2_absolute_threshold: 1.5,
                ..AssignerConfig::default()
            },
            AssignerConfig {
                rank3_absolute_threshold: -1.0,
                ..AssignerConfig::default()
            },
            AssignerConfig {
                max_ranks: 0,
                ..AssignerConfig::default()
            },
        ] {
            let err = rank_clusters(item.view(), &clusters, &cfg).unwrap_err();
            assert!(matches!(err, AppError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn mismatched_cluster_dimension_is_rejected() {
        let item = arr1(&[1.0, 0.0, 0.0]);
        let clusters = vec![(1_i64, axis(3, 0)), (2, arr1(&[1.0, 0.0]))];
        let err = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));
    }

    #[test]
    fn zero_magnitude_cluster_is_rejected() {
        let item = arr1(&[1.0, 0.0]);
        let clusters = vec![(1_i64, arr1(&[0.0, 0.0]))];
        let err = rank_clusters(item.view(), &clusters, &AssignerConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::DegenerateVector(_)));
    }
}
