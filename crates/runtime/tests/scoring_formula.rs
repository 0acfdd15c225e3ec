//! Scoring formula coverage for spec §8 invariant 8: for any rubric JSON
//! with in-range integers, `total` equals the weighted sum from §4.8 and
//! `PASS` iff `total / MAX >= 0.9`.

use factcheck_runtime::types::RubricScore;
use proptest::prelude::*;

fn score_1_to_5() -> impl Strategy<Value = u8> {
    1u8..=5
}

proptest! {
    #[test]
    fn total_matches_weighted_sum(
        coverage in score_1_to_5(),
        accuracy in score_1_to_5(),
        citation_quality in score_1_to_5(),
        style in score_1_to_5(),
        prioritization in score_1_to_5(),
        completeness in score_1_to_5(),
        density in proptest::option::of(score_1_to_5()),
    ) {
        let score = RubricScore {
            coverage,
            accuracy,
            citation_quality,
            style,
            prioritization,
            completeness,
            information_density: density,
        };

        let expected = 3 * coverage as u32
            + 2 * accuracy as u32
            + 2 * citation_quality as u32
            + style as u32
            + prioritization as u32
            + completeness as u32
            + density.map(|d| d as u32).unwrap_or(0);

        prop_assert_eq!(score.total(), expected);

        let expected_max = if density.is_some() { 65 } else { 55 };
        prop_assert_eq!(score.max_total(), expected_max);

        let expected_pass = (expected as f64 / expected_max as f64) >= 0.9;
        prop_assert_eq!(score.passes(), expected_pass);
    }
}

#[test]
fn all_fives_without_density_passes_at_threshold() {
    let score = RubricScore {
        coverage: 5,
        accuracy: 5,
        citation_quality: 5,
        style: 5,
        prioritization: 5,
        completeness: 5,
        information_density: None,
    };
    assert_eq!(score.total(), 50);
    assert_eq!(score.max_total(), 55);
    assert!(score.passes());
}

#[test]
fn borderline_score_fails_just_under_threshold() {
    // 48/55 = 0.8727... < 0.9
    let score = RubricScore {
        coverage: 5,
        accuracy: 5,
        citation_quality: 4,
        style: 5,
        prioritization: 5,
        completeness: 5,
        information_density: None,
    };
    assert_eq!(score.total(), 48);
    assert!(!score.passes());
}
