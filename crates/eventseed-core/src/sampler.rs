use crate::error::{SeedError, SeedResult};
use rand::Rng;

/// Relative traffic per hour offset back from midnight. Offset `h` lands at hour
/// `24 - h` of the previous day, so this is the hour-of-day curve (morning and
/// evening peaks) read backwards.
pub const HOUR_OFFSET_WEIGHTS: [u32; 24] = [
    3, 8, 10, 14, 12, 10, 7, 5, 4, 7, 12, 10, 5, 6, 9, 8, 5, 3, 3, 2, 2, 1, 1, 1,
];

/// Returns an index into `weights` with probability proportional to its weight.
pub fn pick_weighted<R: Rng + ?Sized>(weights: &[u32], rng: &mut R) -> SeedResult<usize> {
    let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if total == 0 {
        return Err(SeedError::EmptyWeights);
    }

    let mut remaining = rng.random_range(1..=total) as i128;
    for (idx, weight) in weights.iter().enumerate() {
        remaining -= i128::from(*weight);
        if remaining <= 0 {
            return Ok(idx);
        }
    }

    // Unreachable: the draw never exceeds the weight sum.
    Ok(weights.len() - 1)
}

/// Equal weights for `days` day buckets.
pub fn uniform_weights(days: u32) -> Vec<u32> {
    vec![1; days as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn hour_table_reverses_daily_curve() {
        let mut curve = [
            1, 1, 1, 2, 2, 3, 3, 5, 8, 9, 6, 5, 10, 12, 7, 4, 5, 7, 10, 12, 14, 10, 8, 3,
        ];
        curve.reverse();
        assert_eq!(curve, HOUR_OFFSET_WEIGHTS);
    }

    #[test]
    fn empty_or_zero_weights_are_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            pick_weighted(&[], &mut rng),
            Err(SeedError::EmptyWeights)
        ));
        assert!(matches!(
            pick_weighted(&[0, 0, 0], &mut rng),
            Err(SeedError::EmptyWeights)
        ));
    }

    #[test]
    fn zero_weight_entries_are_never_picked() {
        let mut rng = StdRng::seed_from_u64(7);
        let weights = [0, 3, 0, 1, 0];
        for _ in 0..5_000 {
            let idx = pick_weighted(&weights, &mut rng).expect("pick");
            assert!(weights[idx] > 0, "picked zero-weight index {idx}");
        }
    }

    #[test]
    fn single_positive_weight_always_wins() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(pick_weighted(&[0, 0, 5], &mut rng).expect("pick"), 2);
        }
    }

    #[test]
    fn frequencies_converge_to_weight_share() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [1, 2, 7];
        let trials = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            counts[pick_weighted(&weights, &mut rng).expect("pick")] += 1;
        }

        for (idx, weight) in weights.iter().enumerate() {
            let expected = f64::from(*weight) / 10.0;
            let observed = counts[idx] as f64 / trials as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "index {idx}: expected {expected}, observed {observed}"
            );
        }
    }

    #[test]
    fn uniform_weights_cover_every_day() {
        assert_eq!(uniform_weights(7), vec![1; 7]);
        assert!(uniform_weights(0).is_empty());
    }
}
