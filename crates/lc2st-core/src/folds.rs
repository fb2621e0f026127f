//! Seeded k-fold partitioning.

use lc2st_error::{Lc2stError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Train/held-out index split for one fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSplit {
    pub fold: usize,
    pub train: Vec<usize>,
    pub held_out: Vec<usize>,
}

/// Partition `0..n` into `k` disjoint held-out folds after a seeded shuffle.
///
/// The first `n % k` folds receive one extra index, so every fold size is
/// `floor(n / k)` or `ceil(n / k)`.
pub fn kfold_splits(n: usize, k: usize, seed: u64) -> Result<Vec<FoldSplit>> {
    if k < 2 {
        return Err(Lc2stError::config(format!("n_folds must be >= 2, got {k}")));
    }
    if k > n {
        return Err(Lc2stError::config(format!(
            "n_folds ({k}) exceeds the number of samples ({n})"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let base = n / k;
    let extra = n % k;
    let mut bounds = Vec::with_capacity(k + 1);
    bounds.push(0);
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        bounds.push(bounds[fold] + size);
    }

    Ok((0..k)
        .map(|fold| {
            let (start, end) = (bounds[fold], bounds[fold + 1]);
            let mut held_out = order[start..end].to_vec();
            let mut train: Vec<usize> =
                order[..start].iter().chain(&order[end..]).copied().collect();
            held_out.sort_unstable();
            train.sort_unstable();
            FoldSplit {
                fold,
                train,
                held_out,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_bad_fold_counts() {
        assert!(matches!(kfold_splits(10, 1, 0), Err(Lc2stError::Configuration(_))));
        assert!(matches!(kfold_splits(3, 4, 0), Err(Lc2stError::Configuration(_))));
    }

    #[test]
    fn same_seed_same_partition() {
        assert_eq!(kfold_splits(50, 5, 9).unwrap(), kfold_splits(50, 5, 9).unwrap());
        assert_ne!(kfold_splits(50, 5, 9).unwrap(), kfold_splits(50, 5, 10).unwrap());
    }

    proptest! {
        #[test]
        fn folds_partition_indices(n in 2usize..300, k in 2usize..12, seed in any::<u64>()) {
            prop_assume!(k <= n);
            let splits = kfold_splits(n, k, seed).unwrap();
            prop_assert_eq!(splits.len(), k);

            let mut seen = vec![false; n];
            for split in &splits {
                let size = split.held_out.len();
                prop_assert!(size == n / k || size == n.div_ceil(k));
                prop_assert_eq!(split.train.len() + size, n);
                for &i in &split.held_out {
                    prop_assert!(!seen[i], "index {} held out twice", i);
                    seen[i] = true;
                    prop_assert!(split.train.binary_search(&i).is_err());
                }
            }
            prop_assert!(seen.iter().all(|&s| s));
        }
    }
}
