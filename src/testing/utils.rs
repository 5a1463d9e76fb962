use itertools::Itertools;
use ndarray::ArrayView1;

/// Sorted distinct group labels.
pub fn extract_unique_groups<T>(group_ids: &[T]) -> Vec<T>
where
    T: Ord + Clone,
{
    let mut unique_groups = group_ids.to_vec();
    unique_groups.sort();
    unique_groups.dedup();
    unique_groups
}

/// Sorted distinct non-missing labels.
pub fn extract_levels(labels: &[Option<String>]) -> Vec<String> {
    let present: Vec<String> = labels.iter().flatten().cloned().collect();
    extract_unique_groups(&present)
}

/// Row indices for each level, in level order.
pub fn get_group_indices(labels: &[Option<String>], levels: &[String]) -> Vec<Vec<usize>> {
    levels
        .iter()
        .map(|level| {
            labels
                .iter()
                .enumerate()
                .filter_map(|(i, l)| if l.as_ref() == Some(level) { Some(i) } else { None })
                .collect()
        })
        .collect()
}

/// Every unordered pair of level positions, `(i, j)` with `i < j`, in lexicographic
/// order of the (already sorted) levels.
pub fn enumerate_pairs(n_levels: usize) -> Vec<(usize, usize)> {
    (0..n_levels).tuple_combinations().collect()
}

/// Non-missing values of `column` at `indices`.
pub fn observed_values(column: ArrayView1<'_, f64>, indices: &[usize]) -> Vec<f64> {
    indices
        .iter()
        .map(|&i| column[i])
        .filter(|v| !v.is_nan())
        .collect()
}

/// Sample mean and standard deviation (n - 1 denominator). NaN when undefined.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1) as f64).sqrt())
}

/// Median of the non-NaN values; NaN when there are none.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Average ranks (1-based) with ties sharing the mean of their positions.
/// Also returns Σ(t³ - t) over tie groups, used by tie corrections.
pub fn average_ranks(values: &[f64]) -> (Vec<f64>, f64) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j + 1) as f64 / 2.0;
        for &k in &order[i..j] {
            ranks[k] = rank;
        }
        let t = (j - i) as f64;
        tie_term += t * t * t - t;
        i = j;
    }
    (ranks, tie_term)
}
