use std::collections::HashMap;

use single_utilities::traits::FloatOps;

use crate::data::AnnotationTable;

/// Annotation sets as index lists into a feature vector.
///
/// Members of set `j` are `connectivity[starts[j]..starts[j] + offsets[j]]`, sorted
/// ascending. Members absent from the feature vector are left out.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FeatureSets {
    pub names: Vec<String>,
    pub connectivity: Vec<usize>,
    pub starts: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl FeatureSets {
    pub fn new(annotations: &AnnotationTable, features: &[String]) -> Self {
        let index: HashMap<&str, usize> = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();

        let mut sets = FeatureSets {
            names: Vec::with_capacity(annotations.n_annotations()),
            connectivity: Vec::new(),
            starts: Vec::with_capacity(annotations.n_annotations()),
            offsets: Vec::with_capacity(annotations.n_annotations()),
        };
        for (name, members) in annotations.sets() {
            let mut idx: Vec<usize> = members
                .iter()
                .filter_map(|m| index.get(m.as_str()).copied())
                .collect();
            idx.sort_unstable();
            sets.names.push(name.to_string());
            sets.starts.push(sets.connectivity.len());
            sets.offsets.push(idx.len());
            sets.connectivity.extend(idx);
        }
        sets
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn getset(&self, j: usize) -> &[usize] {
        let srt = self.starts[j];
        &self.connectivity[srt..srt + self.offsets[j]]
    }
}

/// Descending order ranks (1 = largest); ties keep their input order.
pub(crate) fn rank_data<T>(values: &[T]) -> Vec<usize>
where
    T: FloatOps,
{
    let mut indexed_values: Vec<(usize, T)> = values.iter().copied().enumerate().collect();

    indexed_values.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0; values.len()];
    for (rank, (original_idx, _)) in indexed_values.iter().enumerate() {
        ranks[*original_idx] = rank + 1;
    }
    ranks
}

/// Minimum number of samples handed to one rayon task.
pub(crate) fn compute_chunk_size(n_samples: usize, n_features: usize) -> usize {
    let n_cores = rayon::current_num_threads().max(1);

    let base_chunk_size = if n_features > 20000 {
        4
    } else if n_features > 5000 {
        16
    } else {
        64
    };

    let max_chunk_size = n_samples.div_ceil(n_cores);
    base_chunk_size.min(max_chunk_size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_sets_index_members() {
        let annotations = AnnotationTable::from_pairs(vec![
            ("P3", "GO:1"),
            ("P1", "GO:1"),
            ("X9", "GO:1"),
            ("P2", "GO:2"),
        ]);
        let features: Vec<String> = ["P1", "P2", "P3"].iter().map(|s| s.to_string()).collect();
        let sets = FeatureSets::new(&annotations, &features);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets.names, vec!["GO:1", "GO:2"]);
        assert_eq!(sets.getset(0), &[0, 2]);
        assert_eq!(sets.getset(1), &[1]);
    }

    #[test]
    fn test_rank_data_descending() {
        assert_eq!(rank_data(&[0.5, 3.0, 1.0, 3.0]), vec![4, 1, 3, 2]);
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert_eq!(compute_chunk_size(0, 10), 1);
        assert!(compute_chunk_size(1000, 30000) <= 4);
    }
}
