use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::error::AnalysisError;

/// Long-format feature → annotation membership, deduplicated.
///
/// Pairs are stored sorted by (annotation, feature) so that iteration order never
/// depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTable {
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl AnnotationTable {
    /// From (feature, annotation) pairs. Duplicate pairs collapse.
    pub fn from_pairs<I, F, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (F, A)>,
        F: Into<String>,
        A: Into<String>,
    {
        let mut sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (feature, annotation) in pairs {
            sets.entry(annotation.into())
                .or_default()
                .insert(feature.into());
        }
        AnnotationTable { sets }
    }

    /// From the one-row-per-feature shape returned by annotation services, where a
    /// field holds several annotations joined by `delimiter` (e.g. `"GO:1;GO:2"`).
    pub fn from_multivalued<I, F, V>(rows: I, delimiter: &str) -> Result<Self>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: AsRef<str>,
    {
        if delimiter.is_empty() {
            return Err(AnalysisError::InvalidConfig("annotation delimiter cannot be empty".into()).into());
        }
        let mut pairs = Vec::new();
        for (feature, field) in rows {
            let feature = feature.into();
            for term in field.as_ref().split(delimiter) {
                let term = term.trim();
                if !term.is_empty() {
                    pairs.push((feature.clone(), term.to_string()));
                }
            }
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn n_annotations(&self) -> usize {
        self.sets.len()
    }

    pub fn n_pairs(&self) -> usize {
        self.sets.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Annotations with their member features, sorted by annotation id.
    pub fn sets(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.sets.iter().map(|(a, f)| (a.as_str(), f))
    }

    pub fn members(&self, annotation: &str) -> Option<&BTreeSet<String>> {
        self.sets.get(annotation)
    }

    /// All (feature, annotation) pairs in (annotation, feature) order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sets
            .iter()
            .flat_map(|(a, fs)| fs.iter().map(move |f| (f.as_str(), a.as_str())))
    }
}
