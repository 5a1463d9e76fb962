//! In-memory tables consumed by every analysis.
//!
//! A [`MeasurementTable`] holds samples as rows and features as columns with `NaN`
//! marking a missing measurement. [`SampleMetadata`] holds the per-sample grouping
//! variables and covariates. Neither is ever mutated by an analysis; every
//! transformation returns a new value.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use ndarray::{Array2, ArrayView1, Axis};
use single_utilities::traits::FloatOps;

use crate::error::AnalysisError;

pub mod align;
pub mod annotation;
pub mod missing;

pub use align::{AlignConfig, AlignedData, MissingPolicy, UnmatchedPolicy, align};
pub use annotation::AnnotationTable;
pub use missing::MissingRecord;

fn check_unique(ids: &[String], kind: &'static str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(AnalysisError::DuplicateIdentifier {
                kind,
                id: id.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Samples × features matrix of measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementTable {
    samples: Vec<String>,
    features: Vec<String>,
    values: Array2<f64>,
}

impl MeasurementTable {
    pub fn new(samples: Vec<String>, features: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != samples.len() || values.ncols() != features.len() {
            return Err(AnalysisError::InvalidInput(format!(
                "value matrix is {}x{} but {} samples and {} features were named",
                values.nrows(),
                values.ncols(),
                samples.len(),
                features.len()
            ))
            .into());
        }
        check_unique(&samples, "sample")?;
        check_unique(&features, "feature")?;
        Ok(MeasurementTable {
            samples,
            features,
            values,
        })
    }

    /// Build a table from row-major sample records. `None` marks a missing value.
    pub fn from_rows<T>(
        samples: Vec<String>,
        features: Vec<String>,
        rows: &[Vec<Option<T>>],
    ) -> Result<Self>
    where
        T: FloatOps,
    {
        let n_features = features.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_features) {
            return Err(AnalysisError::InvalidInput(format!(
                "row {} has {} values, expected {}",
                i,
                row.len(),
                n_features
            ))
            .into());
        }
        let values = Array2::from_shape_fn((rows.len(), n_features), |(i, j)| {
            rows[i][j]
                .and_then(|v| v.to_f64())
                .unwrap_or(f64::NAN)
        });
        Self::new(samples, features, values)
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    pub fn feature_index(&self, feature: &str) -> Option<usize> {
        self.features.iter().position(|f| f == feature)
    }

    pub fn sample_index(&self, sample: &str) -> Option<usize> {
        self.samples.iter().position(|s| s == sample)
    }

    /// Values of one feature across all samples.
    pub fn column(&self, feature_idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(feature_idx)
    }

    /// Values of one sample across all features.
    pub fn row(&self, sample_idx: usize) -> ArrayView1<'_, f64> {
        self.values.row(sample_idx)
    }

    pub fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// New table restricted to the given sample rows, in the given order.
    pub fn select_samples(&self, indices: &[usize]) -> MeasurementTable {
        MeasurementTable {
            samples: indices.iter().map(|&i| self.samples[i].clone()).collect(),
            features: self.features.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }

    /// New table restricted to the given feature columns, in the given order.
    pub fn select_features(&self, indices: &[usize]) -> MeasurementTable {
        MeasurementTable {
            samples: self.samples.clone(),
            features: indices.iter().map(|&j| self.features[j].clone()).collect(),
            values: self.values.select(Axis(1), indices),
        }
    }

    /// New table without the named features. Names that are not features are ignored.
    pub fn drop_features(&self, names: &[String]) -> MeasurementTable {
        let keep: Vec<usize> = (0..self.n_features())
            .filter(|&j| !names.contains(&self.features[j]))
            .collect();
        self.select_features(&keep)
    }

    /// Same identifiers, new values.
    pub fn with_values(&self, values: Array2<f64>) -> Result<MeasurementTable> {
        if values.dim() != self.values.dim() {
            return Err(AnalysisError::InvalidInput(format!(
                "replacement values are {:?}, table is {:?}",
                values.dim(),
                self.values.dim()
            ))
            .into());
        }
        Ok(MeasurementTable {
            samples: self.samples.clone(),
            features: self.features.clone(),
            values,
        })
    }
}

/// One metadata variable.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataColumn {
    Categorical(Vec<Option<String>>),
    Numeric(Vec<f64>),
}

impl MetadataColumn {
    pub fn len(&self) -> usize {
        match self {
            MetadataColumn::Categorical(v) => v.len(),
            MetadataColumn::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, idx: usize) -> bool {
        match self {
            MetadataColumn::Categorical(v) => v[idx].is_none(),
            MetadataColumn::Numeric(v) => v[idx].is_nan(),
        }
    }

    /// Label of a row; numeric values are rendered with `Display`.
    pub fn label(&self, idx: usize) -> Option<String> {
        match self {
            MetadataColumn::Categorical(v) => v[idx].clone(),
            MetadataColumn::Numeric(v) => {
                let x = v[idx];
                if x.is_nan() { None } else { Some(x.to_string()) }
            }
        }
    }

    /// Regressor columns of this variable. Numeric columns are used as is; categorical
    /// columns become treatment-coded dummies with the first sorted level as
    /// reference. Missing entries are `NaN`.
    pub fn design_columns(&self) -> Vec<Vec<f64>> {
        match self {
            MetadataColumn::Numeric(values) => vec![values.clone()],
            MetadataColumn::Categorical(values) => {
                let levels: BTreeSet<&String> = values.iter().flatten().collect();
                levels
                    .into_iter()
                    .skip(1)
                    .map(|level| {
                        values
                            .iter()
                            .map(|v| match v {
                                Some(v) if v == level => 1.0,
                                Some(_) => 0.0,
                                None => f64::NAN,
                            })
                            .collect()
                    })
                    .collect()
            }
        }
    }

    fn select(&self, indices: &[usize]) -> MetadataColumn {
        match self {
            MetadataColumn::Categorical(v) => {
                MetadataColumn::Categorical(indices.iter().map(|&i| v[i].clone()).collect())
            }
            MetadataColumn::Numeric(v) => {
                MetadataColumn::Numeric(indices.iter().map(|&i| v[i]).collect())
            }
        }
    }
}

/// Per-sample covariates and grouping variables, keyed by sample identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMetadata {
    samples: Vec<String>,
    columns: Vec<(String, MetadataColumn)>,
}

impl SampleMetadata {
    pub fn new(samples: Vec<String>) -> Result<Self> {
        check_unique(&samples, "sample")?;
        Ok(SampleMetadata {
            samples,
            columns: Vec::new(),
        })
    }

    /// Add a column; replaces an existing column of the same name.
    pub fn with_column(mut self, name: &str, column: MetadataColumn) -> Result<Self> {
        if column.len() != self.samples.len() {
            return Err(AnalysisError::InvalidInput(format!(
                "metadata column '{}' has {} values for {} samples",
                name,
                column.len(),
                self.samples.len()
            ))
            .into());
        }
        self.columns.retain(|(n, _)| n != name);
        self.columns.push((name.to_string(), column));
        Ok(self)
    }

    pub fn with_categorical(self, name: &str, values: &[&str]) -> Result<Self> {
        let column = MetadataColumn::Categorical(
            values
                .iter()
                .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
                .collect(),
        );
        self.with_column(name, column)
    }

    pub fn with_numeric(self, name: &str, values: &[f64]) -> Result<Self> {
        self.with_column(name, MetadataColumn::Numeric(values.to_vec()))
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&MetadataColumn> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Like [`SampleMetadata::get`] but fails with `MissingColumn`.
    pub fn require(&self, name: &str) -> Result<&MetadataColumn> {
        self.get(name)
            .ok_or_else(|| AnalysisError::MissingColumn(name.to_string()).into())
    }

    /// Labels of a column as strings; missing entries are `None`.
    pub fn labels(&self, name: &str) -> Result<Vec<Option<String>>> {
        let column = self.require(name)?;
        Ok((0..column.len()).map(|i| column.label(i)).collect())
    }

    pub fn drop_columns(&self, names: &[String]) -> SampleMetadata {
        SampleMetadata {
            samples: self.samples.clone(),
            columns: self
                .columns
                .iter()
                .filter(|(n, _)| !names.contains(n))
                .cloned()
                .collect(),
        }
    }

    pub fn select_samples(&self, indices: &[usize]) -> SampleMetadata {
        SampleMetadata {
            samples: indices.iter().map(|&i| self.samples[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(n, c)| (n.clone(), c.select(indices)))
                .collect(),
        }
    }
}
