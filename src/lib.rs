//! # omics-statistics
//!
//! Statistical analysis of omics measurement tables (proteomics, metabolomics,
//! transcriptomics): samples as rows, features as columns.
//!
//! This crate covers the path from a wide measurement table to enriched annotation
//! categories: align the table with sample metadata, compare groups feature by
//! feature, correct for multiple testing, and test the regulated features for
//! over-representation in annotation sets. Every operation is a pure function over
//! in-memory tables and returns a fully materialized result.
//!
//! ## Core Features
//!
//! - **Differential Regulation**: t-tests, Mann-Whitney U, paired tests, one-way and
//!   repeated-measures ANOVA, Kruskal-Wallis, Friedman and ANCOVA
//! - **Multiple Testing Correction**: FDR (Benjamini-Hochberg/Yekutieli), Bonferroni,
//!   Holm and others, plus permutation-based FDR
//! - **Enrichment**: up/down over-representation and single-sample ssGSEA
//! - **Normalization**: median, z-score, quantile, min-max, median polish and ComBat
//! - **Exploration**: PCA, UMAP and coefficients of variation
//! - **Correlation**: Pearson, Spearman and repeated-measures correlation between
//!   features
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omics_statistics::data::{AlignConfig, MeasurementTable, SampleMetadata, align};
//! use omics_statistics::differential::{DifferentialConfig, run_differential};
//! use ndarray::array;
//!
//! # fn main() -> anyhow::Result<()> {
//! let samples: Vec<String> = ["s1", "s2", "s3", "s4"].iter().map(|s| s.to_string()).collect();
//! let table = MeasurementTable::new(
//!     samples.clone(),
//!     vec!["P12345".to_string()],
//!     array![[1.4], [2.2], [5.3], [4.2]],
//! )?;
//! let metadata = SampleMetadata::new(samples)?.with_categorical("group", &["A", "A", "B", "B"])?;
//! let aligned = align(&table, &metadata, &AlignConfig::default())?;
//!
//! let result = run_differential(&aligned, &DifferentialConfig::new("group"))?;
//! for record in &result.comparisons {
//!     println!("{} {} vs {}: p = {:.4}", record.feature, record.group1, record.group2, record.pvalue);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`data`]**: measurement tables, sample metadata, alignment, missing-value
//!   summaries and annotation tables
//! - **[`testing`]**: statistical tests, effect sizes and multiple testing correction
//! - **[`differential`]**: per-feature group comparisons
//! - **[`enrichment`]**: over-representation analysis and ssGSEA
//! - **[`normalization`]**: table normalization and batch correction
//! - **[`exploratory`]**: dimensionality reduction and variation summaries
//! - **[`correlation`]**: feature-feature correlation matrices and pair tables
//! - **[`error`]**: the error taxonomy carried by every failure

pub mod correlation;
pub mod data;
pub mod differential;
pub mod enrichment;
pub mod error;
pub mod exploratory;
pub mod normalization;
pub mod testing;

pub use error::AnalysisError;
