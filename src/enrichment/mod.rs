//! Annotation enrichment of differential results and of single samples.
//!
//! ## Available Methods
//!
//! - **ORA** (`ora`): over-representation of up- and downregulated features in
//!   annotation sets, tested with the hypergeometric distribution
//! - **ssGSEA** (`ssgsea`): per-sample rank-based enrichment scores
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use omics_statistics::data::AnnotationTable;
//! use omics_statistics::enrichment::{EnrichmentConfig, run_up_down_regulation_enrichment};
//! # fn demo(result: &omics_statistics::differential::RegulationResult) -> anyhow::Result<()> {
//! let annotations = AnnotationTable::from_pairs(vec![("P1", "GO:0006915"), ("P2", "GO:0006915")]);
//! let enrichment = run_up_down_regulation_enrichment(result, &annotations, &EnrichmentConfig::default())?;
//! for comparison in &enrichment {
//!     println!("{} vs {}: {} records", comparison.group1, comparison.group2, comparison.records.len());
//! }
//! # Ok(())
//! # }
//! ```

mod ora;
mod ssgsea;
pub(crate) mod utils;

pub use ora::{
    ComparisonEnrichment, DEFAULT_SITE_PATTERN, Direction, EnrichmentConfig, EnrichmentRecord,
    PValueColumn, collapse_site_identifiers, run_regulation_enrichment,
    run_site_regulation_enrichment, run_up_down_regulation_enrichment, split_regulated,
};
pub use ssgsea::{SsgseaConfig, SsgseaRecord, run_ssgsea};
