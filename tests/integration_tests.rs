use approx::assert_relative_eq;
use ndarray::Array2;
use omics_statistics::AnalysisError;
use omics_statistics::data::{AlignConfig, AlignedData, AnnotationTable, MeasurementTable, SampleMetadata, align};
use omics_statistics::differential::{DifferentialConfig, RegulationResult, run_differential};
use omics_statistics::enrichment::{
    DEFAULT_SITE_PATTERN, Direction, EnrichmentConfig, PValueColumn, SsgseaConfig, run_regulation_enrichment,
    run_site_regulation_enrichment, run_ssgsea, run_up_down_regulation_enrichment, split_regulated,
};
use omics_statistics::exploratory::{PcaConfig, run_pca};
use omics_statistics::normalization::{Axis, NormalizationMethod, normalize_data};
use omics_statistics::testing::TestKind;

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{}{:03}", prefix, i)).collect()
}

fn aligned(samples: Vec<String>, features: Vec<String>, values: Array2<f64>, groups: &[&str]) -> AlignedData {
    let table = MeasurementTable::new(samples.clone(), features, values).unwrap();
    let metadata = SampleMetadata::new(samples)
        .unwrap()
        .with_categorical("group", groups)
        .unwrap();
    align(&table, &metadata, &AlignConfig::default()).unwrap()
}

/// 100 features over 3 "A" and 3 "B" samples; F000..F003 are raised by 5 in "B",
/// everything else differs by less than 1 between groups.
fn hundred_features() -> AlignedData {
    let samples = names("s", 6);
    let features = names("F", 100);
    let values = Array2::from_shape_fn((6, 100), |(i, j)| {
        let noise = 0.3 * ((i * 7 + j * 13) as f64).sin();
        let shift = if j < 4 && i >= 3 { 5.0 } else { 0.0 };
        10.0 + noise + shift
    });
    aligned(samples, features, values, &["A", "A", "A", "B", "B", "B"])
}

fn two_level_result(values: Array2<f64>) -> RegulationResult {
    let n_features = values.ncols();
    let data = aligned(names("s", 6), names("F", n_features), values, &["A", "A", "A", "B", "B", "B"]);
    run_differential(&data, &DifferentialConfig::new("group")).unwrap()
}

#[test]
fn test_two_group_t_test_matches_reference() {
    let data = aligned(
        names("s", 4),
        vec!["P12345".into()],
        ndarray::array![[1.4], [2.2], [5.3], [4.2]],
        &["A", "A", "B", "B"],
    );
    let result = run_differential(&data, &DifferentialConfig::new("group")).unwrap();

    assert_eq!(result.comparisons.len(), 1);
    assert!(result.omnibus.is_empty());
    let record = &result.comparisons[0];
    assert_eq!((record.group1.as_str(), record.group2.as_str()), ("A", "B"));
    assert_relative_eq!(record.statistic, -4.3377662703534664, epsilon = 1e-9);
    assert_relative_eq!(record.pvalue, 0.0492523681517403, epsilon = 1e-9);
    assert_relative_eq!(record.mean1, 1.8, epsilon = 1e-12);
    assert_relative_eq!(record.mean2, 4.75, epsilon = 1e-12);
    assert_relative_eq!(record.std1, 0.8 / 2.0_f64.sqrt(), epsilon = 1e-12);
    assert_relative_eq!(record.std2, 1.1 / 2.0_f64.sqrt(), epsilon = 1e-12);
    assert_relative_eq!(record.log2_fold_change, 2.95, epsilon = 1e-12);
    // A single test is its own family
    assert_relative_eq!(record.padj, record.pvalue, epsilon = 1e-15);
}

#[test]
fn test_up_down_enrichment_end_to_end() {
    let result = run_differential(&hundred_features(), &DifferentialConfig::new("group")).unwrap();
    let config = EnrichmentConfig::default();

    let (up, down) = split_regulated(&result.comparisons, &config);
    let expected: Vec<String> = names("F", 4);
    assert_eq!(up.iter().cloned().collect::<Vec<_>>(), expected);
    assert!(down.is_empty());

    // 10 members, 2 of them regulated
    let mut pairs: Vec<(String, &str)> = vec![("F000".into(), "SET"), ("F001".into(), "SET")];
    pairs.extend((50..58).map(|j| (format!("F{:03}", j), "SET")));
    let annotations = AnnotationTable::from_pairs(pairs);

    let enrichments = run_up_down_regulation_enrichment(&result, &annotations, &config).unwrap();
    assert_eq!(enrichments.len(), 1);
    let records = &enrichments[0].records;
    assert_eq!(records.len(), 2);

    let up_record = &records[0];
    assert_eq!(up_record.direction, Direction::Up);
    assert_eq!(up_record.foreground, 2);
    assert_eq!(up_record.set_size, 10);
    assert_eq!(up_record.foreground_pop, 4);
    assert_eq!(up_record.background_pop, 100);
    assert_eq!(up_record.identifiers, vec!["F000".to_string(), "F001".to_string()]);
    assert_relative_eq!(up_record.pvalue, 0.0487691984010099, epsilon = 1e-12);

    let down_record = &records[1];
    assert_eq!(down_record.direction, Direction::Down);
    assert_eq!(down_record.foreground, 0);
    assert_relative_eq!(down_record.pvalue, 1.0, epsilon = 1e-12);
}

#[test]
fn test_single_foreground_closed_form() {
    let universe = names("F", 100);
    let foreground: std::collections::BTreeSet<String> = ["F000", "F001", "F020", "F030"].iter().map(|s| s.to_string()).collect();
    let annotations = AnnotationTable::from_pairs((0..10).map(|j| (format!("F{:03}", j), "SET")));

    let records =
        run_regulation_enrichment(&foreground, &universe, &annotations, &EnrichmentConfig::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].direction, Direction::Regulated);
    assert_relative_eq!(records[0].pvalue, 0.0487691984010099, epsilon = 1e-12);
    assert_relative_eq!(records[0].fold_enrichment, 5.0, epsilon = 1e-12);
}

#[test]
fn test_single_level_is_rejected() {
    let table = MeasurementTable::new(
        names("s", 3),
        vec!["P1".into()],
        ndarray::array![[1.0], [2.0], [3.0]],
    )
    .unwrap();
    let metadata = SampleMetadata::new(names("s", 3))
        .unwrap()
        .with_categorical("group", &["A", "A", ""])
        .unwrap();
    let data = align(&table, &metadata, &AlignConfig::default()).unwrap();

    let err = run_differential(&data, &DifferentialConfig::new("group")).unwrap_err();
    match AnalysisError::kind_of(&err) {
        Some(AnalysisError::InsufficientGroups { column, found }) => {
            assert_eq!(column, "group");
            assert_eq!(*found, 1);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_ssgsea_full_set_scores_zero() {
    let features = names("F", 20);
    let values = Array2::from_shape_fn((1, 20), |(_, j)| (j as f64 * 1.7).cos());
    let table = MeasurementTable::new(vec!["s0".into()], features.clone(), values).unwrap();
    let annotations = AnnotationTable::from_pairs(features.iter().map(|f| (f.clone(), "ALL")));

    for weight in [0.0, 0.25, 1.0, 2.0] {
        let config = SsgseaConfig {
            weight,
            ..Default::default()
        };
        let records = run_ssgsea(&table, &annotations, &config).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].n_hits, 20);
        assert_eq!(records[0].es, 0.0);
    }
}

#[test]
fn test_record_count_per_pair() {
    let values = Array2::from_shape_fn((9, 5), |(i, j)| (i as f64) * 0.5 + ((i * j) as f64).cos());
    let data = aligned(
        names("s", 9),
        names("F", 5),
        values,
        &["A", "A", "A", "B", "B", "B", "C", "C", "C"],
    );
    let result = run_differential(&data, &DifferentialConfig::new("group")).unwrap();

    assert_eq!(result.pairs.len(), 3);
    assert_eq!(result.comparisons.len(), 5 * 3);
    assert_eq!(result.omnibus.len(), 5);
    for (feature, chunk) in names("F", 5).iter().zip(result.comparisons.chunks(3)) {
        assert!(chunk.iter().all(|r| &r.feature == feature));
    }
}

#[test]
fn test_adjusted_values_bound_raw_values() {
    let result = run_differential(&hundred_features(), &DifferentialConfig::new("group")).unwrap();
    for record in &result.comparisons {
        assert!(record.padj >= record.pvalue);
        assert!(record.padj <= 1.0);
        assert_eq!(record.rejected, Some(record.padj <= result.alpha));
    }
}

#[test]
fn test_repeated_runs_identical() {
    let data = hundred_features();
    let config = DifferentialConfig::new("group");
    let first = run_differential(&data, &config).unwrap();
    let second = run_differential(&data, &config).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_regulated_sets_partition_significant_features() {
    let result = run_differential(&hundred_features(), &DifferentialConfig::new("group")).unwrap();
    let config = EnrichmentConfig {
        pval_col: PValueColumn::Raw,
        lfc_cutoff: 0.2,
        ..Default::default()
    };
    let (up, down) = split_regulated(&result.comparisons, &config);
    assert!(up.is_disjoint(&down));

    for record in &result.comparisons {
        let significant = record.pvalue <= config.alpha;
        let expected_up = significant && record.log2_fold_change > config.lfc_cutoff;
        let expected_down = significant && record.log2_fold_change < -config.lfc_cutoff;
        assert_eq!(up.contains(&record.feature), expected_up);
        assert_eq!(down.contains(&record.feature), expected_down);
    }
}

#[test]
fn test_fold_change_at_cutoff_not_regulated() {
    // F000 shifts by exactly 1, F001 by 1.5
    let values = ndarray::array![
        [1.0, 1.0],
        [2.0, 2.0],
        [3.0, 3.0],
        [2.0, 2.5],
        [3.0, 3.5],
        [4.0, 4.5]
    ];
    let result = two_level_result(values);
    assert_eq!(result.comparisons[0].log2_fold_change, 1.0);

    let config = EnrichmentConfig {
        pval_col: PValueColumn::Raw,
        alpha: 0.5,
        ..Default::default()
    };
    let (up, down) = split_regulated(&result.comparisons, &config);
    assert_eq!(up.into_iter().collect::<Vec<_>>(), vec!["F001".to_string()]);
    assert!(down.is_empty());
}

#[test]
fn test_median_normalization_before_pca() {
    let values = Array2::from_shape_fn((6, 5), |(i, j)| (i as f64) * 2.0 + (j as f64) + ((i + j) as f64).sin());
    let table = MeasurementTable::new(names("s", 6), names("F", 5), values).unwrap();

    let normalized = normalize_data(&table, NormalizationMethod::Median, Axis::Samples).unwrap();
    for row in normalized.values().rows() {
        let mut sorted = row.to_vec();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(sorted[2], 0.0);
    }

    let pca = run_pca(&normalized, &PcaConfig::default()).unwrap();
    assert_eq!(pca.scores.dim(), (6, 2));
    assert_eq!(pca.samples, table.samples().to_vec());
    assert!(pca.explained_variance_ratio[0] >= pca.explained_variance_ratio[1]);
}

#[test]
fn test_site_enrichment_counts_parent_once() {
    // P01 carries one up and one down site, P02 one up site, P13 two unchanged sites
    let mut features: Vec<String> = vec!["P01~G01_S5-p".into(), "P01~G01_T9-p".into(), "P02~G02_S3-p".into()];
    features.extend((3..13).map(|p| format!("P{:02}~G{:02}_S1-p", p, p)));
    features.push("P13~G13_Y2-p".into());
    features.push("P13~G13_S4-p".into());
    let values = Array2::from_shape_fn((6, 15), |(i, j)| {
        let noise = 0.3 * ((i * 7 + j * 13) as f64).sin();
        let shift = match j {
            0 | 2 if i >= 3 => 5.0,
            1 if i >= 3 => -5.0,
            _ => 0.0,
        };
        10.0 + noise + shift
    });
    let data = aligned(names("s", 6), features, values, &["A", "A", "A", "B", "B", "B"]);
    let result = run_differential(&data, &DifferentialConfig::new("group")).unwrap();

    let annotations = AnnotationTable::from_pairs(["P01~G01", "P03~G03", "P04~G04"].map(|p| (p.to_string(), "SET")));
    let enrichments =
        run_site_regulation_enrichment(&result, &annotations, &EnrichmentConfig::default(), DEFAULT_SITE_PATTERN)
            .unwrap();

    assert_eq!(enrichments.len(), 1);
    let records = &enrichments[0].records;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.direction, Direction::Regulated);
    assert_eq!(record.foreground_pop, 2);
    assert_eq!(record.background_pop, 13);
    assert_eq!(record.set_size, 3);
    assert_eq!(record.foreground, 1);
    assert_eq!(record.identifiers, vec!["P01~G01".to_string()]);
    // P(X >= 1) for 2 draws from 13 with 3 successes
    assert_relative_eq!(record.pvalue, 33.0 / 78.0, epsilon = 1e-12);
}

#[test]
fn test_rank_sum_pairwise_path() {
    let data = aligned(
        names("s", 8),
        vec!["P1".into()],
        ndarray::array![[1.1], [2.3], [2.3], [3.0], [2.3], [4.1], [5.0], [6.2]],
        &["A", "A", "A", "A", "B", "B", "B", "B"],
    );
    let result = run_differential(&data, &DifferentialConfig::new("group").nonparametric()).unwrap();

    assert_eq!(result.comparisons.len(), 1);
    let record = &result.comparisons[0];
    assert_eq!(record.test, TestKind::MannWhitney);
    assert!(!record.parametric);
    assert_eq!(record.statistic, 2.0);
    // Normal approximation with tie and continuity corrections
    assert_relative_eq!(record.pvalue, 0.1037536775209857, epsilon = 1e-9);
    assert_relative_eq!(record.effect_size, 0.75, epsilon = 1e-12);
    assert_relative_eq!(record.padj, record.pvalue, epsilon = 1e-15);
}

#[test]
fn test_kruskal_wallis_omnibus() {
    let data = aligned(
        names("s", 9),
        vec!["P1".into()],
        ndarray::array![[1.0], [2.0], [3.5], [4.0], [5.0], [2.5], [7.0], [8.0], [6.0]],
        &["A", "A", "A", "B", "B", "B", "C", "C", "C"],
    );
    let result = run_differential(&data, &DifferentialConfig::new("group").nonparametric()).unwrap();

    assert_eq!(result.comparisons.len(), 3);
    assert!(result.comparisons.iter().all(|r| r.test == TestKind::MannWhitney));
    assert_eq!(result.omnibus.len(), 1);
    let omnibus = &result.omnibus[0];
    assert_eq!(omnibus.test, TestKind::KruskalWallis);
    assert_relative_eq!(omnibus.statistic, 6.488888888888889, epsilon = 1e-9);
    assert_relative_eq!(omnibus.df1, 2.0);
    assert_relative_eq!(omnibus.pvalue, 0.03899021957448712, epsilon = 1e-9);
}

#[test]
fn test_friedman_omnibus_for_paired_levels() {
    // rows: subject s1..s4 at t1, t2, t3
    let samples = names("s", 12);
    let table = MeasurementTable::new(
        samples.clone(),
        vec!["P1".into()],
        Array2::from_shape_vec(
            (12, 1),
            vec![1.0, 2.0, 3.0, 1.5, 2.5, 2.0, 0.5, 3.0, 4.0, 1.0, 1.2, 1.1],
        )
        .unwrap(),
    )
    .unwrap();
    let metadata = SampleMetadata::new(samples)
        .unwrap()
        .with_categorical("time", &["t1", "t2", "t3"].repeat(4))
        .unwrap()
        .with_categorical(
            "subject",
            &["s1", "s1", "s1", "s2", "s2", "s2", "s3", "s3", "s3", "s4", "s4", "s4"],
        )
        .unwrap();
    let data = align(&table, &metadata, &AlignConfig::default()).unwrap();

    let config = DifferentialConfig::new("time").paired_by("subject").nonparametric();
    let result = run_differential(&data, &config).unwrap();

    assert_eq!(result.comparisons.len(), 3);
    for record in &result.comparisons {
        assert_eq!(record.test, TestKind::WilcoxonSignedRank);
        assert!(record.paired);
        assert_eq!((record.n1, record.n2), (4, 4));
    }
    let omnibus = &result.omnibus[0];
    assert_eq!(omnibus.test, TestKind::Friedman);
    // rank sums 4, 10, 10
    assert_relative_eq!(omnibus.statistic, 6.0, epsilon = 1e-9);
    assert_relative_eq!(omnibus.df1, 2.0);
    assert_relative_eq!(omnibus.pvalue, (-3.0_f64).exp(), epsilon = 1e-9);
}

#[test]
fn test_ancova_three_levels() {
    let samples = names("s", 9);
    let table = MeasurementTable::new(
        samples.clone(),
        vec!["P1".into()],
        Array2::from_shape_vec(
            (9, 1),
            vec![10.3, 14.8, 20.1, 14.25, 19.65, 24.55, 10.2, 15.4, 19.35],
        )
        .unwrap(),
    )
    .unwrap();
    let metadata = SampleMetadata::new(samples)
        .unwrap()
        .with_categorical("group", &["A", "A", "A", "B", "B", "B", "C", "C", "C"])
        .unwrap()
        .with_numeric("age", &[20.0, 30.0, 40.0, 25.0, 35.0, 45.0, 22.0, 33.0, 41.0])
        .unwrap();
    let data = align(&table, &metadata, &AlignConfig::default()).unwrap();

    let config = DifferentialConfig::new("group").with_covariates(&["age"]);
    let result = run_differential(&data, &config).unwrap();

    // (group1, group2, adjusted difference group1 - group2, t, p) on 5 residual df
    let expected = [
        ("A", "B", -1.9377147766323024, -9.813924675708252, 0.00018704744791281445),
        ("A", "C", 1.074914089347079, 5.588028558015011, 0.0025319738008843958),
        ("B", "C", 3.0126288659793814, 15.56246095056128, 1.9901652231291368e-5),
    ];
    assert_eq!(result.comparisons.len(), 3);
    for (record, (g1, g2, estimate, t, p)) in result.comparisons.iter().zip(expected) {
        assert_eq!(record.test, TestKind::Ancova);
        assert_eq!((record.group1.as_str(), record.group2.as_str()), (g1, g2));
        assert_relative_eq!(record.coefficient.unwrap(), estimate, epsilon = 1e-9);
        assert_relative_eq!(record.statistic, t, epsilon = 1e-7);
        assert_relative_eq!(record.pvalue, p, max_relative = 1e-6);
        assert_relative_eq!(record.degrees_of_freedom, 5.0);
        let (lower, upper) = record.confidence_interval.unwrap();
        assert!(lower < estimate && estimate < upper);
    }

    // Type-II F of the group term against intercept + age
    let omnibus = &result.omnibus[0];
    assert_eq!(omnibus.test, TestKind::Ancova);
    assert_relative_eq!(omnibus.statistic, 123.25791393780232, max_relative = 1e-8);
    assert_relative_eq!(omnibus.df1, 2.0);
    assert_relative_eq!(omnibus.df2, 5.0);
    assert_relative_eq!(omnibus.pvalue, 5.572007725536056e-5, max_relative = 1e-6);
}

#[test]
fn test_untestable_feature_leaves_family_unchanged() {
    let base = Array2::from_shape_fn((6, 20), |(i, j)| {
        let shift = if j < 3 && i >= 3 { 2.0 } else { 0.0 };
        10.0 + 0.4 * ((i * 5 + j * 11) as f64).sin() + shift
    });
    let mut with_gap = base.clone();
    // F005 keeps a single observation in A
    with_gap[[0, 5]] = f64::NAN;
    with_gap[[1, 5]] = f64::NAN;

    let full = two_level_result(with_gap);
    let untestable = &full.comparisons[5];
    assert_eq!(untestable.feature, "F005");
    assert!(untestable.pvalue.is_nan());
    assert!(untestable.padj.is_nan());
    assert_eq!(untestable.rejected, None);
    assert_eq!(full.comparisons.len(), 20);

    let kept: Vec<usize> = (0..20).filter(|&j| j != 5).collect();
    let reduced = aligned(
        names("s", 6),
        kept.iter().map(|j| format!("F{:03}", j)).collect(),
        base.select(ndarray::Axis(1), &kept),
        &["A", "A", "A", "B", "B", "B"],
    );
    let reduced = run_differential(&reduced, &DifferentialConfig::new("group")).unwrap();
    let tested: Vec<_> = full.comparisons.iter().filter(|r| r.feature != "F005").collect();
    assert_eq!(tested.len(), reduced.comparisons.len());
    for (a, b) in tested.iter().zip(&reduced.comparisons) {
        assert_eq!(a.feature, b.feature);
        assert_relative_eq!(a.pvalue, b.pvalue, epsilon = 1e-15);
        assert_relative_eq!(a.padj, b.padj, epsilon = 1e-15);
        assert_eq!(a.rejected, b.rejected);
    }
}
