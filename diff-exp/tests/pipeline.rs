use approx::assert_relative_eq;
use diff_exp::diff_exp::default_prior_weight_grid;
use diff_exp::{run_diff_exp, sweep_prior_weights, CountMatrix, DiffExpConfig, Experiment, SampleGroup};

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{prefix}{i}")).collect()
}

fn small_experiment() -> Experiment {
    let m = CountMatrix::from_rows(
        ids("gene", 4),
        vec!["a1".into(), "a2".into(), "b1".into(), "b2".into()],
        &[
            vec![100.0, 110.0, 10.0, 12.0],
            vec![50.0, 55.0, 52.0, 48.0],
            vec![200.0, 190.0, 210.0, 205.0],
            vec![10.0, 12.0, 11.0, 9.0],
        ],
    )
    .unwrap();
    let groups = SampleGroup::new("A", "B", &[("a1", "A"), ("a2", "A"), ("b1", "B"), ("b2", "B")]).unwrap();
    Experiment::new(m, groups).unwrap()
}

/// 30 genes, 3 vs 3, with gene 4 up eightfold in condition A
fn spiked_experiment() -> Experiment {
    let jitter = [0.92, 1.07, 1.0, 1.05, 0.94, 1.02];
    let rows = (0..30)
        .map(|g| {
            let base = 20.0 + ((g * 37) % 180) as f64;
            (0..6)
                .map(|j| {
                    let spike = if g == 4 && j < 3 { 8.0 } else { 1.0 };
                    (base * jitter[(g + j) % 6] * spike).round()
                })
                .collect::<Vec<f64>>()
        })
        .collect::<Vec<_>>();
    let genes = (0..30).map(|g| format!("g{g}")).collect();
    let samples = vec!["a1", "a2", "a3", "b1", "b2", "b3"];
    let m = CountMatrix::from_rows(genes, samples.iter().map(|s| s.to_string()).collect(), &rows).unwrap();
    let pairs = samples
        .iter()
        .map(|s| (s.to_string(), if s.starts_with('a') { "A".to_owned() } else { "B".to_owned() }))
        .collect::<Vec<_>>();
    let groups = SampleGroup::new("A", "B", &pairs).unwrap();
    Experiment::new(m, groups).unwrap()
}

#[test]
fn both_engines_call_the_shifted_gene() {
    let res = run_diff_exp(&small_experiment(), &DiffExpConfig::default()).unwrap();

    let exact = res.exact.results.get("gene1").unwrap();
    let moderated = res.moderated.results.get("gene1").unwrap();
    assert!(exact.p_value < 0.01);
    assert!(moderated.p_value < 0.01);
    assert!(exact.log2_fold_change > 0.0);
    assert!(moderated.log2_fold_change > 0.0);

    let flat_exact = res.exact.results.get("gene4").unwrap();
    let flat_moderated = res.moderated.results.get("gene4").unwrap();
    assert!(flat_exact.p_value > 0.5);
    assert!(flat_moderated.p_value > 0.5);

    assert_relative_eq!(moderated.p_value, 1.885149224188855e-09, max_relative = 1e-4);
}

#[test]
fn spiked_gene_ranks_first_in_both_engines() {
    let res = run_diff_exp(&spiked_experiment(), &DiffExpConfig::default()).unwrap();
    assert_eq!(res.exact.top_n(1).unwrap(), vec!["g4".to_owned()]);
    assert_eq!(res.moderated.top_n(1).unwrap(), vec!["g4".to_owned()]);
    assert_eq!(res.top_n.shared.first().map(String::as_str), Some("g4"));
    assert!(res.exact.results.get("g4").unwrap().log2_fold_change > 2.0);
    assert_eq!(res.concordance.total(), 30);
}

#[test]
fn reruns_are_identical() {
    let exp = spiked_experiment();
    let config = DiffExpConfig::default();
    let a = run_diff_exp(&exp, &config).unwrap();
    let b = run_diff_exp(&exp, &config).unwrap();
    assert_eq!(a.factors, b.factors);
    assert_eq!(a.dispersion.tagwise(), b.dispersion.tagwise());
    assert_eq!(a.exact, b.exact);
    assert_eq!(a.moderated, b.moderated);
    assert_eq!(a.concordance, b.concordance);
}

#[test]
fn tagwise_lies_between_raw_and_common() {
    let res = run_diff_exp(&spiked_experiment(), &DiffExpConfig::default()).unwrap();
    let d = &res.dispersion;
    for (&raw, &tag) in d.raw().iter().zip(d.tagwise()) {
        let (lo, hi) = if raw < d.common() { (raw, d.common()) } else { (d.common(), raw) };
        assert!(tag >= lo - 1e-12 && tag <= hi + 1e-12, "{tag} outside [{lo}, {hi}]");
    }
}

#[test]
fn prior_weight_sweep_spans_raw_to_common() {
    let exp = spiked_experiment();
    let config = DiffExpConfig::default();
    let res = run_diff_exp(&exp, &config).unwrap();
    let grid = default_prior_weight_grid(exp.matrix().n_samples(), &config.dispersion).unwrap();
    let sweep = sweep_prior_weights(&res.dispersion, &grid).unwrap();
    assert_eq!(sweep.len(), grid.len());

    // infinite weight collapses every gene onto the common value
    let (w, pooled) = sweep.last().unwrap();
    assert!(w.is_infinite());
    assert_relative_eq!(pooled.spread, 0.0, epsilon = 1e-12);

    // more shrinkage never widens the spread
    for pair in sweep.windows(2) {
        assert!(pair[1].1.spread <= pair[0].1.spread + 1e-12);
    }
}

#[test]
fn q_values_follow_p_value_order() {
    let res = run_diff_exp(&spiked_experiment(), &DiffExpConfig::default()).unwrap();
    for engine in [&res.exact, &res.moderated] {
        let p = engine.results.p_values();
        let q = engine.q_values();
        for i in 0..p.len() {
            assert!(q[i] >= p[i] * engine.pi0() - 1e-15);
            for j in 0..p.len() {
                if p[i] < p[j] {
                    assert!(q[i] <= q[j]);
                }
            }
        }
    }
}
