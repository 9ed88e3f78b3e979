use diff_exp::qvalue::{estimate_pi0, Pi0Method};
use diff_exp::concordance::compare_at;
use diff_exp::{qvalue, QValueParams};
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use rand_pcg::Pcg64Mcg;

#[test]
fn uniform_p_values_give_pi0_near_one() {
    let mut rng = Pcg64Mcg::seed_from_u64(42);
    let p = (0..10_000).map(|_| rng.gen::<f64>()).collect::<Vec<f64>>();
    let est = estimate_pi0(&p, &QValueParams::default()).unwrap();
    assert!(!est.fallback);
    assert!(est.pi0 > 0.9, "pi0 = {}", est.pi0);
    assert!(est.pi0 <= 1.0);
    assert_eq!(est.raw.len(), 19);
    assert_eq!(est.smoothed.len(), 19);
}

#[test]
fn half_null_mixture() {
    let mut rng = Pcg64Mcg::seed_from_u64(7);
    let alt = Beta::new(0.1, 4.0).unwrap();
    let p = (0..10_000)
        .map(|i| if i % 2 == 0 { rng.gen::<f64>() } else { alt.sample(&mut rng) })
        .collect::<Vec<f64>>();

    let res = qvalue(&p, &QValueParams::default()).unwrap();
    assert!(res.pi0.pi0 > 0.45 && res.pi0.pi0 < 0.7, "pi0 = {}", res.pi0.pi0);

    // scaling by pi0 < 1 only adds discoveries relative to Benjamini-Hochberg
    let bh = qvalue(
        &p,
        &QValueParams {
            pi0_method: Pi0Method::Fixed(1.0),
            ..QValueParams::default()
        },
    )
    .unwrap();
    for (q, b) in res.q_values.iter().zip(&bh.q_values) {
        assert!(q <= b);
    }
    let s = compare_at(&bh.q_values, &res.q_values, 0.05).unwrap();
    assert_eq!(s.b_only + s.both + s.a_only + s.neither, p.len());
    assert_eq!(s.a_only, 0);
    assert!(s.both > 1000);
}
