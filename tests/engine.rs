//! End-to-end training scenarios across the strategy families.

use latrec::{
    FismAuc, FismOptions, NeighborModel, NeighborOptions, RankSgd, RankSgdOptions, Rste,
    RsteOptions, SparseMatrix, TrainContext, TrainOptions, TrainOutcome, Trainer, Wrmf,
    WrmfOptions,
};

/// Opt into epoch logs with RUST_LOG=latrec=debug.
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// 4 users x 5 items, 12 ratings in [1, 5].
fn ratings_4x5() -> SparseMatrix {
    SparseMatrix::from_triples(
        4,
        5,
        &[
            (0, 0, 5.0),
            (0, 1, 3.0),
            (0, 3, 1.0),
            (1, 0, 4.0),
            (1, 2, 2.0),
            (1, 4, 5.0),
            (2, 1, 1.0),
            (2, 2, 4.0),
            (2, 3, 3.0),
            (3, 0, 2.0),
            (3, 3, 5.0),
            (3, 4, 4.0),
        ],
    )
    .unwrap()
}

fn scenario_opts(seed: u64) -> TrainOptions {
    TrainOptions {
        num_factors: 5,
        max_iters: 50,
        convergence_threshold: 1e-4,
        seed,
        ..TrainOptions::default()
    }
}

#[test]
fn neighborhood_model_end_to_end() {
    init_logs();
    let mut ctx = TrainContext::new(ratings_4x5(), None);
    let mut trainer = Trainer::new(
        scenario_opts(3),
        NeighborModel::new(NeighborOptions::default()),
    )
    .unwrap();
    let report = trainer.fit(&mut ctx).unwrap();

    assert!(report.iters <= 50);
    assert_ne!(report.outcome, TrainOutcome::Diverged);
    assert!(report.loss.is_finite() && report.loss >= 0.0);

    let predictor = trainer.predictor(&ctx);
    for u in 0..4 {
        for i in 0..5 {
            let s = predictor.score(u, i);
            assert!(s.is_finite(), "({u}, {i}) scored {s}");
        }
    }
}

#[test]
fn weighted_als_end_to_end() {
    let mut ctx = TrainContext::new(ratings_4x5(), None);
    let mut trainer = Trainer::new(
        scenario_opts(5),
        Wrmf::new(WrmfOptions { alpha: 1.0 }),
    )
    .unwrap();
    let report = trainer.fit(&mut ctx).unwrap();

    assert!(report.iters <= 50);
    assert!(report.loss.is_finite() && report.loss >= 0.0);
    let predictor = trainer.predictor(&ctx);
    for u in 0..4 {
        for i in 0..5 {
            assert!(predictor.score(u, i).is_finite());
        }
    }
}

#[test]
fn pairwise_ranking_end_to_end() {
    let mut ctx = TrainContext::new(ratings_4x5(), None);
    let mut trainer = Trainer::new(
        scenario_opts(7),
        FismAuc::new(FismOptions::default()),
    )
    .unwrap();
    let report = trainer.fit(&mut ctx).unwrap();
    assert!(report.iters <= 50);
    assert!(report.loss.is_finite() && report.loss >= 0.0);
}

#[test]
fn trust_ensemble_end_to_end() {
    let trust = SparseMatrix::from_triples(
        4,
        4,
        &[(0, 1, 1.0), (1, 2, 0.5), (2, 3, 0.7), (3, 0, 0.9)],
    )
    .unwrap();
    let mut ctx = TrainContext::new(ratings_4x5(), Some(trust));
    let mut trainer = Trainer::new(scenario_opts(9), Rste::new(RsteOptions::default())).unwrap();
    let report = trainer.fit(&mut ctx).unwrap();
    assert!(report.iters <= 50);
    assert!(report.loss.is_finite());

    // bounded link keeps every score on the rating scale
    let predictor = trainer.predictor(&ctx);
    for u in 0..4 {
        for i in 0..5 {
            let s = predictor.score(u, i);
            assert!((1.0..=5.0).contains(&s), "({u}, {i}) scored {s}");
        }
    }
}

#[test]
fn scoring_during_and_after_training_is_stable() {
    let mut ctx = TrainContext::new(ratings_4x5(), None);
    let mut trainer = Trainer::new(
        scenario_opts(11),
        NeighborModel::new(NeighborOptions::default()),
    )
    .unwrap();
    trainer.fit(&mut ctx).unwrap();

    let a = trainer.score(&ctx, 2, 4);
    let b = trainer.score(&ctx, 2, 4);
    assert_eq!(a, b);
    let predictor = trainer.predictor(&ctx);
    assert_eq!(predictor.score(2, 4), a);
}

#[test]
fn adversarial_learning_rate_reports_diverged_and_keeps_a_usable_model() {
    let mut ctx = TrainContext::new(ratings_4x5(), None);
    let opts = TrainOptions {
        learning_rate: 1e6,
        ..scenario_opts(13)
    };
    let mut trainer = Trainer::new(opts, NeighborModel::new(NeighborOptions::default())).unwrap();
    let report = trainer.fit(&mut ctx).unwrap();

    assert_eq!(report.outcome, TrainOutcome::Diverged);
    // the rolled-back model still scores finitely everywhere
    let predictor = trainer.predictor(&ctx);
    for u in 0..4 {
        for i in 0..5 {
            assert!(predictor.score(u, i).is_finite());
        }
    }
}

#[test]
fn identical_seeds_give_identical_models() {
    let run = |seed: u64| {
        let mut ctx = TrainContext::new(ratings_4x5(), None);
        let mut trainer =
            Trainer::new(scenario_opts(seed), FismAuc::new(FismOptions::default())).unwrap();
        trainer.fit(&mut ctx).unwrap();
        (0..4)
            .flat_map(|u| (0..5).map(move |i| (u, i)))
            .map(|(u, i)| trainer.score(&ctx, u, i))
            .collect::<Vec<f32>>()
    };
    assert_eq!(run(99), run(99));
}

#[test]
fn options_deserialize_and_ignore_unknown_keys() {
    let opts: TrainOptions = serde_json::from_str(
        r#"{
            "num_factors": 8,
            "learning_rate": 0.02,
            "max_iters": 10,
            "some_future_knob": true
        }"#,
    )
    .unwrap();
    assert_eq!(opts.num_factors, 8);
    assert!((opts.learning_rate - 0.02).abs() < 1e-9);
    assert_eq!(opts.max_iters, 10);
    assert!(opts.validate().is_ok());

    let fism: FismOptions =
        serde_json::from_str(r#"{"rho": 3, "alpha": 0.7, "unknown": 1}"#).unwrap();
    assert_eq!(fism.rho, 3);
}
