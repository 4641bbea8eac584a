//! Weighted implicit-feedback factorization trained by alternating
//! least squares: every cell of the preference matrix participates,
//! weighted by a per-observation confidence, so each epoch solves one
//! regularized K x K normal-equation system per user and per item
//! instead of stepping per entry.

use faer::linalg::solvers::Solve;
use faer::{MatMut, Side};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::{axpy, dot, XorShift64};
use crate::dense::{DenseMatrix, DiagMatrix};
use crate::error::Error;
use crate::train::{EpochStats, ModelState, TrainContext, TrainOptions, TrainingStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrmfOptions {
    /// Confidence scale for explicit ratings (c = alpha * r). Binary
    /// data uses the user's rated count instead.
    pub alpha: f32,
}

impl Default for WrmfOptions {
    fn default() -> Self {
        Self { alpha: 40.0 }
    }
}

#[derive(Debug)]
pub struct Wrmf {
    opts: WrmfOptions,
    is_binary: bool,
}

impl Wrmf {
    pub fn new(opts: WrmfOptions) -> Self {
        Self {
            opts,
            is_binary: false,
        }
    }
}

/// Extra confidence carried by an observed entry, on top of the
/// baseline weight of 1 shared with the unobserved cells.
#[inline]
fn confidence(is_binary: bool, alpha: f32, row_degree: usize, rating: f32) -> f32 {
    if is_binary {
        (row_degree - 1) as f32
    } else {
        alpha * rating
    }
}

/// Solve A x = b in place (x lands in `b`) by Cholesky; A must be
/// positive definite after regularization.
fn solve_spd(a: &mut [f32], b: &mut [f32], k: usize) -> Result<(), ()> {
    let a_mat = MatMut::from_row_major_slice_mut(a, k, k);
    let mut b_mat = MatMut::from_column_major_slice_mut(b, k, 1);
    let llt = a_mat.as_ref().llt(Side::Lower).map_err(|_| ())?;
    let x = llt.solve(b_mat.as_ref());
    b_mat.copy_from(x.as_ref());
    Ok(())
}

/// One half of an ALS epoch: re-solve every user row against the
/// current item factors.
fn sweep_users(
    ctx: &TrainContext,
    q: &DenseMatrix,
    p: &mut DenseMatrix,
    reg: f32,
    alpha: f32,
    is_binary: bool,
) -> Result<(), Error> {
    let k = q.cols();
    let num_items = ctx.num_items();
    let gram = q.gramian();

    p.as_mut_slice()
        .par_chunks_mut(k)
        .enumerate()
        .try_for_each(|(u, xu)| {
            let row = ctx.train.row(u);
            if row.is_empty() {
                xu.fill(0.0);
                return Ok(());
            }

            let mut cu = DiagMatrix::eye(num_items);
            for (i, r) in row.iter() {
                cu.add(i as usize, confidence(is_binary, alpha, row.len(), r));
            }

            let mut a = gram.as_slice().to_vec();
            let mut b = vec![0.0f32; k];
            for f in 0..k {
                a[f * k + f] += reg;
            }
            // rank-one corrections for the rated entries; the
            // binarized preference is 1.0 there
            for (i, _) in row.iter() {
                let i = i as usize;
                let ci = cu.get(i);
                let yi = q.row(i);
                axpy(ci, yi, &mut b);
                let w = ci - 1.0;
                for f in 0..k {
                    axpy(w * yi[f], yi, &mut a[f * k..(f + 1) * k]);
                }
            }

            solve_spd(&mut a, &mut b, k).map_err(|_| Error::SingularSystem {
                side: "user",
                index: u,
            })?;
            xu.copy_from_slice(&b);
            Ok(())
        })
}

/// The transpose-symmetric half: re-solve every item row against the
/// freshly updated user factors.
fn sweep_items(
    ctx: &TrainContext,
    p: &DenseMatrix,
    q: &mut DenseMatrix,
    reg: f32,
    alpha: f32,
    is_binary: bool,
) -> Result<(), Error> {
    let k = p.cols();
    let num_users = ctx.num_users();
    let gram = p.gramian();

    q.as_mut_slice()
        .par_chunks_mut(k)
        .enumerate()
        .try_for_each(|(i, yi)| {
            let col = ctx.train.column(i);
            if col.is_empty() {
                yi.fill(0.0);
                return Ok(());
            }

            let mut ci = DiagMatrix::eye(num_users);
            for (u, r) in col.iter() {
                let u = u as usize;
                ci.add(u, confidence(is_binary, alpha, ctx.train.row_size(u), r));
            }

            let mut a = gram.as_slice().to_vec();
            let mut b = vec![0.0f32; k];
            for f in 0..k {
                a[f * k + f] += reg;
            }
            for (u, _) in col.iter() {
                let u = u as usize;
                let cu = ci.get(u);
                let xu = p.row(u);
                axpy(cu, xu, &mut b);
                let w = cu - 1.0;
                for f in 0..k {
                    axpy(w * xu[f], xu, &mut a[f * k..(f + 1) * k]);
                }
            }

            solve_spd(&mut a, &mut b, k).map_err(|_| Error::SingularSystem {
                side: "item",
                index: i,
            })?;
            yi.copy_from_slice(&b);
            Ok(())
        })
}

impl TrainingStrategy for Wrmf {
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error> {
        if !(self.opts.alpha > 0.0) {
            return Err(Error::Config("alpha must be positive".into()));
        }
        self.is_binary = ctx.min_rate == ctx.max_rate;

        model.p = DenseMatrix::zeros(ctx.num_users(), opts.num_factors);
        model.q = DenseMatrix::zeros(ctx.num_items(), opts.num_factors);
        model.p.init_gaussian(rng, opts.init_mean, opts.init_std);
        model.q.init_gaussian(rng, opts.init_mean, opts.init_std);
        Ok(())
    }

    fn update_epoch(
        &mut self,
        opts: &TrainOptions,
        ctx: &TrainContext,
        model: &mut ModelState,
        _rng: &mut XorShift64,
    ) -> Result<EpochStats, Error> {
        sweep_users(
            ctx,
            &model.q,
            &mut model.p,
            opts.reg_user,
            self.opts.alpha,
            self.is_binary,
        )?;
        sweep_items(
            ctx,
            &model.p,
            &mut model.q,
            opts.reg_item,
            self.opts.alpha,
            self.is_binary,
        )?;

        // objective over the observed cells; the zero cells only add a
        // constant-curvature term the sweeps already minimized
        let mut stats = EpochStats::default();
        for (u, i, r) in ctx.train.entries() {
            let pred = dot(model.p.row(u), model.q.row(i));
            let e = 1.0 - pred;
            let c = 1.0 + confidence(self.is_binary, self.opts.alpha, ctx.train.row_size(u), r);
            stats.errs += (e * e) as f64;
            stats.loss += (c * e * e) as f64;
        }
        let p_norm: f64 = model.p.as_slice().iter().map(|&v| (v * v) as f64).sum();
        let q_norm: f64 = model.q.as_slice().iter().map(|&v| (v * v) as f64).sum();
        stats.loss += opts.reg_user as f64 * p_norm + opts.reg_item as f64 * q_norm;

        Ok(stats)
    }

    fn predict(&self, _ctx: &TrainContext, model: &ModelState, u: usize, i: usize) -> f32 {
        dot(model.p.row(u), model.q.row(i))
    }

    fn descriptor(&self) -> String {
        format!("Wrmf,{}", self.opts.alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseMatrix;
    use crate::train::{TrainOutcome, Trainer};

    fn full_binary_3x3() -> TrainContext {
        let triples: Vec<(u32, u32, f32)> = (0..3u32)
            .flat_map(|u| (0..3u32).map(move |i| (u, i, 1.0)))
            .collect();
        TrainContext::new(SparseMatrix::from_triples(3, 3, &triples).unwrap(), None)
    }

    #[test]
    fn user_solve_matches_the_closed_form() {
        let ctx = full_binary_3x3();
        let mut q = DenseMatrix::zeros(3, 1);
        for i in 0..3 {
            q.set(i, 0, 0.5);
        }
        let mut p = DenseMatrix::zeros(3, 1);
        sweep_users(&ctx, &q, &mut p, 0.01, 40.0, true).unwrap();

        // (YtY + Yt(Cu - I)Y + reg I)^-1 YtCu pu, assembled from the
        // dense primitives
        let mut a = q.gramian();
        let mut cu = DiagMatrix::eye(3);
        for i in 0..3 {
            cu.add(i, 2.0); // binary confidence: degree - 1
        }
        for i in 0..3 {
            let w = cu.get(i) - 1.0;
            a.add(0, 0, w * q.get(i, 0) * q.get(i, 0));
        }
        a.add(0, 0, 0.01);
        let inv = a.inverse().unwrap();
        let mut b = 0.0f32;
        for i in 0..3 {
            b += cu.get(i) * q.get(i, 0);
        }
        let expect = inv.get(0, 0) * b;

        for u in 0..3 {
            assert!(
                (p.get(u, 0) - expect).abs() < 1e-6,
                "row {u}: {} vs {expect}",
                p.get(u, 0)
            );
        }
        // concrete value for this construction: 4.5 / 2.26
        assert!((expect - 4.5 / 2.26).abs() < 1e-5);
    }

    #[test]
    fn unregularized_degenerate_system_is_singular() {
        let ctx = full_binary_3x3();
        let q = DenseMatrix::zeros(3, 1);
        let mut p = DenseMatrix::zeros(3, 1);
        let err = sweep_users(&ctx, &q, &mut p, 0.0, 40.0, true);
        assert!(matches!(
            err,
            Err(Error::SingularSystem { side: "user", .. })
        ));
    }

    #[test]
    fn reconstructs_a_fully_observed_binary_matrix() {
        let mut ctx = full_binary_3x3();
        let opts = TrainOptions {
            num_factors: 2,
            max_iters: 10,
            reg_user: 0.01,
            reg_item: 0.01,
            seed: 17,
            ..TrainOptions::default()
        };
        let mut trainer = Trainer::new(opts, Wrmf::new(WrmfOptions::default())).unwrap();
        let report = trainer.fit(&mut ctx).unwrap();
        assert_ne!(report.outcome, TrainOutcome::Diverged);
        for u in 0..3 {
            for i in 0..3 {
                let s = trainer.score(&ctx, u, i);
                assert!((s - 1.0).abs() < 0.1, "({u}, {i}) scored {s}");
            }
        }
    }

    #[test]
    fn explicit_ratings_train_with_rating_scaled_confidence() {
        let m = SparseMatrix::from_triples(
            4,
            5,
            &[
                (0, 0, 5.0),
                (0, 1, 3.0),
                (0, 2, 1.0),
                (1, 0, 4.0),
                (1, 3, 2.0),
                (2, 1, 2.0),
                (2, 2, 4.0),
                (2, 4, 5.0),
                (3, 0, 1.0),
                (3, 3, 4.0),
                (3, 4, 3.0),
            ],
        )
        .unwrap();
        let mut ctx = TrainContext::new(m, None);
        let opts = TrainOptions {
            num_factors: 3,
            max_iters: 15,
            seed: 29,
            ..TrainOptions::default()
        };
        let mut trainer = Trainer::new(
            opts,
            Wrmf::new(WrmfOptions { alpha: 1.0 }),
        )
        .unwrap();
        let report = trainer.fit(&mut ctx).unwrap();
        assert!(report.loss.is_finite() && report.loss >= 0.0);
        let predictor = trainer.predictor(&ctx);
        for u in 0..4 {
            for i in 0..5 {
                assert!(predictor.score(u, i).is_finite());
            }
        }
    }

    #[test]
    fn empty_rows_collapse_to_zero_factors() {
        // user 2 has no ratings
        let m = SparseMatrix::from_triples(3, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0)])
            .unwrap();
        let ctx = TrainContext::new(m, None);
        let mut q = DenseMatrix::zeros(2, 2);
        q.set(0, 0, 0.3);
        q.set(1, 1, 0.4);
        let mut p = DenseMatrix::zeros(3, 2);
        p.set(2, 0, 7.0);
        sweep_users(&ctx, &q, &mut p, 0.1, 40.0, true).unwrap();
        assert_eq!(p.row(2), &[0.0, 0.0]);
    }
}
