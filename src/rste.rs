//! Social trust ensemble: a user's score is a convex blend of their
//! own factor affinity and the trust-weighted affinity of the users
//! they trust, squashed through a logistic link against min-max
//! normalized ratings. Gradients accumulate over a full pass and are
//! applied once per epoch; a second pass over the trust transpose
//! propagates each truster's error into the trusted user's factors.

use serde::{Deserialize, Serialize};

use crate::common::{sigmoid, sigmoid_d, XorShift64};
use crate::dense::DenseMatrix;
use crate::error::Error;
use crate::train::{EpochStats, ModelState, TrainContext, TrainOptions, TrainingStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsteOptions {
    /// Weight of the user's own affinity; 1 - alpha goes to the
    /// trusted neighbors.
    pub alpha: f32,
}

impl Default for RsteOptions {
    fn default() -> Self {
        Self { alpha: 0.4 }
    }
}

#[derive(Debug)]
pub struct Rste {
    opts: RsteOptions,
}

impl Rste {
    pub fn new(opts: RsteOptions) -> Self {
        Self { opts }
    }

    /// Unbounded ensemble score, before the logistic link.
    fn raw_predict(&self, ctx: &TrainContext, model: &ModelState, u: usize, j: usize) -> f32 {
        let social = ctx.social.as_ref().expect("validated at init");
        let num_users = ctx.num_users();
        let own = DenseMatrix::row_mult(&model.p, u, &model.q, j);
        let mut trusted = 0.0f32;
        for (k, tuk) in social.row(u).iter() {
            let k = k as usize;
            if k < num_users {
                trusted += tuk * DenseMatrix::row_mult(&model.p, k, &model.q, j);
            }
        }
        self.opts.alpha * own + (1.0 - self.opts.alpha) * trusted
    }
}

impl TrainingStrategy for Rste {
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error> {
        let social = ctx
            .social
            .as_ref()
            .ok_or_else(|| Error::Config("trust matrix is required".into()))?;
        if social.n_rows() < ctx.num_users() || social.n_cols() < ctx.num_users() {
            return Err(Error::Config(
                "trust matrix must cover the user index space".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.opts.alpha) {
            return Err(Error::Config("alpha must lie in [0, 1]".into()));
        }

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
        let social = ctx.social.as_ref().expect("validated at init");
        let num_users = ctx.num_users();
        let k = opts.num_factors;
        let alpha = self.opts.alpha;
        let reg_u = opts.reg_user;
        let reg_i = opts.reg_item;
        let mut stats = EpochStats::default();

        let mut ps = DenseMatrix::zeros(num_users, k);
        let mut qs = DenseMatrix::zeros(ctx.num_items(), k);
        let mut sum_us = vec![0.0f32; k];

        // rating pass
        for (u, j, rate) in ctx.train.entries() {
            let ruj = ctx.normalize(rate);
            let pred = self.raw_predict(ctx, model, u, j);
            let euj = sigmoid(pred) - ruj;

            stats.errs += (euj * euj) as f64;
            stats.loss += (euj * euj) as f64;

            let csgd = sigmoid_d(pred) * euj;

            sum_us.fill(0.0);
            for (t, tut) in social.row(u).iter() {
                let t = t as usize;
                if t < num_users {
                    for (f, s) in sum_us.iter_mut().enumerate() {
                        *s += tut * model.p.get(t, f);
                    }
                }
            }

            for f in 0..k {
                let puf = model.p.get(u, f);
                let qjf = model.q.get(j, f);

                let usgd = alpha * csgd * qjf + reg_u * puf;
                let jsgd = csgd * (alpha * puf + (1.0 - alpha) * sum_us[f]) + reg_i * qjf;

                ps.add(u, f, usgd);
                qs.add(j, f, jsgd);

                stats.loss += (reg_u * puf * puf + reg_i * qjf * qjf) as f64;
            }
        }

        // trust-transpose pass: errors of everyone who trusts u flow
        // back into u's factors
        let mut sum_ps = vec![0.0f32; k];
        for u in 0..num_users {
            let trusters = social.column(u);
            if trusters.is_empty() {
                continue;
            }

            sum_ps.fill(0.0);
            for (p, tpu) in trusters.iter() {
                let p = p as usize;
                if p >= num_users {
                    continue;
                }
                for (j, rpj) in ctx.train.row(p).iter() {
                    let j = j as usize;
                    let pred = self.raw_predict(ctx, model, p, j);
                    let epj = sigmoid(pred) - ctx.normalize(rpj);
                    let csgd = sigmoid_d(pred) * epj * tpu;
                    for (f, s) in sum_ps.iter_mut().enumerate() {
                        *s += csgd * model.q.get(j, f);
                    }
                }
            }
            for (f, s) in sum_ps.iter().enumerate() {
                ps.add(u, f, (1.0 - alpha) * s);
            }
        }

        // one batched step per epoch
        model.p.axpy(-opts.learning_rate, &ps);
        model.q.axpy(-opts.learning_rate, &qs);

        Ok(stats)
    }

    fn predict(&self, ctx: &TrainContext, model: &ModelState, u: usize, j: usize) -> f32 {
        ctx.denormalize(sigmoid(self.raw_predict(ctx, model, u, j)))
    }

    fn descriptor(&self) -> String {
        format!("Rste,{}", self.opts.alpha)
    }
}
