//! Pairwise ranking SGD over binarized feedback where negatives are
//! drawn proportionally to item popularity, so the model spends its
//! capacity separating observed items from the ones a user was most
//! likely to have seen and skipped.

use serde::{Deserialize, Serialize};

use crate::common::XorShift64;
use crate::dense::DenseMatrix;
use crate::error::Error;
use crate::sampling::PopularitySampler;
use crate::train::{EpochStats, ModelState, TrainContext, TrainOptions, TrainingStrategy};

const MAX_SAMPLE_RETRIES: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RankSgdOptions {}

#[derive(Debug, Default)]
pub struct RankSgd {
    sampler: Option<PopularitySampler>,
}

impl RankSgd {
    pub fn new(_opts: RankSgdOptions) -> Self {
        Self { sampler: None }
    }
}

impl TrainingStrategy for RankSgd {
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error> {
        model.p = DenseMatrix::zeros(ctx.num_users(), opts.num_factors);
        model.q = DenseMatrix::zeros(ctx.num_items(), opts.num_factors);
        model.p.init_gaussian(rng, opts.init_mean, opts.init_std);
        model.q.init_gaussian(rng, opts.init_mean, opts.init_std);

        ctx.train.binarize();
        self.sampler = Some(PopularitySampler::from_columns(&ctx.train));
        Ok(())
    }

    fn update_epoch(
        &mut self,
        opts: &TrainOptions,
        ctx: &TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<EpochStats, Error> {
        let sampler = self.sampler.as_ref().expect("initialized");
        let k = opts.num_factors;
        let lr = opts.learning_rate;
        let mut stats = EpochStats::default();
        let mut negatives = Vec::new();

        for u in 0..ctx.num_users() {
            let row = ctx.train.row(u);
            if row.is_empty() {
                continue;
            }

            // one popularity-drawn negative per observed item; a
            // saturated user simply contributes fewer pairs
            negatives.clear();
            for _ in 0..row.len() {
                if let Some(j) = sampler.draw_unrated(row, rng, MAX_SAMPLE_RETRIES) {
                    negatives.push(j as usize);
                }
            }

            for (i, rui) in row.iter() {
                let i = i as usize;
                for &j in &negatives {
                    let pui = DenseMatrix::row_mult(&model.p, u, &model.q, i);
                    let puj = DenseMatrix::row_mult(&model.p, u, &model.q, j);
                    // unobserved j carries an implicit zero rating
                    let e = (pui - puj) - rui;

                    stats.errs += (e * e) as f64;
                    stats.loss += (e * e) as f64;

                    let ye = lr * e;
                    for f in 0..k {
                        let puf = model.p.get(u, f);
                        let qif = model.q.get(i, f);
                        let qjf = model.q.get(j, f);

                        model.p.add(u, f, -ye * (qif - qjf));
                        model.q.add(i, f, -ye * puf);
                        model.q.add(j, f, ye * puf);
                    }
                }
            }
        }

        Ok(stats)
    }

    fn predict(&self, _ctx: &TrainContext, model: &ModelState, u: usize, i: usize) -> f32 {
        DenseMatrix::row_mult(&model.p, u, &model.q, i)
    }

    fn descriptor(&self) -> String {
        "RankSgd".into()
    }
}
