//! Neighborhood model with learned item-item similarities: the score
//! for (u, j) blends the global mean, user/item biases, and a
//! sqrt-normalized weighted sum over the items u co-rated with j.

use serde::{Deserialize, Serialize};

use crate::common::XorShift64;
use crate::dense::{DenseVector, SymmMatrix};
use crate::error::Error;
use crate::train::{EpochStats, ModelState, TrainContext, TrainOptions, TrainingStrategy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NeighborOptions {
    /// Constrain similarities to stay positive: initialize in
    /// [0, 0.01] and treat only entries above zero as neighbors.
    pub pos_only: bool,
}

#[derive(Debug)]
pub struct NeighborModel {
    opts: NeighborOptions,
    min_sim: f32,
}

impl NeighborModel {
    pub fn new(opts: NeighborOptions) -> Self {
        let min_sim = if opts.pos_only { 0.0 } else { f32::NEG_INFINITY };
        Self { opts, min_sim }
    }
}

impl TrainingStrategy for NeighborModel {
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error> {
        let num_users = ctx.num_users();
        let num_items = ctx.num_items();

        model.user_bias = DenseVector::zeros(num_users);
        model.item_bias = DenseVector::zeros(num_items);
        model.user_bias.init_gaussian(rng, opts.init_mean, opts.init_std);
        model.item_bias.init_gaussian(rng, opts.init_mean, opts.init_std);

        // items without any training ratings never act as neighbors;
        // leaving their similarity rows at zero keeps them inert
        let mut corrs = SymmMatrix::zeros(num_items);
        for i in 0..num_items {
            if ctx.train.column_size(i) == 0 {
                continue;
            }
            for j in (i + 1)..num_items {
                if ctx.train.column_size(j) == 0 {
                    continue;
                }
                let val = if self.opts.pos_only {
                    rng.next_f32() * 0.01
                } else {
                    opts.init_mean + opts.init_std * rng.next_gaussian()
                };
                corrs.set(i, j, val);
            }
        }
        model.item_corrs = Some(corrs);
        Ok(())
    }

    fn update_epoch(
        &mut self,
        opts: &TrainOptions,
        ctx: &TrainContext,
        model: &mut ModelState,
        _rng: &mut XorShift64,
    ) -> Result<EpochStats, Error> {
        let mean = ctx.global_mean;
        let lr = opts.learning_rate;
        let reg_u = opts.reg_user;
        let reg_i = opts.reg_item;
        let mut stats = EpochStats::default();

        for (u, j, ruj) in ctx.train.entries() {
            let corrs = model.item_corrs.as_mut().expect("initialized");

            // co-rated neighbors of j, with ratings captured up front
            let neighbors: Vec<(usize, f32)> = ctx
                .train
                .row_excluding(u, j)
                .filter(|&(i, _)| corrs.get(j, i as usize) > self.min_sim)
                .map(|(i, r)| (i as usize, r))
                .collect();
            let w = (neighbors.len() as f32).sqrt();

            let bu = model.user_bias.get(u);
            let bj = model.item_bias.get(j);
            let mut pred = mean + bu + bj;
            let mut sum_sji = 0.0f32;
            for &(i, rui) in &neighbors {
                let sji = corrs.get(j, i);
                let bui = mean + bu + model.item_bias.get(i);
                pred += sji * (rui - bui) / w;
                sum_sji += sji / w;
            }

            let euj = ruj - pred;
            stats.errs += (euj * euj) as f64;
            stats.loss += (euj * euj) as f64;

            // similarities first: their gradient reads the bias values
            // the prediction was computed with
            for &(i, rui) in &neighbors {
                let sji = corrs.get(j, i);
                let bui = mean + bu + model.item_bias.get(i);
                let delta = lr * (euj * (rui - bui) / w - reg_u * sji);
                corrs.add(j, i, delta);
                stats.loss += (reg_u * sji * sji) as f64;
            }

            let sgd = euj * (1.0 - sum_sji) - reg_u * bu;
            model.user_bias.add(u, lr * sgd);
            stats.loss += (reg_u * bu * bu) as f64;

            let sgd = euj * (1.0 - sum_sji) - reg_i * bj;
            model.item_bias.add(j, lr * sgd);
            stats.loss += (reg_i * bj * bj) as f64;
        }

        Ok(stats)
    }

    fn predict(&self, ctx: &TrainContext, model: &ModelState, u: usize, j: usize) -> f32 {
        let corrs = match &model.item_corrs {
            Some(c) => c,
            None => return ctx.global_mean,
        };
        let mean = ctx.global_mean;
        let bu = model.user_bias.get(u);
        let mut pred = mean + bu + model.item_bias.get(j);

        let mut count = 0usize;
        let mut sum = 0.0f32;
        for (i, rui) in ctx.train.row_excluding(u, j) {
            let sji = corrs.get(j, i as usize);
            if sji != 0.0 && sji > self.min_sim {
                let bui = mean + bu + model.item_bias.get(i as usize);
                sum += sji * (rui - bui);
                count += 1;
            }
        }
        if count > 0 {
            pred += sum / (count as f32).sqrt();
        }
        pred
    }

    fn descriptor(&self) -> String {
        format!("NeighborModel,{}", self.opts.pos_only)
    }
}
