//! Factored item-similarity ranking: items are embedded twice (as
//! history and as target), a user is represented by the items they
//! rated, and training minimizes a squared pairwise loss between each
//! observed item and sampled unobserved ones.

use serde::{Deserialize, Serialize};

use crate::common::XorShift64;
use crate::dense::{DenseMatrix, DenseVector};
use crate::error::Error;
use crate::sampling::sample_unrated;
use crate::train::{EpochStats, ModelState, TrainContext, TrainOptions, TrainingStrategy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FismOptions {
    /// Negatives sampled per observed entry.
    pub rho: usize,
    /// Exponent of the rated-set size normalizer.
    pub alpha: f32,
    pub reg_beta: f32,
    pub reg_gamma: f32,
}

impl Default for FismOptions {
    fn default() -> Self {
        Self {
            rho: 5,
            alpha: 0.5,
            reg_beta: 0.01,
            reg_gamma: 0.01,
        }
    }
}

#[derive(Debug)]
pub struct FismAuc {
    opts: FismOptions,
}

impl FismAuc {
    pub fn new(opts: FismOptions) -> Self {
        Self { opts }
    }
}

impl TrainingStrategy for FismAuc {
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error> {
        if self.opts.rho == 0 {
            return Err(Error::Config("rho must be at least 1".into()));
        }
        let num_items = ctx.num_items();
        let k = opts.num_factors;

        // both factor matrices are item-indexed: p embeds an item as
        // history, q as prediction target
        model.p = DenseMatrix::zeros(num_items, k);
        model.q = DenseMatrix::zeros(num_items, k);
        model.p.init_uniform(rng, 0.01);
        model.q.init_uniform(rng, 0.01);
        model.item_bias = DenseVector::zeros(num_items);
        model.item_bias.init_uniform(rng, 0.01);

        ctx.train.binarize();
        Ok(())
    }

    fn update_epoch(
        &mut self,
        opts: &TrainOptions,
        ctx: &TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<EpochStats, Error> {
        let num_items = ctx.num_items();
        let k = opts.num_factors;
        let lr = opts.learning_rate;
        let reg_beta = self.opts.reg_beta;
        let reg_gamma = self.opts.reg_gamma;
        let alpha = self.opts.alpha;
        let mut stats = EpochStats::default();
        let mut x = vec![0.0f32; k];

        for u in 0..ctx.num_users() {
            let row = ctx.train.row(u);
            let rated = row.indices();
            let count = rated.len();

            for (pos, &i_raw) in rated.iter().enumerate() {
                let i = i_raw as usize;
                let rui = row.values()[pos];

                let negatives = sample_unrated(num_items, row, self.opts.rho, rng);
                let negatives = negatives.items();
                if negatives.is_empty() {
                    continue;
                }

                let wu = if count > 1 {
                    ((count - 1) as f32).powf(-alpha)
                } else {
                    0.0
                };
                let wn = (count as f32).powf(-alpha);
                x.fill(0.0);

                for &j_raw in negatives {
                    let j = j_raw as usize;

                    let mut sum_i = 0.0f32;
                    let mut sum_j = 0.0f32;
                    for &k_raw in rated {
                        let k_item = k_raw as usize;
                        if k_item != i {
                            sum_i += DenseMatrix::row_mult(&model.p, k_item, &model.q, i);
                        }
                        sum_j += DenseMatrix::row_mult(&model.p, k_item, &model.q, j);
                    }

                    let bi = model.item_bias.get(i);
                    let bj = model.item_bias.get(j);
                    let pui = bi + wu * sum_i;
                    let puj = bj + wn * sum_j;
                    // unobserved j has an implicit zero rating
                    let eij = rui - (pui - puj);

                    stats.errs += (eij * eij) as f64;
                    stats.loss += (eij * eij) as f64;

                    // antisymmetric bias step across the pair
                    model.item_bias.add(i, lr * (eij - reg_gamma * bi));
                    model.item_bias.add(j, -lr * (eij - reg_gamma * bj));
                    stats.loss += (reg_gamma * bi * bi + reg_gamma * bj * bj) as f64;

                    for f in 0..k {
                        let qif = model.q.get(i, f);
                        let qjf = model.q.get(j, f);

                        let mut sum_k = 0.0f32;
                        for &k_raw in rated {
                            let k_item = k_raw as usize;
                            if k_item != i {
                                sum_k += model.p.get(k_item, f);
                            }
                        }

                        model.q.add(i, f, lr * (eij * wu * sum_k - reg_beta * qif));
                        model.q.add(j, f, -lr * (eij * wu * sum_k - reg_beta * qjf));

                        x[f] += eij * (qif - qjf);
                        stats.loss += (reg_beta * qif * qif + reg_beta * qjf * qjf) as f64;
                    }
                }

                // deferred history update, averaged over the negatives
                // actually drawn
                let drawn = negatives.len() as f32;
                for &j_raw in rated {
                    let j = j_raw as usize;
                    if j == i {
                        continue;
                    }
                    for f in 0..k {
                        let pjf = model.p.get(j, f);
                        let delta = wu * x[f] / drawn - reg_beta * pjf;
                        model.p.add(j, f, lr * delta);
                        stats.loss += (reg_beta * pjf * pjf) as f64;
                    }
                }
            }
        }

        Ok(stats)
    }

    fn predict(&self, ctx: &TrainContext, model: &ModelState, u: usize, i: usize) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for (j, _) in ctx.train.row(u).iter() {
            let j = j as usize;
            if j != i {
                sum += DenseMatrix::row_mult(&model.p, j, &model.q, i);
                count += 1;
            }
        }
        let wu = if count > 0 {
            (count as f32).powf(-self.opts.alpha)
        } else {
            0.0
        };
        model.item_bias.get(i) + wu * sum
    }

    fn descriptor(&self) -> String {
        format!(
            "FismAuc,{},{},{},{}",
            self.opts.rho, self.opts.alpha, self.opts.reg_beta, self.opts.reg_gamma
        )
    }
}
