//! The shared training loop: epoch driver, convergence and divergence
//! policy, and snapshot/rollback of model state. Algorithms plug in as
//! [`TrainingStrategy`] implementations; the loop itself never knows
//! which objective it is minimizing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::XorShift64;
use crate::dense::{DenseMatrix, DenseVector, SymmMatrix};
use crate::error::Error;
use crate::sparse::SparseMatrix;

// ── Options ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub num_factors: usize,
    pub learning_rate: f32,
    pub max_iters: usize,
    /// Relative loss change below which training stops.
    pub convergence_threshold: f64,
    /// Relative growth over the best epoch loss that counts as
    /// divergence.
    pub divergence_threshold: f64,
    pub reg_user: f32,
    pub reg_item: f32,
    pub init_mean: f32,
    pub init_std: f32,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            num_factors: 10,
            learning_rate: 0.01,
            max_iters: 100,
            convergence_threshold: 1e-5,
            divergence_threshold: 10.0,
            reg_user: 0.01,
            reg_item: 0.01,
            init_mean: 0.0,
            init_std: 0.1,
            seed: 1,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_factors == 0 {
            return Err(Error::Config("num_factors must be at least 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::Config("learning_rate must be positive".into()));
        }
        if self.max_iters == 0 {
            return Err(Error::Config("max_iters must be at least 1".into()));
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(Error::Config("convergence_threshold must be positive".into()));
        }
        if !(self.divergence_threshold > 1.0) {
            return Err(Error::Config("divergence_threshold must exceed 1".into()));
        }
        if self.reg_user < 0.0 || self.reg_item < 0.0 {
            return Err(Error::Config("regularization must be non-negative".into()));
        }
        if self.init_std < 0.0 {
            return Err(Error::Config("init_std must be non-negative".into()));
        }
        Ok(())
    }
}

// ── Data context ──────────────────────────────────────────────────────────

/// Training inputs and their global statistics. Owns the rating matrix
/// (and the trust graph, when present) for the lifetime of a session;
/// strategies may binarize the owned values during `init_model`.
#[derive(Debug, Clone)]
pub struct TrainContext {
    pub train: SparseMatrix,
    pub social: Option<SparseMatrix>,
    pub global_mean: f32,
    pub min_rate: f32,
    pub max_rate: f32,
}

impl TrainContext {
    pub fn new(train: SparseMatrix, social: Option<SparseMatrix>) -> Self {
        let mut sum = 0.0f64;
        let mut min_rate = f32::INFINITY;
        let mut max_rate = f32::NEG_INFINITY;
        for (_, _, r) in train.entries() {
            sum += r as f64;
            min_rate = min_rate.min(r);
            max_rate = max_rate.max(r);
        }
        let global_mean = if train.size() > 0 {
            (sum / train.size() as f64) as f32
        } else {
            0.0
        };
        if train.size() == 0 {
            min_rate = 0.0;
            max_rate = 0.0;
        }
        Self {
            train,
            social,
            global_mean,
            min_rate,
            max_rate,
        }
    }

    pub fn num_users(&self) -> usize {
        self.train.n_rows()
    }

    pub fn num_items(&self) -> usize {
        self.train.n_cols()
    }

    /// Min-max rating normalization into [0, 1]. Binary data maps to
    /// full intensity.
    #[inline]
    pub fn normalize(&self, r: f32) -> f32 {
        let span = self.max_rate - self.min_rate;
        if span > 0.0 {
            (r - self.min_rate) / span
        } else {
            1.0
        }
    }

    #[inline]
    pub fn denormalize(&self, v: f32) -> f32 {
        self.min_rate + v * (self.max_rate - self.min_rate)
    }
}

// ── Model state ───────────────────────────────────────────────────────────

/// User/item factor matrices, bias vectors, and the optional item-item
/// correlation matrix. A strategy allocates the slots it uses in
/// `init_model` and leaves the rest empty; the whole struct clones
/// cheaply enough to serve as the rollback snapshot.
#[derive(Debug, Clone)]
pub struct ModelState {
    pub p: DenseMatrix,
    pub q: DenseMatrix,
    pub user_bias: DenseVector,
    pub item_bias: DenseVector,
    pub item_corrs: Option<SymmMatrix>,
}

impl ModelState {
    pub fn unallocated() -> Self {
        Self {
            p: DenseMatrix::empty(),
            q: DenseMatrix::empty(),
            user_bias: DenseVector::empty(),
            item_bias: DenseVector::empty(),
            item_corrs: None,
        }
    }
}

/// Raw per-epoch accumulators; the controller halves both at epoch end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpochStats {
    pub loss: f64,
    pub errs: f64,
}

// ── Strategy contract ─────────────────────────────────────────────────────

pub trait TrainingStrategy {
    /// Allocate and initialize the model slots this strategy uses, and
    /// any sampling structures. May binarize the training values.
    fn init_model(
        &mut self,
        opts: &TrainOptions,
        ctx: &mut TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<(), Error>;

    /// One full pass over the observed data, mutating the model in
    /// place. Returns raw loss / squared-error accumulators.
    fn update_epoch(
        &mut self,
        opts: &TrainOptions,
        ctx: &TrainContext,
        model: &mut ModelState,
        rng: &mut XorShift64,
    ) -> Result<EpochStats, Error>;

    /// Score (user, item) against the current model. Read-only.
    fn predict(&self, ctx: &TrainContext, model: &ModelState, u: usize, i: usize) -> f32;

    /// Short description of the algorithm and its hyper-parameters.
    fn descriptor(&self) -> String;
}

// ── Controller ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    Converged,
    MaxIterReached,
    Diverged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Iterating,
    Done(TrainOutcome),
}

#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    pub iters: usize,
    pub loss: f64,
    pub errs: f64,
}

pub struct Trainer<S: TrainingStrategy> {
    opts: TrainOptions,
    strategy: S,
    model: ModelState,
    rng: XorShift64,
    state: SessionState,
}

impl<S: TrainingStrategy> Trainer<S> {
    pub fn new(opts: TrainOptions, strategy: S) -> Result<Self, Error> {
        opts.validate()?;
        let rng = XorShift64::new(opts.seed);
        Ok(Self {
            opts,
            strategy,
            model: ModelState::unallocated(),
            rng,
            state: SessionState::Uninitialized,
        })
    }

    pub fn options(&self) -> &TrainOptions {
        &self.opts
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &ModelState {
        &self.model
    }

    /// Run the full training loop: initialize, iterate epochs, stop on
    /// convergence, the iteration budget, or divergence (with rollback
    /// to the last accepted snapshot).
    pub fn fit(&mut self, ctx: &mut TrainContext) -> Result<TrainReport, Error> {
        self.strategy
            .init_model(&self.opts, ctx, &mut self.model, &mut self.rng)?;
        self.state = SessionState::Initialized;
        info!(
            algo = %self.strategy.descriptor(),
            users = ctx.num_users(),
            items = ctx.num_items(),
            observed = ctx.train.size(),
            "training session started"
        );

        let mut snapshot = self.model.clone();
        let mut last_loss = f64::NAN;
        let mut best_loss = f64::INFINITY;
        let mut outcome = TrainOutcome::MaxIterReached;
        let mut loss = 0.0f64;
        let mut errs = 0.0f64;
        let mut iters = 0;

        self.state = SessionState::Iterating;
        for iter in 1..=self.opts.max_iters {
            let stats = self
                .strategy
                .update_epoch(&self.opts, ctx, &mut self.model, &mut self.rng)?;
            loss = 0.5 * stats.loss;
            errs = 0.5 * stats.errs;
            iters = iter;

            let diverged = !loss.is_finite()
                || (best_loss.is_finite() && loss > best_loss * self.opts.divergence_threshold);
            if diverged {
                warn!(iter, loss, "loss diverged, restoring last accepted model");
                self.model = snapshot;
                outcome = TrainOutcome::Diverged;
                break;
            }

            snapshot = self.model.clone();
            debug!(iter, loss, errs, "epoch accepted");

            if iter > 1 {
                let delta = (last_loss - loss).abs() / last_loss.abs().max(f64::MIN_POSITIVE);
                if delta < self.opts.convergence_threshold {
                    outcome = TrainOutcome::Converged;
                    break;
                }
            }
            last_loss = loss;
            if loss < best_loss {
                best_loss = loss;
            }
        }

        self.state = SessionState::Done(outcome);
        info!(?outcome, iters, loss, "training session finished");
        Ok(TrainReport {
            outcome,
            iters,
            loss,
            errs,
        })
    }

    /// Score against the current model state, at any point in the
    /// session.
    pub fn score(&self, ctx: &TrainContext, u: usize, i: usize) -> f32 {
        self.strategy.predict(ctx, &self.model, u, i)
    }

    pub fn predictor<'a>(&'a self, ctx: &'a TrainContext) -> Predictor<'a, S> {
        Predictor {
            strategy: &self.strategy,
            model: &self.model,
            ctx,
        }
    }

    /// Consume the session and hand the trained state to the caller
    /// for persistence.
    pub fn into_model(self) -> ModelState {
        self.model
    }
}

// ── Predictor ─────────────────────────────────────────────────────────────

/// Read-only scoring view over a trained (or in-training) model.
pub struct Predictor<'a, S: TrainingStrategy> {
    strategy: &'a S,
    model: &'a ModelState,
    ctx: &'a TrainContext,
}

impl<S: TrainingStrategy> Predictor<'_, S> {
    pub fn score(&self, u: usize, i: usize) -> f32 {
        self.strategy.predict(self.ctx, self.model, u, i)
    }
}
