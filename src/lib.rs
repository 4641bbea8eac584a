//! Iterative latent-factor training for recommender research.
//!
//! The crate factors the usual family of rating-prediction and
//! top-N-ranking models into three pieces:
//!
//! - a sparse rating substrate ([`SparseMatrix`]) with O(degree) row
//!   and column views and O(1) entry lookup,
//! - a strategy-agnostic training loop ([`Trainer`]) that drives
//!   epochs, checks convergence, detects divergence, and rolls back to
//!   the last accepted snapshot,
//! - pluggable update strategies: pointwise neighborhood SGD
//!   ([`NeighborModel`]), pairwise ranking with uniform
//!   ([`FismAuc`]) or popularity-proportional ([`RankSgd`]) negative
//!   sampling, trust-ensemble SGD ([`Rste`]), and weighted implicit
//!   ALS ([`Wrmf`]).
//!
//! Data loading, train/test splitting, and metric computation live
//! outside this crate; callers hand in a pre-built [`SparseMatrix`]
//! and read scores back through a [`Predictor`].
//!
//! ```
//! use latrec::{
//!     NeighborModel, NeighborOptions, SparseMatrix, TrainContext, TrainOptions, Trainer,
//! };
//!
//! let ratings = SparseMatrix::from_triples(
//!     2,
//!     3,
//!     &[(0, 0, 4.0), (0, 2, 1.0), (1, 1, 5.0), (1, 2, 2.0)],
//! )
//! .unwrap();
//! let mut ctx = TrainContext::new(ratings, None);
//! let mut trainer = Trainer::new(
//!     TrainOptions::default(),
//!     NeighborModel::new(NeighborOptions::default()),
//! )
//! .unwrap();
//! trainer.fit(&mut ctx).unwrap();
//! let score = trainer.predictor(&ctx).score(0, 1);
//! assert!(score.is_finite());
//! ```

pub mod common;
pub mod dense;
pub mod error;
pub mod fism;
pub mod neighbor;
pub mod ranksgd;
pub mod rste;
pub mod sampling;
pub mod sparse;
pub mod train;
pub mod wrmf;

pub use common::XorShift64;
pub use dense::{DenseMatrix, DenseVector, DiagMatrix, SymmMatrix};
pub use error::Error;
pub use fism::{FismAuc, FismOptions};
pub use neighbor::{NeighborModel, NeighborOptions};
pub use ranksgd::{RankSgd, RankSgdOptions};
pub use rste::{Rste, RsteOptions};
pub use sampling::{sample_unrated, PopularitySampler, Sampled};
pub use sparse::{ColRef, RowRef, SparseMatrix};
pub use train::{
    EpochStats, ModelState, Predictor, SessionState, TrainContext, TrainOptions, TrainOutcome,
    TrainReport, Trainer, TrainingStrategy,
};
pub use wrmf::{Wrmf, WrmfOptions};
