use thiserror::Error;

/// Failures surfaced by the training engine. Index violations are
/// programming errors in the caller and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("duplicate entry at ({row}, {col})")]
    DuplicateEntry { row: u32, col: u32 },

    #[error("normal-equation system for {side} {index} is not positive definite")]
    SingularSystem { side: &'static str, index: usize },
}
