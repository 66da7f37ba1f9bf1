use thiserror::Error;

/// Errors raised while building or differentiating a graph.
///
/// Floating point degeneracy is not an error: dividing by a zero valued node or
/// overflowing simply yields IEEE infinities/NaNs, which propagate through both
/// the forward and the backward pass. Only `ln` rejects inputs outside its domain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
  #[error("{op} is undefined for {value}")]
  Domain { op: &'static str, value: f64 },

  #[error("unsupported operation: {0}")]
  UnsupportedOperation(&'static str),

  #[error("invalid state: {0}")]
  InvalidState(&'static str),

  #[error("shape mismatch: expected {expected}, got {actual}")]
  ShapeMismatch { expected: usize, actual: usize },

  #[error("invalid argument: {0}")]
  InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;
