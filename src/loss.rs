//!
//! # loss
//!
//! Losses built from graph operations, so the result can be differentiated
//! back into the predictions that produced it.
//!

use crate::error::{Error, Result};
use crate::graph::{IntoValue, Value};

/// Mean squared error, `Σ (target - prediction)² / n`, expressed with the
/// primitive operations so it can be differentiated like any other value
pub fn mse_loss<'g, T>(targets: &[T], predictions: &[Value<'g>]) -> Result<Value<'g>>
where
  T: IntoValue<'g> + Copy,
{
  if targets.len() != predictions.len() {
    return Err(Error::ShapeMismatch {
      expected: predictions.len(),
      actual: targets.len(),
    });
  }
  let Some(first) = predictions.first() else {
    return Err(Error::InvalidArgument("mse of an empty batch".to_string()));
  };

  let graph = first.graph();
  let squared = targets
    .iter()
    .zip(predictions)
    .map(|(&target, prediction)| target.into_value(graph).sub(prediction).powf(2.0));
  Ok(graph.sum(squared).div(predictions.len() as f64))
}
