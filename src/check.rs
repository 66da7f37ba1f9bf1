//!
//! # check
//!
//! Finite difference derivatives of plain numeric functions, used as an
//! oracle for the gradients computed by the graph.
//!

use crate::error::{Error, Result};

/// Step that keeps truncation and cancellation error both around 1e-7 for
/// well scaled f64 functions
pub const DEFAULT_STEP: f64 = 1e-7;

/// `(f(x + h) - f(x - h)) / 2h` with respect to argument `argno`, the other
/// arguments held fixed
pub fn symmetric_derivative<F>(f: F, args: &[f64], argno: usize, h: f64) -> Result<f64>
where
  F: Fn(&[f64]) -> f64,
{
  if argno >= args.len() {
    return Err(Error::InvalidArgument(format!(
      "argument {argno} out of range for {} arguments",
      args.len()
    )));
  }
  Ok(central_difference(&f, args, argno, h))
}

/// Symmetric derivative with respect to every argument in turn
pub fn all_derivatives<F>(f: F, args: &[f64], h: f64) -> Vec<f64>
where
  F: Fn(&[f64]) -> f64,
{
  (0..args.len())
    .map(|argno| central_difference(&f, args, argno, h))
    .collect()
}

fn central_difference<F>(f: &F, args: &[f64], argno: usize, h: f64) -> f64
where
  F: Fn(&[f64]) -> f64,
{
  let mut shifted = args.to_vec();
  shifted[argno] = args[argno] + h;
  let plus = f(&shifted);
  shifted[argno] = args[argno] - h;
  let minus = f(&shifted);
  (plus - minus) / (2.0 * h)
}
