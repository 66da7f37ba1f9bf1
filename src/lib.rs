//!
//! # scalar-auto
//!
//! ## Core API
//!
//! Scalar reverse-mode automatic differentiation. Arithmetic on [`Value`]s is
//! evaluated eagerly while recording a graph of the computation in a [`Graph`]
//! arena; [`Value::backward`] then accumulates the gradient of that value into
//! every value it was computed from, in a single reverse topological sweep.
//!
//! ```
//! use scalar_auto::Graph;
//!
//! let graph = Graph::new();
//! let x = graph.leaf(3.0);
//! let y = x.mul(x).add(1.0);
//! y.backward().unwrap();
//! assert_eq!(y.data(), 10.0);
//! assert_eq!(x.grad(), 6.0);
//! ```
//!
//! Built on top of the graph are a few small collaborators: [`nn`] for
//! neurons, layers and perceptrons, [`loss`] and [`optim`] for training them,
//! and [`check`] for finite difference derivatives.
//!
//! ## Errors
//!
//! `ln` of a non-positive value fails with [`Error::Domain`] and `pow` with a
//! graph node exponent fails with [`Error::UnsupportedOperation`]. Division by
//! zero does not fail, it yields IEEE infinities/NaNs like plain `f64`
//! arithmetic would.
//!

pub mod check;
pub mod error;
pub mod graph;
pub mod loss;
pub mod nn;
pub mod optim;

pub use error::{Error, Result};
pub use graph::{Checkpoint, Exponent, Graph, IntoValue, Value};
pub use loss::mse_loss;
pub use nn::{Activation, Layer, Mlp, Module, Neuron};
pub use optim::{optimize, Sgd, TrainConfig, TrainReport};
