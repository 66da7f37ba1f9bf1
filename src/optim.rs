//!
//! # optim
//!
//! Gradient descent over the parameters of a [`Module`], and a small mini-batch
//! training loop tying model, loss and optimizer together.
//!

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::graph::{Graph, Value};
use crate::nn::Module;

/// Stochastic gradient descent, optionally with momentum
///
/// `v <- momentum * v + grad; p <- p - learning_rate * v`
#[derive(Debug)]
pub struct Sgd<'g> {
  params: Vec<Value<'g>>,
  learning_rate: f64,
  momentum: f64,
  /// Velocity per parameter node, keyed by graph and arena index
  velocity: FxHashMap<(usize, usize), f64>,
}

impl<'g> Sgd<'g> {
  pub fn new(params: Vec<Value<'g>>, learning_rate: f64) -> Self {
    Self {
      params,
      learning_rate,
      momentum: 0.0,
      velocity: FxHashMap::default(),
    }
  }

  pub fn with_momentum(mut self, momentum: f64) -> Self {
    self.momentum = momentum;
    self
  }

  pub fn learning_rate(&self) -> f64 {
    self.learning_rate
  }

  pub fn set_learning_rate(&mut self, learning_rate: f64) {
    self.learning_rate = learning_rate;
  }

  pub fn momentum(&self) -> f64 {
    self.momentum
  }

  pub fn params(&self) -> &[Value<'g>] {
    &self.params
  }

  /// Move every parameter against its gradient.
  ///
  /// Fails with `Error::InvalidState` if a parameter is not a leaf or has
  /// been released from its graph. Every parameter is checked before any is
  /// moved, so a failed step leaves data and velocities untouched.
  pub fn step(&mut self) -> Result<()> {
    let mut grads = Vec::with_capacity(self.params.len());
    for p in &self.params {
      let grad = p.try_grad()?;
      if !p.is_leaf() {
        return Err(Error::InvalidState("only leaf values can be updated"));
      }
      grads.push(grad);
    }

    let lr = self.learning_rate;
    for (p, mut update) in self.params.iter().zip(grads) {
      if self.momentum != 0.0 {
        let v = self.velocity.entry(p.node_key()).or_insert(0.0);
        *v = self.momentum * *v + update;
        update = *v;
      }
      p.update_data(|data| data - lr * update)?;
    }
    debug!("sgd step over {} parameters (lr = {lr})", self.params.len());
    Ok(())
  }

  /// Reset the gradient of every parameter to 0.0
  pub fn zero_grad(&self) {
    for p in &self.params {
      p.zero_grad();
    }
  }
}

/// Mini-batch training settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainConfig {
  pub epochs: usize,
  pub batch_size: usize,
  /// Log the loss every this many epochs, 0 disables progress logging
  pub log_every: usize,
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self {
      epochs: 100,
      batch_size: 1,
      log_every: 100,
    }
  }
}

impl TrainConfig {
  pub fn with_epochs(mut self, epochs: usize) -> Self {
    self.epochs = epochs;
    self
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  pub fn with_log_every(mut self, log_every: usize) -> Self {
    self.log_every = log_every;
    self
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
  /// Loss of the last batch processed
  pub final_loss: f64,
  /// Loss of the last batch of every epoch
  pub history: Vec<f64>,
}

/// Train `model` on `(inputs, targets)`...
///
/// Each batch is evaluated on a fresh section of the graph: the first output
/// of the model is taken as the prediction for a sample, the loss of the batch
/// is differentiated, the optimizer steps and zeroes gradients, and every node
/// built for the batch is released again. Parameters must therefore be created
/// before calling this.
pub fn optimize<'g, M, L>(
  graph: &'g Graph,
  model: &M,
  optimizer: &mut Sgd<'g>,
  loss_fn: L,
  inputs: &[Vec<f64>],
  targets: &[f64],
  config: &TrainConfig,
) -> Result<TrainReport>
where
  M: Module<'g> + ?Sized,
  L: Fn(&[f64], &[Value<'g>]) -> Result<Value<'g>>,
{
  if inputs.len() != targets.len() {
    return Err(Error::ShapeMismatch {
      expected: inputs.len(),
      actual: targets.len(),
    });
  }
  if inputs.is_empty() {
    return Err(Error::InvalidArgument("cannot train on an empty dataset".to_string()));
  }
  if config.batch_size == 0 {
    return Err(Error::InvalidArgument("batch size must be positive".to_string()));
  }

  let mut history = Vec::with_capacity(config.epochs);
  let mut loss = f64::NAN;
  for epoch in 0..config.epochs {
    let batches = inputs
      .chunks(config.batch_size)
      .zip(targets.chunks(config.batch_size));
    for (batch_inputs, batch_targets) in batches {
      let checkpoint = graph.checkpoint();
      let result = train_batch(graph, model, optimizer, &loss_fn, batch_inputs, batch_targets);
      graph.rewind(checkpoint);
      loss = result?;
    }
    history.push(loss);

    if !loss.is_finite() {
      warn!("loss is no longer finite at epoch {epoch}: {loss}");
    }
    if config.log_every > 0 && epoch % config.log_every == 0 {
      info!("Epoch: {epoch}, Loss: {loss}");
    }
  }

  Ok(TrainReport {
    final_loss: loss,
    history,
  })
}

fn train_batch<'g, M, L>(
  graph: &'g Graph,
  model: &M,
  optimizer: &mut Sgd<'g>,
  loss_fn: &L,
  inputs: &[Vec<f64>],
  targets: &[f64],
) -> Result<f64>
where
  M: Module<'g> + ?Sized,
  L: Fn(&[f64], &[Value<'g>]) -> Result<Value<'g>>,
{
  let mut predictions = Vec::with_capacity(inputs.len());
  for x in inputs {
    let x = graph.leaves(x);
    let output = model.forward(&x)?;
    let Some(&prediction) = output.first() else {
      return Err(Error::InvalidArgument("model produced no outputs".to_string()));
    };
    predictions.push(prediction);
  }

  let loss = loss_fn(targets, &predictions)?;
  loss.backward()?;
  optimizer.step()?;
  optimizer.zero_grad();
  Ok(loss.data())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loss::mse_loss;
  use crate::nn::{Activation, Neuron};
  use approx::assert_abs_diff_eq;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  mod sgd {
    use super::*;

    #[test]
    fn step() {
      let graph = Graph::new();
      let p = graph.leaf(1.0);
      p.set_grad(2.0);
      let mut sgd = Sgd::new(vec![p], 0.1);
      sgd.step().unwrap();
      assert_abs_diff_eq!(p.data(), 0.8, epsilon = 1e-12);
      // step leaves gradients alone
      assert_eq!(p.grad(), 2.0);
    }

    #[test]
    fn momentum() {
      let graph = Graph::new();
      let p = graph.leaf(0.0);
      let mut sgd = Sgd::new(vec![p], 1.0).with_momentum(0.5);
      p.set_grad(1.0);
      sgd.step().unwrap();
      assert_abs_diff_eq!(p.data(), -1.0, epsilon = 1e-12);
      sgd.step().unwrap();
      // v = 0.5 * 1 + 1
      assert_abs_diff_eq!(p.data(), -2.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_grad() {
      let graph = Graph::new();
      let params = graph.leaves(&[1.0, 2.0]);
      let loss = params[0].mul(params[1]);
      loss.backward().unwrap();
      let sgd = Sgd::new(params.clone(), 0.1);
      sgd.zero_grad();
      assert!(params.iter().all(|p| p.grad() == 0.0));
    }

    #[test]
    fn computed_parameter() {
      let graph = Graph::new();
      let p = graph.leaf(1.0).exp();
      let mut sgd = Sgd::new(vec![p], 0.1);
      assert!(matches!(sgd.step(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn released_parameter() {
      let graph = Graph::new();
      let p = graph.leaf(1.0);
      let mut sgd = Sgd::new(vec![p], 0.1);
      graph.clear();
      assert!(matches!(sgd.step(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn failed_step_moves_nothing() {
      let graph = Graph::new();
      let a = graph.leaf(1.0);
      let b = graph.leaf(2.0);
      let computed = a.exp();
      a.set_grad(1.0);
      b.set_grad(1.0);
      let mut sgd = Sgd::new(vec![a, b, computed], 0.5).with_momentum(0.9);
      assert!(matches!(sgd.step(), Err(Error::InvalidState(_))));
      assert_eq!(a.data(), 1.0);
      assert_eq!(b.data(), 2.0);
      assert!(sgd.velocity.is_empty());
    }

    #[test]
    fn released_parameter_moves_nothing() {
      let graph = Graph::new();
      let a = graph.leaf(1.0);
      a.set_grad(1.0);
      let checkpoint = graph.checkpoint();
      let released = graph.leaf(3.0);
      graph.rewind(checkpoint);
      let mut sgd = Sgd::new(vec![a, released], 0.5);
      assert!(matches!(sgd.step(), Err(Error::InvalidState(_))));
      assert_eq!(a.data(), 1.0);
    }

    #[test]
    fn velocity_per_graph() {
      let first = Graph::new();
      let second = Graph::new();
      // both parameters sit at arena index 0 of their graph
      let p = first.leaf(0.0);
      let q = second.leaf(0.0);
      p.set_grad(1.0);
      let mut sgd = Sgd::new(vec![p, q], 1.0).with_momentum(0.5);
      sgd.step().unwrap();
      sgd.step().unwrap();
      assert_abs_diff_eq!(p.data(), -2.5, epsilon = 1e-12);
      assert_eq!(q.data(), 0.0);
    }
  }

  mod train {
    use super::*;

    fn line() -> (Vec<Vec<f64>>, Vec<f64>) {
      let xs = [-1.0, -0.5, 0.0, 0.5, 1.0];
      let inputs = xs.iter().map(|&x| vec![x]).collect();
      let targets = xs.iter().map(|&x| 2.0 * x + 1.0).collect();
      (inputs, targets)
    }

    #[test]
    fn linear_regression() {
      let graph = Graph::new();
      let mut rng = StdRng::seed_from_u64(5);
      let model = Neuron::with_rng(&graph, 1, Activation::Linear, &mut rng);
      let mut sgd = Sgd::new(model.parameters(), 0.1);
      let (inputs, targets) = line();
      let config = TrainConfig::default().with_epochs(500).with_batch_size(5);

      let report = optimize(
        &graph,
        &model,
        &mut sgd,
        |targets, predictions| mse_loss(targets, predictions),
        &inputs,
        &targets,
        &config,
      )
      .unwrap();

      assert_eq!(report.history.len(), 500);
      assert!(report.final_loss < 1e-6);
      assert!(report.history[0] > report.final_loss);
      assert_abs_diff_eq!(model.weights()[0].data(), 2.0, epsilon = 1e-3);
      assert_abs_diff_eq!(model.bias().data(), 1.0, epsilon = 1e-3);
      // only the parameters survive training
      assert_eq!(graph.len(), 2);
      assert!(model.parameters().iter().all(|p| p.grad() == 0.0));
    }

    #[test]
    fn zero_batch_size() {
      let graph = Graph::new();
      let model = Neuron::new(&graph, 1, Activation::Linear);
      let mut sgd = Sgd::new(model.parameters(), 0.1);
      let (inputs, targets) = line();
      let config = TrainConfig::default().with_batch_size(0);
      let result = optimize(
        &graph,
        &model,
        &mut sgd,
        |targets, predictions| mse_loss(targets, predictions),
        &inputs,
        &targets,
        &config,
      );
      assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn empty_dataset() {
      let graph = Graph::new();
      let model = Neuron::new(&graph, 1, Activation::Linear);
      let mut sgd = Sgd::new(model.parameters(), 0.1);
      let result = optimize(
        &graph,
        &model,
        &mut sgd,
        |targets, predictions| mse_loss(targets, predictions),
        &[],
        &[],
        &TrainConfig::default().with_epochs(3),
      );
      assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn mismatched_samples() {
      let graph = Graph::new();
      let model = Neuron::new(&graph, 1, Activation::Linear);
      let mut sgd = Sgd::new(model.parameters(), 0.1);
      let (inputs, _) = line();
      let result = optimize(
        &graph,
        &model,
        &mut sgd,
        |targets, predictions| mse_loss(targets, predictions),
        &inputs,
        &[1.0],
        &TrainConfig::default(),
      );
      assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn failing_batch_releases_nodes() {
      let graph = Graph::new();
      let model = Neuron::new(&graph, 2, Activation::Linear);
      let mut sgd = Sgd::new(model.parameters(), 0.1);
      // samples with the wrong arity make the forward pass fail
      let inputs = vec![vec![1.0]];
      let result = optimize(
        &graph,
        &model,
        &mut sgd,
        |targets, predictions| mse_loss(targets, predictions),
        &inputs,
        &[1.0],
        &TrainConfig::default(),
      );
      assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
      assert_eq!(graph.len(), 3);
    }
  }
}
