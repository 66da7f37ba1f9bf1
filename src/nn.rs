//!
//! # nn
//!
//! Feed-forward networks composed purely from the primitive operations of
//! [`crate::graph`]: neurons, fully connected layers and multi-layer
//! perceptrons.
//!

use std::fmt;

use rand::Rng;

use crate::error::{Error, Result};
use crate::graph::{Graph, Value};

/// Non-linearity applied to the output of a neuron
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
  /// Identity, the weighted sum is passed through unchanged
  #[default]
  Linear,
  Relu,
  Tanh,
  Sigmoid,
}

impl Activation {
  #[inline]
  pub fn apply<'g>(self, x: Value<'g>) -> Value<'g> {
    match self {
      Activation::Linear => x,
      Activation::Relu => x.relu(),
      Activation::Tanh => x.tanh(),
      Activation::Sigmoid => x.sigmoid(),
    }
  }
}

impl fmt::Display for Activation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Activation::Linear => "linear",
      Activation::Relu => "relu",
      Activation::Tanh => "tanh",
      Activation::Sigmoid => "sigmoid",
    };
    f.write_str(name)
  }
}

/// Anything with trainable parameters living in a graph
pub trait Module<'g> {
  /// Evaluate the module on `inputs`, building new nodes in the graph
  fn forward(&self, inputs: &[Value<'g>]) -> Result<Vec<Value<'g>>>;

  /// Every trainable value, flattened
  fn parameters(&self) -> Vec<Value<'g>>;

  fn zero_grad(&self) {
    for p in self.parameters() {
      p.zero_grad();
    }
  }
}

/// `activation(w · x + b)`
#[derive(Debug, Clone)]
pub struct Neuron<'g> {
  weights: Vec<Value<'g>>,
  bias: Value<'g>,
  activation: Activation,
}

impl<'g> Neuron<'g> {
  /// Weights and bias are drawn uniformly from [-1, 1)
  pub fn new(graph: &'g Graph, n_inputs: usize, activation: Activation) -> Self {
    Self::with_rng(graph, n_inputs, activation, &mut rand::thread_rng())
  }

  pub fn with_rng<R: Rng + ?Sized>(
    graph: &'g Graph,
    n_inputs: usize,
    activation: Activation,
    rng: &mut R,
  ) -> Self {
    let weights = (0..n_inputs)
      .map(|_| graph.leaf(rng.gen_range(-1.0..1.0)))
      .collect();
    let bias = graph.leaf(rng.gen_range(-1.0..1.0));
    Self {
      weights,
      bias,
      activation,
    }
  }

  pub fn from_parameters(weights: Vec<Value<'g>>, bias: Value<'g>, activation: Activation) -> Self {
    Self {
      weights,
      bias,
      activation,
    }
  }

  pub fn n_inputs(&self) -> usize {
    self.weights.len()
  }

  pub fn weights(&self) -> &[Value<'g>] {
    &self.weights
  }

  pub fn bias(&self) -> Value<'g> {
    self.bias
  }

  pub fn activation(&self) -> Activation {
    self.activation
  }

  pub fn call(&self, inputs: &[Value<'g>]) -> Result<Value<'g>> {
    if inputs.len() != self.weights.len() {
      return Err(Error::ShapeMismatch {
        expected: self.weights.len(),
        actual: inputs.len(),
      });
    }
    let graph = self.bias.graph();
    let weighted = self.weights.iter().zip(inputs).map(|(w, x)| w.mul(x));
    let z = graph.sum(weighted).add(self.bias);
    Ok(self.activation.apply(z))
  }
}

impl<'g> Module<'g> for Neuron<'g> {
  fn forward(&self, inputs: &[Value<'g>]) -> Result<Vec<Value<'g>>> {
    Ok(vec![self.call(inputs)?])
  }

  fn parameters(&self) -> Vec<Value<'g>> {
    let mut params = self.weights.clone();
    params.push(self.bias);
    params
  }
}

impl fmt::Display for Neuron<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} Neuron({})", self.activation, self.n_inputs())
  }
}

/// A fully connected layer; every neuron sees every input
#[derive(Debug, Clone)]
pub struct Layer<'g> {
  neurons: Vec<Neuron<'g>>,
  n_inputs: usize,
}

impl<'g> Layer<'g> {
  pub fn new(graph: &'g Graph, n_inputs: usize, n_outputs: usize, activation: Activation) -> Self {
    Self::with_rng(graph, n_inputs, n_outputs, activation, &mut rand::thread_rng())
  }

  pub fn with_rng<R: Rng + ?Sized>(
    graph: &'g Graph,
    n_inputs: usize,
    n_outputs: usize,
    activation: Activation,
    rng: &mut R,
  ) -> Self {
    let neurons = (0..n_outputs)
      .map(|_| Neuron::with_rng(graph, n_inputs, activation, &mut *rng))
      .collect();
    Self { neurons, n_inputs }
  }

  pub fn neurons(&self) -> &[Neuron<'g>] {
    &self.neurons
  }

  pub fn n_inputs(&self) -> usize {
    self.n_inputs
  }

  pub fn n_outputs(&self) -> usize {
    self.neurons.len()
  }
}

impl<'g> Module<'g> for Layer<'g> {
  fn forward(&self, inputs: &[Value<'g>]) -> Result<Vec<Value<'g>>> {
    self.neurons.iter().map(|n| n.call(inputs)).collect()
  }

  fn parameters(&self) -> Vec<Value<'g>> {
    self.neurons.iter().flat_map(|n| n.parameters()).collect()
  }
}

impl fmt::Display for Layer<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Layer({}, {})", self.n_inputs, self.n_outputs())
  }
}

/// Multi-layer perceptron
///
/// All layers but the last use the hidden activation, the last one uses the
/// output activation.
#[derive(Debug, Clone)]
pub struct Mlp<'g> {
  layers: Vec<Layer<'g>>,
}

impl<'g> Mlp<'g> {
  pub fn new(
    graph: &'g Graph,
    n_inputs: usize,
    sizes: &[usize],
    hidden: Activation,
    output: Activation,
  ) -> Result<Self> {
    Self::with_rng(graph, n_inputs, sizes, hidden, output, &mut rand::thread_rng())
  }

  pub fn with_rng<R: Rng + ?Sized>(
    graph: &'g Graph,
    n_inputs: usize,
    sizes: &[usize],
    hidden: Activation,
    output: Activation,
    rng: &mut R,
  ) -> Result<Self> {
    if sizes.is_empty() {
      return Err(Error::InvalidArgument(
        "a network needs at least one layer".to_string(),
      ));
    }
    let mut layers = Vec::with_capacity(sizes.len());
    let mut fan_in = n_inputs;
    for (i, &size) in sizes.iter().enumerate() {
      let activation = if i + 1 == sizes.len() { output } else { hidden };
      layers.push(Layer::with_rng(graph, fan_in, size, activation, &mut *rng));
      fan_in = size;
    }
    Ok(Self { layers })
  }

  pub fn layers(&self) -> &[Layer<'g>] {
    &self.layers
  }
}

impl<'g> Module<'g> for Mlp<'g> {
  fn forward(&self, inputs: &[Value<'g>]) -> Result<Vec<Value<'g>>> {
    let mut x = inputs.to_vec();
    for layer in &self.layers {
      x = layer.forward(&x)?;
    }
    Ok(x)
  }

  fn parameters(&self) -> Vec<Value<'g>> {
    self.layers.iter().flat_map(|l| l.parameters()).collect()
  }
}

impl fmt::Display for Mlp<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "MLP ")?;
    for (i, layer) in self.layers.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{layer}")?;
    }
    Ok(())
  }
}
