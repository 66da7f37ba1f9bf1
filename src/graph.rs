//!
//! # graph
//!
//! The arena holding every node of a computation, the `Value` handles pointing
//! into it, the primitive operations and the backward executor.
//!
//! A `Graph` is a Wengert list: nodes are appended in evaluation order and
//! refer to their operands by index, so operands always live at lower indices
//! than their consumers and the operand relation can never form a cycle.
//!

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr;

use bit_set::BitSet;
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

use crate::error::{Error, Result};

type NodeIndex = usize;

/// Backward rule of a node, along with the operands it distributes onto...
#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
  Leaf,
  Add(NodeIndex, NodeIndex),
  Mul(NodeIndex, NodeIndex),
  /// Constant exponent, only the base receives a gradient
  Pow(NodeIndex, f64),
  Exp(NodeIndex),
  Ln(NodeIndex),
  Sin(NodeIndex),
  Cos(NodeIndex),
  Tan(NodeIndex),
  Sinh(NodeIndex),
  Cosh(NodeIndex),
  Tanh(NodeIndex),
  Relu(NodeIndex),
}

impl Op {
  fn operands(&self) -> SmallVec<[NodeIndex; 2]> {
    match *self {
      Op::Leaf => SmallVec::new(),
      Op::Add(a, b) | Op::Mul(a, b) => smallvec![a, b],
      Op::Pow(a, _)
      | Op::Exp(a)
      | Op::Ln(a)
      | Op::Sin(a)
      | Op::Cos(a)
      | Op::Tan(a)
      | Op::Sinh(a)
      | Op::Cosh(a)
      | Op::Tanh(a)
      | Op::Relu(a) => smallvec![a],
    }
  }

  fn tag(&self) -> &'static str {
    match self {
      Op::Leaf => "",
      Op::Add(..) => "+",
      Op::Mul(..) => "*",
      Op::Pow(..) => "**",
      Op::Exp(_) => "exp",
      Op::Ln(_) => "ln",
      Op::Sin(_) => "sin",
      Op::Cos(_) => "cos",
      Op::Tan(_) => "tan",
      Op::Sinh(_) => "sinh",
      Op::Cosh(_) => "cosh",
      Op::Tanh(_) => "tanh",
      Op::Relu(_) => "relu",
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
  data: f64,
  grad: f64,
  op: Op,
  /// Generation the node was allocated in; handles must carry the same stamp
  stamp: u32,
  label: Option<String>,
}

/// Gradient contributions of a single node onto its operands.
///
/// `out` is the forward value of the node itself and `upstream` its fully
/// accumulated gradient.
fn pullback(nodes: &[Node], op: Op, out: f64, upstream: f64) -> SmallVec<[(NodeIndex, f64); 2]> {
  let data = |index: NodeIndex| nodes[index].data;
  match op {
    Op::Leaf => SmallVec::new(),
    Op::Add(a, b) => smallvec![(a, upstream), (b, upstream)],
    Op::Mul(a, b) => smallvec![(a, data(b) * upstream), (b, data(a) * upstream)],
    Op::Pow(a, k) => smallvec![(a, k * data(a).powf(k - 1.0) * upstream)],
    // d/da exp(a) is the forward value itself
    Op::Exp(a) => smallvec![(a, out * upstream)],
    Op::Ln(a) => smallvec![(a, (1.0 / data(a)) * upstream)],
    Op::Sin(a) => smallvec![(a, data(a).cos() * upstream)],
    Op::Cos(a) => smallvec![(a, -data(a).sin() * upstream)],
    Op::Tan(a) => smallvec![(a, (1.0 / data(a).cos().powi(2)) * upstream)],
    Op::Sinh(a) => smallvec![(a, data(a).cosh() * upstream)],
    Op::Cosh(a) => smallvec![(a, data(a).sinh() * upstream)],
    Op::Tanh(a) => smallvec![(a, (1.0 / data(a).cosh().powi(2)) * upstream)],
    Op::Relu(a) => {
      let grad = if data(a) > 0.0 { upstream } else { 0.0 };
      smallvec![(a, grad)]
    }
  }
}

/// Position in a graph's arena, see [`Graph::checkpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// Arena owning every node of a computation.
///
/// Nodes are only ever released in bulk through [`Graph::rewind`] or
/// [`Graph::clear`]; each release bumps the graph's generation so that handles
/// to released nodes are detected rather than silently aliasing new nodes.
#[derive(Debug, Default)]
pub struct Graph {
  nodes: RefCell<Vec<Node>>,
  generation: Cell<u32>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Construct a leaf (a constant or a parameter) holding `data`
  #[inline]
  pub fn leaf(&self, data: f64) -> Value<'_> {
    self.push(data, Op::Leaf)
  }

  pub fn leaves(&self, data: &[f64]) -> Vec<Value<'_>> {
    data.iter().map(|&x| self.leaf(x)).collect()
  }

  /// Sum an arbitrary number of values as a chain of additions, starting from
  /// a constant zero
  pub fn sum<'g, I, V>(&'g self, values: I) -> Value<'g>
  where
    I: IntoIterator<Item = V>,
    V: IntoValue<'g>,
  {
    values
      .into_iter()
      .fold(self.leaf(0.0), |total, value| total.add(value))
  }

  pub fn len(&self) -> usize {
    self.nodes.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.borrow().is_empty()
  }

  /// Record the current size of the arena; every node created afterwards can
  /// be released again with [`Graph::rewind`]
  pub fn checkpoint(&self) -> Checkpoint {
    Checkpoint(self.len())
  }

  /// Release every node created after `checkpoint`...
  ///
  /// Handles to the released nodes become stale: `backward` and friends reject
  /// them with `Error::InvalidState`, accessors panic on them.
  pub fn rewind(&self, checkpoint: Checkpoint) {
    let mut nodes = self.nodes.borrow_mut();
    if checkpoint.0 < nodes.len() {
      debug!("rewinding graph from {} to {} nodes", nodes.len(), checkpoint.0);
      nodes.truncate(checkpoint.0);
      self.generation.set(self.generation.get().wrapping_add(1));
    }
  }

  /// Release every node in the graph
  pub fn clear(&self) {
    self.rewind(Checkpoint(0));
  }

  /// All nodes reachable from `root`, each exactly once, operands before the
  /// nodes consuming them; `root` itself is last
  pub fn topological_order<'g>(&'g self, root: &Value<'g>) -> Result<Vec<Value<'g>>> {
    let order = self.topological_indices(root)?;
    let nodes = self.nodes.borrow();
    Ok(
      order
        .into_iter()
        .map(|index| Value {
          index,
          stamp: nodes[index].stamp,
          graph: self,
        })
        .collect(),
    )
  }

  /// Seed `root` with a gradient of 1.0 and accumulate the gradient of `root`
  /// into every node it depends on...
  ///
  /// Gradients are accumulated, not overwritten; calling this twice without
  /// zeroing in between adds the second pass on top of the first.
  pub fn backward(&self, root: &Value<'_>) -> Result<()> {
    let order = self.topological_indices(root)?;
    trace!("backward pass over {} nodes", order.len());

    let mut nodes = self.nodes.borrow_mut();
    nodes[root.index].grad = 1.0;

    // consumers come before their operands, so a node's grad is complete by
    // the time we read it
    for &index in order.iter().rev() {
      // read phase
      let node = &nodes[index];
      let (op, out, upstream) = (node.op, node.data, node.grad);

      // compute phase
      let contributions = pullback(&nodes, op, out, upstream);

      // write phase
      for (operand, grad) in contributions {
        nodes[operand].grad += grad;
      }
    }

    Ok(())
  }

  #[inline]
  fn push(&self, data: f64, op: Op) -> Value<'_> {
    let mut nodes = self.nodes.borrow_mut();
    let index = nodes.len();
    let stamp = self.generation.get();
    nodes.push(Node {
      data,
      grad: 0.0,
      op,
      stamp,
      label: None,
    });
    Value {
      index,
      stamp,
      graph: self,
    }
  }

  /// Map a handle back to its arena slot, provided it is still live
  fn resolve(&self, value: &Value<'_>) -> Result<NodeIndex> {
    if !ptr::eq(self, value.graph) {
      return Err(Error::InvalidState("value belongs to a different graph"));
    }
    match self.nodes.borrow().get(value.index) {
      Some(node) if node.stamp == value.stamp => Ok(value.index),
      _ => Err(Error::InvalidState("value refers to a released node")),
    }
  }

  fn with_node<R>(&self, value: &Value<'_>, f: impl FnOnce(&Node) -> R) -> Result<R> {
    let index = self.resolve(value)?;
    Ok(f(&self.nodes.borrow()[index]))
  }

  fn with_node_mut<R>(&self, value: &Value<'_>, f: impl FnOnce(&mut Node) -> R) -> Result<R> {
    let index = self.resolve(value)?;
    Ok(f(&mut self.nodes.borrow_mut()[index]))
  }

  /// Iterative postorder dfs, a `BitSet` over arena indices marks visited nodes
  fn topological_indices(&self, root: &Value<'_>) -> Result<Vec<NodeIndex>> {
    let root = self.resolve(root)?;
    let nodes = self.nodes.borrow();

    let mut visited = BitSet::with_capacity(nodes.len());
    let mut order = Vec::with_capacity(root + 1);
    let mut stack = vec![(root, false)];

    while let Some((index, operands_done)) = stack.pop() {
      if operands_done {
        order.push(index);
      } else if visited.insert(index) {
        // marker to emit the node once its operands are done
        stack.push((index, true));
        // reversed so the first operand is explored first
        for &operand in nodes[index].op.operands().iter().rev() {
          if !visited.contains(operand) {
            stack.push((operand, false));
          }
        }
      }
    }

    Ok(order)
  }
}

/// Panic on a stale handle; only the accessors that cannot report errors use this
fn live<R>(result: Result<R>) -> R {
  match result {
    Ok(r) => r,
    Err(err) => panic!("{err}"),
  }
}

/// Anything usable as an operand: values, and raw scalars which are wrapped as
/// constant leaves
pub trait IntoValue<'g> {
  fn into_value(self, graph: &'g Graph) -> Value<'g>;
}

impl<'g> IntoValue<'g> for f64 {
  #[inline]
  fn into_value(self, graph: &'g Graph) -> Value<'g> {
    graph.leaf(self)
  }
}

impl<'g> IntoValue<'g> for Value<'g> {
  #[inline(always)]
  fn into_value(self, _graph: &'g Graph) -> Value<'g> {
    self
  }
}

impl<'g> IntoValue<'g> for &Value<'g> {
  #[inline(always)]
  fn into_value(self, _graph: &'g Graph) -> Value<'g> {
    *self
  }
}

/// Exponent accepted by [`Value::pow`]; only constants are differentiable here
#[derive(Debug, Clone, Copy)]
pub enum Exponent<'g> {
  Constant(f64),
  Node(Value<'g>),
}

impl From<f64> for Exponent<'_> {
  fn from(k: f64) -> Self {
    Exponent::Constant(k)
  }
}

impl From<i32> for Exponent<'_> {
  fn from(k: i32) -> Self {
    Exponent::Constant(f64::from(k))
  }
}

impl<'g> From<Value<'g>> for Exponent<'g> {
  fn from(value: Value<'g>) -> Self {
    Exponent::Node(value)
  }
}

impl<'g> From<&Value<'g>> for Exponent<'g> {
  fn from(value: &Value<'g>) -> Self {
    Exponent::Node(*value)
  }
}

/// A handle to a node of a [`Graph`].
///
/// Handles are `Copy`; copying one never copies the node. Two handles refer
/// to the same node iff [`Value::same_node`] holds.
///
/// # Panics
///
/// Accessors and operations panic when used with a handle whose node was
/// released by [`Graph::rewind`]/[`Graph::clear`], or when combining values
/// from two different graphs. [`Value::backward`], [`Value::try_data`],
/// [`Value::try_grad`] and [`Value::update_data`] report a stale handle as `Error::InvalidState`.
#[derive(Clone, Copy)]
pub struct Value<'g> {
  index: NodeIndex,
  stamp: u32,
  graph: &'g Graph,
}

impl<'g> Value<'g> {
  /// Forward value of the node
  #[inline]
  pub fn data(&self) -> f64 {
    live(self.try_data())
  }

  pub fn try_data(&self) -> Result<f64> {
    self.graph.with_node(self, |node| node.data)
  }

  /// Accumulated gradient of the node
  #[inline]
  pub fn grad(&self) -> f64 {
    live(self.try_grad())
  }

  pub fn try_grad(&self) -> Result<f64> {
    self.graph.with_node(self, |node| node.grad)
  }

  pub fn set_grad(&self, grad: f64) {
    live(self.graph.with_node_mut(self, |node| node.grad = grad))
  }

  #[inline]
  pub fn zero_grad(&self) {
    self.set_grad(0.0);
  }

  /// Replace the data of a leaf, e.g. a parameter after an optimizer step.
  ///
  /// Computed nodes are snapshots of a forward evaluation and cannot be
  /// updated.
  pub fn update_data(&self, f: impl FnOnce(f64) -> f64) -> Result<()> {
    self.graph.with_node_mut(self, |node| match node.op {
      Op::Leaf => {
        node.data = f(node.data);
        Ok(())
      }
      _ => Err(Error::InvalidState("only leaf values can be updated")),
    })?
  }

  pub fn graph(&self) -> &'g Graph {
    self.graph
  }

  /// Arena index of the node; stable until the node is released
  pub fn index(&self) -> usize {
    self.index
  }

  /// Identity of the node across graphs: graph address and arena index
  pub(crate) fn node_key(&self) -> (usize, usize) {
    (self.graph as *const Graph as usize, self.index)
  }

  pub fn same_node(&self, other: &Value<'_>) -> bool {
    ptr::eq(self.graph, other.graph) && self.index == other.index && self.stamp == other.stamp
  }

  pub fn is_leaf(&self) -> bool {
    live(self.graph.with_node(self, |node| node.op == Op::Leaf))
  }

  /// Values consumed to produce this one; empty for leaves
  pub fn operands(&self) -> SmallVec<[Value<'g>; 2]> {
    let nodes = self.graph.nodes.borrow();
    let op = live(self.graph.with_node(self, |node| node.op));
    op.operands()
      .into_iter()
      .map(|index| Value {
        index,
        stamp: nodes[index].stamp,
        graph: self.graph,
      })
      .collect()
  }

  /// Short name of the operation that produced this value, empty for leaves
  pub fn op_tag(&self) -> &'static str {
    live(self.graph.with_node(self, |node| node.op.tag()))
  }

  pub fn label(&self) -> Option<String> {
    live(self.graph.with_node(self, |node| node.label.clone()))
  }

  pub fn with_label(self, label: impl Into<String>) -> Self {
    let label = label.into();
    live(self.graph.with_node_mut(&self, |node| node.label = Some(label)));
    self
  }

  /// See [`Graph::backward`]
  pub fn backward(&self) -> Result<()> {
    self.graph.backward(self)
  }

  #[inline]
  fn unary(&self, op: fn(NodeIndex) -> Op, forward: fn(f64) -> f64) -> Value<'g> {
    let data = forward(self.data());
    self.graph.push(data, op(self.index))
  }

  #[inline]
  fn binary(&self, other: &Value<'g>, op: fn(NodeIndex, NodeIndex) -> Op, forward: fn(f64, f64) -> f64) -> Value<'g> {
    assert!(
      ptr::eq(self.graph, other.graph),
      "cannot combine values from different graphs"
    );
    let data = forward(self.data(), other.data());
    self.graph.push(data, op(self.index, other.index))
  }

  pub fn add<V: IntoValue<'g>>(&self, other: V) -> Value<'g> {
    let other = other.into_value(self.graph);
    self.binary(&other, Op::Add, |a, b| a + b)
  }

  pub fn mul<V: IntoValue<'g>>(&self, other: V) -> Value<'g> {
    let other = other.into_value(self.graph);
    self.binary(&other, Op::Mul, |a, b| a * b)
  }

  /// `self * -1`
  pub fn neg(&self) -> Value<'g> {
    self.mul(-1.0)
  }

  /// `self + (-other)`
  pub fn sub<V: IntoValue<'g>>(&self, other: V) -> Value<'g> {
    let other = other.into_value(self.graph);
    self.add(other.neg())
  }

  /// `self * other^-1`
  ///
  /// Dividing by a zero valued node is not an error, the result (and the
  /// gradients flowing through it) follow IEEE semantics and become infinite
  /// or NaN.
  pub fn div<V: IntoValue<'g>>(&self, other: V) -> Value<'g> {
    let other = other.into_value(self.graph);
    self.mul(other.powf(-1.0))
  }

  /// Raise to a constant power
  pub fn powf(&self, k: f64) -> Value<'g> {
    let data = self.data().powf(k);
    self.graph.push(data, Op::Pow(self.index, k))
  }

  /// Raise to `exponent`, which must be a constant...
  ///
  /// A graph node exponent is rejected with `Error::UnsupportedOperation`
  /// since there is no rule for the gradient with respect to the exponent.
  pub fn pow<E: Into<Exponent<'g>>>(&self, exponent: E) -> Result<Value<'g>> {
    match exponent.into() {
      Exponent::Constant(k) => Ok(self.powf(k)),
      Exponent::Node(_) => Err(Error::UnsupportedOperation(
        "pow with a graph node as exponent",
      )),
    }
  }

  pub fn sqrt(&self) -> Value<'g> {
    self.powf(0.5)
  }

  pub fn exp(&self) -> Value<'g> {
    self.unary(Op::Exp, f64::exp)
  }

  /// Natural logarithm; fails with `Error::Domain` unless `self > 0`
  pub fn ln(&self) -> Result<Value<'g>> {
    let a = self.data();
    // written this way so NaN is rejected too
    if !(a > 0.0) {
      return Err(Error::Domain { op: "ln", value: a });
    }
    Ok(self.graph.push(a.ln(), Op::Ln(self.index)))
  }

  pub fn sin(&self) -> Value<'g> {
    self.unary(Op::Sin, f64::sin)
  }

  pub fn cos(&self) -> Value<'g> {
    self.unary(Op::Cos, f64::cos)
  }

  pub fn tan(&self) -> Value<'g> {
    self.unary(Op::Tan, f64::tan)
  }

  pub fn sinh(&self) -> Value<'g> {
    self.unary(Op::Sinh, f64::sinh)
  }

  pub fn cosh(&self) -> Value<'g> {
    self.unary(Op::Cosh, f64::cosh)
  }

  pub fn tanh(&self) -> Value<'g> {
    self.unary(Op::Tanh, f64::tanh)
  }

  pub fn relu(&self) -> Value<'g> {
    self.unary(Op::Relu, |a| if a > 0.0 { a } else { 0.0 })
  }

  /// `1 / (1 + exp(-self))`, built from the other primitives
  pub fn sigmoid(&self) -> Value<'g> {
    let one = self.graph.leaf(1.0);
    one.div(self.neg().exp().add(1.0))
  }
}

impl fmt::Debug for Value<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let node = self
      .graph
      .with_node(self, |node| (node.data, node.grad, node.op.tag()));
    match node {
      Ok((data, grad, op)) => f
        .debug_struct("Value")
        .field("data", &data)
        .field("grad", &grad)
        .field("op", &op)
        .field("index", &self.index)
        .finish(),
      Err(_) => f
        .debug_struct("Value")
        .field("index", &self.index)
        .field("released", &true)
        .finish(),
    }
  }
}

impl fmt::Display for Value<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.try_data() {
      Ok(data) => write!(f, "Value(data={data})"),
      Err(_) => write!(f, "Value(released)"),
    }
  }
}

macro_rules! binary_operator {
  ($trait:ident, $method:ident) => {
    impl<'g, V: IntoValue<'g>> std::ops::$trait<V> for Value<'g> {
      type Output = Value<'g>;

      #[inline(always)]
      fn $method(self, other: V) -> Self::Output {
        Value::$method(&self, other)
      }
    }

    impl<'g, V: IntoValue<'g>> std::ops::$trait<V> for &Value<'g> {
      type Output = Value<'g>;

      #[inline(always)]
      fn $method(self, other: V) -> Self::Output {
        Value::$method(self, other)
      }
    }

    impl<'g> std::ops::$trait<Value<'g>> for f64 {
      type Output = Value<'g>;

      #[inline(always)]
      fn $method(self, other: Value<'g>) -> Self::Output {
        Value::$method(&other.graph.leaf(self), other)
      }
    }

    impl<'g> std::ops::$trait<&Value<'g>> for f64 {
      type Output = Value<'g>;

      #[inline(always)]
      fn $method(self, other: &Value<'g>) -> Self::Output {
        Value::$method(&other.graph.leaf(self), other)
      }
    }
  };
}

binary_operator!(Add, add);
binary_operator!(Sub, sub);
binary_operator!(Mul, mul);
binary_operator!(Div, div);

impl<'g> std::ops::Neg for Value<'g> {
  type Output = Value<'g>;

  #[inline(always)]
  fn neg(self) -> Self::Output {
    Value::neg(&self)
  }
}

impl<'g> std::ops::Neg for &Value<'g> {
  type Output = Value<'g>;

  #[inline(always)]
  fn neg(self) -> Self::Output {
    Value::neg(self)
  }
}
