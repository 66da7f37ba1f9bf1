use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;

use scalar_auto::{mse_loss, Activation, Graph, Mlp, Module};

// =============================================================================
// CHAIN BENCHMARKS
// =============================================================================

fn forward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar/forward_chain");

  for chain_len in [10, 50, 100, 500, 1000] {
    group.throughput(Throughput::Elements(chain_len as u64));
    group.bench_with_input(
      BenchmarkId::from_parameter(chain_len),
      &chain_len,
      |b, &len| {
        let graph = Graph::new();
        b.iter(|| {
          let mut x = graph.leaf(black_box(2.0));
          for _ in 0..len {
            x = x.mul(x).add(1.0).sin();
          }
          let value = x.data();
          graph.clear();
          black_box(value)
        });
      },
    );
  }
  group.finish();
}

fn backward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar/backward_chain");

  for chain_len in [10, 50, 100, 500, 1000] {
    group.throughput(Throughput::Elements(chain_len as u64));
    group.bench_with_input(
      BenchmarkId::from_parameter(chain_len),
      &chain_len,
      |b, &len| {
        let graph = Graph::new();
        b.iter(|| {
          let x = graph.leaf(black_box(2.0));
          let mut result = x;
          for _ in 0..len {
            result = result.mul(result).add(1.0).sin();
          }
          result.backward().unwrap();
          let grad = x.grad();
          graph.clear();
          black_box(grad)
        });
      },
    );
  }
  group.finish();
}

// =============================================================================
// NETWORK BENCHMARKS
// =============================================================================

fn xor_backward(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar/xor_backward");

  group.bench_function("single_pass", |b| {
    let graph = Graph::new();
    b.iter(|| {
      let w11 = graph.leaf(1.2);
      let w12 = graph.leaf(0.5);
      let b1 = graph.leaf(0.6);
      let w21 = graph.leaf(1.5);
      let w22 = graph.leaf(-0.4);
      let b2 = graph.leaf(0.4);
      let v1 = graph.leaf(-2.3);
      let v2 = graph.leaf(-0.3);
      let b_out = graph.leaf(0.63);

      let x1 = black_box(1.0);
      let x2 = black_box(0.0);

      // hidden layer
      let a1 = w11.mul(x1).add(w12.mul(x2)).add(b1).sigmoid();
      let a2 = w21.mul(x1).add(w22.mul(x2)).add(b2).sigmoid();
      // output
      let output = v1.mul(a1).add(v2.mul(a2)).add(b_out).sigmoid();

      let loss = mse_loss(&[1.0], &[output]).unwrap();
      loss.backward().unwrap();
      let grad = w11.grad();
      graph.clear();
      black_box(grad)
    });
  });

  group.finish();
}

fn mlp(c: &mut Criterion) {
  let mut group = c.benchmark_group("throughput/mlp");

  for width in [4, 16, 32] {
    // weights and biases of a 8 -> width -> width -> 1 network
    let n_params = 8 * width + width + width * width + width + width + 1;
    group.throughput(Throughput::Elements(n_params as u64));
    group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
      let graph = Graph::new();
      let mut rng = StdRng::seed_from_u64(0);
      let net = Mlp::with_rng(
        &graph,
        8,
        &[width, width, 1],
        Activation::Tanh,
        Activation::Linear,
        &mut rng,
      )
      .unwrap();
      let checkpoint = graph.checkpoint();
      b.iter(|| {
        let x = graph.leaves(black_box(&[0.5, -0.25, 1.0, 0.0, 0.75, -1.0, 0.1, 0.2]));
        let y = net.forward(&x).unwrap()[0];
        y.backward().unwrap();
        net.zero_grad();
        let value = y.data();
        graph.rewind(checkpoint);
        black_box(value)
      });
    });
  }
  group.finish();
}

// =============================================================================
// INTERNALS
// =============================================================================

fn topological_sort(c: &mut Criterion) {
  let mut group = c.benchmark_group("internals/topo_sort");

  for graph_size in [50, 100, 500, 1000] {
    group.bench_with_input(
      BenchmarkId::from_parameter(graph_size),
      &graph_size,
      |b, &size| {
        let graph = Graph::new();
        let x = graph.leaf(1.0);
        let mut result = x;
        for _ in 0..size {
          result = result.mul(result).add(0.001);
        }
        b.iter(|| black_box(graph.topological_order(&result).unwrap().len()));
      },
    );
  }
  group.finish();
}

fn gradient_accumulation(c: &mut Criterion) {
  let mut group = c.benchmark_group("internals/grad_accumulation");

  // many paths converge onto the same leaf
  group.bench_function("diamond", |b| {
    let graph = Graph::new();
    b.iter(|| {
      let x = graph.leaf(black_box(1.0));
      let result = x.mul(2.0).add(x.mul(3.0)).add(x.mul(4.0)).add(x.mul(5.0));
      result.backward().unwrap();
      let grad = x.grad();
      graph.clear();
      black_box(grad)
    });
  });

  group.finish();
}

criterion_group!(
  name = benches;
  config = Criterion::default().measurement_time(Duration::from_secs(10));
  targets =
    forward_chain,
    backward_chain,
    xor_backward,
    mlp,
    topological_sort,
    gradient_accumulation,
);

criterion_main!(benches);
