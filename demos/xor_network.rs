use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use scalar_auto::{mse_loss, optimize, Activation, Graph, Mlp, Module, Sgd, TrainConfig};

/// Feedforward network for an XOR gate
///
/// Architecture:
/// - 2 inputs
/// - 1 hidden layer with 4 tanh neurons
/// - 1 sigmoid output neuron
fn main() -> scalar_auto::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let graph = Graph::new();
  let mut rng = StdRng::seed_from_u64(7);
  let net = Mlp::with_rng(&graph, 2, &[4, 1], Activation::Tanh, Activation::Sigmoid, &mut rng)?;
  info!("{net} with {} parameters", net.parameters().len());

  let inputs = vec![
    vec![0.0, 0.0],
    vec![0.0, 1.0],
    vec![1.0, 0.0],
    vec![1.0, 1.0],
  ];
  let targets = [0.0, 1.0, 1.0, 0.0];

  let mut sgd = Sgd::new(net.parameters(), 0.5).with_momentum(0.9);
  let config = TrainConfig::default()
    .with_epochs(2000)
    .with_batch_size(4)
    .with_log_every(200);
  let report = optimize(
    &graph,
    &net,
    &mut sgd,
    |targets, predictions| mse_loss(targets, predictions),
    &inputs,
    &targets,
    &config,
  )?;
  info!("final loss: {:.6}", report.final_loss);

  for (x, y) in inputs.iter().zip(targets) {
    let checkpoint = graph.checkpoint();
    let prediction = net.forward(&graph.leaves(x))?[0].data();
    graph.rewind(checkpoint);
    println!("{} XOR {} = {prediction:.4} (expected {y})", x[0], x[1]);
  }
  Ok(())
}
