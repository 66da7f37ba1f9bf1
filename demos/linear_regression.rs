use log::info;

use scalar_auto::{mse_loss, optimize, Activation, Graph, Module, Neuron, Sgd, TrainConfig};

fn main() -> scalar_auto::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let x1_data = [1.0, 2.0, 3.0, 4.0, 5.0];
  let x2_data = [2.0, 1.0, 0.0, -1.0, 2.0];
  let mut inputs = Vec::with_capacity(x1_data.len());
  let mut targets = Vec::with_capacity(x1_data.len());
  // y = 5.4*x1 - 2.3*x2 - 1.4 for each sample
  for (&x1, &x2) in x1_data.iter().zip(&x2_data) {
    inputs.push(vec![x1, x2]);
    targets.push(5.4 * x1 - 2.3 * x2 - 1.4);
  }

  let graph = Graph::new();
  let w = graph.leaves(&[0.0, 0.0]);
  let b = graph.leaf(0.0);
  let model = Neuron::from_parameters(w, b, Activation::Linear);

  let mut sgd = Sgd::new(model.parameters(), 0.02);
  let config = TrainConfig::default()
    .with_epochs(20000)
    .with_batch_size(x1_data.len())
    .with_log_every(2000);
  let report = optimize(
    &graph,
    &model,
    &mut sgd,
    |targets, predictions| mse_loss(targets, predictions),
    &inputs,
    &targets,
    &config,
  )?;
  info!("final loss: {:.6}", report.final_loss);

  println!("trained parameters:");
  println!("w1 = {:.4}", model.weights()[0].data());
  println!("w2 = {:.4}", model.weights()[1].data());
  println!("b  = {:.4}", model.bias().data());
  Ok(())
}
