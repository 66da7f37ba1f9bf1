use scalar_auto::Graph;

fn main() -> scalar_auto::Result<()> {
  // Every value lives in a graph arena, the handles are cheap copies into it
  let graph = Graph::new();
  let x = graph.leaf(2.0).with_label("x");
  let y = x.mul(x).add(x.sin()).with_label("y");
  // Seed dy/dy = 1 and sweep back through everything y was built from
  y.backward()?;
  println!("Value: {}, dy/dx: {}", y.data(), x.grad());
  // 2x + cos(x)
  println!("expected dy/dx: {}", 2.0 * 2.0 + 2.0f64.cos());
  Ok(())
}
