//! # Building and differentiating a small graph
//!
//! Demonstrates:
//! 1.  Creating a `Graph` with an explicit `GraphConfig`.
//! 2.  Inserting variables, a memoized constant and `min` operators.
//! 3.  Back-propagating a custom output gradient.
//! 4.  Re-running the same structure after `clear_for_reuse`.
//!
//! ## Running
//! `RUST_LOG=debug cargo run --example min_graph`

use gradflow_core::{BackwardOptions, Graph, GraphConfig, GraphError, Matrix};

fn main() -> Result<(), GraphError> {
    let _ = env_logger::builder().try_init();

    let graph = Graph::<f32>::with_config(GraphConfig::default().with_concurrent_computations(2))?;
    let x1 = graph.new_variable_with_name(Matrix::vector(vec![1.0, 5.0, 3.0]), true, "x1");
    let x2 = graph.new_variable_with_name(Matrix::vector(vec![4.0, 2.0, 3.0]), true, "x2");
    let ceiling = graph.new_variable(Matrix::new(3, 1, vec![2.5; 3])?, false);

    let y = graph.min(&x1, &x2);
    let z = graph.min(&y, &ceiling);
    println!("y = {:?}", y.value().data());
    println!("z = {:?}", z.value().data());
    println!("constant 0.5 is node {}", graph.constant(0.5).id());

    graph.try_backward(
        &z,
        BackwardOptions::new().with_output_grad(Matrix::vector(vec![10.0, 20.0, 30.0])),
    )?;
    println!("dz/dx1 = {:?}", x1.grad().map(|g| g.into_data()));
    println!("dz/dx2 = {:?}", x2.grad().map(|g| g.into_data()));

    graph.clear_for_reuse();
    graph.zero_grad();
    x1.replace_value(Matrix::vector(vec![0.0, 0.0, 9.0]))?;
    graph.try_forward()?;
    println!("z after reuse = {:?}", z.value().data());
    Ok(())
}
