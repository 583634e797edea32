use approx::assert_relative_eq;
use gradflow_core::{BackwardOptions, Graph, GraphConfig, Matrix, Node};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;
use common::{column, graph_with_workers, init_logging};

#[test]
fn test_min_end_to_end() {
    for workers in [1, 2, 8] {
        let g = graph_with_workers(workers);
        let x1 = g.new_variable(column(&[1.0, 5.0, 3.0]), true);
        let x2 = g.new_variable(column(&[4.0, 2.0, 3.0]), true);
        let y = g.min(&x1, &x2);
        assert_eq!(y.value().data(), &[1.0, 2.0, 3.0]);

        g.backward(&y, BackwardOptions::new().with_output_grad(column(&[10.0, 20.0, 30.0])));

        assert_eq!(x1.grad().unwrap().data(), &[10.0, 0.0, 0.0]);
        assert_eq!(x2.grad().unwrap().data(), &[0.0, 20.0, 0.0]);
        assert_eq!(y.grad().unwrap().data(), &[10.0, 20.0, 30.0]);
    }
}

/// Builds a random layered DAG of `min` operators over `leaves` inputs.
fn random_dag(g: &Graph<f64>, seed: u64, leaves: usize, layers: usize) -> (Vec<Node<f64>>, Node<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let inputs: Vec<Node<f64>> = (0..leaves)
        .map(|_| {
            let data: Vec<f64> = (0..6).map(|_| f64::from(rng.gen_range(-5..6))).collect();
            g.new_variable(Matrix::vector(data), true)
        })
        .collect();
    let mut pool = inputs.clone();
    for _ in 0..layers {
        let a = &pool[rng.gen_range(0..pool.len())];
        let b = &pool[rng.gen_range(0..pool.len())];
        let y = g.min(a, b);
        pool.push(y);
    }
    let mut top = pool[pool.len() - 1].clone();
    for node in pool.iter().rev().skip(1).take(4) {
        top = g.min(&top, node);
    }
    (inputs, top)
}

#[test]
fn test_random_dags_give_same_gradients_serially_and_concurrently() {
    init_logging();
    for seed in 0..5 {
        let grads = |workers: usize| {
            let g = graph_with_workers(workers);
            let (inputs, top) = random_dag(&g, seed, 4, 30);
            g.backward(&top, BackwardOptions::new());
            inputs
                .iter()
                .map(|n| n.grad().map(|m| m.data().to_vec()).unwrap_or_default())
                .collect::<Vec<_>>()
        };
        let serial = grads(1);
        let concurrent = grads(4);
        assert_eq!(serial, concurrent, "seed {}", seed);
    }
}

#[test]
fn test_graph_reuse_matches_fresh_graph() {
    let g = graph_with_workers(3);
    let (inputs, top) = random_dag(&g, 11, 3, 20);
    g.backward(&top, BackwardOptions::new());
    let first: Vec<f64> = top.value().data().to_vec();

    g.clear_for_reuse();
    for input in &inputs {
        input.zero_grad();
    }
    g.forward();
    g.backward(&top, BackwardOptions::new());

    let fresh = graph_with_workers(1);
    let (fresh_inputs, fresh_top) = random_dag(&fresh, 11, 3, 20);
    fresh.backward(&fresh_top, BackwardOptions::new());

    for (a, b) in top.value().data().iter().zip(&first) {
        assert_relative_eq!(*a, *b);
    }
    for (a, b) in inputs.iter().zip(&fresh_inputs) {
        assert_eq!(a.grad(), b.grad());
    }
}

#[test]
fn test_truncated_backward_over_time_steps() {
    let g = Graph::<f64>::with_config(GraphConfig::default().with_concurrent_computations(1)).unwrap();
    let w = g.new_variable(column(&[1.0, 1.0]), true);
    let mut h = g.new_variable(column(&[0.0, 3.0]), false);
    let mut states = Vec::new();
    for _ in 0..4 {
        h = g.min(&h, &w);
        states.push(h.clone());
        g.inc_time_step();
    }
    g.backward(&h, BackwardOptions::new().stop_at_time_step(1));

    // Steps 2 and 3 ran their backward, feeding step 1; step 1 did not run.
    assert!(states[1].has_grad());
    assert!(!states[0].has_grad());
    // From step 1 on the state ties w everywhere, so w only receives zeros.
    assert_eq!(w.grad().unwrap().data(), &[0.0, 0.0]);
}
