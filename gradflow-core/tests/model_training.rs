use gradflow_core::nn::{self, Module, Parameter};
use gradflow_core::{BackwardOptions, GradValue, Graph, Matrix};

mod common;
use common::{column, graph_with_workers};

#[derive(Debug)]
struct Clamp {
    ceiling: Parameter<f64>,
}

#[derive(Debug)]
struct TwoClamps {
    first: Clamp,
    second: Clamp,
}

impl Module<f64> for Clamp {
    fn named_parameters(&self) -> Vec<(String, &Parameter<f64>)> {
        vec![("ceiling".to_string(), &self.ceiling)]
    }
}

impl Module<f64> for TwoClamps {
    fn named_parameters(&self) -> Vec<(String, &Parameter<f64>)> {
        Vec::new()
    }

    fn named_children(&self) -> Vec<(String, &dyn Module<f64>)> {
        vec![
            ("first".to_string(), &self.first as &dyn Module<f64>),
            ("second".to_string(), &self.second as &dyn Module<f64>),
        ]
    }
}

impl TwoClamps {
    fn new(first: &[f64], second: &[f64]) -> Self {
        TwoClamps {
            first: Clamp {
                ceiling: Parameter::new_unnamed(column(first)),
            },
            second: Clamp {
                ceiling: Parameter::new_unnamed(column(second)),
            },
        }
    }
}

/// One step of gradient descent on `sum(min(min(x, c1), c2))`.
fn train_step(model: &TwoClamps, x: &Matrix<f64>, workers: usize, lr: f64) {
    let g = graph_with_workers(workers);
    let bound = nn::bind_parameters(&g, model, true);
    let input = g.new_variable(x.clone(), false);
    let h = g.min(&input, &bound[0].1);
    let y = g.min(&h, &bound[1].1);
    g.backward(&y, BackwardOptions::new());

    for param in nn::collect_parameters(model) {
        if let Some(grad) = param.grad() {
            let updated: Vec<f64> = param
                .value()
                .data()
                .iter()
                .zip(grad.data())
                .map(|(v, g)| v - lr * g)
                .collect();
            param.replace_value(Matrix::vector(updated));
        }
    }
    nn::zero_grad(model);
}

#[test]
fn test_parameters_are_trained_through_wrappers() {
    let model = TwoClamps::new(&[1.0, 9.0, 9.0], &[9.0, 2.0, 9.0]);
    let x = column(&[5.0, 5.0, 5.0]);

    train_step(&model, &x, 2, 0.5);

    assert_eq!(model.first.ceiling.value().data(), &[0.5, 9.0, 9.0]);
    assert_eq!(model.second.ceiling.value().data(), &[9.0, 1.5, 9.0]);
    assert!(model.first.ceiling.grad().is_none());
}

#[test]
fn test_frozen_parameters_are_constants() {
    let model = TwoClamps::new(&[1.0, 9.0], &[9.0, 2.0]);
    let g = graph_with_workers(1);
    let bound = nn::bind_parameters(&g, &model, false);
    let paths: Vec<&str> = bound.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["first.ceiling", "second.ceiling"]);

    let y = g.min(&bound[0].1, &bound[1].1);
    assert!(!y.requires_grad());
    g.backward(&y, BackwardOptions::new());
    assert!(model.first.ceiling.grad().is_none());
}

#[test]
fn test_model_state_round_trips_without_graph() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Checkpoint {
        weights: Vec<Parameter<f64>>,
        graph: Graph<f64>,
    }

    let model = TwoClamps::new(&[1.0, 2.0], &[3.0, 4.0]);
    let checkpoint = Checkpoint {
        weights: nn::collect_parameters(&model),
        graph: graph_with_workers(1),
    };
    let _ = checkpoint.graph.new_variable(column(&[1.0]), true);

    let json = serde_json::to_string(&checkpoint).unwrap();
    let restored: Checkpoint = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.graph.node_count(), 0);
    assert_eq!(restored.weights.len(), 2);
    assert_eq!(restored.weights[1].value().data(), &[3.0, 4.0]);
}
