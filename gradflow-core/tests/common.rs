use gradflow_core::{Graph, GraphConfig, Matrix};

/// Routes `log` output through the test harness. Safe to call from every test.
#[allow(dead_code)]
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Added allow(dead_code) because not every test crate uses every helper.
#[allow(dead_code)]
pub(crate) fn graph_with_workers(workers: usize) -> Graph<f64> {
    init_logging();
    Graph::with_config(GraphConfig::default().with_concurrent_computations(workers))
        .expect("Test graph creation failed")
}

#[allow(dead_code)]
pub(crate) fn column(data: &[f64]) -> Matrix<f64> {
    Matrix::vector(data.to_vec())
}
