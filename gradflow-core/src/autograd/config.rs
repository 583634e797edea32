use std::thread;

/// Construction options of a [`Graph`](crate::autograd::Graph).
#[derive(Clone, Debug, PartialEq)]
pub struct GraphConfig {
    /// Compute each operator's value while the graph is being defined.
    pub eager_execution: bool,
    /// Maximum number of concurrent heavy computations. Must be at least 1;
    /// 1 means sequential execution.
    pub concurrent_computations: usize,
    /// Seed of the graph's random number generator.
    pub rand_seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            eager_execution: true,
            concurrent_computations: default_concurrency(),
            rand_seed: 1,
        }
    }
}

impl GraphConfig {
    pub fn with_eager_execution(mut self, enabled: bool) -> Self {
        self.eager_execution = enabled;
        self
    }

    pub fn with_concurrent_computations(mut self, value: usize) -> Self {
        self.concurrent_computations = value;
        self
    }

    pub fn with_rand_seed(mut self, seed: u64) -> Self {
        self.rand_seed = seed;
        self
    }
}

fn default_concurrency() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert!(config.eager_execution);
        assert!(config.concurrent_computations >= 1);
        assert_eq!(config.rand_seed, 1);
    }

    #[test]
    fn test_builder_setters() {
        let config = GraphConfig::default()
            .with_eager_execution(false)
            .with_concurrent_computations(4)
            .with_rand_seed(42);
        assert!(!config.eager_execution);
        assert_eq!(config.concurrent_computations, 4);
        assert_eq!(config.rand_seed, 42);
    }
}
