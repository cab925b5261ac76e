//! Benchmark configuration

/// Workload sizes for benchmark runs
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Operations performed inside one transaction
    pub ops_per_transaction: Vec<usize>,
    /// Payload size of each write, in bytes
    pub payload_sizes: Vec<usize>,
    /// Thread counts for contention benchmarks
    pub thread_counts: Vec<usize>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            ops_per_transaction: vec![1, 10, 100],
            payload_sizes: vec![16, 1_024, 16_384],
            thread_counts: vec![2, 4, 8],
        }
    }
}

impl BenchmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smaller sizes for a fast run
    pub fn quick() -> Self {
        Self {
            ops_per_transaction: vec![1, 10],
            payload_sizes: vec![16],
            thread_counts: vec![2],
        }
    }

    /// Thread counts that make sense on this machine
    pub fn usable_thread_counts(&self) -> Vec<usize> {
        let limit = num_cpus::get() * 2;
        self.thread_counts
            .iter()
            .copied()
            .filter(|&n| n <= limit)
            .collect()
    }
}
