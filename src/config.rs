use serde::{Deserialize, Serialize};

/// What an idle pool worker does while no subtask is claimable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Block on a condition variable until new work is signalled.
    #[default]
    Sleep,
    /// Keep polling the queue, yielding the CPU between polls. Lower wake-up
    /// latency at the cost of a busy core per idle worker.
    Spin,
}

/// Thread pool configuration, typically deserialized from the embedding
/// application's config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads. 0 = one per logical CPU.
    #[serde(default)]
    pub worker_threads: usize,
    /// Idle behaviour of the workers.
    #[serde(default)]
    pub idle_policy: IdlePolicy,
    /// Worker threads are named `{prefix}-{index}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_thread_name_prefix() -> String {
    "cts-worker".to_owned()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            idle_policy: IdlePolicy::default(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl PoolConfig {
    /// Config for a pool of exactly `worker_threads` workers.
    #[must_use]
    pub fn with_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Replace the idle policy.
    #[must_use]
    pub fn idle_policy(mut self, idle_policy: IdlePolicy) -> Self {
        self.idle_policy = idle_policy;
        self
    }

    /// Replace the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Resolve the worker count; never 0.
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_resolves_to_cpu_count() {
        let config = PoolConfig::default();
        assert_eq!(config.resolved_worker_threads(), num_cpus::get().max(1));
        assert_eq!(PoolConfig::with_threads(3).resolved_worker_threads(), 3);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: PoolConfig = serde_json::from_str(r#"{"idle_policy": "spin"}"#).unwrap();
        assert_eq!(config.worker_threads, 0);
        assert_eq!(config.idle_policy, IdlePolicy::Spin);
        assert_eq!(config.thread_name_prefix, "cts-worker");
    }
}
