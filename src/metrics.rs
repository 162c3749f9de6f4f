use std::sync::{LazyLock, RwLock};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

pub static REGISTRY: LazyLock<RwLock<Registry>> =
    LazyLock::new(|| RwLock::new(Registry::with_prefix("identity_proxy_agent")));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PolicyOpLabels {
    pub pod_ip: String,
    pub node: String,
    pub outcome: String,
}

/// Outcome sink for every redirect policy mutation the loop attempts.
#[derive(Clone)]
pub struct RedirectorMetrics {
    policy_ops: Family<PolicyOpLabels, Counter>,
}

impl Default for RedirectorMetrics {
    fn default() -> Self {
        let policy_ops = Family::<PolicyOpLabels, Counter>::default();
        let mut guard = REGISTRY.write().unwrap();
        guard.register(
            "policy_operations",
            "Number of redirect policy operations by outcome",
            policy_ops.clone(),
        );
        Self { policy_ops }
    }
}

impl RedirectorMetrics {
    /// Construct without touching the global registry, for tests.
    #[cfg(test)]
    pub(crate) fn unregistered() -> Self {
        Self {
            policy_ops: Family::<PolicyOpLabels, Counter>::default(),
        }
    }

    pub fn report(&self, pod_ip: &str, node: &str, outcome: &str) {
        self.policy_ops
            .get_or_create(&PolicyOpLabels {
                pod_ip: pod_ip.to_string(),
                node: node.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn count(&self, pod_ip: &str, node: &str, outcome: &str) -> u64 {
        self.policy_ops
            .get_or_create(&PolicyOpLabels {
                pod_ip: pod_ip.to_string(),
                node: node.to_string(),
                outcome: outcome.to_string(),
            })
            .get()
    }
}

pub const OUTCOME_APPLIED: &str = "applied";
pub const OUTCOME_REMOVED: &str = "removed";
pub const OUTCOME_FAILED: &str = "failed";
