use std::time::Duration;

use serde::{Deserialize, Serialize};

use testbed_core::{RegistryAuth, RetryPolicy, SweepScope};

/// Settings for one [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Name of the private network. Defaults to the group id.
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub auth: RegistryAuth,
    /// Budget of [`Orchestrator::wait_until_started`](crate::Orchestrator::wait_until_started).
    #[serde(default)]
    pub readiness: RetryPolicy,
    /// Budget for removing the network on stop; the gateway's policy when unset.
    #[serde(default)]
    pub network_removal: Option<RetryPolicy>,
    #[serde(default)]
    pub sweep: SweepScope,
}

impl OrchestratorConfig {
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_readiness(mut self, readiness: RetryPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    /// Keep the default backoff shape but change the total readiness budget.
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness.max_elapsed = timeout;
        self
    }

    pub fn with_network_removal(mut self, policy: RetryPolicy) -> Self {
        self.network_removal = Some(policy);
        self
    }

    pub fn with_sweep(mut self, sweep: SweepScope) -> Self {
        self.sweep = sweep;
        self
    }
}
