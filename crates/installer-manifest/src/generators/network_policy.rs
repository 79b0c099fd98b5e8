//! Network policies restricting traffic between components

use installer_common::{Error, Result};
use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use serde_json::json;
use tracing::debug;

use crate::builders::{app_labels, namespaced_meta};
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

/// Who may reach a component
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Peers {
    /// Any source, including traffic from outside the cluster
    Anywhere,
    /// Pods in the install namespace
    Namespace,
    /// No ingress at all
    Nobody,
}

/// Ingress policy for one component
#[derive(Clone, Copy, Debug)]
pub struct PolicyTarget {
    /// Value of the `app` label the policy selects
    pub app: &'static str,
    /// Ports the component accepts traffic on
    pub ports: &'static [i32],
    /// Allowed sources
    pub peers: Peers,
    /// Only emitted when the v4 scanner is enabled
    pub scanner_v4_only: bool,
}

impl PolicyTarget {
    const fn new(app: &'static str, ports: &'static [i32], peers: Peers) -> Self {
        Self {
            app,
            ports,
            peers,
            scanner_v4_only: false,
        }
    }

    const fn scanner_v4(mut self) -> Self {
        self.scanner_v4_only = true;
        self
    }
}

/// Components of the central set
pub const CENTRAL_TARGETS: &[PolicyTarget] = &[
    PolicyTarget::new("central", &[8443], Peers::Anywhere),
    PolicyTarget::new("central-db", &[5432], Peers::Namespace),
    PolicyTarget::new("scanner-v4-indexer", &[8443], Peers::Namespace).scanner_v4(),
    PolicyTarget::new("scanner-v4-matcher", &[8443], Peers::Namespace).scanner_v4(),
];

/// Components of the secured cluster set
pub const SECURED_CLUSTER_TARGETS: &[PolicyTarget] = &[
    PolicyTarget::new("sensor", &[8443, 9443], Peers::Namespace),
    PolicyTarget::new("admission-control", &[8443], Peers::Anywhere),
    PolicyTarget::new("collector", &[], Peers::Nobody),
];

/// Network policies for the components of a set, when enabled
pub struct NetworkPolicyGenerator {
    targets: &'static [PolicyTarget],
}

impl NetworkPolicyGenerator {
    /// Generator emitting one policy per target
    pub const fn new(targets: &'static [PolicyTarget]) -> Self {
        Self { targets }
    }
}

impl Generator for NetworkPolicyGenerator {
    fn name(&self) -> &str {
        "NetworkPolicies"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        if !ctx.config.apply_network_policies {
            debug!(generator = self.name(), "network policies disabled");
            return Ok(Vec::new());
        }

        self.targets
            .iter()
            .filter(|t| !t.scanner_v4_only || ctx.config.scanner_v4)
            .map(|t| policy(self.name(), t, ctx.namespace()))
            .collect()
    }
}

fn policy(generator: &str, target: &PolicyTarget, namespace: &str) -> Result<Resource> {
    let ports: Vec<_> = target
        .ports
        .iter()
        .map(|port| json!({ "port": port, "protocol": "TCP" }))
        .collect();
    let ingress = match target.peers {
        Peers::Anywhere => json!([{ "ports": ports }]),
        Peers::Namespace => json!([{ "ports": ports, "from": [{ "podSelector": {} }] }]),
        Peers::Nobody => json!([]),
    };

    let spec: NetworkPolicySpec = serde_json::from_value(json!({
        "podSelector": { "matchLabels": app_labels(target.app) },
        "policyTypes": ["Ingress"],
        "ingress": ingress,
    }))
    .map_err(|e| Error::generation(generator, format!("invalid policy for {}: {}", target.app, e)))?;

    let np = NetworkPolicy {
        metadata: namespaced_meta(&format!("allow-ingress-{}", target.app), namespace),
        spec: Some(spec),
        ..Default::default()
    };
    Resource::new(&np)
}
