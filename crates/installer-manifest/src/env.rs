//! Environment variable override resolution
//!
//! Overrides come from four configuration scopes, applied lowest to highest:
//! global, deployment, pod, container. Variables the generator hardcodes for a
//! container are applied last and always win. Configuration can never set a
//! protected variable; such entries are dropped with a warning.

use std::collections::HashMap;

use installer_common::config::{EnvEntry, EnvVarConfig};
use k8s_openapi::api::core::v1::EnvVar;
use tracing::warn;

/// Prefixes reserved for the product and for the kubelet
pub const PROTECTED_PREFIXES: &[&str] = &["ROX_", "KUBERNETES_"];

/// Names configuration may not override
pub const PROTECTED_NAMES: &[&str] = &[
    "PATH",
    "HOME",
    "HOSTNAME",
    "USER",
    "SHELL",
    "PWD",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
];

/// Whether a configuration-sourced variable name is reserved
pub fn is_protected(name: &str) -> bool {
    PROTECTED_NAMES.contains(&name)
        || PROTECTED_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Resolve the environment of one container
///
/// Names are unique in the output. A later scope replaces the value of an
/// earlier one but the variable keeps the position where it first appeared.
/// Unknown identifiers contribute nothing.
pub fn resolve(
    config: &EnvVarConfig,
    deployment: &str,
    pod: &str,
    container: &str,
    existing: &[EnvVar],
) -> Vec<EnvVar> {
    let mut merged = MergedEnv::default();

    let scopes = [
        ("global", Some(&config.global)),
        ("deployment", config.deployments.get(deployment)),
        ("pod", config.pods.get(pod)),
        ("container", config.containers.get(container)),
    ];
    for (scope, entries) in scopes {
        for entry in entries.into_iter().flatten() {
            merged.push_configured(scope, container, entry);
        }
    }

    for var in existing {
        merged.upsert(var.clone());
    }

    merged.vars
}

#[derive(Default)]
struct MergedEnv {
    vars: Vec<EnvVar>,
    positions: HashMap<String, usize>,
}

impl MergedEnv {
    fn push_configured(&mut self, scope: &str, container: &str, entry: &EnvEntry) {
        if is_protected(&entry.name) {
            warn!(
                env_var = %entry.name,
                scope,
                container,
                "ignoring override of protected environment variable"
            );
            return;
        }
        self.upsert(EnvVar::from(entry));
    }

    fn upsert(&mut self, var: EnvVar) {
        match self.positions.get(&var.name) {
            Some(&index) => self.vars[index] = var,
            None => {
                self.positions.insert(var.name.clone(), self.vars.len());
                self.vars.push(var);
            }
        }
    }
}

/// A literal environment variable
pub fn env_var(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}
