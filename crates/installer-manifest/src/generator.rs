//! Generator traits and priority ordering
//!
//! A generator is a stateless unit that turns the configuration into zero or
//! more [`Resource`]s. Generators that need to run before or after their
//! neighbours expose the [`Ordered`] capability; everything else sorts as
//! priority 0 and keeps its position relative to other priority-0 generators.

use installer_common::{Config, Result};
use k8s_openapi::api::core::v1::EnvVar;

use crate::env;
use crate::resource::Resource;

/// Everything a generator can see while producing resources
#[derive(Clone, Copy, Debug)]
pub struct GenerationContext<'a> {
    /// Read-only configuration for the run
    pub config: &'a Config,
}

impl<'a> GenerationContext<'a> {
    /// Create a context for the given configuration
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Namespace every namespaced object is placed in
    pub fn namespace(&self) -> &'a str {
        &self.config.namespace
    }

    /// Resolve the environment of one container against the configured overrides
    pub fn env_for(
        &self,
        deployment: &str,
        pod: &str,
        container: &str,
        existing: &[EnvVar],
    ) -> Vec<EnvVar> {
        env::resolve(&self.config.env_vars, deployment, pod, container, existing)
    }
}

/// A named producer of resources
pub trait Generator: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the generator runs during export
    fn exportable(&self) -> bool {
        true
    }

    /// Produce the resources for this generator
    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>>;

    /// Ordering capability, if the generator has one
    fn as_ordered(&self) -> Option<&dyn Ordered> {
        None
    }
}

/// Optional ordering capability for generators
///
/// Lower priorities run first. Negative values are allowed.
pub trait Ordered {
    /// Priority of the generator
    fn priority(&self) -> i32;
}

/// Effective priority of a generator (0 unless it is [`Ordered`])
pub fn priority_of(generator: &dyn Generator) -> i32 {
    generator.as_ordered().map_or(0, |o| o.priority())
}

/// Sort generators by ascending priority, keeping input order among equals
pub fn sort_by_priority<'a>(generators: &[&'a dyn Generator]) -> Vec<&'a dyn Generator> {
    let mut sorted = generators.to_vec();
    sorted.sort_by_key(|g| priority_of(*g));
    sorted
}
