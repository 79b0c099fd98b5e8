//! Namespace holding every namespaced object of a set

use installer_common::Result;
use k8s_openapi::api::core::v1::Namespace;

use crate::builders::cluster_meta;
use crate::generator::{GenerationContext, Generator, Ordered};
use crate::resource::Resource;

/// The namespace every other generator places its objects in
pub struct NamespaceGenerator;

impl Generator for NamespaceGenerator {
    fn name(&self) -> &str {
        "Namespace"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = Namespace {
            metadata: cluster_meta(ctx.namespace()),
            ..Default::default()
        };
        Ok(vec![Resource::new(&ns)?.cluster_scoped().create_only()])
    }

    fn as_ordered(&self) -> Option<&dyn Ordered> {
        Some(self)
    }
}

/// Runs ahead of every other generator
impl Ordered for NamespaceGenerator {
    fn priority(&self) -> i32 {
        i32::MIN
    }
}
