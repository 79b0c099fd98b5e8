//! The generation pipeline: validate, sort, generate, then apply or export

use std::io::Write;

use installer_common::config::{IMAGE_ARCHITECTURE_MULTI, IMAGE_ARCHITECTURE_SINGLE};
use installer_common::{Config, Error, Result};
use tracing::{info, warn};

use crate::apply::{Applier, ApplySummary, ClusterClient};
use crate::export::export;
use crate::generator::GenerationContext;
use crate::registry::GeneratorSet;
use crate::resource::Resource;

/// A validated configuration ready to drive generator sets
#[derive(Clone, Debug)]
pub struct Manifest {
    config: Config,
}

impl Manifest {
    /// Validate `config` and wrap it
    pub fn new(config: Config) -> Result<Self> {
        if config.namespace.trim().is_empty() {
            return Err(Error::validation_for_field(
                "namespace",
                format!("Invalid namespace: {}", config.namespace),
            ));
        }
        let arch = config.image_architecture.as_str();
        if arch != IMAGE_ARCHITECTURE_SINGLE && arch != IMAGE_ARCHITECTURE_MULTI {
            return Err(Error::validation_for_field(
                "imageArchitecture",
                format!(
                    "Invalid imageArchitecture: {} (expected {} or {})",
                    arch, IMAGE_ARCHITECTURE_SINGLE, IMAGE_ARCHITECTURE_MULTI
                ),
            ));
        }
        Ok(Self { config })
    }

    /// Configuration every generator sees
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the set's generators in priority order and collect their output
    ///
    /// When `exporting`, generators that are not exportable are skipped. The
    /// first failing generator aborts the run and nothing is returned.
    pub fn generate(&self, set: &GeneratorSet, exporting: bool) -> Result<Vec<Resource>> {
        let ctx = GenerationContext::new(&self.config);
        let mut resources = Vec::new();

        for generator in set.sorted() {
            let name = generator.name();
            if exporting && !generator.exportable() {
                warn!(generator = %name, "skipping generator that cannot be exported");
                continue;
            }

            let produced = generator.generate(&ctx).map_err(|e| match e {
                Error::Generation { .. } => e,
                other => Error::generation(name, other.to_string()),
            })?;
            info!(generator = %name, count = produced.len(), "generated resources");
            resources.extend(produced);
        }

        Ok(resources)
    }

    /// Generate the set and reconcile it against the cluster
    pub async fn apply(&self, client: &dyn ClusterClient, set: &GeneratorSet) -> Result<ApplySummary> {
        let resources = self.generate(set, false)?;
        info!(set = set.name(), resources = resources.len(), "applying");
        Applier::new(client, &self.config.namespace)
            .apply(&resources)
            .await
    }

    /// Generate the set and write it as multi-document YAML
    pub fn export<W: Write + ?Sized>(&self, set: &GeneratorSet, sink: &mut W) -> Result<()> {
        let resources = self.generate(set, true)?;
        info!(set = set.name(), resources = resources.len(), "exporting");
        export(&resources, sink)
    }
}
