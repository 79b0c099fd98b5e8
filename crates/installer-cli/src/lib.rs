//! Installer CLI library

pub mod error;

pub use error::{Error, Result};

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use installer_common::kube_utils::create_client;
use installer_common::{Config, DEFAULT_CONFIG_PATH};
use installer_manifest::{generator_set, KubeClusterClient, Manifest};

/// Generate StackRox manifests and apply or export them
#[derive(Parser, Debug)]
#[command(name = "installer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the installer configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub conf: PathBuf,

    /// Path to kubeconfig (defaults to the usual kubeconfig lookup)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// What to do with the generated objects
    #[arg(value_enum)]
    pub action: Action,

    /// Generator set to run (central, securedcluster or crs)
    pub set: String,
}

/// What to do with the generated objects
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Create or update the objects in the cluster
    Apply,
    /// Print the objects as multi-document YAML on stdout
    Export,
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        self.run_with_output(&mut stdout).await
    }

    /// Run the CLI command, writing exported YAML to `out`
    pub async fn run_with_output(self, out: &mut dyn Write) -> Result<()> {
        let config = Config::read(&self.conf, &Config::default())?;
        let manifest = Manifest::new(config)?;
        let set = generator_set(&self.set)?;

        match self.action {
            Action::Apply => {
                let client = create_client(self.kubeconfig.as_deref()).await?;
                let cluster = KubeClusterClient::new(client);
                let summary = manifest.apply(&cluster, set).await?;
                info!(
                    set = set.name(),
                    created = summary.created,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    "install finished"
                );
            }
            Action::Export => {
                manifest.export(set, out)?;
                out.flush()?;
            }
        }
        Ok(())
    }
}
