//! Kubernetes helpers shared by the generators and the applier

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::debug;

use crate::Error;

/// Build an ApiResource from an apiVersion and kind
///
/// The plural is derived with [`pluralize_kind`]; no discovery round-trip is
/// made, so every kind the installer emits must pluralize regularly.
///
/// # Example
/// ```
/// use installer_common::kube_utils::build_api_resource;
///
/// let ar = build_api_resource("rbac.authorization.k8s.io/v1", "ClusterRole");
/// assert_eq!(ar.group, "rbac.authorization.k8s.io");
/// assert_eq!(ar.plural, "clusterroles");
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Build an ApiResource from the type identity carried by an object
pub fn api_resource_for(types: &TypeMeta) -> ApiResource {
    build_api_resource(&types.api_version, &types.kind)
}

/// Parse an apiVersion into `(group, version)`
///
/// The core group has no prefix, so `"v1"` yields an empty group.
///
/// ```
/// use installer_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind into its lower-case collection name
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

fn ends_with_vowel_y(lower: &str) -> bool {
    ["ay", "ey", "iy", "oy", "uy"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path with default timeouts
///
/// Without a path the configuration is inferred (`KUBECONFIG`,
/// `~/.kube/config`, then in-cluster service account).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "loading kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Ok(Client::try_from(config)?)
}
