//! Installer configuration
//!
//! The configuration file is YAML. Any field left out of the file keeps the
//! value from the explicit defaults handed to [`Config::load`], so a file that
//! only sets `images.central` still carries every other image. Unknown fields
//! anywhere in the document are rejected.
//!
//! ```yaml
//! namespace: stackrox
//! devMode: true
//! images:
//!   central: quay.io/example/main:4.6.0
//! envVars:
//!   global:
//!     - name: LOG_LEVEL
//!       value: debug
//!   containers:
//!     central:
//!       - name: POD_IP
//!         valueFrom:
//!           fieldRef:
//!             fieldPath: status.podIP
//! ```

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::{Error, Result};

/// Image used for every non-database component unless overridden
pub const LOCAL_STACKROX_IMAGE: &str = "localhost:5001/stackrox/stackrox:latest";
/// Image used for every database component unless overridden
pub const LOCAL_DB_IMAGE: &str = "localhost:5001/stackrox/db:latest";

/// Default namespace all namespaced resources are created in
pub const DEFAULT_NAMESPACE: &str = "stackrox";
/// Default directory holding the central TLS material
pub const DEFAULT_CERT_PATH: &str = "./certs";
/// Single-architecture image builds
pub const IMAGE_ARCHITECTURE_SINGLE: &str = "single";
/// Multi-architecture image builds
pub const IMAGE_ARCHITECTURE_MULTI: &str = "multi";

/// Fully-resolved installer settings
///
/// Read-only for the duration of a run; generators only ever see `&Config`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Namespace for every namespaced object
    pub namespace: String,
    /// Deploy the v4 scanner alongside central
    pub scanner_v4: bool,
    /// Wrap entrypoints in a reload loop so binaries can be swapped in place
    pub dev_mode: bool,
    /// Emit network policies for the components of the set
    pub apply_network_policies: bool,
    /// Directory containing `ca.pem`, `cert.pem` and `key.pem`
    pub cert_path: PathBuf,
    /// `single` or `multi`
    pub image_architecture: String,
    /// Cluster registration secret settings
    pub crs: CrsConfig,
    /// Per-component image overrides
    pub images: Images,
    /// Environment variable overrides applied to generated containers
    pub env_vars: EnvVarConfig,
}

/// Settings for the cluster registration secret job
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrsConfig {
    /// Reach central through a local port-forward instead of its service
    pub port_forward: bool,
}

/// Container image per component
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[allow(missing_docs)]
pub struct Images {
    pub admission_control: String,
    pub sensor: String,
    pub collector: String,
    pub config_controller: String,
    pub central: String,
    pub central_db: String,
    pub scanner: String,
    pub scanner_db: String,
    #[serde(rename = "scannerv4")]
    pub scanner_v4: String,
    #[serde(rename = "scannerv4Db")]
    pub scanner_v4_db: String,
    pub vsock_listener: String,
}

impl Default for Images {
    fn default() -> Self {
        Self {
            admission_control: LOCAL_STACKROX_IMAGE.to_string(),
            sensor: LOCAL_STACKROX_IMAGE.to_string(),
            collector: LOCAL_STACKROX_IMAGE.to_string(),
            config_controller: LOCAL_STACKROX_IMAGE.to_string(),
            central: LOCAL_STACKROX_IMAGE.to_string(),
            central_db: LOCAL_DB_IMAGE.to_string(),
            scanner: LOCAL_STACKROX_IMAGE.to_string(),
            scanner_db: LOCAL_DB_IMAGE.to_string(),
            scanner_v4: LOCAL_STACKROX_IMAGE.to_string(),
            scanner_v4_db: LOCAL_DB_IMAGE.to_string(),
            vsock_listener: LOCAL_STACKROX_IMAGE.to_string(),
        }
    }
}

/// Scoped environment variable overrides
///
/// Scopes are flat: deployments, pods and containers are each keyed by their
/// own identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVarConfig {
    /// Entries applied to every container
    #[serde(default)]
    pub global: Vec<EnvEntry>,
    /// Entries per deployment (generator) identifier
    #[serde(default, alias = "generators")]
    pub deployments: BTreeMap<String, Vec<EnvEntry>>,
    /// Entries per pod identifier
    #[serde(default)]
    pub pods: BTreeMap<String, Vec<EnvEntry>>,
    /// Entries per container identifier
    #[serde(default)]
    pub containers: BTreeMap<String, Vec<EnvEntry>>,
}

/// One environment variable override
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvEntry", into = "RawEnvEntry")]
pub struct EnvEntry {
    /// Variable name
    pub name: String,
    /// Literal value or reference
    pub value: EnvValue,
}

/// Value of an environment variable override
#[derive(Clone, Debug, PartialEq)]
pub enum EnvValue {
    /// A literal string
    Literal(String),
    /// A field, resource, secret or config map reference resolved by the cluster
    Reference(EnvVarSource),
}

impl EnvEntry {
    /// Entry with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Literal(value.into()),
        }
    }

    /// Entry resolved from a reference
    pub fn reference(name: impl Into<String>, source: EnvVarSource) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Reference(source),
        }
    }
}

impl From<&EnvEntry> for EnvVar {
    fn from(entry: &EnvEntry) -> Self {
        match &entry.value {
            EnvValue::Literal(value) => EnvVar {
                name: entry.name.clone(),
                value: Some(value.clone()),
                value_from: None,
            },
            EnvValue::Reference(source) => EnvVar {
                name: entry.name.clone(),
                value: None,
                value_from: Some(source.clone()),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawEnvEntry {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_from: Option<EnvVarSource>,
}

impl TryFrom<RawEnvEntry> for EnvEntry {
    type Error = String;

    fn try_from(raw: RawEnvEntry) -> std::result::Result<Self, Self::Error> {
        let value = match (raw.value, raw.value_from) {
            (Some(value), None) => EnvValue::Literal(value),
            (None, Some(source)) => EnvValue::Reference(source),
            (Some(_), Some(_)) => {
                return Err(format!(
                    "env var {} sets both value and valueFrom",
                    raw.name
                ))
            }
            (None, None) => {
                return Err(format!(
                    "env var {} needs one of value or valueFrom",
                    raw.name
                ))
            }
        };
        Ok(Self {
            name: raw.name,
            value,
        })
    }
}

impl From<EnvEntry> for RawEnvEntry {
    fn from(entry: EnvEntry) -> Self {
        match entry.value {
            EnvValue::Literal(value) => Self {
                name: entry.name,
                value: Some(value),
                value_from: None,
            },
            EnvValue::Reference(source) => Self {
                name: entry.name,
                value: None,
                value_from: Some(source),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            scanner_v4: false,
            dev_mode: false,
            apply_network_policies: false,
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            image_architecture: IMAGE_ARCHITECTURE_SINGLE.to_string(),
            crs: CrsConfig::default(),
            images: Images::default(),
            env_vars: EnvVarConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration file at `path` on top of `defaults`
    ///
    /// An empty path yields a copy of `defaults` without touching the
    /// filesystem. A path that cannot be opened is an error.
    pub fn read(path: impl AsRef<Path>, defaults: &Config) -> Result<Config> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(defaults.clone());
        }
        debug!(path = %path.display(), "reading installer config");
        let file = std::fs::File::open(path).map_err(|e| {
            Error::config(format!(
                "failed to open config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::load(file, defaults)
    }

    /// Decode a YAML document from `reader` on top of `defaults`
    pub fn load(mut reader: impl Read, defaults: &Config) -> Result<Config> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let mut overlay: Value =
            serde_yaml::from_str(&content).map_err(Error::malformed_yaml)?;
        if overlay.is_null() {
            return Err(Error::malformed_yaml("EOF"));
        }
        rename_generators_scope(&mut overlay);

        let mut merged = serde_yaml::to_value(defaults).map_err(|e| {
            Error::serialization(format!("failed to encode default config: {}", e))
        })?;
        merge_yaml(&mut merged, overlay);

        serde_yaml::from_value(merged).map_err(Error::malformed_yaml)
    }
}

/// Rewrite `envVars.generators` to `envVars.deployments` so it merges with the defaults
fn rename_generators_scope(doc: &mut Value) {
    let Some(Value::Mapping(env)) = doc.get_mut("envVars") else {
        return;
    };
    if env.contains_key("deployments") {
        return;
    }
    if let Some(scope) = env.remove("generators") {
        env.insert(Value::from("deployments"), scope);
    }
}

/// Overlay `overlay` onto `base`: mappings merge key by key, anything else replaces
///
/// A null in the overlay leaves the base value in place.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ObjectFieldSelector;
    use std::io::Write;

    fn load_str(content: &str) -> Result<Config> {
        Config::load(content.as_bytes(), &Config::default())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.namespace, "stackrox");
        assert!(!cfg.scanner_v4);
        assert!(!cfg.dev_mode);
        assert!(!cfg.apply_network_policies);
        assert_eq!(cfg.cert_path, PathBuf::from("./certs"));
        assert_eq!(cfg.image_architecture, "single");
        assert!(!cfg.crs.port_forward);
        assert_eq!(cfg.env_vars, EnvVarConfig::default());
    }

    #[test]
    fn test_default_images() {
        let images = Images::default();
        assert_eq!(images.central, LOCAL_STACKROX_IMAGE);
        assert_eq!(images.sensor, LOCAL_STACKROX_IMAGE);
        assert_eq!(images.vsock_listener, LOCAL_STACKROX_IMAGE);
        assert_eq!(images.central_db, LOCAL_DB_IMAGE);
        assert_eq!(images.scanner_db, LOCAL_DB_IMAGE);
        assert_eq!(images.scanner_v4_db, LOCAL_DB_IMAGE);
    }

    #[test]
    fn test_read_empty_path_returns_copy_of_defaults() {
        let defaults = Config::default();
        let mut cfg = Config::read("", &defaults).expect("empty path should succeed");
        assert_eq!(cfg, defaults);

        cfg.namespace = "modified".to_string();
        assert_eq!(defaults.namespace, "stackrox");
    }

    #[test]
    fn test_read_missing_file_fails() {
        let err = Config::read("/nonexistent/file.yaml", &Config::default())
            .expect_err("missing file should fail");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_read_valid_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"namespace: test-namespace
scannerV4: true
devMode: true
applyNetworkPolicies: true
certPath: /custom/certs
images:
  central: custom-central:latest
  sensor: custom-sensor:latest
crs:
  portForward: true"#
        )
        .expect("write config");

        let cfg = Config::read(file.path(), &Config::default()).expect("config should load");
        assert_eq!(cfg.namespace, "test-namespace");
        assert!(cfg.scanner_v4);
        assert!(cfg.dev_mode);
        assert!(cfg.apply_network_policies);
        assert_eq!(cfg.cert_path, PathBuf::from("/custom/certs"));
        assert!(cfg.crs.port_forward);
        assert_eq!(cfg.images.central, "custom-central:latest");
        assert_eq!(cfg.images.sensor, "custom-sensor:latest");
    }

    #[test]
    fn test_partial_images_keep_defaults() {
        let cfg = load_str("images:\n  central: custom-central:latest\n").expect("should load");
        assert_eq!(cfg.images.central, "custom-central:latest");
        assert_eq!(cfg.images.collector, LOCAL_STACKROX_IMAGE);
        assert_eq!(cfg.images.central_db, LOCAL_DB_IMAGE);
        assert_eq!(cfg.namespace, "stackrox");
    }

    #[test]
    fn test_load_uses_given_defaults() {
        let defaults = Config {
            namespace: "custom-default".to_string(),
            ..Config::default()
        };
        let cfg = Config::load("devMode: true".as_bytes(), &defaults).expect("should load");
        assert_eq!(cfg.namespace, "custom-default");
        assert!(cfg.dev_mode);
    }

    #[test]
    fn test_load_invalid_yaml() {
        let err = load_str("namespace: [unclosed").expect_err("should fail");
        assert!(err.to_string().starts_with("malformed yaml: "));
    }

    #[test]
    fn test_load_unknown_fields() {
        let err = load_str("namespace: test\nunknownField: value").expect_err("should fail");
        assert!(err.to_string().starts_with("malformed yaml: "));
        assert!(err.to_string().contains("unknownField"));
    }

    #[test]
    fn test_load_unknown_nested_field() {
        let err = load_str("images:\n  bogus: x\n").expect_err("should fail");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_load_empty_content() {
        let err = load_str("").expect_err("empty document should fail");
        assert_eq!(err.to_string(), "malformed yaml: EOF");
    }

    #[test]
    fn test_load_wrong_type() {
        let err = load_str("devMode: sometimes").expect_err("should fail");
        assert!(err.to_string().starts_with("malformed yaml: "));
    }

    #[test]
    fn test_env_vars_all_scopes() {
        let cfg = load_str(
            r#"
envVars:
  global:
    - name: GLOBAL_VAR
      value: global
  generators:
    central:
      - name: GEN_VAR
        value: gen
  pods:
    central:
      - name: POD_VAR
        value: pod
  containers:
    central:
      - name: POD_IP
        valueFrom:
          fieldRef:
            fieldPath: status.podIP
"#,
        )
        .expect("should load");

        let env = &cfg.env_vars;
        assert_eq!(env.global, vec![EnvEntry::literal("GLOBAL_VAR", "global")]);
        assert_eq!(
            env.deployments["central"],
            vec![EnvEntry::literal("GEN_VAR", "gen")]
        );
        assert_eq!(env.pods["central"], vec![EnvEntry::literal("POD_VAR", "pod")]);
        assert_eq!(
            env.containers["central"],
            vec![EnvEntry::reference(
                "POD_IP",
                EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "status.podIP".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            )]
        );
    }

    #[test]
    fn test_generators_alias_with_non_empty_defaults() {
        let mut defaults = Config::default();
        defaults
            .env_vars
            .deployments
            .insert("sensor".to_string(), vec![EnvEntry::literal("A", "1")]);

        let cfg = Config::load(
            "envVars:\n  generators:\n    central:\n      - name: B\n        value: \"2\"\n"
                .as_bytes(),
            &defaults,
        )
        .expect("should load");
        assert_eq!(cfg.env_vars.deployments.len(), 2);
        assert_eq!(
            cfg.env_vars.deployments["central"],
            vec![EnvEntry::literal("B", "2")]
        );
    }

    #[test]
    fn test_env_entry_requires_exactly_one_value() {
        let err = load_str("envVars:\n  global:\n    - name: NOTHING\n").expect_err("should fail");
        assert!(err.to_string().contains("needs one of value or valueFrom"));

        let err = load_str(
            r#"
envVars:
  global:
    - name: BOTH
      value: x
      valueFrom:
        fieldRef:
          fieldPath: metadata.name
"#,
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("sets both value and valueFrom"));
    }

    #[test]
    fn test_env_entry_into_env_var() {
        let literal: EnvVar = (&EnvEntry::literal("A", "1")).into();
        assert_eq!(literal.name, "A");
        assert_eq!(literal.value.as_deref(), Some("1"));
        assert!(literal.value_from.is_none());

        let source = EnvVarSource::default();
        let reference: EnvVar = (&EnvEntry::reference("B", source.clone())).into();
        assert!(reference.value.is_none());
        assert_eq!(reference.value_from, Some(source));
    }

    #[test]
    fn test_null_section_keeps_defaults() {
        let cfg = load_str("namespace: other\nimages:\n").expect("should load");
        assert_eq!(cfg.namespace, "other");
        assert_eq!(cfg.images, Images::default());
    }

    #[test]
    fn test_merge_yaml_replaces_scalars_and_sequences() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb: [1, 2]\nc: {d: 1, e: 2}").expect("base");
        let overlay: Value = serde_yaml::from_str("a: 2\nb: [3]\nc: {e: 3}").expect("overlay");
        merge_yaml(&mut base, overlay);
        let expected: Value =
            serde_yaml::from_str("a: 2\nb: [3]\nc: {d: 1, e: 3}").expect("expected");
        assert_eq!(base, expected);
    }
}
