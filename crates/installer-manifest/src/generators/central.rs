//! Central deployment, its configuration and TLS secrets

use std::collections::BTreeMap;

use installer_common::Result;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, KeyToPath, ObjectFieldSelector,
    PodSpec, Secret, ServicePort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::builders::{
    self, apply_volumes, hotload_command, namespaced_meta, read_tls_bundle,
    restricted_security_context, VolumeDefAndMount,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const NAME: &str = "central";
const TLS_SECRET: &str = "central-tls";
const HTPASSWD_SECRET: &str = "central-htpasswd";
const CONFIG_MAP: &str = "central-config";
const ENDPOINTS_CONFIG_MAP: &str = "central-endpoints";
const ENTRYPOINT: &str = "/stackrox/central-entrypoint.sh";
const API_PORT: i32 = 8443;
const CENTRAL_USER: i64 = 4000;
const ADMIN_PASSWORD_LENGTH: usize = 24;

const CENTRAL_CONFIG: &str = "\
maintenance:
  safeMode: false
  compaction:
    enabled: true
";

const ENDPOINTS_CONFIG: &str = "\
endpoints:
  - listen: \":8443\"
    protocols: [http, grpc]
";

/// Central API server and UI
pub struct CentralGenerator;

impl Generator for CentralGenerator {
    fn name(&self) -> &str {
        "Central"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = ctx.namespace();
        Ok(vec![
            builders::service_account(NAME, ns)?,
            htpasswd_secret(ns)?,
            tls_secret(self.name(), ctx)?,
            config_map(CONFIG_MAP, "central-config.yaml", CENTRAL_CONFIG, ns)?,
            config_map(ENDPOINTS_CONFIG_MAP, "endpoints.yaml", ENDPOINTS_CONFIG, ns)?,
            deployment(ctx)?,
            builders::service(NAME, ns, vec![https_port()])?,
        ])
    }
}

fn htpasswd_secret(namespace: &str) -> Result<Resource> {
    let secret = Secret {
        metadata: namespaced_meta(HTPASSWD_SECRET, namespace),
        string_data: Some(BTreeMap::from([(
            "password".to_string(),
            builders::random_password(ADMIN_PASSWORD_LENGTH),
        )])),
        ..Default::default()
    };
    Ok(Resource::new(&secret)?.create_only())
}

fn tls_secret(generator: &str, ctx: &GenerationContext<'_>) -> Result<Resource> {
    let mut data = read_tls_bundle(generator, &ctx.config.cert_path)?;
    if let Some(key) = data.get("key.pem").cloned() {
        data.insert("jwt-key.pem".to_string(), key);
    }
    let secret = Secret {
        metadata: namespaced_meta(TLS_SECRET, ctx.namespace()),
        string_data: Some(data),
        ..Default::default()
    };
    Resource::new(&secret)
}

fn config_map(name: &str, key: &str, content: &str, namespace: &str) -> Result<Resource> {
    let cm = ConfigMap {
        metadata: namespaced_meta(name, namespace),
        data: Some(BTreeMap::from([(key.to_string(), content.to_string())])),
        ..Default::default()
    };
    Resource::new(&cm)
}

fn https_port() -> ServicePort {
    ServicePort {
        target_port: Some(IntOrString::Int(API_PORT)),
        ..builders::service_port("https", 443)
    }
}

fn volumes() -> Vec<VolumeDefAndMount> {
    let mut jwt = VolumeDefAndMount::secret(
        "central-jwt-volume",
        "/run/secrets/stackrox.io/jwt/",
        TLS_SECRET,
    )
    .read_only();
    if let Some(secret) = jwt.volume.secret.as_mut() {
        secret.items = Some(vec![KeyToPath {
            key: "jwt-key.pem".to_string(),
            path: "jwt-key.pem".to_string(),
            ..Default::default()
        }]);
    }

    vec![
        VolumeDefAndMount::empty_dir("varlog", "/var/log/stackrox/"),
        VolumeDefAndMount::empty_dir("central-tmp-volume", "/tmp"),
        VolumeDefAndMount::empty_dir("central-etc-ssl-volume", "/etc/ssl"),
        VolumeDefAndMount::empty_dir("central-etc-pki-volume", "/etc/pki/ca-trust"),
        VolumeDefAndMount::secret(
            "central-certs-volume",
            "/run/secrets/stackrox.io/certs/",
            TLS_SECRET,
        )
        .read_only(),
        VolumeDefAndMount::optional_secret(
            "central-default-tls-cert-volume",
            "/run/secrets/stackrox.io/default-tls-cert/",
            "central-default-tls-cert",
        ),
        VolumeDefAndMount::optional_secret(
            "central-htpasswd-volume",
            "/run/secrets/stackrox.io/htpasswd/",
            HTPASSWD_SECRET,
        ),
        jwt,
        VolumeDefAndMount::optional_secret(
            "additional-ca-volume",
            "/usr/local/share/ca-certificates/",
            "additional-ca",
        ),
        VolumeDefAndMount::optional_secret(
            "central-license-volume",
            "/run/secrets/stackrox.io/central-license/",
            "central-license",
        ),
        VolumeDefAndMount::config_map("central-config-volume", "/etc/stackrox", CONFIG_MAP),
        VolumeDefAndMount::optional_secret(
            "proxy-config-volume",
            "/run/secrets/stackrox.io/proxy-config/",
            "proxy-config",
        ),
        VolumeDefAndMount::config_map(
            "endpoints-config-volume",
            "/etc/stackrox.d/endpoints/",
            ENDPOINTS_CONFIG_MAP,
        )
        .read_only(),
        VolumeDefAndMount::secret(
            "central-db-password",
            "/run/secrets/stackrox.io/db-password",
            "central-db-password",
        ),
    ]
}

fn hardcoded_env(ctx: &GenerationContext<'_>) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: "ROX_NAMESPACE".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.namespace".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];
    if ctx.config.scanner_v4 {
        env.push(env_var("ROX_SCANNER_V4", "true"));
    }
    if ctx.config.dev_mode {
        env.push(env_var("ROX_HOTRELOAD", "true"));
    }
    env
}

fn deployment(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let mut central = Container {
        name: NAME.to_string(),
        image: Some(ctx.config.images.central.clone()),
        command: Some(hotload_command(ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(NAME, NAME, NAME, &hardcoded_env(ctx))),
        ports: Some(vec![ContainerPort {
            name: Some("api".to_string()),
            container_port: API_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context(CENTRAL_USER)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        ..Default::default()
    };
    apply_volumes(&volumes(), &mut central, &mut pod);
    pod.containers = vec![central];

    builders::deployment(NAME, ctx.namespace(), pod)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::test_support::write_tls_bundle;
    use installer_common::config::EnvEntry;
    use installer_common::Config;
    use k8s_openapi::api::apps::v1::Deployment;

    fn config_with_certs(dir: &tempfile::TempDir) -> Config {
        write_tls_bundle(dir.path());
        Config {
            cert_path: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn central_container(config: &Config) -> Container {
        let resources = CentralGenerator
            .generate(&GenerationContext::new(config))
            .expect("generation should succeed");
        let deployment: Deployment = resources
            .iter()
            .find(|r| r.kind() == "Deployment")
            .expect("deployment present")
            .parse()
            .expect("parse deployment");
        deployment
            .spec
            .and_then(|s| s.template.spec)
            .map(|p| p.containers[0].clone())
            .expect("container")
    }

    #[test]
    fn test_generates_expected_objects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resources = CentralGenerator
            .generate(&GenerationContext::new(&config_with_certs(&dir)))
            .expect("generation should succeed");
        let names: Vec<(&str, &str)> = resources
            .iter()
            .map(|r| (r.kind(), r.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("ServiceAccount", "central"),
                ("Secret", "central-htpasswd"),
                ("Secret", "central-tls"),
                ("ConfigMap", "central-config"),
                ("ConfigMap", "central-endpoints"),
                ("Deployment", "central"),
                ("Service", "central"),
            ]
        );
        assert!(!resources[1].is_updateable);
    }

    #[test]
    fn test_tls_secret_contains_bundle_and_jwt_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resources = CentralGenerator
            .generate(&GenerationContext::new(&config_with_certs(&dir)))
            .expect("generation should succeed");
        let secret: Secret = resources[2].parse().expect("secret");
        let data = secret.string_data.expect("string data");
        assert_eq!(
            data.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["ca.pem", "cert.pem", "jwt-key.pem", "key.pem"]
        );
        assert_eq!(data["jwt-key.pem"], data["key.pem"]);
    }

    #[test]
    fn test_missing_certificates_fail_generation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            cert_path: dir.path().join("missing"),
            ..Config::default()
        };
        let err = CentralGenerator
            .generate(&GenerationContext::new(&config))
            .expect_err("no certs present");
        assert_eq!(err.generator(), Some("Central"));
        assert!(err.to_string().contains("ca.pem"));
    }

    #[test]
    fn test_rox_namespace_comes_from_field_ref() {
        let dir = tempfile::tempdir().expect("tempdir");
        let container = central_container(&config_with_certs(&dir));
        let env = container.env.expect("env");
        let rox_namespace = env
            .iter()
            .find(|e| e.name == "ROX_NAMESPACE")
            .expect("ROX_NAMESPACE set");
        assert_eq!(
            rox_namespace
                .value_from
                .as_ref()
                .and_then(|v| v.field_ref.as_ref())
                .map(|f| f.field_path.as_str()),
            Some("metadata.namespace")
        );
    }

    #[test]
    fn test_dev_mode_wraps_entrypoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_with_certs(&dir);
        config.dev_mode = true;
        let container = central_container(&config);
        let command = container.command.expect("command");
        assert_eq!(command[0], "sh");
        assert!(command[2].contains(ENTRYPOINT));
        assert!(container
            .env
            .expect("env")
            .iter()
            .any(|e| e.name == "ROX_HOTRELOAD"));
    }

    #[test]
    fn test_configured_env_is_merged_but_cannot_override_rox_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config_with_certs(&dir);
        config.env_vars.global = vec![
            EnvEntry::literal("LOG_LEVEL", "debug"),
            EnvEntry::literal("ROX_NAMESPACE", "hijacked"),
        ];
        let container = central_container(&config);
        let env = container.env.expect("env");
        assert_eq!(env[0].name, "LOG_LEVEL");
        assert_eq!(env[0].value.as_deref(), Some("debug"));
        let rox_namespace = env
            .iter()
            .find(|e| e.name == "ROX_NAMESPACE")
            .expect("ROX_NAMESPACE set");
        assert!(rox_namespace.value.is_none());
    }

    #[test]
    fn test_service_targets_api_port() {
        let port = https_port();
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(API_PORT)));
    }
}
