//! Shared builders for the objects most generators emit

use std::collections::BTreeMap;
use std::path::Path;

use installer_common::{Config, Error, Result, APP_LABEL_KEY};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, HostPathVolumeSource,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SeccompProfile,
    SecretVolumeSource, SecurityContext, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::resource::Resource;

/// File mode for mounted secrets readable by the owning group
pub const READ_ONLY_MODE: i32 = 0o640;
/// UID/GID of the postgres user in the database image
pub const POSTGRES_USER: i64 = 70;
/// UID/GID of the unprivileged scanner user (`nobody`)
pub const SCANNER_USER: i64 = 65534;
/// Two gibibytes, as a resource quantity
pub const TWO_GIGS: &str = "2Gi";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// A pod volume together with where one container mounts it
///
/// The volume is always named after the mount, whatever name it was built with.
#[derive(Clone, Debug)]
pub struct VolumeDefAndMount {
    /// Name shared by the volume and the mount
    pub name: String,
    /// Path inside the container
    pub mount_path: String,
    /// Mount read-only
    pub read_only: bool,
    /// Volume source; its name is replaced by `name`
    pub volume: Volume,
}

impl VolumeDefAndMount {
    fn with_volume(name: &str, mount_path: &str, volume: Volume) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only: false,
            volume,
        }
    }

    /// Scratch space backed by an emptyDir
    pub fn empty_dir(name: &str, mount_path: &str) -> Self {
        Self::with_volume(
            name,
            mount_path,
            Volume {
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
        )
    }

    /// Contents of a secret
    pub fn secret(name: &str, mount_path: &str, secret_name: &str) -> Self {
        Self::with_volume(
            name,
            mount_path,
            Volume {
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    /// Contents of a secret that may not exist
    pub fn optional_secret(name: &str, mount_path: &str, secret_name: &str) -> Self {
        let mut def = Self::secret(name, mount_path, secret_name);
        if let Some(secret) = def.volume.secret.as_mut() {
            secret.optional = Some(true);
        }
        def.read_only = true;
        def
    }

    /// Contents of a config map
    pub fn config_map(name: &str, mount_path: &str, config_map_name: &str) -> Self {
        Self::with_volume(
            name,
            mount_path,
            Volume {
                config_map: Some(ConfigMapVolumeSource {
                    name: config_map_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    /// A persistent volume claim
    pub fn claim(name: &str, mount_path: &str, claim_name: &str) -> Self {
        Self::with_volume(
            name,
            mount_path,
            Volume {
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    /// A directory on the node
    pub fn host_path(name: &str, mount_path: &str, host_path: &str) -> Self {
        Self::with_volume(
            name,
            mount_path,
            Volume {
                host_path: Some(HostPathVolumeSource {
                    path: host_path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    /// Mount read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Add the mount to `container` and the volume to `pod`
    pub fn apply(&self, container: &mut Container, pod: &mut PodSpec) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: self.name.clone(),
                mount_path: self.mount_path.clone(),
                read_only: Some(self.read_only),
                ..Default::default()
            });

        let mut volume = self.volume.clone();
        volume.name = self.name.clone();
        pod.volumes.get_or_insert_with(Vec::new).push(volume);
    }
}

/// Apply every volume in `defs` to the same container
pub fn apply_volumes(defs: &[VolumeDefAndMount], container: &mut Container, pod: &mut PodSpec) {
    for def in defs {
        def.apply(container, pod);
    }
}

/// `app=<name>` labels
pub fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), name.to_string())])
}

/// Metadata for a namespaced object labelled with its app
pub fn namespaced_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(app_labels(name)),
        ..Default::default()
    }
}

/// Metadata for a cluster-scoped object
pub fn cluster_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Service account, created once and never replaced
pub fn service_account(name: &str, namespace: &str) -> Result<Resource> {
    let sa = ServiceAccount {
        metadata: namespaced_meta(name, namespace),
        ..Default::default()
    };
    Ok(Resource::new(&sa)?.create_only())
}

/// Service selecting the pods labelled `app=<name>`
pub fn service(name: &str, namespace: &str, ports: Vec<ServicePort>) -> Result<Resource> {
    let svc = Service {
        metadata: namespaced_meta(name, namespace),
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(app_labels(name)),
            ..Default::default()
        }),
        ..Default::default()
    };
    Resource::new(&svc)
}

/// A TCP service port
pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// A policy rule over the given API groups, resources and verbs
pub fn policy_rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(to_strings(api_groups)),
        resources: Some(to_strings(resources)),
        verbs: to_strings(verbs),
        ..Default::default()
    }
}

/// Namespaced role
pub fn role(name: &str, namespace: &str, rules: Vec<PolicyRule>) -> Result<Resource> {
    let role = Role {
        metadata: namespaced_meta(name, namespace),
        rules: Some(rules),
    };
    Resource::new(&role)
}

/// Bind `role_name` to a service account in the same namespace
pub fn role_binding(
    name: &str,
    namespace: &str,
    service_account: &str,
    role_name: &str,
) -> Result<Resource> {
    let binding = RoleBinding {
        metadata: namespaced_meta(name, namespace),
        role_ref: role_ref("Role", role_name),
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    };
    Resource::new(&binding)
}

/// Cluster role
pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> Result<Resource> {
    let role = ClusterRole {
        metadata: cluster_meta(name),
        rules: Some(rules),
        ..Default::default()
    };
    Ok(Resource::new(&role)?.cluster_scoped())
}

/// Bind a cluster role to a service account; named `<namespace>-<sa>-<role>`
pub fn cluster_role_binding(
    service_account: &str,
    role_name: &str,
    namespace: &str,
) -> Result<Resource> {
    let binding = ClusterRoleBinding {
        metadata: cluster_meta(&format!("{}-{}-{}", namespace, service_account, role_name)),
        role_ref: role_ref("ClusterRole", role_name),
        subjects: Some(vec![service_account_subject(service_account, namespace)]),
    };
    Ok(Resource::new(&binding)?.cluster_scoped())
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Single-replica deployment whose pods are labelled `app=<name>`
pub fn deployment(name: &str, namespace: &str, pod: PodSpec) -> Result<Resource> {
    let deployment = Deployment {
        metadata: namespaced_meta(name, namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: pod_template(name, pod),
            ..Default::default()
        }),
        ..Default::default()
    };
    Resource::new(&deployment)
}

/// Pod template labelled `app=<name>`
pub fn pod_template(name: &str, pod: PodSpec) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(app_labels(name)),
            ..Default::default()
        }),
        spec: Some(pod),
    }
}

/// Security context for a non-root container with no extra privileges
pub fn restricted_security_context(user: i64) -> SecurityContext {
    SecurityContext {
        run_as_user: Some(user),
        run_as_group: Some(user),
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Entrypoint for a container, restarted in a loop when dev mode is on
pub fn hotload_command(command: &str, config: &Config) -> Vec<String> {
    if config.dev_mode {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("while true; do {}; sleep 5; done", command),
        ]
    } else {
        vec![command.to_string()]
    }
}

/// Random alphanumeric string
pub fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Files making up a TLS bundle in the certificate directory
pub const TLS_FILES: [&str; 3] = ["ca.pem", "cert.pem", "key.pem"];

/// Read `ca.pem`, `cert.pem` and `key.pem` from `cert_path`
///
/// A missing or unreadable file fails the named generator.
pub fn read_tls_bundle(generator: &str, cert_path: &Path) -> Result<BTreeMap<String, String>> {
    TLS_FILES
        .iter()
        .map(|file| {
            let path = cert_path.join(file);
            std::fs::read_to_string(&path)
                .map(|content| (file.to_string(), content))
                .map_err(|e| {
                    Error::generation(
                        generator,
                        format!("failed to read {}: {}", path.display(), e),
                    )
                })
        })
        .collect()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
