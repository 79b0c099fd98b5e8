//! Sensor deployment and the cluster-wide RBAC it watches with

use installer_common::Result;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, ServicePort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::builders::{
    self, apply_volumes, hotload_command, policy_rule, restricted_security_context,
    VolumeDefAndMount,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const NAME: &str = "sensor";
const CLUSTER_ROLE: &str = "stackrox-sensor-reader";
const ROLE: &str = "sensor-edit";
const ENTRYPOINT: &str = "kubernetes-sensor";
const API_PORT: i32 = 8443;
const WEBHOOK_PORT: i32 = 9443;
const SENSOR_USER: i64 = 4000;

/// Sensor and the RBAC it needs to watch the cluster
pub struct SensorGenerator;

impl Generator for SensorGenerator {
    fn name(&self) -> &str {
        "Sensor"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = ctx.namespace();
        Ok(vec![
            builders::service_account(NAME, ns)?,
            builders::cluster_role(
                CLUSTER_ROLE,
                vec![policy_rule(&["*"], &["*"], &["get", "list", "watch"])],
            )?,
            builders::cluster_role_binding(NAME, CLUSTER_ROLE, ns)?,
            builders::role(
                ROLE,
                ns,
                vec![
                    policy_rule(
                        &[""],
                        &["configmaps", "secrets"],
                        &["get", "list", "watch", "create", "update", "patch", "delete"],
                    ),
                    policy_rule(&[""], &["pods"], &["get", "list", "watch", "delete"]),
                ],
            )?,
            builders::role_binding(ROLE, ns, NAME, ROLE)?,
            deployment(ctx)?,
            builders::service(
                NAME,
                ns,
                vec![
                    ServicePort {
                        target_port: Some(IntOrString::Int(API_PORT)),
                        ..builders::service_port("https", 443)
                    },
                    ServicePort {
                        target_port: Some(IntOrString::Int(WEBHOOK_PORT)),
                        ..builders::service_port("webhook", WEBHOOK_PORT)
                    },
                ],
            )?,
        ])
    }
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let ns = ctx.namespace();
    let mut existing = vec![
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        field_ref("POD_NAME", "metadata.name"),
        env_var("ROX_CENTRAL_ENDPOINT", format!("central.{}.svc:443", ns)),
        env_var("ROX_ADVERTISED_ENDPOINT", format!("sensor.{}.svc:443", ns)),
    ];
    if ctx.config.dev_mode {
        existing.push(env_var("ROX_HOTRELOAD", "true"));
    }

    let mut sensor = Container {
        name: NAME.to_string(),
        image: Some(ctx.config.images.sensor.clone()),
        command: Some(hotload_command(ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(NAME, NAME, NAME, &existing)),
        ports: Some(vec![
            ContainerPort {
                name: Some("api".to_string()),
                container_port: API_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("webhook".to_string()),
                container_port: WEBHOOK_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        security_context: Some(restricted_security_context(SENSOR_USER)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        ..Default::default()
    };
    apply_volumes(
        &[
            VolumeDefAndMount::empty_dir("varlog", "/var/log/stackrox/"),
            VolumeDefAndMount::empty_dir("sensor-etc-ssl-volume", "/etc/ssl/"),
            VolumeDefAndMount::empty_dir("sensor-etc-pki-volume", "/etc/pki/ca-trust/"),
            VolumeDefAndMount::empty_dir("cache", "/var/cache/stackrox"),
            VolumeDefAndMount::optional_secret(
                "certs",
                "/run/secrets/stackrox.io/certs/",
                "sensor-tls",
            ),
            VolumeDefAndMount::optional_secret(
                "cluster-registration-secret",
                "/run/secrets/stackrox.io/crs/",
                "cluster-registration-secret",
            ),
        ],
        &mut sensor,
        &mut pod,
    );
    pod.containers = vec![sensor];

    builders::deployment(NAME, ns, pod)
}
