//! Admission control webhook deployment and its RBAC

use installer_common::Result;
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::builders::{
    self, apply_volumes, hotload_command, policy_rule, restricted_security_context,
    VolumeDefAndMount,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const NAME: &str = "admission-control";
const ROLE: &str = "admission-control-watch-config";
const ENTRYPOINT: &str = "admission-control";
const WEBHOOK_PORT: i32 = 8443;
const ADMISSION_CONTROL_USER: i64 = 4000;

/// Validating webhook backend
pub struct AdmissionControlGenerator;

impl Generator for AdmissionControlGenerator {
    fn name(&self) -> &str {
        "AdmissionControl"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = ctx.namespace();
        Ok(vec![
            builders::service_account(NAME, ns)?,
            builders::role(
                ROLE,
                ns,
                vec![policy_rule(&[""], &["configmaps"], &["get", "list", "watch"])],
            )?,
            builders::role_binding(ROLE, ns, NAME, ROLE)?,
            deployment(ctx)?,
            builders::service(
                NAME,
                ns,
                vec![ServicePort {
                    target_port: Some(IntOrString::Int(WEBHOOK_PORT)),
                    ..builders::service_port("https", 443)
                }],
            )?,
        ])
    }
}

fn deployment(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let ns = ctx.namespace();
    let existing = [env_var("ROX_SENSOR_ENDPOINT", format!("sensor.{}.svc:443", ns))];

    let mut webhook = Container {
        name: NAME.to_string(),
        image: Some(ctx.config.images.admission_control.clone()),
        command: Some(hotload_command(ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(NAME, NAME, NAME, &existing)),
        ports: Some(vec![ContainerPort {
            name: Some("webhook".to_string()),
            container_port: WEBHOOK_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context(ADMISSION_CONTROL_USER)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        ..Default::default()
    };
    apply_volumes(
        &[
            VolumeDefAndMount::empty_dir("config", "/etc/stackrox.d/config/"),
            VolumeDefAndMount::empty_dir("ssl", "/etc/ssl"),
            VolumeDefAndMount::optional_secret(
                "certs",
                "/run/secrets/stackrox.io/certs/",
                "admission-control-tls",
            ),
        ],
        &mut webhook,
        &mut pod,
    );
    pod.containers = vec![webhook];

    builders::deployment(NAME, ns, pod)
}
