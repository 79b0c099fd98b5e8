//! Collector daemonset running on every node

use installer_common::Result;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, SecurityContext, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::builders::{
    self, app_labels, hotload_command, namespaced_meta, pod_template, VolumeDefAndMount,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const NAME: &str = "collector";
const COMPLIANCE: &str = "compliance";
const COLLECTOR_ENTRYPOINT: &str = "collector";
const COMPLIANCE_ENTRYPOINT: &str = "stackrox/bin/compliance";

/// Per-node collector daemon set
pub struct CollectorGenerator;

impl Generator for CollectorGenerator {
    fn name(&self) -> &str {
        "Collector"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        Ok(vec![
            builders::service_account(NAME, ctx.namespace())?,
            daemon_set(ctx)?,
        ])
    }
}

fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        read_only_root_filesystem: Some(true),
        ..Default::default()
    }
}

fn daemon_set(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let ns = ctx.namespace();
    let sensor_endpoint = env_var("GRPC_SERVER", format!("sensor.{}.svc:443", ns));
    let mut pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        tolerations: Some(vec![Toleration {
            operator: Some("Exists".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let mut collector = Container {
        name: NAME.to_string(),
        image: Some(ctx.config.images.collector.clone()),
        command: Some(hotload_command(COLLECTOR_ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(NAME, NAME, NAME, &[sensor_endpoint])),
        security_context: Some(privileged()),
        ..Default::default()
    };
    for def in [
        VolumeDefAndMount::host_path("proc-ro", "/host/proc", "/proc").read_only(),
        VolumeDefAndMount::host_path("etc-ro", "/host/etc", "/etc").read_only(),
        VolumeDefAndMount::host_path("sys-ro", "/host/sys/kernel/debug", "/sys/kernel/debug")
            .read_only(),
        VolumeDefAndMount::optional_secret(
            "certs",
            "/run/secrets/stackrox.io/certs/",
            "collector-tls",
        ),
    ] {
        def.apply(&mut collector, &mut pod);
    }

    // compliance ships in the main image
    let mut compliance = Container {
        name: COMPLIANCE.to_string(),
        image: Some(ctx.config.images.sensor.clone()),
        command: Some(hotload_command(COMPLIANCE_ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(
            NAME,
            NAME,
            COMPLIANCE,
            &[env_var("ROX_ADVERTISED_ENDPOINT", format!("sensor.{}.svc:443", ns))],
        )),
        security_context: Some(privileged()),
        ..Default::default()
    };
    for def in [
        VolumeDefAndMount::host_path("host-root-ro", "/host", "/").read_only(),
        VolumeDefAndMount::optional_secret(
            "compliance-certs",
            "/run/secrets/stackrox.io/certs/",
            "collector-tls",
        ),
    ] {
        def.apply(&mut compliance, &mut pod);
    }

    pod.containers = vec![collector, compliance];

    let daemon_set = DaemonSet {
        metadata: namespaced_meta(NAME, ns),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(app_labels(NAME)),
                ..Default::default()
            },
            template: pod_template(NAME, pod),
            ..Default::default()
        }),
        ..Default::default()
    };
    Resource::new(&daemon_set)
}
