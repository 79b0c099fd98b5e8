//! Scanner V4 indexer, matcher and database

use std::collections::BTreeMap;

use installer_common::Result;
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use crate::builders::{
    self, apply_volumes, hotload_command, restricted_security_context, VolumeDefAndMount,
    SCANNER_USER, TWO_GIGS,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const SERVICE_ACCOUNT: &str = "scanner-v4";
const ENTRYPOINT: &str = "/usr/local/bin/scanner";
const GRPC_PORT: i32 = 8443;

/// The two halves of the v4 scanner
#[derive(Clone, Copy)]
enum Mode {
    Indexer,
    Matcher,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Indexer => "indexer",
            Mode::Matcher => "matcher",
        }
    }

    fn deployment_name(self) -> &'static str {
        match self {
            Mode::Indexer => "scanner-v4-indexer",
            Mode::Matcher => "scanner-v4-matcher",
        }
    }
}

/// Scanner v4 indexer and matcher, only when enabled
pub struct ScannerV4Generator;

impl Generator for ScannerV4Generator {
    fn name(&self) -> &str {
        "ScannerV4"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        if !ctx.config.scanner_v4 {
            debug!(generator = self.name(), "scanner v4 disabled");
            return Ok(Vec::new());
        }

        let ns = ctx.namespace();
        let mut resources = vec![builders::service_account(SERVICE_ACCOUNT, ns)?];
        for mode in [Mode::Indexer, Mode::Matcher] {
            resources.push(deployment(ctx, mode)?);
            resources.push(builders::service(
                mode.deployment_name(),
                ns,
                vec![builders::service_port("grpc", GRPC_PORT)],
            )?);
        }
        Ok(resources)
    }
}

fn deployment(ctx: &GenerationContext<'_>, mode: Mode) -> Result<Resource> {
    let name = mode.deployment_name();
    let memory = BTreeMap::from([("memory".to_string(), Quantity(TWO_GIGS.to_string()))]);

    let mut scanner = Container {
        name: name.to_string(),
        image: Some(ctx.config.images.scanner_v4.clone()),
        command: Some(hotload_command(ENTRYPOINT, ctx.config)),
        env: Some(ctx.env_for(
            name,
            name,
            name,
            &[env_var("ROX_SCANNER_V4_MODE", mode.as_str())],
        )),
        ports: Some(vec![ContainerPort {
            name: Some("grpc".to_string()),
            container_port: GRPC_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: Some(memory),
            ..Default::default()
        }),
        security_context: Some(restricted_security_context(SCANNER_USER)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: Some(SERVICE_ACCOUNT.to_string()),
        ..Default::default()
    };
    apply_volumes(
        &[
            VolumeDefAndMount::empty_dir("tmp-volume", "/tmp"),
            VolumeDefAndMount::secret(
                "certs",
                "/run/secrets/stackrox.io/certs/",
                &format!("{}-tls", name),
            )
            .read_only(),
        ],
        &mut scanner,
        &mut pod,
    );
    pod.containers = vec![scanner];

    builders::deployment(name, ctx.namespace(), pod)
}
