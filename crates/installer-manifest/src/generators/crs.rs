//! Cluster registration secret job, applied only against a live cluster

use installer_common::Result;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, PodSpec, SecretKeySelector};

use crate::builders::{self, namespaced_meta, policy_rule, restricted_security_context};
use crate::generator::{GenerationContext, Generator, Ordered};
use crate::resource::Resource;

const NAME: &str = "crs-generator";
const CRS_SECRET: &str = "cluster-registration-secret";
const PORT_FORWARD_ENDPOINT: &str = "localhost:8000";
const JOB_USER: i64 = 4000;
const BACKOFF_LIMIT: i32 = 3;

/// Issues a cluster registration secret from central into the namespace
pub struct CrsGenerator;

impl Generator for CrsGenerator {
    fn name(&self) -> &str {
        "Crs"
    }

    fn exportable(&self) -> bool {
        false
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = ctx.namespace();
        Ok(vec![
            builders::service_account(NAME, ns)?,
            builders::role(
                NAME,
                ns,
                vec![policy_rule(
                    &[""],
                    &["secrets"],
                    &["create", "get", "update", "patch"],
                )],
            )?,
            builders::role_binding(NAME, ns, NAME, NAME)?,
            job(ctx)?,
        ])
    }

    fn as_ordered(&self) -> Option<&dyn Ordered> {
        Some(self)
    }
}

impl Ordered for CrsGenerator {
    fn priority(&self) -> i32 {
        10
    }
}

/// Central endpoint the job registers against
fn central_endpoint(ctx: &GenerationContext<'_>) -> String {
    if ctx.config.crs.port_forward {
        PORT_FORWARD_ENDPOINT.to_string()
    } else {
        format!("central.{}.svc:443", ctx.namespace())
    }
}

fn job(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let ns = ctx.namespace();
    let script = format!(
        "roxctl -e {endpoint} --insecure-skip-tls-verify central crs generate {ns} \
         --output /tmp/crs.yaml && \
         roxctl central crs install --namespace {ns} --secret {secret} /tmp/crs.yaml",
        endpoint = central_endpoint(ctx),
        ns = ns,
        secret = CRS_SECRET,
    );

    let password = EnvVar {
        name: "ROX_ADMIN_PASSWORD".to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: "central-htpasswd".to_string(),
                key: "password".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let container = Container {
        name: NAME.to_string(),
        image: Some(ctx.config.images.central.clone()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        env: Some(ctx.env_for(NAME, NAME, NAME, &[password])),
        security_context: Some(restricted_security_context(JOB_USER)),
        ..Default::default()
    };

    let pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        restart_policy: Some("OnFailure".to_string()),
        containers: vec![container],
        ..Default::default()
    };

    let job = Job {
        metadata: namespaced_meta(NAME, ns),
        spec: Some(JobSpec {
            backoff_limit: Some(BACKOFF_LIMIT),
            template: builders::pod_template(NAME, pod),
            ..Default::default()
        }),
        ..Default::default()
    };
    // job specs are immutable once created
    Ok(Resource::new(&job)?.create_only())
}
