//! Central database deployment, storage and credentials

use std::collections::BTreeMap;

use installer_common::Result;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EmptyDirVolumeSource, KeyToPath, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, Secret, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::builders::{
    self, apply_volumes, namespaced_meta, read_tls_bundle, restricted_security_context,
    VolumeDefAndMount, POSTGRES_USER, READ_ONLY_MODE, TWO_GIGS,
};
use crate::env::env_var;
use crate::generator::{GenerationContext, Generator};
use crate::resource::Resource;

const NAME: &str = "central-db";
const INIT_CONTAINER: &str = "init-db";
const PASSWORD_SECRET: &str = "central-db-password";
const TLS_SECRET: &str = "central-db-tls";
const CONFIG_MAP: &str = "central-db-config";
const PORT: i32 = 5432;
const PGDATA: &str = "/var/lib/postgresql/data/pgdata";
const DATA_MOUNT: &str = "/var/lib/postgresql/data";
const PASSWORD_LENGTH: usize = 32;

const POSTGRESQL_CONF: &str = "\
listen_addresses = '*'
max_connections = 200
password_encryption = scram-sha-256
ssl = on
ssl_ca_file = '/run/secrets/stackrox.io/certs/root.crt'
ssl_cert_file = '/run/secrets/stackrox.io/certs/server.crt'
ssl_key_file = '/run/secrets/stackrox.io/certs/server.key'
shared_buffers = 750MB
";

const PG_HBA_CONF: &str = "\
local all all scram-sha-256
hostssl all all 0.0.0.0/0 scram-sha-256
hostssl all all ::0/0 scram-sha-256
";

/// Postgres backing store for central
pub struct CentralDbGenerator;

impl Generator for CentralDbGenerator {
    fn name(&self) -> &str {
        "CentralDb"
    }

    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<Vec<Resource>> {
        let ns = ctx.namespace();
        Ok(vec![
            builders::service_account(NAME, ns)?,
            volume_claim(ns)?,
            password_secret(ns)?,
            tls_secret(self.name(), ctx)?,
            config_map(ns)?,
            deployment(ctx)?,
            builders::service(NAME, ns, vec![builders::service_port("postgresql", PORT)])?,
        ])
    }
}

fn volume_claim(namespace: &str) -> Result<Resource> {
    let pvc = PersistentVolumeClaim {
        metadata: namespaced_meta(NAME, namespace),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("1Gi".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    Ok(Resource::new(&pvc)?.create_only())
}

fn password_secret(namespace: &str) -> Result<Resource> {
    let secret = Secret {
        metadata: namespaced_meta(PASSWORD_SECRET, namespace),
        string_data: Some(BTreeMap::from([(
            "password".to_string(),
            builders::random_password(PASSWORD_LENGTH),
        )])),
        ..Default::default()
    };
    Ok(Resource::new(&secret)?.create_only())
}

fn tls_secret(generator: &str, ctx: &GenerationContext<'_>) -> Result<Resource> {
    let secret = Secret {
        metadata: namespaced_meta(TLS_SECRET, ctx.namespace()),
        string_data: Some(read_tls_bundle(generator, &ctx.config.cert_path)?),
        ..Default::default()
    };
    Resource::new(&secret)
}

fn config_map(namespace: &str) -> Result<Resource> {
    let cm = ConfigMap {
        metadata: namespaced_meta(CONFIG_MAP, namespace),
        data: Some(BTreeMap::from([
            ("postgresql.conf".to_string(), POSTGRESQL_CONF.to_string()),
            ("pg_hba.conf".to_string(), PG_HBA_CONF.to_string()),
        ])),
        ..Default::default()
    };
    Resource::new(&cm)
}

fn volumes() -> Vec<VolumeDefAndMount> {
    let mut tls = VolumeDefAndMount::secret(
        "central-db-tls-volume",
        "/run/secrets/stackrox.io/certs",
        TLS_SECRET,
    );
    if let Some(secret) = tls.volume.secret.as_mut() {
        secret.default_mode = Some(READ_ONLY_MODE);
        secret.items = Some(vec![
            key_to_path("cert.pem", "server.crt"),
            key_to_path("key.pem", "server.key"),
            key_to_path("ca.pem", "root.crt"),
        ]);
    }

    let shared_memory = VolumeDefAndMount {
        volume: Volume {
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(Quantity(TWO_GIGS.to_string())),
            }),
            ..Default::default()
        },
        ..VolumeDefAndMount::empty_dir("shared-memory", "/dev/shm")
    };

    vec![
        VolumeDefAndMount::secret(
            PASSWORD_SECRET,
            "/run/secrets/stackrox.io/secrets",
            PASSWORD_SECRET,
        ),
        VolumeDefAndMount::config_map("config-volume", "/etc/stackrox.d/config/", CONFIG_MAP),
        VolumeDefAndMount::claim("disk", DATA_MOUNT, NAME),
        tls,
        shared_memory,
    ]
}

fn key_to_path(key: &str, path: &str) -> KeyToPath {
    KeyToPath {
        key: key.to_string(),
        path: path.to_string(),
        ..Default::default()
    }
}

fn deployment(ctx: &GenerationContext<'_>) -> Result<Resource> {
    let image = &ctx.config.images.central_db;

    let init = Container {
        name: INIT_CONTAINER.to_string(),
        image: Some(image.clone()),
        command: Some(vec!["init-entrypoint.sh".to_string()]),
        env: Some(ctx.env_for(NAME, NAME, INIT_CONTAINER, &[env_var("PGDATA", PGDATA)])),
        volume_mounts: Some(vec![VolumeMount {
            name: "disk".to_string(),
            mount_path: DATA_MOUNT.to_string(),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context(POSTGRES_USER)),
        ..Default::default()
    };

    let mut db = Container {
        name: NAME.to_string(),
        image: Some(image.clone()),
        env: Some(ctx.env_for(
            NAME,
            NAME,
            NAME,
            &[
                env_var("POSTGRES_HOST_AUTH_METHOD", "password"),
                env_var("PGDATA", PGDATA),
            ],
        )),
        ports: Some(vec![ContainerPort {
            name: Some("postgresql".to_string()),
            container_port: PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        security_context: Some(restricted_security_context(POSTGRES_USER)),
        ..Default::default()
    };

    let mut pod = PodSpec {
        service_account_name: Some(NAME.to_string()),
        init_containers: Some(vec![init]),
        ..Default::default()
    };
    apply_volumes(&volumes(), &mut db, &mut pod);
    pod.containers = vec![db];

    builders::deployment(NAME, ctx.namespace(), pod)
}
