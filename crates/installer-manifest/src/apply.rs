//! Create-or-update reconciliation of resources against a cluster
//!
//! Each resource is created. When the cluster reports that it already exists,
//! updateable resources are replaced using the live `resourceVersion` and
//! everything else is left untouched. Resources are applied one at a time in
//! order and the first failure stops the run.

use async_trait::async_trait;
use installer_common::kube_utils::api_resource_for;
use installer_common::{Error, Result};
use kube::api::{Api, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::resource::Resource;

/// Field manager recorded on objects the installer writes
pub const FIELD_MANAGER: &str = "installer";

/// Where an object lives in the cluster API
#[derive(Clone, Debug, PartialEq)]
pub struct ApiTarget {
    /// Collection of the object's kind
    pub resource: ApiResource,
    /// Namespace, or `None` for cluster-scoped objects
    pub namespace: Option<String>,
}

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object did not exist and was created
    Created,
    /// An object with the same name already exists
    AlreadyExists,
}

/// What happened to a single resource during apply
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Newly created
    Created,
    /// Replaced an existing object
    Updated,
    /// Already present and not updateable
    Unchanged,
}

/// Counts of what an apply run did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Objects created
    pub created: usize,
    /// Objects replaced
    pub updated: usize,
    /// Objects left untouched
    pub unchanged: usize,
}

impl ApplySummary {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Cluster operations needed by the applier
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create an object, reporting a name conflict as [`CreateOutcome::AlreadyExists`]
    async fn create(&self, target: &ApiTarget, object: &DynamicObject) -> Result<CreateOutcome>;

    /// Fetch an object by name, `None` when it does not exist
    async fn get(&self, target: &ApiTarget, name: &str) -> Result<Option<DynamicObject>>;

    /// Replace an existing object
    async fn replace(&self, target: &ApiTarget, name: &str, object: &DynamicObject) -> Result<()>;
}

/// [`ClusterClient`] backed by a kube client
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, target: &ApiTarget) -> Api<DynamicObject> {
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &target.resource),
            None => Api::all_with(self.client.clone(), &target.resource),
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create(&self, target: &ApiTarget, object: &DynamicObject) -> Result<CreateOutcome> {
        match self.api(target).create(&Self::post_params(), object).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, target: &ApiTarget, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.api(target).get_opt(name).await?)
    }

    async fn replace(&self, target: &ApiTarget, name: &str, object: &DynamicObject) -> Result<()> {
        self.api(target)
            .replace(name, &Self::post_params(), object)
            .await?;
        Ok(())
    }
}

/// Applies resources through a [`ClusterClient`]
pub struct Applier<'a> {
    client: &'a dyn ClusterClient,
    default_namespace: &'a str,
}

impl<'a> Applier<'a> {
    /// Create an applier; namespaced objects without a namespace go to `default_namespace`
    pub fn new(client: &'a dyn ClusterClient, default_namespace: &'a str) -> Self {
        Self {
            client,
            default_namespace,
        }
    }

    /// Apply resources in order, stopping at the first failure
    pub async fn apply(&self, resources: &[Resource]) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();
        for resource in resources {
            let outcome = self.apply_one(resource).await?;
            summary.record(outcome);
        }
        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "apply complete"
        );
        Ok(summary)
    }

    /// Apply a single resource
    pub async fn apply_one(&self, resource: &Resource) -> Result<ApplyOutcome> {
        let name = resource.name.as_str();
        let kind = resource.kind();
        let fail = |e: Error| Error::apply(name, kind, e.to_string());

        let types = resource
            .object
            .types
            .as_ref()
            .ok_or_else(|| Error::apply(name, kind, "object has no apiVersion/kind"))?;
        let target = self.target_for(resource, api_resource_for(types));

        let mut object = resource.object.clone();
        if let Some(ns) = &target.namespace {
            object.metadata.namespace = Some(ns.clone());
        }

        match self.client.create(&target, &object).await.map_err(fail)? {
            CreateOutcome::Created => {
                info!(resource = %name, kind = %kind, "created");
                Ok(ApplyOutcome::Created)
            }
            CreateOutcome::AlreadyExists if !resource.is_updateable => {
                debug!(resource = %name, kind = %kind, "already exists, leaving unchanged");
                Ok(ApplyOutcome::Unchanged)
            }
            CreateOutcome::AlreadyExists => {
                let live = self
                    .client
                    .get(&target, name)
                    .await
                    .map_err(fail)?
                    .ok_or_else(|| Error::apply(name, kind, "object disappeared during update"))?;
                object.metadata.resource_version = live.metadata.resource_version;
                self.client
                    .replace(&target, name, &object)
                    .await
                    .map_err(fail)?;
                info!(resource = %name, kind = %kind, "updated");
                Ok(ApplyOutcome::Updated)
            }
        }
    }

    fn target_for(&self, resource: &Resource, api: ApiResource) -> ApiTarget {
        let namespace = if resource.cluster_scoped {
            None
        } else {
            Some(
                resource
                    .namespace()
                    .unwrap_or(self.default_namespace)
                    .to_string(),
            )
        };
        ApiTarget {
            resource: api,
            namespace,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCluster;
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn namespace(name: &str) -> Resource {
        Resource::new(&Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("wrap namespace")
        .cluster_scoped()
        .create_only()
    }

    fn config_map(name: &str, ns: Option<&str>, value: &str) -> Resource {
        Resource::new(&ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: ns.map(str::to_string),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
            ..Default::default()
        })
        .expect("wrap config map")
    }

    fn service_account(name: &str) -> Resource {
        Resource::new(&ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("stackrox".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .expect("wrap service account")
        .create_only()
    }

    fn conflict() -> Error {
        Error::validation("admission webhook denied the request")
    }

    // ==========================================================================
    // Mocked client: call routing
    // ==========================================================================

    #[tokio::test]
    async fn test_cluster_scoped_resource_targets_all_namespaces() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .withf(|target, object| {
                target.namespace.is_none()
                    && target.resource.plural == "namespaces"
                    && target.resource.group.is_empty()
                    && object.metadata.name.as_deref() == Some("stackrox")
            })
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));

        let applier = Applier::new(&client, "stackrox");
        let outcome = applier
            .apply_one(&namespace("stackrox"))
            .await
            .expect("apply should succeed");
        assert_eq!(outcome, ApplyOutcome::Created);
    }

    #[tokio::test]
    async fn test_namespaced_resource_falls_back_to_default_namespace() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .withf(|target, object| {
                target.namespace.as_deref() == Some("fallback")
                    && object.metadata.namespace.as_deref() == Some("fallback")
            })
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));

        let applier = Applier::new(&client, "fallback");
        applier
            .apply_one(&config_map("cfg", None, "a"))
            .await
            .expect("apply should succeed");
    }

    #[tokio::test]
    async fn test_object_namespace_wins_over_default() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .withf(|target, _| target.namespace.as_deref() == Some("own"))
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));

        let applier = Applier::new(&client, "fallback");
        applier
            .apply_one(&config_map("cfg", Some("own"), "a"))
            .await
            .expect("apply should succeed");
    }

    #[tokio::test]
    async fn test_existing_updateable_resource_is_replaced_with_live_version() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .returning(|_, _| Ok(CreateOutcome::AlreadyExists));
        client.expect_get().times(1).returning(|_, name| {
            let mut live = DynamicObject::new(name, &ApiResource::erase::<ConfigMap>(&()));
            live.metadata.resource_version = Some("42".to_string());
            Ok(Some(live))
        });
        client
            .expect_replace()
            .withf(|_, name, object| {
                name == "cfg" && object.metadata.resource_version.as_deref() == Some("42")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let applier = Applier::new(&client, "stackrox");
        let outcome = applier
            .apply_one(&config_map("cfg", Some("stackrox"), "b"))
            .await
            .expect("apply should succeed");
        assert_eq!(outcome, ApplyOutcome::Updated);
    }

    #[tokio::test]
    async fn test_existing_non_updateable_resource_is_skipped() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .returning(|_, _| Ok(CreateOutcome::AlreadyExists));
        client.expect_get().never();
        client.expect_replace().never();

        let applier = Applier::new(&client, "stackrox");
        let outcome = applier
            .apply_one(&service_account("sensor"))
            .await
            .expect("existing non-updateable resource is not an error");
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_create_failure_names_resource_and_kind() {
        let mut client = MockClusterClient::new();
        client.expect_create().returning(|_, _| Err(conflict()));

        let applier = Applier::new(&client, "stackrox");
        let err = applier
            .apply_one(&config_map("cfg", Some("stackrox"), "a"))
            .await
            .expect_err("create failure should propagate");
        match err {
            Error::Apply {
                resource,
                kind,
                message,
            } => {
                assert_eq!(resource, "cfg");
                assert_eq!(kind, "ConfigMap");
                assert!(message.contains("admission webhook"));
            }
            other => panic!("Expected Apply error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let mut client = MockClusterClient::new();
        client
            .expect_create()
            .withf(|_, object| object.metadata.name.as_deref() == Some("first"))
            .times(1)
            .returning(|_, _| Ok(CreateOutcome::Created));
        client
            .expect_create()
            .withf(|_, object| object.metadata.name.as_deref() == Some("second"))
            .times(1)
            .returning(|_, _| Err(conflict()));

        let resources = vec![
            config_map("first", Some("stackrox"), "a"),
            config_map("second", Some("stackrox"), "b"),
            config_map("third", Some("stackrox"), "c"),
        ];
        let applier = Applier::new(&client, "stackrox");
        let err = applier
            .apply(&resources)
            .await
            .expect_err("second resource fails");
        assert_eq!(err.resource(), Some("second"));
    }

    // ==========================================================================
    // In-memory cluster: idempotence
    // ==========================================================================

    #[tokio::test]
    async fn test_apply_twice_is_idempotent() {
        let cluster = FakeCluster::default();
        let resources = vec![
            namespace("stackrox"),
            service_account("central"),
            config_map("central-config", Some("stackrox"), "v1"),
        ];
        let applier = Applier::new(&cluster, "stackrox");

        let first = applier.apply(&resources).await.expect("first run");
        assert_eq!(
            first,
            ApplySummary {
                created: 3,
                updated: 0,
                unchanged: 0
            }
        );

        let second = applier.apply(&resources).await.expect("second run");
        assert_eq!(
            second,
            ApplySummary {
                created: 0,
                updated: 1,
                unchanged: 2
            }
        );
        assert_eq!(cluster.len(), 3);
    }

    #[tokio::test]
    async fn test_reapply_replaces_updateable_content() {
        let cluster = FakeCluster::with_namespace("stackrox");
        let applier = Applier::new(&cluster, "stackrox");

        applier
            .apply(&[config_map("cfg", Some("stackrox"), "old")])
            .await
            .expect("first run");
        applier
            .apply(&[config_map("cfg", Some("stackrox"), "new")])
            .await
            .expect("second run");

        let stored = cluster
            .get_object("configmaps", Some("stackrox"), "cfg")
            .expect("object stored");
        assert_eq!(stored.data["data"]["value"], "new");
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_namespaced_resource_before_its_namespace_fails() {
        let cluster = FakeCluster::default();
        let applier = Applier::new(&cluster, "stackrox");

        let err = applier
            .apply(&[
                config_map("central-config", Some("stackrox"), "v1"),
                namespace("stackrox"),
            ])
            .await
            .expect_err("namespace must exist first");
        assert_eq!(err.resource(), Some("central-config"));
        assert_eq!(cluster.len(), 0);
    }
}
