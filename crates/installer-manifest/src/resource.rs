//! Resource descriptors produced by generators

use installer_common::{Error, Result};
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// One cluster object plus how it should be reconciled
///
/// The object is stored type-erased so the applier and exporter never need to
/// know concrete kinds. Use [`Resource::parse`] to get the typed object back.
#[derive(Clone, Debug)]
pub struct Resource {
    /// Name used in logs and error context (the object's `metadata.name`)
    pub name: String,
    /// The object itself, including `apiVersion` and `kind`
    pub object: DynamicObject,
    /// Replace the live object on re-apply; when false an existing object is left alone
    pub is_updateable: bool,
    /// Object lives outside any namespace
    pub cluster_scoped: bool,
}

impl Resource {
    /// Wrap a typed object as an updateable, namespaced resource
    pub fn new<K>(object: &K) -> Result<Self>
    where
        K: kube::Resource<DynamicType = ()> + Serialize,
    {
        let kind = K::kind(&()).to_string();
        let name = object.meta().name.clone().ok_or_else(|| {
            Error::serialization_for_kind(&kind, "object has no metadata.name")
        })?;

        let value = serde_json::to_value(object)
            .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;
        let mut dynamic: DynamicObject = serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;
        dynamic.types = Some(TypeMeta {
            api_version: K::api_version(&()).to_string(),
            kind,
        });

        Ok(Self {
            name,
            object: dynamic,
            is_updateable: true,
            cluster_scoped: false,
        })
    }

    /// Mark the resource as living outside any namespace
    pub fn cluster_scoped(mut self) -> Self {
        self.cluster_scoped = true;
        self
    }

    /// Create the object once and never replace it afterwards
    pub fn create_only(mut self) -> Self {
        self.is_updateable = false;
        self
    }

    /// Kind of the wrapped object
    pub fn kind(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or(installer_common::error::UNKNOWN_CONTEXT)
    }

    /// Namespace embedded in the wrapped object, if any
    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    /// Deserialize the wrapped object back into its concrete type
    pub fn parse<K: DeserializeOwned>(&self) -> Result<K> {
        let value = serde_json::to_value(&self.object)
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))?;
        serde_json::from_value(value)
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))
    }
}
