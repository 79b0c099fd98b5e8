//! Named generator sets, one per deployment target
//!
//! Sets are assembled once per process and never change afterwards.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use installer_common::{Error, Result};

use crate::generator::{sort_by_priority, Generator};
use crate::generators::{
    AdmissionControlGenerator, CentralDbGenerator, CentralGenerator, CollectorGenerator,
    CrsGenerator, NamespaceGenerator, NetworkPolicyGenerator, ScannerV4Generator,
    SensorGenerator, CENTRAL_TARGETS, SECURED_CLUSTER_TARGETS,
};

/// Identifier of the central services set
pub const CENTRAL: &str = "central";
/// Identifier of the secured cluster set
pub const SECURED_CLUSTER: &str = "securedcluster";
/// Identifier of the cluster registration set
pub const CRS: &str = "crs";

/// Every valid set identifier, in the order they are reported
pub const SET_NAMES: [&str; 3] = [CENTRAL, SECURED_CLUSTER, CRS];

/// An ordered list of generators for one target
pub struct GeneratorSet {
    name: &'static str,
    generators: Vec<Box<dyn Generator>>,
}

impl GeneratorSet {
    /// Build a set from generators in construction order
    pub fn new(name: &'static str, generators: Vec<Box<dyn Generator>>) -> Self {
        Self { name, generators }
    }

    /// Identifier of the set
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Generators in construction order
    pub fn generators(&self) -> impl Iterator<Item = &dyn Generator> {
        self.generators.iter().map(|g| g.as_ref())
    }

    /// Generators in execution order
    pub fn sorted(&self) -> Vec<&dyn Generator> {
        let generators: Vec<&dyn Generator> = self.generators().collect();
        sort_by_priority(&generators)
    }
}

impl std::fmt::Debug for GeneratorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorSet")
            .field("name", &self.name)
            .field(
                "generators",
                &self.generators().map(|g| g.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

static SETS: LazyLock<BTreeMap<&'static str, GeneratorSet>> = LazyLock::new(|| {
    [
        GeneratorSet::new(
            CENTRAL,
            vec![
                Box::new(NamespaceGenerator),
                Box::new(CentralDbGenerator),
                Box::new(CentralGenerator),
                Box::new(ScannerV4Generator),
                Box::new(NetworkPolicyGenerator::new(CENTRAL_TARGETS)),
            ],
        ),
        GeneratorSet::new(
            SECURED_CLUSTER,
            vec![
                Box::new(NamespaceGenerator),
                Box::new(SensorGenerator),
                Box::new(AdmissionControlGenerator),
                Box::new(CollectorGenerator),
                Box::new(NetworkPolicyGenerator::new(SECURED_CLUSTER_TARGETS)),
            ],
        ),
        GeneratorSet::new(
            CRS,
            vec![Box::new(NamespaceGenerator), Box::new(CrsGenerator)],
        ),
    ]
    .into_iter()
    .map(|set| (set.name, set))
    .collect()
});

/// Look up a set by identifier
pub fn generator_set(name: &str) -> Result<&'static GeneratorSet> {
    SETS.get(name)
        .ok_or_else(|| Error::unknown_set(name, &SET_NAMES))
}
