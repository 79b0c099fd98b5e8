//! Component generators
//!
//! One generator per deployable component. Each is a unit struct (or a thin
//! wrapper around static data) so a set can hold them for the whole process.

mod admission_control;
mod central;
mod central_db;
mod collector;
mod crs;
mod namespace;
mod network_policy;
mod scanner_v4;
mod sensor;

pub use admission_control::AdmissionControlGenerator;
pub use central::CentralGenerator;
pub use central_db::CentralDbGenerator;
pub use collector::CollectorGenerator;
pub use crs::CrsGenerator;
pub use namespace::NamespaceGenerator;
pub use network_policy::{
    NetworkPolicyGenerator, Peers, PolicyTarget, CENTRAL_TARGETS, SECURED_CLUSTER_TARGETS,
};
pub use scanner_v4::ScannerV4Generator;
pub use sensor::SensorGenerator;
