//! Generator framework for the installer
//!
//! Generators turn a [`Config`](installer_common::Config) into Kubernetes
//! objects. A [`Manifest`] runs a named [`GeneratorSet`] in priority order and
//! either applies the result to a cluster or exports it as YAML.

#![deny(missing_docs)]

pub mod apply;
pub mod builders;
pub mod env;
pub mod export;
pub mod generator;
pub mod generators;
pub mod manifest;
pub mod registry;
pub mod resource;

pub use apply::{Applier, ApplySummary, ClusterClient, KubeClusterClient};
pub use generator::{GenerationContext, Generator, Ordered};
pub use manifest::Manifest;
pub use registry::{generator_set, GeneratorSet};
pub use resource::Resource;
