//! Common types for the installer: configuration, errors, and cluster utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;

pub use config::Config;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default path of the installer configuration file
pub const DEFAULT_CONFIG_PATH: &str = "./installer.yaml";

/// Label key used to select the pods of a component
pub const APP_LABEL_KEY: &str = "app";
