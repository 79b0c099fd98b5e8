//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration, generation, apply or export failure
    #[error(transparent)]
    Installer(#[from] installer_common::Error),

    /// Writing output failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The underlying installer error, if there is one
    pub fn installer(&self) -> Option<&installer_common::Error> {
        match self {
            Error::Installer(e) => Some(e),
            Error::Io(_) => None,
        }
    }
}
