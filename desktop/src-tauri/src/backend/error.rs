use std::panic::Location;
use std::path::PathBuf;

use error_location::ErrorLocation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to create data directory at {path}: {source} {location}")]
    DataDirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Configuration invalid: {message} {location}")]
    ConfigInvalid {
        message: String,
        location: ErrorLocation,
    },

    #[error("Failed to spawn backend process {binary}: {source} {location}")]
    ProcessSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },

    #[error("Backend did not become ready after {attempts} probe attempts {location}")]
    StartupTimeout {
        attempts: u32,
        location: ErrorLocation,
    },

    #[error("IO error: {source} {location}")]
    Io {
        #[source]
        source: std::io::Error,
        location: ErrorLocation,
    },
}

impl BackendError {
    /// Whether this error is recoverable via retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StartupTimeout { .. })
    }

    pub fn recovery_hint(&self) -> &'static str {
        match self {
            Self::DataDirCreation { .. } => {
                "Unable to create the application data directory. \
                   Check file permissions or available disk space."
            }
            Self::ConfigInvalid { .. } => {
                "Configuration file has invalid settings. \
                   Check the logs for details or delete the config file to use defaults."
            }
            Self::ProcessSpawn { .. } => {
                "The backend executable could not be started. \
                   The installation appears incomplete; please reinstall the application."
            }
            Self::StartupTimeout { .. } => {
                "The backend is taking too long to start. \
                   Try again or check the logs."
            }
            Self::Io { .. } => "An unexpected error occurred. Please check the logs for details.",
        }
    }
}

impl From<std::io::Error> for BackendError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
