//! Realm error types

use std::time::Duration;
use thiserror::Error;

/// Fatal configuration errors, raised while a realm is being built
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "settings were found for both user search [{user_search}] and user template [{user_template}]"
    )]
    ConflictingBindSettings {
        user_search: String,
        user_template: String,
    },

    #[error(
        "settings were not found for either user search [{user_search}] or user template [{user_template}]"
    )]
    MissingBindSettings {
        user_search: String,
        user_template: String,
    },

    #[error("Invalid realm settings: {0}")]
    Settings(#[from] sextant_core::Error),

    #[error("Failed to watch role mapping file {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}

/// Failure to load a role mapping file
#[derive(Error, Debug)]
pub enum RoleMappingError {
    #[error("role mapping file {path} does not exist")]
    Missing { path: String },

    #[error("failed to read role mapping file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse role mapping file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors reported by the directory layer
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("bind as [{dn}] rejected with result code {rc}: {message}")]
    BindRejected { dn: String, rc: u32, message: String },

    #[error("{operation} failed: {reason}")]
    Operation {
        operation: &'static str,
        reason: String,
    },

    #[error("connection pool is closed")]
    PoolClosed,
}

impl DirectoryError {
    pub fn operation(operation: &'static str, reason: impl ToString) -> Self {
        DirectoryError::Operation {
            operation,
            reason: reason.to_string(),
        }
    }

    /// The server answered the bind and refused it
    pub fn is_bind_rejected(&self) -> bool {
        matches!(self, DirectoryError::BindRejected { .. })
    }
}

/// Why a single authentication attempt failed
#[derive(Error, Debug)]
pub enum RealmError {
    #[error("invalid credentials for user [{0}]")]
    InvalidCredentials(String),

    #[error("user [{0}] was not found")]
    UserNotFound(String),

    #[error("search for user [{username}] returned {count} entries")]
    AmbiguousUser { username: String, count: usize },

    #[error("user lookup requires the user search strategy")]
    LookupUnsupported,

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl RealmError {
    /// A failure caused by what the user presented rather than by the directory
    pub fn is_credential_failure(&self) -> bool {
        match self {
            RealmError::InvalidCredentials(_)
            | RealmError::UserNotFound(_)
            | RealmError::AmbiguousUser { .. } => true,
            RealmError::Directory(err) => err.is_bind_rejected(),
            RealmError::LookupUnsupported => false,
        }
    }
}

pub type RealmResult<T> = Result<T, RealmError>;
