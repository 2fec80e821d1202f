//! Error types for gatehouse

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for gatehouse operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Filesystem failure reading the policy document
    #[error("failed to read policy config {path}: {source}")]
    ConfigIo {
        /// Path of the unreadable file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// YAML syntax or shape error in the policy document
    #[error("failed to parse policy config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Schema violation in a parsed policy document
    #[error("invalid policy config: {0}")]
    Validation(#[from] ValidationError),

    /// Filesystem failure writing the compiled proxy bootstrap
    #[error("failed to write envoy config {path}: {source}")]
    CompileIo {
        /// Path of the unwritable file
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Template rendering failure in the compiler
    #[error("failed to render envoy config: {0}")]
    Render(#[from] minijinja::Error),

    /// Transport setup failure for an external collaborator
    #[error("{component} transport error: {message}")]
    Transport {
        /// Which collaborator failed (session, recaptcha)
        component: &'static str,
        /// Underlying transport error message
        message: String,
    },
}

impl Error {
    /// Create a config-read error for the given path
    pub fn config_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::ConfigIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a compile-write error for the given path
    pub fn compile_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::CompileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a transport error for the given collaborator
    pub fn transport(component: &'static str, message: impl Into<String>) -> Self {
        Self::Transport {
            component,
            message: message.into(),
        }
    }
}

/// Schema violations found while validating a parsed policy document
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The same name is declared twice within its namespace
    #[error("{what} {name} is defined twice")]
    DuplicateKey {
        /// Namespace of the duplicate (cluster, API, method)
        what: &'static str,
        /// The duplicated name
        name: String,
    },

    /// A field carries a value outside its enumerated set
    #[error("unknown {what} {value:?} for {place}")]
    UnknownEnum {
        /// Which enumeration was violated
        what: &'static str,
        /// The offending value
        value: String,
        /// Where it was declared
        place: String,
    },

    /// A cluster address does not parse as host:port
    #[error("invalid address {addr:?} for cluster {cluster}: {reason}")]
    BadAddress {
        /// Cluster carrying the address
        cluster: String,
        /// The offending address
        addr: String,
        /// What about it failed to parse
        reason: &'static str,
    },

    /// The api_route prefix is empty or does not start with `/`
    #[error("api_route must be a non-empty prefix starting with '/'")]
    BadRoute,

    /// An API references a cluster that is not declared
    #[error("cluster {cluster} for API {api} is not defined")]
    MissingCluster {
        /// The referencing API
        api: String,
        /// The missing cluster name
        cluster: String,
    },

    /// A rate-limit descriptor violates its constraints
    #[error("invalid rate limit for {place}: {reason}")]
    BadRateLimit {
        /// The API or method carrying the descriptor
        place: String,
        /// Which constraint was violated
        reason: String,
    },

    /// A health-check block is missing its probe path
    #[error("health check path cannot be empty for cluster {cluster}")]
    BadHealthCheck {
        /// Cluster carrying the health check
        cluster: String,
    },
}
