//! Gatehouse - authorization plane for an Envoy-fronted API gateway
//!
//! Gatehouse solves two halves of the same problem: at configuration time it
//! compiles a declarative YAML policy (APIs, methods, upstream clusters,
//! per-endpoint auth and rate limits) into the Envoy static bootstrap, and at
//! request time it serves the Envoy ext_authz protocol, deciding every
//! intercepted request against that same policy.
//!
//! # Request-time pipeline
//!
//! Every `Check` runs the same straight-line decision:
//!
//! 1. Parse the target `service/method` from the request path
//! 2. Gate on the per-endpoint rate limit (with an interactive-challenge
//!    escape hatch that refunds the triggering request)
//! 3. Look up the effective auth policy (method shadows API)
//! 4. Optionally require a scored human-verification challenge
//! 5. Resolve the session cookie against the remote session service
//! 6. Check the caller's permissions and inject identity headers
//!
//! # Modules
//!
//! - [`policy`] - Policy document model, validation and the method index
//! - [`compiler`] - Compilation of the policy into the Envoy bootstrap
//! - [`ratelimit`] - Per-endpoint, per-client rate limiting
//! - [`recaptcha`] - Human-verification challenge client
//! - [`session`] - Session validation client
//! - [`authz`] - The ext_authz Check server
//! - [`proto`] - gRPC protocol definitions
//! - [`telemetry`] - Tracing and OTLP export setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod authz;
pub mod compiler;
pub mod error;
pub mod policy;
pub mod proto;
pub mod ratelimit;
pub mod recaptcha;
pub mod session;
pub mod telemetry;

pub use error::{Error, ValidationError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default listen port for the ext_authz gRPC server
///
/// The compiled bootstrap points the proxy's ext_auth cluster at this port,
/// so the two must move together.
pub const DEFAULT_AUTH_PORT: u16 = 9000;

/// Default location of the gateway policy document inside the container
pub const DEFAULT_POLICY_PATH: &str = "/opt/gatehouse/config.yaml";
