//! gRPC protocol definitions
//!
//! Two protocols live here, both compiled by `tonic_build`:
//!
//! - `envoy.service.auth.v3` - a local mirror of the Envoy external
//!   authorization protocol, reduced to the subset of the Check exchange this
//!   server reads and writes. Package names and field numbers match upstream,
//!   so the proxy's ext_authz filter interoperates unchanged; omitted fields
//!   are skipped by the decoder.
//! - `gatehouse.session.v1` - the session validation service the
//!   authorization server consumes.

#![allow(missing_docs)] // Generated code doesn't have docs

/// Mirrored Envoy protocol types
pub mod envoy {
    /// Core configuration types (headers)
    pub mod config {
        pub mod core {
            pub mod v3 {
                tonic::include_proto!("envoy.config.core.v3");
            }
        }
    }

    /// Shared Envoy types (HTTP status)
    pub mod r#type {
        pub mod v3 {
            // `tonic::include_proto!` appends the package name verbatim, but
            // prost-build escapes the `type` path segment as `r#type` in the
            // generated filename since it is a Rust keyword.
            include!(concat!(env!("OUT_DIR"), "/envoy.r#type.v3.rs"));
        }
    }

    /// The external authorization service
    pub mod service {
        pub mod auth {
            pub mod v3 {
                tonic::include_proto!("envoy.service.auth.v3");
            }
        }
    }
}

/// google.rpc status carried on Check responses
pub mod google {
    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }
}

/// Session validation protocol
pub mod session {
    /// Version 1 of the session protocol
    pub mod v1 {
        tonic::include_proto!("gatehouse.session.v1");
    }
}

// Re-export the types request-time code touches on every call
pub use envoy::config::core::v3::{HeaderValue, HeaderValueOption};
pub use envoy::r#type::v3::{HttpStatus, StatusCode};
pub use envoy::service::auth::v3::{CheckRequest, CheckResponse};
pub use session::v1::{Permission, Role, ValidateSessionRequest, ValidateSessionResponse};
