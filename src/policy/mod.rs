//! Policy model, validation and the method index
//!
//! The gateway policy is a YAML document declaring upstream clusters, APIs,
//! their methods, and per-endpoint auth policy. [`GatewayPolicy::load`] reads
//! and validates the document once at startup and builds the flattened method
//! index used for request-time lookups; the result is immutable for the
//! process lifetime.
//!
//! # Index construction
//!
//! APIs are walked in declaration order. An API with a declared auth policy
//! is indexed under its name; each method with a declared auth policy is
//! indexed under `api/method`. A method without its own policy is *not*
//! indexed - the fall back to the API-level entry happens at lookup time in
//! [`GatewayPolicy::effective_auth`], so later lookups always see the
//! sharpest declared policy.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, ValidationError};

mod types;

pub use types::{
    ApiSpec, AuthPolicyKind, AuthSpec, CircuitBreakerSpec, ClusterSpec, GatewayConfig,
    HealthCheckSpec, MethodSpec, RateLimitSpec,
};

/// A validated gateway policy plus its flattened method index
#[derive(Debug)]
pub struct GatewayPolicy {
    config: GatewayConfig,
    index: HashMap<String, AuthSpec>,
}

impl GatewayPolicy {
    /// Reads, parses and validates the policy document at `path`
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| Error::config_io(path, e))?;
        let config: GatewayConfig = serde_yaml::from_str(&data)?;
        Self::from_config(config)
    }

    /// Validates an already-parsed document and builds the method index
    pub fn from_config(config: GatewayConfig) -> crate::Result<Self> {
        validate(&config)?;
        let index = build_index(&config)?;
        Ok(Self { config, index })
    }

    /// The underlying declarative document
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Effective auth policy for an endpoint
    ///
    /// `endpoint` is the composite `service/method` key. The method entry
    /// wins; a service-level entry applies only when the method declared no
    /// policy of its own; `None` means the endpoint is unknown.
    pub fn effective_auth(&self, service: &str, endpoint: &str) -> Option<&AuthSpec> {
        self.index.get(endpoint).or_else(|| self.index.get(service))
    }

    /// Method-level rate limits keyed by endpoint, for the rate-limit engine
    pub fn rate_limits(&self) -> HashMap<String, RateLimitSpec> {
        let mut limits = HashMap::new();
        for api in &self.config.apis {
            for method in &api.methods {
                if let Some(limit) = method.auth.as_ref().and_then(|a| a.rate_limit.as_ref()) {
                    limits.insert(format!("{}/{}", api.name, method.name), limit.clone());
                }
            }
        }
        limits
    }
}

/// Enforces the document invariants: unique names, resolvable cluster
/// references, a well-formed route prefix and per-block constraints.
fn validate(config: &GatewayConfig) -> Result<(), ValidationError> {
    if config.api_route.is_empty() || !config.api_route.starts_with('/') {
        return Err(ValidationError::BadRoute);
    }

    let mut clusters = HashMap::new();
    for cluster in &config.clusters {
        if clusters.insert(cluster.name.as_str(), ()).is_some() {
            return Err(ValidationError::DuplicateKey {
                what: "cluster",
                name: cluster.name.clone(),
            });
        }
        cluster.validate()?;
    }

    let mut apis = HashMap::new();
    let mut methods = HashMap::new();
    for api in &config.apis {
        if apis.insert(api.name.as_str(), ()).is_some() {
            return Err(ValidationError::DuplicateKey {
                what: "API",
                name: api.name.clone(),
            });
        }
        if !clusters.contains_key(api.cluster.as_str()) {
            return Err(ValidationError::MissingCluster {
                api: api.name.clone(),
                cluster: api.cluster.clone(),
            });
        }
        if let Some(auth) = &api.auth {
            auth.validate(&api.name)?;
        }

        for method in &api.methods {
            let endpoint = format!("{}/{}", api.name, method.name);
            if methods.insert(endpoint.clone(), ()).is_some() {
                return Err(ValidationError::DuplicateKey {
                    what: "method",
                    name: endpoint,
                });
            }
            if let Some(auth) = &method.auth {
                auth.validate(&endpoint)?;
            }
        }
    }

    Ok(())
}

/// Builds the flattened `{service -> auth} ∪ {service/method -> auth}` index
fn build_index(config: &GatewayConfig) -> Result<HashMap<String, AuthSpec>, ValidationError> {
    let mut index = HashMap::new();

    for api in &config.apis {
        if let Some(auth) = &api.auth {
            index.insert(api.name.clone(), auth.clone());
        }

        for method in &api.methods {
            let endpoint = format!("{}/{}", api.name, method.name);
            if let Some(auth) = &method.auth {
                if index.insert(endpoint.clone(), auth.clone()).is_some() {
                    return Err(ValidationError::DuplicateKey {
                        what: "method",
                        name: endpoint,
                    });
                }
            }
        }
    }

    Ok(index)
}
