//! Supporting types for the gateway policy document

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How an endpoint treats the caller's session token
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthPolicyKind {
    /// A valid session is mandatory; the permission check applies
    Required,
    /// A session is validated when presented but its absence is fine
    Optional,
    /// The endpoint is public; no session handling at all
    NoNeed,
}

impl std::fmt::Display for AuthPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
            Self::NoNeed => write!(f, "no-need"),
        }
    }
}

/// Per-endpoint rate limit declaration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimitSpec {
    /// Length of one counting window
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Requests admitted per client within one window
    pub count: u32,

    /// Penalty slept off by clients that keep hammering past the limit;
    /// zero disables the penalty
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,
}

/// Auth policy attached to an API or to a single method
///
/// A method-level policy shadows the API-level one; the fallback happens at
/// lookup time, not while the index is built.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AuthSpec {
    /// Token policy for the endpoint
    pub policy: AuthPolicyKind,

    /// Permission name a `required` endpoint demands. The empty string
    /// grants any caller holding the `CLIENT` role.
    #[serde(default)]
    pub permission: String,

    /// Require a scored human-verification challenge on every request
    #[serde(default)]
    pub need_recaptcha: bool,

    /// Optional per-endpoint rate limit
    #[serde(default)]
    pub rate_limit: Option<RateLimitSpec>,
}

impl AuthSpec {
    /// True when the endpoint demands a valid session
    pub fn required(&self) -> bool {
        self.policy == AuthPolicyKind::Required
    }

    /// True when the endpoint validates a session only if one is presented
    pub fn optional(&self) -> bool {
        self.policy == AuthPolicyKind::Optional
    }

    /// True when the endpoint is public
    pub fn no_need(&self) -> bool {
        self.policy == AuthPolicyKind::NoNeed
    }

    /// Validates the rate-limit constraints for this policy
    pub fn validate(&self, place: &str) -> Result<(), ValidationError> {
        if let Some(limit) = &self.rate_limit {
            if limit.count == 0 {
                return Err(ValidationError::BadRateLimit {
                    place: place.to_string(),
                    reason: "count must be positive".to_string(),
                });
            }
            if limit.period.is_zero() {
                return Err(ValidationError::BadRateLimit {
                    place: place.to_string(),
                    reason: "period cannot be zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Health-check block attached to an upstream cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HealthCheckSpec {
    /// Probe path requested on the upstream
    pub path: String,

    /// Seconds between probes
    #[serde(default = "default_health_interval")]
    pub interval_seconds: u32,

    /// Probe timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub timeout_seconds: u32,

    /// Consecutive successes before an unhealthy host is readmitted
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Consecutive failures before a host is ejected
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

fn default_health_interval() -> u32 {
    30
}

fn default_health_timeout() -> u32 {
    5
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_unhealthy_threshold() -> u32 {
    3
}

/// Circuit-breaker thresholds attached to an upstream cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CircuitBreakerSpec {
    /// Maximum upstream connections
    #[serde(default = "default_breaker_limit")]
    pub max_connections: u32,

    /// Maximum queued requests
    #[serde(default = "default_breaker_limit")]
    pub max_pending_requests: u32,

    /// Maximum in-flight requests
    #[serde(default = "default_breaker_limit")]
    pub max_requests: u32,

    /// Maximum concurrent retries
    #[serde(default = "default_breaker_retries")]
    pub max_retries: u32,
}

fn default_breaker_limit() -> u32 {
    1024
}

fn default_breaker_retries() -> u32 {
    3
}

/// Upstream cluster declaration
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ClusterSpec {
    /// Cluster name, unique across the document
    pub name: String,

    /// Upstream address as `host:port`
    pub addr: String,

    /// Upstream protocol, `grpc` (the default) or `http`
    #[serde(default, rename = "type")]
    pub type_: Option<String>,

    /// Optional active health checking
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,

    /// Optional circuit-breaker thresholds
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSpec>,
}

impl ClusterSpec {
    /// True when the upstream speaks gRPC (the default)
    pub fn is_grpc(&self) -> bool {
        matches!(self.type_.as_deref(), None | Some("") | Some("grpc"))
    }

    /// True when the upstream speaks plain HTTP
    pub fn is_http(&self) -> bool {
        self.type_.as_deref() == Some("http")
    }

    /// Host half of the declared address
    pub fn host(&self) -> &str {
        self.addr.split(':').next().unwrap_or(&self.addr)
    }

    /// Port half of the declared address
    pub fn port(&self) -> &str {
        self.addr.split(':').nth(1).unwrap_or_default()
    }

    /// Validates the address, protocol and attached blocks
    pub fn validate(&self) -> Result<(), ValidationError> {
        let bad_address = |reason| ValidationError::BadAddress {
            cluster: self.name.clone(),
            addr: self.addr.clone(),
            reason,
        };

        let Some((host, port)) = self.addr.split_once(':') else {
            return Err(bad_address("expected host:port"));
        };
        if host.is_empty() {
            return Err(bad_address("host cannot be empty"));
        }
        if port.parse::<u16>().is_err() {
            return Err(bad_address("port is not numeric"));
        }

        if !self.is_grpc() && !self.is_http() {
            return Err(ValidationError::UnknownEnum {
                what: "cluster type",
                value: self.type_.clone().unwrap_or_default(),
                place: format!("cluster {}", self.name),
            });
        }

        if let Some(health) = &self.health_check {
            if health.path.is_empty() {
                return Err(ValidationError::BadHealthCheck {
                    cluster: self.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A single method of an API
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct MethodSpec {
    /// Method name, unique within its API
    pub name: String,

    /// Method-level auth policy; shadows the API-level one
    #[serde(default)]
    pub auth: Option<AuthSpec>,
}

/// A logical API: a group of methods served by one upstream cluster
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ApiSpec {
    /// API name, unique across the document; first path segment after the
    /// route prefix
    pub name: String,

    /// Name of the upstream cluster serving this API
    pub cluster: String,

    /// API-level auth policy applied to methods without their own
    #[serde(default)]
    pub auth: Option<AuthSpec>,

    /// Declared methods, in emission order
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

/// The top-level gateway policy document
///
/// Unknown keys are ignored.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GatewayConfig {
    /// Absolute URL prefix all gateway traffic lives under, e.g. `/api/`
    #[serde(default)]
    pub api_route: String,

    /// Upstream cluster declarations, in emission order
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,

    /// API declarations, in emission order
    #[serde(default)]
    pub apis: Vec<ApiSpec>,
}
