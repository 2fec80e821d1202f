//! Compilation of the gateway policy into the Envoy bootstrap
//!
//! A pure function of the validated policy plus three environment-provided
//! endpoints: the emitted document is deterministic, with routes following
//! the declared order of APIs then methods and clusters following
//! declaration order ahead of the two static clusters (`ext_auth`,
//! `opentelemetry_collector`).
//!
//! # Emission rules
//!
//! Every API × method pair becomes one route under the gateway listener;
//! the route shape depends on the protocol of the referenced cluster. gRPC
//! routes keep the full `/Service/Method` path and stream without timeout;
//! HTTP routes strip the service segment and get a 30s timeout. Each API
//! additionally gets a catch-all prefix route so paths unmatched by a
//! specific method still reach the upstream; catch-alls never carry
//! rate-limit config.
//!
//! A method with a declared rate limit gets a per-route local_ratelimit
//! config: `tokens_per_fill` is the declared count, `max_tokens` twice that
//! for burst, and the fill interval is mapped from the declared period
//! (restricted to 1s / 1m / 1h on this path).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use minijinja::{context, Environment};
use serde::Serialize;
use tracing::info;

use crate::error::{Error, ValidationError};
use crate::policy::{ApiSpec, CircuitBreakerSpec, ClusterSpec, GatewayPolicy, HealthCheckSpec, MethodSpec, RateLimitSpec};

/// Environment-provided endpoints baked into the emitted bootstrap
#[derive(Clone, Debug)]
pub struct CompileExternals {
    /// Host of the ext_authz adapter the proxy delegates to
    pub auth_adapter_host: String,
    /// OpenTelemetry collector host
    pub otel_host: String,
    /// OpenTelemetry collector port
    pub otel_port: String,
}

impl Default for CompileExternals {
    fn default() -> Self {
        Self {
            auth_adapter_host: "127.0.0.1".to_string(),
            otel_host: "127.0.0.1".to_string(),
            otel_port: "4317".to_string(),
        }
    }
}

impl CompileExternals {
    /// Reads `AUTH_ADAPTER_HOST`, `OPEN_TELEMETRY_HOST` and
    /// `OPEN_TELEMETRY_PORT`, keeping the defaults for unset variables
    pub fn from_env() -> Self {
        let mut externals = Self::default();
        if let Ok(host) = std::env::var("AUTH_ADAPTER_HOST") {
            if !host.is_empty() {
                externals.auth_adapter_host = host;
            }
        }
        if let Ok(host) = std::env::var("OPEN_TELEMETRY_HOST") {
            if !host.is_empty() {
                externals.otel_host = host;
            }
        }
        if let Ok(port) = std::env::var("OPEN_TELEMETRY_PORT") {
            if !port.is_empty() {
                externals.otel_port = port;
            }
        }
        externals
    }
}

/// Context for one upstream cluster block
#[derive(Serialize)]
struct ClusterContext<'a> {
    name: &'a str,
    host: &'a str,
    port: &'a str,
    grpc: bool,
    circuit_breaker: Option<&'a CircuitBreakerSpec>,
    health_check: Option<&'a HealthCheckSpec>,
}

/// Compiles a validated policy into the Envoy bootstrap document
pub fn compile(policy: &GatewayPolicy, externals: &CompileExternals) -> crate::Result<String> {
    let env = build_environment()?;
    let config = policy.config();

    // true = HTTP upstream, false = gRPC
    let cluster_is_http: HashMap<&str, bool> = config
        .clusters
        .iter()
        .map(|cluster| (cluster.name.as_str(), cluster.is_http()))
        .collect();

    let mut routes = String::new();
    for api in &config.apis {
        let http_upstream = cluster_is_http
            .get(api.cluster.as_str())
            .copied()
            .unwrap_or(false);

        for method in &api.methods {
            routes.push_str(&render_method_route(
                &env,
                &config.api_route,
                api,
                method,
                http_upstream,
            )?);
            routes.push('\n');
        }

        routes.push_str(&render_catchall_route(
            &env,
            &config.api_route,
            api,
            http_upstream,
        )?);
        routes.push('\n');
    }

    let mut clusters = String::new();
    for cluster in &config.clusters {
        clusters.push_str(&render_cluster(&env, cluster)?);
        clusters.push('\n');
    }

    let document = env.get_template("bootstrap")?.render(context! {
        routes,
        clusters,
        auth_adapter_host => externals.auth_adapter_host,
        otel_host => externals.otel_host,
        otel_port => externals.otel_port,
    })?;

    Ok(document)
}

/// Compiles the policy and writes the document to `out_path`
pub fn compile_to_file(
    policy: &GatewayPolicy,
    externals: &CompileExternals,
    out_path: impl AsRef<Path>,
) -> crate::Result<()> {
    let out_path = out_path.as_ref();
    let document = compile(policy, externals)?;
    std::fs::write(out_path, document).map_err(|e| Error::compile_io(out_path, e))?;
    info!(path = %out_path.display(), "envoy config written");
    Ok(())
}

fn render_method_route(
    env: &Environment<'_>,
    api_route: &str,
    api: &ApiSpec,
    method: &MethodSpec,
    http_upstream: bool,
) -> crate::Result<String> {
    let rate_limit = match method.auth.as_ref().and_then(|auth| auth.rate_limit.as_ref()) {
        Some(limit) => render_rate_limit(env, api, method, limit)?,
        None => String::new(),
    };

    let prefix = format!("{api_route}{}/{}", api.name, method.name);
    let (template, rewrite) = if http_upstream {
        ("route_http", format!("/{}", method.name))
    } else {
        ("route_grpc", format!("/{}/{}", api.name, method.name))
    };

    let rendered = env.get_template(template)?.render(context! {
        prefix,
        cluster => api.cluster,
        rewrite,
        rate_limit,
    })?;
    Ok(rendered)
}

fn render_catchall_route(
    env: &Environment<'_>,
    api_route: &str,
    api: &ApiSpec,
    http_upstream: bool,
) -> crate::Result<String> {
    let prefix = format!("{api_route}{}/", api.name);
    let template = if http_upstream {
        "route_catchall_http"
    } else {
        "route_catchall_grpc"
    };

    let rendered = env.get_template(template)?.render(context! {
        prefix,
        cluster => api.cluster,
    })?;
    Ok(rendered)
}

fn render_rate_limit(
    env: &Environment<'_>,
    api: &ApiSpec,
    method: &MethodSpec,
    limit: &RateLimitSpec,
) -> crate::Result<String> {
    let endpoint = format!("{}/{}", api.name, method.name);
    let fill_interval = fill_interval(limit.period, &endpoint)?;

    let rendered = env.get_template("rate_limit")?.render(context! {
        stat_prefix => format!("rate_limit_{}_{}", api.name, method.name),
        max_tokens => limit.count * 2,
        tokens_per_fill => limit.count,
        fill_interval,
    })?;
    Ok(rendered)
}

/// Maps a declared period onto the proxy's token-bucket fill interval
///
/// The proxy side recognises exactly 1s, 1m and 1h; anything else is a
/// compile-time validation error (the runtime limiter accepts any
/// duration).
fn fill_interval(period: Duration, endpoint: &str) -> Result<&'static str, ValidationError> {
    let bad = |reason: &str| ValidationError::BadRateLimit {
        place: endpoint.to_string(),
        reason: reason.to_string(),
    };

    if period.subsec_nanos() != 0 {
        return Err(bad("period must be one of 1s, 1m, 1h"));
    }
    match period.as_secs() {
        1 => Ok("1s"),
        60 => Ok("60s"),
        3600 => Ok("3600s"),
        _ => Err(bad("period must be one of 1s, 1m, 1h")),
    }
}

fn render_cluster(env: &Environment<'_>, cluster: &ClusterSpec) -> crate::Result<String> {
    let ctx = ClusterContext {
        name: &cluster.name,
        host: cluster.host(),
        port: cluster.port(),
        grpc: cluster.is_grpc(),
        circuit_breaker: cluster.circuit_breaker.as_ref(),
        health_check: cluster.health_check.as_ref(),
    };
    let rendered = env.get_template("cluster")?.render(ctx)?;
    Ok(rendered)
}

fn build_environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("bootstrap", include_str!("templates/bootstrap.yaml.j2"))?;
    env.add_template("route_grpc", include_str!("templates/route_grpc.yaml.j2"))?;
    env.add_template("route_http", include_str!("templates/route_http.yaml.j2"))?;
    env.add_template(
        "route_catchall_grpc",
        include_str!("templates/route_catchall_grpc.yaml.j2"),
    )?;
    env.add_template(
        "route_catchall_http",
        include_str!("templates/route_catchall_http.yaml.j2"),
    )?;
    env.add_template("rate_limit", include_str!("templates/rate_limit.yaml.j2"))?;
    env.add_template("cluster", include_str!("templates/cluster.yaml.j2"))?;
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::GatewayConfig;

    fn policy(doc: &str) -> GatewayPolicy {
        let config: GatewayConfig = serde_yaml::from_str(doc).unwrap();
        GatewayPolicy::from_config(config).unwrap()
    }

    const SAMPLE: &str = r#"
api_route: /api/
clusters:
  - name: fakeserver
    addr: fakeserver:50051
  - name: gameserver
    addr: game:8080
    type: http
apis:
  - name: FakeService
    cluster: fakeserver
    methods:
      - name: Handle
        auth:
          policy: no-need
          rate_limit:
            period: 1m
            count: 25
  - name: game
    cluster: gameserver
    methods:
      - name: calculate
"#;

    #[test]
    fn emits_valid_yaml() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert!(parsed.get("static_resources").is_some());
    }

    #[test]
    fn grpc_routes_keep_the_full_method_path() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        assert!(doc.contains(r#"prefix: "/api/FakeService/Handle""#));
        assert!(doc.contains(r#"prefix_rewrite: "/FakeService/Handle""#));
    }

    #[test]
    fn http_routes_strip_the_service_segment() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        assert!(doc.contains(r#"prefix: "/api/game/calculate""#));
        assert!(doc.contains(r#"prefix_rewrite: "/calculate""#));
    }

    #[test]
    fn every_api_gets_a_catchall_route() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        assert!(doc.contains(r#"prefix: "/api/FakeService/""#));
        assert!(doc.contains(r#"prefix: "/api/game/""#));
        assert!(doc.contains(r#"regex: "^/api/game/(.*)""#));
    }

    #[test]
    fn rate_limited_methods_get_a_token_bucket() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        assert!(doc.contains("stat_prefix: rate_limit_FakeService_Handle"));
        assert!(doc.contains("max_tokens: 50"));
        assert!(doc.contains("tokens_per_fill: 25"));
        assert!(doc.contains("fill_interval: 60s"));
    }

    #[test]
    fn externals_flow_into_the_static_clusters() {
        let externals = CompileExternals {
            auth_adapter_host: "auth.internal".to_string(),
            otel_host: "otel.internal".to_string(),
            otel_port: "4444".to_string(),
        };
        let doc = compile(&policy(SAMPLE), &externals).unwrap();
        assert!(doc.contains("address: auth.internal"));
        assert!(doc.contains("address: otel.internal"));
        assert!(doc.contains("port_value: 4444"));
    }

    #[test]
    fn fill_interval_rejects_odd_periods() {
        assert_eq!(fill_interval(Duration::from_secs(1), "a/b").unwrap(), "1s");
        assert_eq!(fill_interval(Duration::from_secs(60), "a/b").unwrap(), "60s");
        assert_eq!(
            fill_interval(Duration::from_secs(3600), "a/b").unwrap(),
            "3600s"
        );
        assert!(fill_interval(Duration::from_secs(2), "a/b").is_err());
        assert!(fill_interval(Duration::from_millis(1500), "a/b").is_err());
        assert!(fill_interval(Duration::ZERO, "a/b").is_err());
    }

    #[test]
    fn one_specific_route_and_one_catchall_per_api() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        // Two declared methods plus one catch-all per API
        assert_eq!(doc.matches("- match:").count(), 4);
    }

    #[test]
    fn cluster_blocks_follow_the_upstream_protocol() {
        let doc = compile(&policy(SAMPLE), &CompileExternals::default()).unwrap();
        // Both upstream clusters plus the two static ones
        assert!(doc.contains("- name: fakeserver"));
        assert!(doc.contains("- name: gameserver"));
        assert!(doc.contains("- name: ext_auth"));
        assert!(doc.contains("- name: opentelemetry_collector"));
        assert!(doc.contains("max_concurrent_streams: 1024"));
    }
}
