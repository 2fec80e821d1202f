//! Compiler output checks against a realistic policy document

use gatehouse::compiler::{compile, compile_to_file, CompileExternals};
use gatehouse::policy::GatewayPolicy;
use gatehouse::Error;

const POLICY: &str = r#"
api_route: /api/
clusters:
  - name: fakeserver
    addr: fakeserver:50051
  - name: gameserver
    addr: game:8080
    type: http
    health_check:
      path: /health
      interval_seconds: 10
    circuit_breaker:
      max_connections: 512
apis:
  - name: FakeService
    cluster: fakeserver
    auth:
      policy: required
      permission: read
    methods:
      - name: Handle
      - name: Open
        auth:
          policy: no-need
          rate_limit:
            period: 1s
            count: 3
  - name: game
    cluster: gameserver
    methods:
      - name: calculate
        auth:
          policy: optional
          rate_limit:
            period: 1h
            count: 1000
"#;

fn load(doc: &str) -> GatewayPolicy {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, doc).unwrap();
    GatewayPolicy::load(&path).unwrap()
}

#[test]
fn compiled_document_is_valid_yaml() {
    let doc = compile(&load(POLICY), &CompileExternals::default()).unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();

    let listeners = &value["static_resources"]["listeners"];
    assert!(listeners.as_sequence().is_some());

    let clusters = value["static_resources"]["clusters"].as_sequence().unwrap();
    let names: Vec<&str> = clusters
        .iter()
        .filter_map(|cluster| cluster["name"].as_str())
        .collect();
    // Declared clusters in declaration order, then the two static ones
    assert_eq!(
        names,
        vec!["fakeserver", "gameserver", "ext_auth", "opentelemetry_collector"]
    );
}

#[test]
fn compilation_is_deterministic() {
    let policy = load(POLICY);
    let externals = CompileExternals::default();
    assert_eq!(
        compile(&policy, &externals).unwrap(),
        compile(&policy, &externals).unwrap()
    );
}

#[test]
fn three_methods_emit_three_specific_routes_and_two_catchalls() {
    let doc = compile(&load(POLICY), &CompileExternals::default()).unwrap();
    assert_eq!(doc.matches("- match:").count(), 5);
    assert_eq!(doc.matches("prefix_rewrite:").count(), 3);
}

#[test]
fn route_order_follows_declaration_order() {
    let doc = compile(&load(POLICY), &CompileExternals::default()).unwrap();
    let handle = doc.find(r#"prefix: "/api/FakeService/Handle""#).unwrap();
    let open = doc.find(r#"prefix: "/api/FakeService/Open""#).unwrap();
    let fake_catchall = doc.find(r#"prefix: "/api/FakeService/""#).unwrap();
    let calculate = doc.find(r#"prefix: "/api/game/calculate""#).unwrap();
    assert!(handle < open);
    assert!(open < fake_catchall);
    assert!(fake_catchall < calculate);
}

#[test]
fn declared_token_buckets_double_for_burst() {
    let doc = compile(&load(POLICY), &CompileExternals::default()).unwrap();

    assert!(doc.contains("stat_prefix: rate_limit_FakeService_Open"));
    assert!(doc.contains("max_tokens: 6"));
    assert!(doc.contains("tokens_per_fill: 3"));
    assert!(doc.contains("fill_interval: 1s"));

    assert!(doc.contains("stat_prefix: rate_limit_game_calculate"));
    assert!(doc.contains("max_tokens: 2000"));
    assert!(doc.contains("tokens_per_fill: 1000"));
    assert!(doc.contains("fill_interval: 3600s"));
}

#[test]
fn health_check_and_circuit_breaker_blocks_are_emitted() {
    let doc = compile(&load(POLICY), &CompileExternals::default()).unwrap();

    assert!(doc.contains(r#"path: "/health""#));
    assert!(doc.contains("interval: 10s"));
    assert!(doc.contains("value: \"envoy-health-check\""));

    assert!(doc.contains("priority: DEFAULT"));
    assert!(doc.contains("priority: HIGH"));
    assert!(doc.contains("max_connections: 512"));
}

#[test]
fn compile_to_file_writes_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("envoy.yaml");

    compile_to_file(&load(POLICY), &CompileExternals::default(), &out).unwrap();

    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.contains("web_grpc_listener"));
}

#[test]
fn unwritable_output_path_is_a_compile_error() {
    let err = compile_to_file(
        &load(POLICY),
        &CompileExternals::default(),
        "/nonexistent-dir/envoy.yaml",
    )
    .unwrap_err();
    assert!(matches!(err, Error::CompileIo { .. }));
}

#[test]
fn unsupported_period_fails_compilation() {
    let doc = r#"
api_route: /api/
clusters:
  - name: c
    addr: a:1
apis:
  - name: svc
    cluster: c
    methods:
      - name: m
        auth:
          policy: no-need
          rate_limit:
            period: 2m
            count: 5
"#;
    let err = compile(&load(doc), &CompileExternals::default()).unwrap_err();
    assert!(err.to_string().contains("period must be one of 1s, 1m, 1h"));
}
