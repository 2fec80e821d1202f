//! Gatehouse authorization server
//!
//! Serves the Envoy ext_authz protocol on :9000. The policy document is
//! loaded once at startup; the authorization service registers only when a
//! session service address is configured, matching the gateway's disabled
//! mode for environments without one.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use gatehouse::authz::AuthServer;
use gatehouse::policy::GatewayPolicy;
use gatehouse::recaptcha::{ChallengeVerifier, RecaptchaConfig};
use gatehouse::session::{GrpcSessionValidator, SessionValidator};
use gatehouse::telemetry::{init_telemetry, TelemetryConfig};

/// Gatehouse - ext_authz authorization server for the API gateway
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about, long_about = None)]
struct Cli {
    /// Gateway policy document path
    #[arg(long, env = "GATEHOUSE_CONFIG", default_value = gatehouse::DEFAULT_POLICY_PATH)]
    config: String,

    /// Listen address for the ext_authz gRPC server
    #[arg(long, default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    /// Session service address; unset disables the authorization service
    #[arg(long, env = "AUTH_SERVICE_ADDR")]
    auth_service_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::default())?;

    let cli = Cli::parse();
    info!("starting gatehouse auth server");

    let service = match cli.auth_service_addr.as_deref().filter(|addr| !addr.is_empty()) {
        Some(addr) => {
            let policy = Arc::new(GatewayPolicy::load(&cli.config)?);
            let sessions: Arc<dyn SessionValidator> =
                Arc::new(GrpcSessionValidator::connect(addr)?);
            let recaptcha = ChallengeVerifier::new(RecaptchaConfig::from_env())?;
            Some(AuthServer::new(policy, recaptcha, sessions).into_service())
        }
        None => {
            warn!("AUTH_SERVICE_ADDR is not set, authorization service disabled");
            None
        }
    };

    info!(addr = %cli.listen, "gRPC service started");
    tonic::transport::Server::builder()
        .add_optional_service(service)
        .serve_with_shutdown(cli.listen, shutdown_signal())
        .await?;

    info!("done");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM; the server then stops accepting new
/// checks and drains the in-flight ones
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("stopping...");
}
