//! Session validation client
//!
//! The authorization server resolves session cookies against a remote
//! session service over plaintext gRPC. The connection is long-lived: it is
//! dialed lazily, reconnects on demand, and keeps itself alive with a 5m
//! HTTP/2 keepalive ping even when no call is in flight.
//!
//! [`SessionValidator`] is the seam the decision logic depends on, so tests
//! (and gateways running without a session service) can swap in the
//! [`StubSessionValidator`].

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

use crate::error::Error;
use crate::proto::session::v1::auth_session_service_client::AuthSessionServiceClient;
use crate::proto::{Permission, Role, ValidateSessionRequest, ValidateSessionResponse};

/// Keepalive ping interval for the session-service channel
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(300);

/// Resolves session tokens into identity and grants
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validates one session token; any error means the session is not valid
    async fn validate(&self, token: &str) -> Result<ValidateSessionResponse, Status>;
}

/// gRPC-backed validator speaking to the remote session service
pub struct GrpcSessionValidator {
    client: AuthSessionServiceClient<Channel>,
}

impl GrpcSessionValidator {
    /// Creates a validator for the service at `addr` (`host:port` or a full
    /// `http://` URI)
    ///
    /// The channel connects lazily: the first call dials, later failures
    /// reconnect transparently, and idle keepalive pings hold the
    /// connection open between requests.
    pub fn connect(addr: &str) -> crate::Result<Self> {
        let uri = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| Error::transport("session", e.to_string()))?
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_while_idle(true);

        let channel = endpoint.connect_lazy();
        Ok(Self {
            client: AuthSessionServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl SessionValidator for GrpcSessionValidator {
    async fn validate(&self, token: &str) -> Result<ValidateSessionResponse, Status> {
        let mut client = self.client.clone();
        let request = Request::new(ValidateSessionRequest {
            session_token: token.to_string(),
        });
        let response = client.validate_session(request).await?;
        debug!(user_id = %response.get_ref().user_id, "session service response");
        Ok(response.into_inner())
    }
}

/// Demo validator accepting a fixed token set
///
/// Mirrors the development stub of the session service: tokens
/// `demo-token`, `test-token` and `valid-session` resolve to a demo user
/// holding the `CLIENT` role with `read` and `write` permissions.
pub struct StubSessionValidator;

#[async_trait]
impl SessionValidator for StubSessionValidator {
    async fn validate(&self, token: &str) -> Result<ValidateSessionResponse, Status> {
        if token.is_empty() {
            return Err(Status::unauthenticated("no token provided"));
        }

        const VALID_TOKENS: [&str; 3] = ["demo-token", "test-token", "valid-session"];
        if !VALID_TOKENS.contains(&token) {
            return Err(Status::unauthenticated("invalid token"));
        }

        Ok(ValidateSessionResponse {
            user_id: "demo-user-123".to_string(),
            session_id: "session-456".to_string(),
            roles: vec![Role {
                name: "CLIENT".to_string(),
                permissions: vec![
                    Permission {
                        name: "read".to_string(),
                    },
                    Permission {
                        name: "write".to_string(),
                    },
                ],
            }],
        })
    }
}
