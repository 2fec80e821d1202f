//! The ext_authz Check server
//!
//! Implements the v3 external-authorization service the proxy delegates
//! every inbound request to. One unary operation, `Check`, runs the whole
//! decision pipeline and answers with either an OK response (plus identity
//! headers to inject upstream) or a denial carrying an HTTP status for the
//! caller.
//!
//! The request path never surfaces internal errors: logs and spans carry
//! the detail, the response carries only the enumerated status codes and
//! short messages. The single RPC-level error is a request without any
//! `:path` at all, which is an invalid argument rather than a policy
//! denial.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::policy::GatewayPolicy;
use crate::proto::envoy::service::auth::v3::authorization_server::{
    Authorization, AuthorizationServer,
};
use crate::proto::envoy::service::auth::v3::{
    check_response, CheckRequest, CheckResponse, DeniedHttpResponse, OkHttpResponse,
};
use crate::proto::google::rpc;
use crate::proto::{HeaderValue, HeaderValueOption, HttpStatus, StatusCode};
use crate::ratelimit::RateLimiter;
use crate::recaptcha::{ChallengeKind, ChallengeVerifier};
use crate::session::SessionValidator;

use super::{authorize, parse_path, parse_token_cookie};

/// google.rpc code carried on allowed responses
const RPC_OK: i32 = 0;
/// google.rpc code carried on denied responses; must be non-OK for the
/// proxy to actually deny
const RPC_PERMISSION_DENIED: i32 = 7;

/// Clearing cookie sent when session validation fails
const CLEAR_TOKEN_COOKIE: &str = "token=; Path=/; Max-Age=0; HttpOnly";

/// The ext_authz authorization server
pub struct AuthServer {
    policy: Arc<GatewayPolicy>,
    limiter: RateLimiter,
    recaptcha: ChallengeVerifier,
    sessions: Arc<dyn SessionValidator>,
}

impl AuthServer {
    /// Creates the server over a validated policy; the rate limiter is
    /// derived from the policy's method-level limits
    pub fn new(
        policy: Arc<GatewayPolicy>,
        recaptcha: ChallengeVerifier,
        sessions: Arc<dyn SessionValidator>,
    ) -> Self {
        let limiter = RateLimiter::new(&policy);
        Self {
            policy,
            limiter,
            recaptcha,
            sessions,
        }
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> AuthorizationServer<Self> {
        AuthorizationServer::new(self)
    }

    /// Serves the ext_authz service on `addr` until `shutdown` resolves,
    /// then drains in-flight checks without accepting new ones
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), tonic::transport::Error> {
        info!(%addr, "gRPC service started");
        Server::builder()
            .add_service(self.into_service())
            .serve_with_shutdown(addr, shutdown)
            .await
    }

    /// Verifies the challenge header for `kind`, if any
    ///
    /// With the verifier disabled everything passes, header or not. With it
    /// enabled, a missing header fails closed before any remote call.
    async fn challenge(&self, headers: &HashMap<String, String>, kind: ChallengeKind) -> bool {
        if self.recaptcha.is_disabled() {
            return true;
        }

        let header = match kind {
            ChallengeKind::Interactive => "x-rc-token-2",
            ChallengeKind::Scored => "x-rc-token",
        };
        let Some(token) = headers.get(header) else {
            debug!(header, "challenge header is not passed");
            return false;
        };

        self.recaptcha.verify(token, kind).await
    }
}

/// An allowed response with headers to set on the upstream request
fn allow(headers: Vec<HeaderValueOption>) -> CheckResponse {
    CheckResponse {
        status: Some(rpc::Status {
            code: RPC_OK,
            message: String::new(),
        }),
        http_response: Some(check_response::HttpResponse::OkResponse(OkHttpResponse {
            headers,
        })),
    }
}

/// A denied response carrying an HTTP status and headers for the caller
fn deny(code: StatusCode, message: &str, headers: Vec<HeaderValueOption>) -> CheckResponse {
    CheckResponse {
        status: Some(rpc::Status {
            code: RPC_PERMISSION_DENIED,
            message: message.to_string(),
        }),
        http_response: Some(check_response::HttpResponse::DeniedResponse(
            DeniedHttpResponse {
                status: Some(HttpStatus { code: code as i32 }),
                headers,
                body: String::new(),
            },
        )),
    }
}

/// A header option that replaces any existing value
fn set_header(key: &str, value: &str) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        append: Some(false),
    }
}

#[tonic::async_trait]
impl Authorization for AuthServer {
    #[instrument(
        name = "check-auth",
        skip_all,
        fields(path, endpoint, client_ip, user_id, session_id)
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        debug!(metadata = ?request.metadata(), "gRPC metadata");

        let check = request.into_inner();
        let http = check
            .attributes
            .as_ref()
            .and_then(|attributes| attributes.request.as_ref())
            .and_then(|request| request.http.as_ref());
        let Some(http) = http else {
            return Err(Status::invalid_argument(":path header is not found"));
        };
        let headers = &http.headers;

        // Envoy passes the path in Http.Path; gRPC-Web requests may only
        // carry the :path header
        let mut path = http.path.as_str();
        if path.is_empty() {
            path = headers.get(":path").map(String::as_str).unwrap_or("");
        }
        if path.is_empty() {
            return Err(Status::invalid_argument(":path header is not found"));
        }

        let span = tracing::Span::current();
        span.record("path", path);

        let Some((service, endpoint)) = parse_path(path) else {
            debug!(path, "request path does not parse");
            return Ok(Response::new(deny(StatusCode::BadRequest, "bad path", vec![])));
        };
        span.record("endpoint", endpoint.as_str());
        debug!(path, service, endpoint = %endpoint, "parsed path");

        let client_ip = headers
            .get("x-real-ip")
            .filter(|ip| !ip.is_empty())
            .or_else(|| headers.get("x-forwarded-for"))
            .map(String::as_str)
            .unwrap_or_default();
        if client_ip.is_empty() {
            warn!("client IP not found in headers (x-real-ip or x-forwarded-for)");
        }
        span.record("client_ip", client_ip);

        // A tripped limit can be redeemed once with an interactive challenge
        let mut interactive_passed = false;
        if !self.limiter.check(client_ip, &endpoint).await {
            interactive_passed = self.challenge(headers, ChallengeKind::Interactive).await;
            if interactive_passed {
                self.limiter.reset(client_ip, &endpoint).await;
            } else {
                return Ok(Response::new(deny(
                    StatusCode::TooManyRequests,
                    "rate limit is reached",
                    vec![],
                )));
            }
        }

        let Some(auth) = self.policy.effective_auth(service, &endpoint) else {
            return Ok(Response::new(deny(
                StatusCode::BadRequest,
                "unknown auth for method",
                vec![],
            )));
        };
        debug!(policy = %auth.policy, permission = %auth.permission, "effective auth policy");

        if !interactive_passed
            && auth.need_recaptcha
            && !self.challenge(headers, ChallengeKind::Scored).await
        {
            return Ok(Response::new(deny(StatusCode::PreconditionFailed, "", vec![])));
        }

        if auth.no_need() {
            return Ok(Response::new(allow(vec![])));
        }

        let cookie = headers.get("cookie").map(String::as_str).unwrap_or_default();
        let token = match parse_token_cookie(cookie) {
            Ok(token) => token.unwrap_or_default(),
            Err(e) => {
                return Ok(Response::new(deny(
                    StatusCode::BadRequest,
                    &e.to_string(),
                    vec![],
                )));
            }
        };

        if token.is_empty() {
            if auth.optional() {
                return Ok(Response::new(allow(vec![])));
            }
            return Ok(Response::new(deny(
                StatusCode::Unauthorized,
                "token required",
                vec![],
            )));
        }

        let session = match self.sessions.validate(&token).await {
            Ok(session) => session,
            Err(status) => {
                debug!(error = %status, "session validation failed");
                let headers = vec![set_header("set-cookie", CLEAR_TOKEN_COOKIE)];
                if auth.optional() {
                    return Ok(Response::new(allow(headers)));
                }
                return Ok(Response::new(deny(
                    StatusCode::Unauthorized,
                    status.message(),
                    headers,
                )));
            }
        };
        span.record("user_id", session.user_id.as_str());
        span.record("session_id", session.session_id.as_str());
        debug!(user_id = %session.user_id, session_id = %session.session_id, "session validated");

        if auth.required() && !authorize(&auth.permission, &session.roles) {
            return Ok(Response::new(deny(
                StatusCode::Forbidden,
                "access denied",
                vec![],
            )));
        }

        Ok(Response::new(allow(vec![
            set_header("user-id", &session.user_id),
            set_header("session-id", &session.session_id),
        ])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_carries_ok_status_and_headers() {
        let response = allow(vec![set_header("user-id", "demo-user-123")]);
        assert_eq!(response.status.as_ref().map(|s| s.code), Some(RPC_OK));
        match response.http_response {
            Some(check_response::HttpResponse::OkResponse(ok)) => {
                assert_eq!(ok.headers.len(), 1);
                let header = ok.headers[0].header.as_ref().unwrap();
                assert_eq!(header.key, "user-id");
                assert_eq!(header.value, "demo-user-123");
                assert_eq!(ok.headers[0].append, Some(false));
            }
            other => panic!("expected ok response, got {other:?}"),
        }
    }

    #[test]
    fn deny_carries_http_status_and_non_ok_rpc_code() {
        let response = deny(StatusCode::TooManyRequests, "rate limit is reached", vec![]);
        assert_eq!(
            response.status.as_ref().map(|s| s.code),
            Some(RPC_PERMISSION_DENIED)
        );
        match response.http_response {
            Some(check_response::HttpResponse::DeniedResponse(denied)) => {
                assert_eq!(denied.status.map(|s| s.code), Some(429));
                assert!(denied.headers.is_empty());
            }
            other => panic!("expected denied response, got {other:?}"),
        }
    }
}
