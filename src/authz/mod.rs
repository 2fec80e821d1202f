//! Request-time authorization
//!
//! The decision pipeline for every intercepted request, served to the proxy
//! over the ext_authz protocol:
//!
//! rate limit → challenge → policy gate → token → session → permission
//!
//! [`server`] holds the gRPC service; this module carries the pure helpers
//! it is built from - path parsing, cookie extraction and the permission
//! walk.

use thiserror::Error;

use crate::proto::Role;

pub mod server;

pub use server::AuthServer;

/// The Cookie header failed to parse
#[derive(Debug, Error)]
#[error("malformed cookie header")]
pub struct CookieParseError;

/// Splits an intercepted path into `(service, endpoint key)`
///
/// The expected shape is `/api/{service}/{method}[/...][?...]`; extra path
/// segments and the query string are ignored. The endpoint key is
/// `service/method`, the composite both the policy index and the rate
/// limiter are keyed by.
///
/// # Examples
///
/// ```
/// use gatehouse::authz::parse_path;
///
/// let (service, endpoint) = parse_path("/api/FakeService/Handle").unwrap();
/// assert_eq!(service, "FakeService");
/// assert_eq!(endpoint, "FakeService/Handle");
///
/// let (_, endpoint) = parse_path("/api/bonus/progress?userId=123").unwrap();
/// assert_eq!(endpoint, "bonus/progress");
///
/// assert!(parse_path("/health").is_none());
/// assert!(parse_path("/api/").is_none());
/// ```
pub fn parse_path(path: &str) -> Option<(&str, String)> {
    let path = path.split('?').next().unwrap_or(path);

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() < 4 || parts[1] != "api" {
        return None;
    }

    let (service, method) = (parts[2], parts[3]);
    if service.is_empty() || method.is_empty() {
        return None;
    }

    Some((service, format!("{service}/{method}")))
}

/// Extracts the `token` cookie from a raw Cookie header
///
/// An absent token yields `Ok(None)`; a header segment without a `=` yields
/// an error. Distinguishing the two matters: a missing cookie continues the
/// decision with an empty token, a malformed header is denied outright.
pub fn parse_token_cookie(raw: &str) -> Result<Option<String>, CookieParseError> {
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once('=') else {
            return Err(CookieParseError);
        };
        if name.trim() == "token" {
            return Ok(Some(value.trim().to_string()));
        }
    }
    Ok(None)
}

/// Checks a declared permission against the roles a session carries
///
/// The empty permission grants any caller holding the `CLIENT` role (an
/// ordinary signed-in user); otherwise some role must list a permission
/// with exactly the declared name.
pub fn authorize(permission: &str, roles: &[Role]) -> bool {
    for role in roles {
        if permission.is_empty() && role.name == "CLIENT" {
            return true;
        }

        if role.permissions.iter().any(|p| p.name == permission) {
            return true;
        }
    }

    false
}
