//! Human-verification challenge client
//!
//! Validates reCAPTCHA tokens against the remote verification endpoint.
//! Two variants exist: the interactive (v2) pass/fail challenge, redeemed
//! by clients that tripped a rate limit, and the scored (v3) background
//! challenge gated by a minimum score.
//!
//! Every failure mode - transport error, non-200 status, unparseable body,
//! missing score - verifies as `false`; the decision layer turns that into
//! the appropriate denial. With no endpoint configured the verifier runs in
//! disabled mode and approves everything, which is the designed fallback
//! for environments without the remote service.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::Error;

/// Score below which a scored challenge is rejected
const MIN_SCORE: f64 = 0.5;

/// Timeout applied to every verification request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which challenge variant a token belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Interactive (v2) pass/fail challenge
    Interactive,
    /// Scored (v3) challenge, additionally gated by [`MIN_SCORE`]
    Scored,
}

/// Verifier configuration, usually taken from the environment
#[derive(Clone, Debug, Default)]
pub struct RecaptchaConfig {
    /// Verification endpoint; empty switches the verifier off
    pub url: String,
    /// Secret for the interactive (v2) variant
    pub secret_v2: String,
    /// Secret for the scored (v3) variant
    pub secret_v3: String,
}

impl RecaptchaConfig {
    /// Reads `RECAPTCHA_URL`, `RECAPTCHA_SECRET_V2` and `RECAPTCHA_SECRET_V3`
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("RECAPTCHA_URL").unwrap_or_default(),
            secret_v2: std::env::var("RECAPTCHA_SECRET_V2").unwrap_or_default(),
            secret_v3: std::env::var("RECAPTCHA_SECRET_V3").unwrap_or_default(),
        }
    }
}

/// Response document of the verification endpoint
#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    action: String,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Stateless adapter over the remote verification endpoint
pub struct ChallengeVerifier {
    http: reqwest::Client,
    config: RecaptchaConfig,
}

impl ChallengeVerifier {
    /// Creates a verifier; an empty URL in `config` yields disabled mode
    pub fn new(config: RecaptchaConfig) -> crate::Result<Self> {
        if config.url.is_empty() {
            warn!("recaptcha is switched off");
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::transport("recaptcha", e.to_string()))?;
        Ok(Self { http, config })
    }

    /// True when no verification endpoint is configured
    pub fn is_disabled(&self) -> bool {
        self.config.url.is_empty()
    }

    /// Verifies a challenge token
    ///
    /// Interactive tokens pass on `success` alone; scored tokens must also
    /// carry a score of at least [`MIN_SCORE`]. In disabled mode every token
    /// verifies.
    pub async fn verify(&self, token: &str, kind: ChallengeKind) -> bool {
        if self.is_disabled() {
            return true;
        }

        let secret = match kind {
            ChallengeKind::Interactive => self.config.secret_v2.as_str(),
            ChallengeKind::Scored => self.config.secret_v3.as_str(),
        };
        let params = [("secret", secret), ("response", token)];

        let response = match self.http.post(&self.config.url).form(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %self.config.url, error = %e, "challenge request failed");
                return false;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            error!(url = %self.config.url, status = %response.status(), "challenge endpoint returned non-OK");
            return false;
        }

        let body: ChallengeResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "challenge response decode failed");
                return false;
            }
        };

        if !body.success {
            warn!(?kind, codes = ?body.error_codes, action = %body.action, "challenge rejected");
            return false;
        }
        debug!(?kind, score = ?body.score, action = %body.action, "challenge response");

        if kind == ChallengeKind::Scored {
            let Some(score) = body.score else {
                warn!("scored challenge response carries no score");
                return false;
            };
            if score < MIN_SCORE {
                debug!(score, "challenge score below threshold");
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled() -> ChallengeVerifier {
        ChallengeVerifier::new(RecaptchaConfig::default()).unwrap()
    }

    #[test]
    fn empty_url_means_disabled() {
        assert!(disabled().is_disabled());
        let configured = ChallengeVerifier::new(RecaptchaConfig {
            url: "https://verify.example/siteverify".to_string(),
            ..RecaptchaConfig::default()
        })
        .unwrap();
        assert!(!configured.is_disabled());
    }

    #[tokio::test]
    async fn disabled_mode_approves_everything() {
        let verifier = disabled();
        assert!(verifier.verify("anything", ChallengeKind::Interactive).await);
        assert!(verifier.verify("", ChallengeKind::Scored).await);
    }

    #[test]
    fn response_document_parses_with_missing_fields() {
        let body: ChallengeResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(body.success);
        assert!(body.score.is_none());
        assert!(body.error_codes.is_empty());

        let body: ChallengeResponse = serde_json::from_str(
            r#"{"success": false, "error-codes": ["timeout-or-duplicate"], "action": "login"}"#,
        )
        .unwrap();
        assert!(!body.success);
        assert_eq!(body.error_codes, vec!["timeout-or-duplicate"]);
        assert_eq!(body.action, "login");
    }

    #[test]
    fn scored_response_carries_a_numeric_score() {
        let body: ChallengeResponse =
            serde_json::from_str(r#"{"success": true, "score": 0.9, "action": "submit"}"#).unwrap();
        assert_eq!(body.score, Some(0.9));
    }
}
