// src/checker/http.rs
// =============================================================================
// This module talks HTTP: it fetches the target page and probes the links
// found on it.
//
// Key functionality:
// - Fetches the main page once (GET), keeping the effective URL after
//   redirects so relative links resolve correctly
// - Probes links with HEAD (lightweight, no body download)
// - Falls back to GET if HEAD is rejected or unsupported
// - Classifies each link as internal / external / inaccessible
//
// Every request carries the configured timeout, redirect cap and
// user agent (defaults: 10s, 5 redirects).
// =============================================================================

use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::html::CandidateLink;
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::model::{Link, LinkKind};

// The main page as we received it
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after following redirects
    pub effective_url: Url,
    pub status_code: u16,
    pub body: String,
}

// What a probe saw for one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// HTTP status of the final response, 0 when there was none
    pub status_code: u16,
    pub reachable: bool,
}

impl ProbeOutcome {
    // Any response below 500 means the link is reachable, including 4xx
    pub fn from_status(status: StatusCode) -> Self {
        ProbeOutcome {
            status_code: status.as_u16(),
            reachable: !status.is_server_error(),
        }
    }
}

impl From<&AuditError> for ProbeOutcome {
    fn from(error: &AuditError) -> Self {
        let status_code = match error {
            AuditError::LinkProbeFailure { status_code, .. } => *status_code,
            _ => 0,
        };
        ProbeOutcome {
            status_code,
            reachable: false,
        }
    }
}

// Shared HTTP client for the main fetch and the link probes.
// reqwest::Client is reference counted internally, so cloning is cheap.
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
}

impl WebClient {
    pub fn new(config: &AuditConfig) -> Result<Self, AuditError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| AuditError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(WebClient { client })
    }

    // Fetches the target page once
    //
    // A transport failure or an HTTP status of 400 and above is a
    // FetchFailure. The caller does not retry.
    pub async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, AuditError> {
        let fetch_failure = |reason: String| AuditError::FetchFailure {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fetch_failure(describe_error(&e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(fetch_failure(format!("HTTP {}", status.as_u16())));
        }

        let effective_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| fetch_failure(describe_error(&e)))?;

        debug!(url = %url, effective = %effective_url, status = status.as_u16(), bytes = body.len(), "fetched page");
        Ok(FetchedPage {
            effective_url,
            status_code: status.as_u16(),
            body,
        })
    }

    // Checks whether one link answers
    //
    // First, try a HEAD request (faster, no body download). If the server
    // rejects HEAD (405 / 501) or the request fails for a reason other than
    // a timeout, retry once with GET.
    //
    // Ok carries the final status, Err is a LinkProbeFailure: a transport
    // failure or a 5xx response.
    pub async fn probe(&self, url: &Url) -> Result<u16, AuditError> {
        let head = self.client.head(url.clone()).send().await;

        let response = match head {
            Ok(response) if !head_rejected(response.status()) => response,
            Err(e) if e.is_timeout() => return Err(probe_failure(url, 0, describe_error(&e))),
            _ => {
                debug!(url = %url, "HEAD not usable, falling back to GET");
                self.client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| probe_failure(url, 0, describe_error(&e)))?
            }
        };

        let status = response.status();
        if status.is_server_error() {
            return Err(probe_failure(
                url,
                status.as_u16(),
                format!("HTTP {}", status.as_u16()),
            ));
        }
        Ok(status.as_u16())
    }
}

fn head_rejected(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
    )
}

fn probe_failure(url: &Url, status_code: u16, reason: String) -> AuditError {
    AuditError::LinkProbeFailure {
        url: url.to_string(),
        status_code,
        reason,
    }
}

// Turns a reqwest error into a short human-readable reason
//
// reqwest errors can happen for many reasons:
// - Network timeout
// - DNS resolution failure
// - SSL certificate issues
// - Too many redirects
fn describe_error(error: &reqwest::Error) -> String {
    let error_string = error.to_string();

    if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_redirect() {
        "Too many redirects".to_string()
    } else if error.is_connect() {
        if error_string.contains("dns") {
            "Could not resolve hostname".to_string()
        } else {
            "Connection failed".to_string()
        }
    } else if error_string.contains("certificate") || error_string.contains("ssl") {
        "SSL certificate error".to_string()
    } else {
        error_string
    }
}

// Same scheme, host and effective port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

// Labels one probed link
//
//   unreachable (transport failure, 5xx)   -> inaccessible
//   relative href or same origin as target -> internal
//   anything else                          -> external
pub fn classify_link(target: &Url, candidate: &CandidateLink, outcome: &ProbeOutcome) -> Link {
    let kind = if !outcome.reachable {
        LinkKind::Inaccessible
    } else if candidate.relative || same_origin(target, &candidate.url) {
        LinkKind::Internal
    } else {
        LinkKind::External
    };

    Link {
        link: candidate.url.to_string(),
        kind,
        status_code: outcome.status_code,
    }
}
