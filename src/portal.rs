//! Authenticated client for the gazette portal.
//!
//! Lists downloadable artifacts for a date by pattern-matching the catalog
//! page body, and downloads artifact bytes. The portal's markup is not a
//! stable contract: a page with no recognizable filenames yields an empty
//! listing, never an error. All network operations run under a bounded
//! retry with growing timeouts; session expiry is detected from response
//! content and surfaced so the caller can re-authenticate once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::Artifact;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Attempts per operation, including the first.
const MAX_ATTEMPTS: u32 = 3;
/// Timeout multiplier per retry; sleep between attempts is
/// `timeout × (factor − 1)` with the pre-retry timeout.
const BACKOFF_FACTOR: u32 = 2;

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Marker present in the page body only when a session is logged in
/// (the portal's logout affordance).
const LOGGED_IN_MARKER: &str = "sair";
/// Markers of the login prompt the portal serves once a session expires.
const LOGIN_PAGE_MARKERS: &[&str] = &["logar.php", "type=\"password\""];

/// Network-layer error taxonomy for portal operations.
#[derive(Debug)]
pub enum PortalError {
    /// Bad credentials or the portal rejected the login. Fatal to a run.
    Auth(String),
    /// Timeout or connection failure. Retried, then contained per artifact.
    Transient(String),
    /// The response content indicates the session is no longer logged in.
    SessionExpired,
    /// HTTP success but the content is not the expected artifact.
    UnexpectedContent(String),
}

impl std::fmt::Display for PortalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortalError::Auth(e) => write!(f, "authentication failed: {}", e),
            PortalError::Transient(e) => write!(f, "network failure: {}", e),
            PortalError::SessionExpired => write!(f, "portal session expired"),
            PortalError::UnexpectedContent(e) => write!(f, "unexpected content: {}", e),
        }
    }
}

impl std::error::Error for PortalError {}

/// Catalog of remote artifacts. The pipeline is written against this trait
/// so tests can drive it with canned listings and bytes.
#[async_trait]
pub trait Catalog {
    async fn list_artifacts(
        &self,
        date: NaiveDate,
        section: &str,
    ) -> Result<Vec<Artifact>, PortalError>;

    async fn download_artifact(
        &self,
        date: NaiveDate,
        artifact: &Artifact,
    ) -> Result<Vec<u8>, PortalError>;

    /// Establish a fresh session (re-login) after expiry.
    async fn refresh_session(&mut self) -> Result<(), PortalError>;
}

/// Authenticated portal session. The cookie jar carries the session; dropping
/// the client drops the session.
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
}

impl PortalClient {
    /// Log in and return an authenticated client.
    ///
    /// Success is detected by the presence of the logout affordance in the
    /// response body; anything else is an authentication failure.
    pub async fn login(
        base_url: &str,
        email: &str,
        password: &str,
    ) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| PortalError::Transient(e.to_string()))?;

        let client = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        client.authenticate().await?;
        Ok(client)
    }

    async fn authenticate(&self) -> Result<(), PortalError> {
        let url = format!("{}/logar.php", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[("email", self.email.as_str()), ("password", self.password.as_str())])
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PortalError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PortalError::Transient(e.to_string()))?;

        if !status.is_success() || !is_logged_in(&body) {
            return Err(PortalError::Auth(format!(
                "portal did not report a logged-in session (HTTP {})",
                status
            )));
        }
        debug!(url = %url, "portal login ok");
        Ok(())
    }

    /// Lightweight session-liveness check: fetch the portal index and look
    /// for the login prompt.
    pub async fn probe(&self) -> Result<(), PortalError> {
        let response = self
            .http
            .get(&self.base_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| PortalError::Transient(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| PortalError::Transient(e.to_string()))?;
        if is_login_page(&body) {
            return Err(PortalError::SessionExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl Catalog for PortalClient {
    async fn list_artifacts(
        &self,
        date: NaiveDate,
        section: &str,
    ) -> Result<Vec<Artifact>, PortalError> {
        let url = format!("{}/index.php?p={}", self.base_url, date);
        let pattern = artifact_pattern(section)?;

        with_retry(LIST_TIMEOUT, |timeout| {
            let url = url.clone();
            let pattern = pattern.clone();
            async move {
                let response = self
                    .http
                    .get(&url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(classify_send_error)?;
                let body = response
                    .text()
                    .await
                    .map_err(|e| PortalError::Transient(e.to_string()))?;
                if is_login_page(&body) {
                    return Err(PortalError::SessionExpired);
                }
                Ok(extract_artifact_names(&body, &pattern)
                    .into_iter()
                    .map(Artifact::new)
                    .collect())
            }
        })
        .await
    }

    async fn download_artifact(
        &self,
        date: NaiveDate,
        artifact: &Artifact,
    ) -> Result<Vec<u8>, PortalError> {
        let url = format!("{}/index.php?p={}&dl={}", self.base_url, date, artifact.id);

        with_retry(DOWNLOAD_TIMEOUT, |timeout| {
            let url = url.clone();
            async move {
                let response = self
                    .http
                    .get(&url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(classify_send_error)?;

                let status = response.status();
                if status.is_server_error() {
                    return Err(PortalError::Transient(format!("HTTP {}", status)));
                }
                if !status.is_success() {
                    return Err(PortalError::UnexpectedContent(format!("HTTP {}", status)));
                }

                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                if content_type.contains("text/html") {
                    // The portal serves an HTML page instead of the file when
                    // the session is gone or the file is unavailable.
                    let body = response
                        .text()
                        .await
                        .map_err(|e| PortalError::Transient(e.to_string()))?;
                    if is_login_page(&body) {
                        return Err(PortalError::SessionExpired);
                    }
                    return Err(PortalError::UnexpectedContent(
                        "portal returned an HTML page instead of the file".to_string(),
                    ));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| PortalError::Transient(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        })
        .await
    }

    async fn refresh_session(&mut self) -> Result<(), PortalError> {
        // A fresh cookie jar, then a fresh login.
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| PortalError::Transient(e.to_string()))?;
        self.http = http;
        self.authenticate().await
    }
}

/// Run `attempt` up to [`MAX_ATTEMPTS`] times. Only transient failures are
/// retried; each retry sleeps `timeout × (factor − 1)` and then doubles the
/// timeout handed to the next attempt.
pub(crate) async fn with_retry<T, F, Fut>(
    base_timeout: Duration,
    mut attempt: F,
) -> Result<T, PortalError>
where
    F: FnMut(Duration) -> Fut,
    Fut: std::future::Future<Output = Result<T, PortalError>>,
{
    let mut timeout = base_timeout;
    let mut last_err = None;

    for n in 1..=MAX_ATTEMPTS {
        if n > 1 {
            tokio::time::sleep(timeout * (BACKOFF_FACTOR - 1)).await;
            timeout *= BACKOFF_FACTOR;
        }
        match attempt(timeout).await {
            Ok(value) => return Ok(value),
            Err(PortalError::Transient(e)) => {
                warn!(attempt = n, error = %e, "transient portal failure");
                last_err = Some(PortalError::Transient(e));
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_err.unwrap_or_else(|| PortalError::Transient("retries exhausted".to_string())))
}

fn classify_send_error(e: reqwest::Error) -> PortalError {
    // Timeouts, connect failures, and other transport errors all retry.
    PortalError::Transient(e.to_string())
}

/// Filename pattern for one section: date-stamped names, with the `E`
/// variant covering extra editions.
fn artifact_pattern(section: &str) -> Result<Regex, PortalError> {
    let pattern = format!(
        r"\d{{4}}-\d{{2}}-\d{{2}}-{}E?\.(?:zip|pdf|xml)",
        regex::escape(section)
    );
    Regex::new(&pattern)
        .map_err(|e| PortalError::UnexpectedContent(format!("bad section pattern: {}", e)))
}

/// Pull artifact filenames out of a catalog page body, deduplicated in
/// first-seen order.
fn extract_artifact_names(body: &str, pattern: &Regex) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut names = Vec::new();
    for m in pattern.find_iter(body) {
        let name = m.as_str().to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

fn is_logged_in(body: &str) -> bool {
    body.to_lowercase().contains(LOGGED_IN_MARKER)
}

fn is_login_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    LOGIN_PAGE_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn listing_extracts_section_names_and_dedupes() {
        let body = r#"
            <a href="?dl=2025-06-10-DO1.zip">2025-06-10-DO1.zip</a>
            <a href="?dl=2025-06-10-DO1.zip">2025-06-10-DO1.zip</a>
            <a href="?dl=2025-06-10-DO1E.zip">2025-06-10-DO1E.zip</a>
            <a href="?dl=2025-06-10-DO2.zip">2025-06-10-DO2.zip</a>
            <a href="?dl=2025-06-10-DO1.pdf">2025-06-10-DO1.pdf</a>
        "#;
        let pattern = artifact_pattern("DO1").unwrap();
        let names = extract_artifact_names(body, &pattern);
        assert_eq!(
            names,
            vec![
                "2025-06-10-DO1.zip",
                "2025-06-10-DO1E.zip",
                "2025-06-10-DO1.pdf",
            ]
        );
    }

    #[test]
    fn listing_with_no_matches_is_empty_not_error() {
        let pattern = artifact_pattern("DO1").unwrap();
        assert!(extract_artifact_names("<html>maintenance page</html>", &pattern).is_empty());
    }

    #[test]
    fn login_markers() {
        assert!(is_logged_in(r#"<a href="sair.php">Sair</a>"#));
        assert!(!is_logged_in("<html>catalog</html>"));
        assert!(is_login_page(r#"<form action="logar.php">"#));
        assert!(is_login_page(r#"<input type="password">"#));
        assert!(!is_login_page("<html>catalog</html>"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_two_transient_failures() {
        let attempts = AtomicU32::new(0);
        let timeouts: Mutex<Vec<u64>> = Mutex::new(Vec::new());

        let result = with_retry(Duration::from_secs(60), |timeout| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            timeouts.lock().unwrap().push(timeout.as_secs());
            async move {
                if n < 3 {
                    Err(PortalError::Transient("connection reset".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*timeouts.lock().unwrap(), vec![60, 120, 240]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_three_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(Duration::from_secs(30), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PortalError::Transient("timed out".to_string())) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(PortalError::Transient(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_retry_content_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(Duration::from_secs(30), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(PortalError::UnexpectedContent(
                    "html instead of zip".to_string(),
                ))
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PortalError::UnexpectedContent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_retry_session_expiry() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(Duration::from_secs(30), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PortalError::SessionExpired) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PortalError::SessionExpired)));
    }
}
