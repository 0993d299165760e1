use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use crate::version;

pub const GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_REPOSITORY: &str = "needyamin/img-background-remover";

/// Upper bound for the release metadata request.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Where the "latest release" metadata is fetched from.
#[derive(Debug, Clone)]
pub struct ReleaseSource {
    pub api_base: String,
    pub repository: String,
    timeout: Duration,
}

impl Default for ReleaseSource {
    fn default() -> Self {
        Self::new(DEFAULT_REPOSITORY)
    }
}

impl ReleaseSource {
    #[must_use]
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            api_base: GITHUB_API.to_string(),
            repository: repository.into(),
            timeout: METADATA_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set the request timeout. Values above [`METADATA_TIMEOUT`] are clamped.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(METADATA_TIMEOUT);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            self.repository
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
}

impl ReleaseAsset {
    /// Lowercase hex SHA-256 published for this asset, if any.
    #[must_use]
    pub fn sha256(&self) -> Option<String> {
        parse_sha256_digest(self.digest.as_deref()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    /// The tag with its non-numeric prefix removed, or `None` when nothing
    /// usable remains.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.tag_name
            .as_deref()
            .map(version::normalize)
            .filter(|version| !version.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AppUpdate {
    pub current_version: String,
    pub latest_version: String,
    pub release_url: Option<String>,
    pub release_notes: Option<String>,
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone)]
pub enum UpdateCheck {
    Available(AppUpdate),
    UpToDate { current: String, latest: String },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("failed to check for app update: {0}")]
    Request(#[source] reqwest::Error),
    #[error("app update check failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse app update response: {0}")]
    Parse(#[source] reqwest::Error),
    #[error("latest release has no usable version tag")]
    MissingVersion,
}

impl UpdateError {
    /// Transport-level failures (DNS, refused connection, timeout) as opposed
    /// to a reachable server that had nothing to offer.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

/// Fetch the latest release metadata.
///
/// # Errors
/// Returns an error when the request fails, the server answers with a
/// non-success status, or the body is not release JSON.
pub async fn fetch_latest_release(
    client: &reqwest::Client,
    source: &ReleaseSource,
    current_version: &str,
) -> Result<ReleaseInfo, UpdateError> {
    let url = source.latest_release_url();
    debug!("Fetching latest release from {url}");

    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT, ACCEPT_GITHUB_JSON)
        .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
        .header(
            reqwest::header::USER_AGENT,
            format!("bgremover/{}", version::normalize(current_version)),
        )
        .timeout(source.timeout())
        .send()
        .await
        .map_err(UpdateError::Request)?;

    if !response.status().is_success() {
        let status = response.status();
        let body_snippet = response
            .text()
            .await
            .ok()
            .map(|body| response_snippet(&body, 160))
            .unwrap_or_default();
        return Err(UpdateError::HttpStatus {
            status,
            body_snippet,
        });
    }

    response.json().await.map_err(|error| {
        if error.is_decode() {
            UpdateError::Parse(error)
        } else {
            UpdateError::Request(error)
        }
    })
}

/// Check the release feed for a version newer than `current_version`.
///
/// # Errors
/// Returns an error when the release cannot be fetched or carries no usable
/// version tag.
pub async fn check_for_update(
    client: &reqwest::Client,
    source: &ReleaseSource,
    current_version: &str,
) -> Result<UpdateCheck, UpdateError> {
    let release = fetch_latest_release(client, source, current_version).await?;
    let latest = release.version().ok_or(UpdateError::MissingVersion)?;
    let current = version::normalize(current_version);

    if version::is_newer(latest, current) {
        info!("Update available: {current} -> {latest}");
        let latest = latest.to_string();
        Ok(UpdateCheck::Available(AppUpdate {
            current_version: current.to_string(),
            latest_version: latest,
            release_url: release.html_url,
            release_notes: release.body,
            assets: release.assets,
        }))
    } else {
        debug!("No newer release: current {current}, latest {latest}");
        Ok(UpdateCheck::UpToDate {
            current: current.to_string(),
            latest: latest.to_string(),
        })
    }
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}
