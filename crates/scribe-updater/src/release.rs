use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Default releases endpoint; overridable through [`crate::UpdateConfig`].
pub const DEFAULT_UPDATE_URL: &str =
    "https://api.github.com/repos/scribe-app/scribe/releases/latest";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "scribe";

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub body: Option<String>,
    pub published_at: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Platform-matched release metadata, built fresh on every check.
///
/// `version` is the raw tag with the `v` marker stripped; parsing it is the
/// version model's job so a malformed remote tag surfaces as a version
/// error, not a fetch error.
#[derive(Debug, Clone)]
pub struct ReleaseDescriptor {
    pub version: String,
    pub download_url: String,
    pub changelog: String,
    pub published_at: Option<DateTime<Utc>>,
    pub required: bool,
    pub platform_asset_name: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("update check request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("update check failed with HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse release response: {0}")]
    Parse(#[source] reqwest::Error),
    #[error("no release asset available for the {platform} platform")]
    PlatformUnsupported { platform: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    /// Literal asset-name match policy. First asset in list order that
    /// matches wins; release pipelines have shipped both the arch-tagged
    /// and the short names over time.
    fn asset_matches(self, name: &str) -> bool {
        match self {
            Self::Windows => name == "scribe-windows-amd64.exe" || name == "scribe-windows.exe",
            Self::MacOs => name == "scribe-macos-amd64.pkg" || name == "scribe-macos.app",
            Self::Linux => name == "scribe" || name == "scribe-linux",
        }
    }
}

/// Fetch the latest release record and resolve the asset for the running
/// platform.
///
/// # Errors
/// Returns an error on network failure, a non-success status, an
/// unparsable response body, or when no asset matches the platform.
pub async fn fetch_latest(
    client: &reqwest::Client,
    endpoint_url: &str,
) -> Result<ReleaseDescriptor, FetchError> {
    debug!("checking for updates at {endpoint_url}");

    let response = client
        .get(endpoint_url)
        .header("User-Agent", USER_AGENT)
        .timeout(FETCH_TIMEOUT)
        .send()
        .await
        .map_err(FetchError::Request)?;

    if !response.status().is_success() {
        let status = response.status();
        let body_snippet = response
            .text()
            .await
            .ok()
            .map(|body| response_snippet(&body, 160))
            .unwrap_or_default();
        return Err(FetchError::HttpStatus {
            status,
            body_snippet,
        });
    }

    let release: GitHubRelease = response.json().await.map_err(FetchError::Parse)?;
    resolve_release(&release, Platform::current())
}

/// Turn a raw release record into a descriptor for one platform.
///
/// # Errors
/// Returns [`FetchError::PlatformUnsupported`] when no asset name matches.
pub fn resolve_release(
    release: &GitHubRelease,
    platform: Platform,
) -> Result<ReleaseDescriptor, FetchError> {
    let asset = release
        .assets
        .iter()
        .find(|asset| platform.asset_matches(&asset.name))
        .ok_or(FetchError::PlatformUnsupported {
            platform: platform.name(),
        })?;

    let version = release
        .tag_name
        .strip_prefix('v')
        .unwrap_or(&release.tag_name)
        .to_string();

    // A malformed timestamp is not worth failing a check over.
    let published_at = release
        .published_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc));

    Ok(ReleaseDescriptor {
        version,
        download_url: asset.browser_download_url.clone(),
        changelog: release.body.clone().unwrap_or_default(),
        published_at,
        // No upstream field drives forced updates yet.
        required: false,
        platform_asset_name: asset.name.clone(),
    })
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}
