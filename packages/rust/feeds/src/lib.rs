//! Fetching and parsing of remote content discovery sources.
//!
//! A source URL is either a syndication feed (Atom or RSS) or a GitHub
//! organisation repositories endpoint. Both are normalised into
//! [`FeedEntry`] values that the sync pipeline upserts as external items.

mod github;
mod parser;
mod text;

use std::time::Duration;

use govsite_shared::{ContentSource, GovsiteError, ItemMetadata, Result, SyncConfig};
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, info, instrument};

pub use github::parse_github_org_repositories;
pub use parser::{parse_atom_feed, parse_feed, parse_rss_feed};
pub use text::parse_timestamp;

/// URL prefix identifying GitHub organisation repository listings.
const GITHUB_ORG_API_PREFIX: &str = "https://api.github.com/orgs/";

/// Accept header for syndication feeds.
const FEED_ACCEPT: &str = "application/atom+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.1";

/// Accept header for the GitHub REST API.
const GITHUB_ACCEPT: &str = "application/vnd.github+json, application/json;q=0.9, */*;q=0.1";

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we accept (20 MB).
const MAX_RESPONSE_SIZE: u64 = 20 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which document format an entry was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Atom,
    Rss,
    GithubOrgRepositories,
}

impl FeedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atom => "atom",
            Self::Rss => "rss",
            Self::GithubOrgRepositories => "github_org_repositories",
        }
    }
}

/// A single discovered entry, independent of the source format.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub format: FeedFormat,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Source-provided identifier, falling back to the URL.
    pub entry_id: String,
    pub author_names: Vec<String>,
    /// Raw published/created timestamp text as found in the source.
    pub published_raw: String,
    /// Raw updated timestamp text as found in the source.
    pub updated_raw: String,
    /// Format-specific extras (GitHub watchers, topics, ...).
    pub metadata: ItemMetadata,
}

/// How a source URL is fetched and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Atom or RSS XML document.
    Feed,
    /// GitHub organisation repositories JSON listing.
    GithubOrg,
}

impl SourceKind {
    /// Classify a source URL.
    pub fn detect(url: &str) -> Self {
        if url.trim().to_lowercase().starts_with(GITHUB_ORG_API_PREFIX) {
            Self::GithubOrg
        } else {
            Self::Feed
        }
    }

    fn accept_header(&self) -> &'static str {
        match self {
            Self::Feed => FEED_ACCEPT,
            Self::GithubOrg => GITHUB_ACCEPT,
        }
    }

    /// Parse a fetched body according to this kind.
    pub fn parse(&self, body: &[u8]) -> Result<Vec<FeedEntry>> {
        match self {
            Self::Feed => parse_feed(body),
            Self::GithubOrg => parse_github_org_repositories(body),
        }
    }
}

/// Per-request fetch settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub user_agent: String,
    /// Skip certificate verification for this request.
    pub disable_tls_verification: bool,
    pub accept: String,
}

impl FetchOptions {
    /// Options for fetching `source` with the given runtime config.
    pub fn for_source(source: &ContentSource, kind: SourceKind, config: &SyncConfig) -> Self {
        Self {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            disable_tls_verification: source.disable_tls_verification,
            accept: kind.accept_header().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry points
// ---------------------------------------------------------------------------

/// Fetch a source and parse it into entries.
#[instrument(skip_all, fields(source_id = source.id, url = %source.url))]
pub async fn fetch_source_entries(
    source: &ContentSource,
    config: &SyncConfig,
) -> Result<Vec<FeedEntry>> {
    let kind = SourceKind::detect(&source.url);
    let opts = FetchOptions::for_source(source, kind, config);
    let body = fetch_source_content(&source.url, &opts).await?;
    let entries = kind.parse(&body)?;
    info!(?kind, entries = entries.len(), "source fetched and parsed");
    Ok(entries)
}

/// Fetch the raw body of a remote source.
///
/// Non-success statuses, transport failures and empty bodies are errors.
pub async fn fetch_source_content(url: &str, opts: &FetchOptions) -> Result<Vec<u8>> {
    let client = build_client(opts)?;
    debug!(url, accept = %opts.accept, tls_verification = !opts.disable_tls_verification, "fetching source");

    let response = client
        .get(url)
        .header(ACCEPT, opts.accept.as_str())
        .send()
        .await
        .map_err(|e| GovsiteError::Network(format!("Could not fetch '{url}': {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(GovsiteError::Network(format!(
            "Could not fetch '{url}': HTTP {status}"
        )));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(GovsiteError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| GovsiteError::Network(format!("Could not fetch '{url}': {e}")))?;

    if body.is_empty() {
        return Err(GovsiteError::Network(format!(
            "Remote source '{url}' returned an empty response."
        )));
    }
    Ok(body.to_vec())
}

/// Build a reqwest client for one fetch.
fn build_client(opts: &FetchOptions) -> Result<Client> {
    Client::builder()
        .user_agent(opts.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(opts.timeout)
        .danger_accept_invalid_certs(opts.disable_tls_verification)
        .build()
        .map_err(|e| GovsiteError::Network(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(kind: SourceKind) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(5),
            user_agent: "govsite-test".into(),
            disable_tls_verification: false,
            accept: kind.accept_header().into(),
        }
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("../../../fixtures/feeds/{name}"))
            .unwrap_or_else(|_| panic!("missing fixture: {name}"))
    }

    #[test]
    fn detects_github_org_sources() {
        assert_eq!(
            SourceKind::detect("https://API.github.com/orgs/alphagov/repos"),
            SourceKind::GithubOrg
        );
        assert_eq!(
            SourceKind::detect("https://api.github.com/users/someone/repos"),
            SourceKind::Feed
        );
        assert_eq!(SourceKind::detect("https://example.com/feed.xml"), SourceKind::Feed);
    }

    #[tokio::test]
    async fn fetch_sends_feed_accept_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .and(header("accept", FEED_ACCEPT))
            .and(header("user-agent", "govsite-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("atom.xml")))
            .mount(&server)
            .await;

        let url = format!("{}/feed.xml", server.uri());
        let body = fetch_source_content(&url, &options(SourceKind::Feed))
            .await
            .unwrap();
        let entries = SourceKind::Feed.parse(&body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].format, FeedFormat::Atom);
    }

    #[tokio::test]
    async fn fetch_github_listing_uses_json_accept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/example/repos"))
            .and(header("accept", GITHUB_ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("github-org.json")))
            .mount(&server)
            .await;

        let url = format!("{}/orgs/example/repos", server.uri());
        let body = fetch_source_content(&url, &options(SourceKind::GithubOrg))
            .await
            .unwrap();
        let entries = SourceKind::GithubOrg.parse(&body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].format, FeedFormat::GithubOrgRepositories);
    }

    #[tokio::test]
    async fn http_error_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = format!("{}/feed.xml", server.uri());
        let err = fetch_source_content(&url, &options(SourceKind::Feed))
            .await
            .unwrap_err();
        assert!(matches!(err, GovsiteError::Network(_)));
        assert!(err.to_string().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = format!("{}/feed.xml", server.uri());
        let err = fetch_source_content(&url, &options(SourceKind::Feed))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("returned an empty response"));
    }

    #[tokio::test]
    async fn fetch_source_entries_parses_rss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixture("rss.xml")))
            .mount(&server)
            .await;

        let source = ContentSource {
            id: 7,
            site_id: 1,
            sort_order: 0,
            name: String::new(),
            url: format!("{}/rss.xml", server.uri()),
            disable_tls_verification: true,
            default_tag_ids: vec![],
        };
        let entries = fetch_source_entries(&source, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.format == FeedFormat::Rss));
    }
}
