//! Core domain types for govsite content discovery.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Free-form, source-specific metadata stored alongside an external item.
pub type ItemMetadata = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A site owning content discovery sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub hostname: String,
    pub port: u16,
    pub is_default: bool,
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// Controlled-vocabulary tag: the slug is the key, the name is the display value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

/// Normalise a tag slug the way it is stored: trimmed and lower-cased.
pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// ContentSource
// ---------------------------------------------------------------------------

/// A remote feed or API endpoint that external content is discovered from.
///
/// Unique per `(site_id, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSource {
    pub id: i64,
    pub site_id: i64,
    pub sort_order: i64,
    /// Optional display name; empty when unset.
    pub name: String,
    /// Opaque URL, not normalised.
    pub url: String,
    pub disable_tls_verification: bool,
    /// Ordered, de-duplicated tag ids applied to discovered items.
    pub default_tag_ids: Vec<i64>,
}

impl ContentSource {
    /// Display label: the name when set, otherwise the URL.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalItem
// ---------------------------------------------------------------------------

/// A content entry discovered from a source, keyed by its URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalItem {
    pub id: i64,
    /// Hex SHA-256 of the trimmed URL.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    pub url: String,
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub hidden: bool,
    #[serde(default)]
    pub metadata: ItemMetadata,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
}

impl ExternalItem {
    /// Display label: the title when set, otherwise the URL.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Stable item key for a URL.
pub fn url_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Format a timestamp the way it is persisted (RFC 3339, UTC, microseconds).
///
/// Fixed precision keeps stored values lexically sortable.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
