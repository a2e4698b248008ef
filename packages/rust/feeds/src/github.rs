//! GitHub organisation repository listings.
//!
//! `GET https://api.github.com/orgs/{org}/repos` returns a JSON array of
//! repositories; each one with an `html_url` becomes a [`FeedEntry`].

use govsite_shared::{GovsiteError, ItemMetadata, Result};
use serde_json::Value;

use crate::text::{decode_body, parse_timestamp};
use crate::{FeedEntry, FeedFormat};

/// Parse a GitHub organisation repositories response.
pub fn parse_github_org_repositories(body: &[u8]) -> Result<Vec<FeedEntry>> {
    let text = decode_body(body)
        .map_err(|_| GovsiteError::parse("Response body is not valid UTF-8 JSON."))?;
    let document: Value = serde_json::from_str(text)
        .map_err(|e| GovsiteError::parse(format!("Response body is not valid JSON: {e}")))?;

    let Value::Array(repositories) = document else {
        return Err(GovsiteError::parse(
            "Unsupported GitHub API response: expected a JSON list of repositories.",
        ));
    };

    let entries = repositories
        .iter()
        .filter_map(Value::as_object)
        .filter_map(repository_entry)
        .collect();
    Ok(entries)
}

fn repository_entry(repo: &serde_json::Map<String, Value>) -> Option<FeedEntry> {
    let html_url = scalar_text(repo.get("html_url"));
    if html_url.is_empty() {
        return None;
    }

    let title = non_empty_or(scalar_text(repo.get("name")), &html_url);
    let summary = scalar_text(repo.get("description"));
    let created_raw = scalar_text(repo.get("created_at"));
    let mut updated_raw = scalar_text(repo.get("updated_at"));
    if updated_raw.is_empty() {
        let pushed_raw = scalar_text(repo.get("pushed_at"));
        updated_raw = non_empty_or(pushed_raw, &created_raw);
    }

    let owner_login = repo
        .get("owner")
        .and_then(Value::as_object)
        .map(|owner| scalar_text(owner.get("login")))
        .unwrap_or_default();

    let topics: Vec<Value> = repo
        .get("topics")
        .and_then(Value::as_array)
        .map(|topics| {
            topics
                .iter()
                .map(|t| scalar_text(Some(t)))
                .filter(|t| !t.is_empty())
                .map(Value::String)
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = ItemMetadata::new();
    metadata.insert(
        "watchers".into(),
        first_present(repo, &["watchers", "watchers_count"]),
    );
    metadata.insert(
        "open_issues".into(),
        first_present(repo, &["open_issues", "open_issues_count"]),
    );
    metadata.insert(
        "language".into(),
        repo.get("language").cloned().unwrap_or(Value::Null),
    );
    metadata.insert("topics".into(), Value::Array(topics));

    let entry_id = ["node_id", "id"]
        .iter()
        .map(|key| scalar_text(repo.get(*key)))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| html_url.clone());

    let created_at = parse_timestamp(first_non_empty(&created_raw, &updated_raw));
    let updated_at = parse_timestamp(first_non_empty(&updated_raw, &created_raw));

    Some(FeedEntry {
        format: FeedFormat::GithubOrgRepositories,
        url: html_url,
        title,
        summary,
        created_at,
        updated_at,
        entry_id,
        author_names: if owner_login.is_empty() {
            vec![]
        } else {
            vec![owner_login]
        },
        published_raw: created_raw,
        updated_raw,
        metadata,
    })
}

/// Render a JSON scalar as trimmed text; null, absent and containers are empty.
fn scalar_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Value of the first key present in `repo` (even if null).
fn first_present(repo: &serde_json::Map<String, Value>, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|key| repo.get(*key))
        .cloned()
        .unwrap_or(Value::Null)
}

fn first_non_empty<'a>(first: &'a str, second: &'a str) -> &'a str {
    if first.is_empty() { second } else { first }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}
