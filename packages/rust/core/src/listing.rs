//! Tag listing: external items for a set of tags, with visitor filters.

use govsite_shared::{GovsiteError, Result, Tag, normalize_slug};
use govsite_storage::{ListingPage, ListingQuery, Storage};
use tracing::debug;

/// A listing request as it arrives from the outside world.
#[derive(Debug, Clone, Default)]
pub struct ListingRequest {
    /// Tags configured on the listing. Empty lists every visible item.
    pub tag_slugs: Vec<String>,
    /// Visitor's tag filter; ignored unless it is one of the configured tags.
    pub selected_tag: Option<String>,
    /// Visitor's source filter; ignored unless a listed item comes from it.
    pub selected_source: Option<i64>,
    /// Raw page parameter; anything unparseable means page 1.
    pub page: Option<String>,
}

/// A resolved listing page plus the filter options to offer.
#[derive(Debug, Clone)]
pub struct Listing {
    pub page: ListingPage,
    pub available_tags: Vec<Tag>,
    pub available_sources: Vec<(i64, String)>,
    pub selected_tag: Option<Tag>,
    pub selected_source: Option<(i64, String)>,
}

/// Resolve a listing request against storage.
///
/// Unknown configured tag slugs are an error; visitor selections that do
/// not apply are silently dropped.
pub async fn build_listing(storage: &Storage, request: &ListingRequest) -> Result<Listing> {
    let slugs: Vec<String> = request
        .tag_slugs
        .iter()
        .map(|s| normalize_slug(s))
        .filter(|s| !s.is_empty())
        .collect();
    let available_tags = storage.tags_by_slugs(&slugs).await?;
    let unknown: Vec<&str> = slugs
        .iter()
        .filter(|slug| !available_tags.iter().any(|t| &t.slug == *slug))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(GovsiteError::validation(format!(
            "unknown tag(s): {}",
            unknown.join(", ")
        )));
    }

    let selected_tag = request
        .selected_tag
        .as_deref()
        .map(normalize_slug)
        .and_then(|slug| available_tags.iter().find(|t| t.slug == slug).cloned());

    let mut query = ListingQuery {
        tag_ids: available_tags.iter().map(|t| t.id).collect(),
        selected_tag: selected_tag.as_ref().map(|t| t.slug.clone()),
        source_id: None,
        page: parse_page(request.page.as_deref()),
    };

    let available_sources = storage.listing_sources(&query).await?;
    let selected_source = request
        .selected_source
        .and_then(|id| available_sources.iter().find(|(sid, _)| *sid == id).cloned());
    query.source_id = selected_source.as_ref().map(|(id, _)| *id);

    let page = storage.list_items(&query).await?;
    debug!(
        page = page.page,
        total_pages = page.total_pages,
        total_items = page.total_items,
        "listing built"
    );

    Ok(Listing {
        page,
        available_tags,
        available_sources,
        selected_tag,
        selected_source,
    })
}

fn parse_page(raw: Option<&str>) -> u64 {
    raw.and_then(|p| p.trim().parse::<u64>().ok())
        .filter(|p| *p > 0)
        .unwrap_or(1)
}
