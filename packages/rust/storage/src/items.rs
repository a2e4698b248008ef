//! External content items and the public listing query.

use chrono::{DateTime, Utc};
use govsite_shared::{ExternalItem, GovsiteError, ItemMetadata, Result, format_timestamp, url_key};
use libsql::{Connection, Value, params};

use crate::{Storage, parse_timestamp, placeholders_from, storage_err};

/// Number of items per listing page.
pub const LISTING_PAGE_SIZE: u64 = 15;

/// Values written when a discovered entry is upserted by URL.
#[derive(Debug, Clone, Default)]
pub struct ItemUpsert {
    pub url: String,
    pub source_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub metadata: ItemMetadata,
    /// Tags to attach if the item does not already carry them.
    pub tag_ids: Vec<i64>,
}

/// Result of [`Storage::upsert_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemUpsertOutcome {
    pub id: i64,
    pub created: bool,
}

/// Listing filters, mirroring a tag listings page.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// Tags configured on the listing; items must carry at least one. Empty means any.
    pub tag_ids: Vec<i64>,
    /// Visitor-selected tag slug; ignored unless it is one of `tag_ids`.
    pub selected_tag: Option<String>,
    /// Visitor-selected source.
    pub source_id: Option<i64>,
    /// 1-based page number; clamped into range.
    pub page: u64,
}

/// One page of listing results.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub items: Vec<ExternalItem>,
    pub page: u64,
    pub total_pages: u64,
    pub total_items: u64,
}

const ITEM_COLUMNS: &str = "i.id, i.key, i.source_id, i.url, i.title, i.summary, i.published_at, \
     i.created_at, i.updated_at, i.hidden, i.metadata_json, i.first_seen_at, i.last_seen_at";

impl Storage {
    /// Create or update an item keyed by its (trimmed) URL and attach missing tags.
    pub async fn upsert_item(&self, upsert: &ItemUpsert) -> Result<ItemUpsertOutcome> {
        self.check_writable()?;
        let url = upsert.url.trim();
        if url.is_empty() {
            return Err(GovsiteError::validation("item url cannot be blank"));
        }

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        match upsert_item_in(&tx, url, upsert).await {
            Ok(outcome) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed item upsert");
                }
                Err(e)
            }
        }
    }

    /// Get an item by URL.
    pub async fn get_item_by_url(&self, url: &str) -> Result<Option<ExternalItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM external_items i WHERE i.url = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![url.trim()])
            .await
            .map_err(storage_err)?;

        let item = match rows.next().await {
            Ok(Some(row)) => row_to_item(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        with_item_tags(&self.conn, item).await.map(Some)
    }

    /// Which of `urls` already exist as items.
    pub async fn existing_item_urls(&self, urls: &[String]) -> Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT url FROM external_items WHERE url IN ({})",
            placeholders_from(1, urls.len())
        );
        let values = urls.iter().map(|u| Value::Text(u.trim().to_string())).collect();
        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut found = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            found.push(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(found)
    }

    /// Hide or show an item in listings. Returns `false` when no such item exists.
    pub async fn set_item_hidden(&self, id: i64, hidden: bool) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE external_items SET hidden = ?1 WHERE id = ?2",
                params![i64::from(hidden), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }

    /// Page through visible items, most recently updated first.
    pub async fn list_items(&self, query: &ListingQuery) -> Result<ListingPage> {
        let mut values = Vec::new();
        let mut where_sql = self.listing_where(query, &mut values).await?;

        if let Some(source_id) = query.source_id {
            values.push(Value::Integer(source_id));
            where_sql.push_str(&format!(" AND i.source_id = ?{}", values.len()));
        }

        let total_items = {
            let sql = format!("SELECT COUNT(*) FROM external_items i WHERE {where_sql}");
            let mut rows = self
                .conn
                .query(&sql, libsql::params::Params::Positional(values.clone()))
                .await
                .map_err(storage_err)?;
            match rows.next().await {
                Ok(Some(row)) => row.get::<i64>(0).map_err(storage_err)? as u64,
                Ok(None) => 0,
                Err(e) => return Err(storage_err(e)),
            }
        };

        let total_pages = total_items.div_ceil(LISTING_PAGE_SIZE).max(1);
        let page = query.page.clamp(1, total_pages);
        let offset = (page - 1) * LISTING_PAGE_SIZE;

        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM external_items i WHERE {where_sql}
             ORDER BY COALESCE(i.updated_at, i.created_at, i.published_at, i.last_seen_at, i.first_seen_at) DESC,
                      i.id DESC
             LIMIT {LISTING_PAGE_SIZE} OFFSET {offset}"
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut found = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            found.push(row_to_item(&row)?);
        }
        let mut items = Vec::with_capacity(found.len());
        for item in found {
            items.push(with_item_tags(&self.conn, item).await?);
        }

        Ok(ListingPage {
            items,
            page,
            total_pages,
            total_items,
        })
    }

    /// Distinct sources of the listing's items as `(source_id, label)`, sorted by name then URL.
    ///
    /// The visitor's tag and source selections are ignored so the filter can
    /// offer every option.
    pub async fn listing_sources(&self, query: &ListingQuery) -> Result<Vec<(i64, String)>> {
        let base = ListingQuery {
            tag_ids: query.tag_ids.clone(),
            ..ListingQuery::default()
        };
        let mut values = Vec::new();
        let where_sql = self.listing_where(&base, &mut values).await?;
        let sql = format!(
            "SELECT DISTINCT s.id, s.name, s.url
             FROM external_items i JOIN sources s ON s.id = i.source_id
             WHERE {where_sql}
             ORDER BY s.name, s.url"
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id = row.get::<i64>(0).map_err(storage_err)?;
            let name = row.get::<String>(1).map_err(storage_err)?;
            let url = row.get::<String>(2).map_err(storage_err)?;
            let label = if name.trim().is_empty() { url } else { name };
            let label = label.trim().to_string();
            if !label.is_empty() {
                results.push((id, label));
            }
        }
        Ok(results)
    }

    /// Shared WHERE clause for hidden/tag filtering. Appends its parameters to `values`.
    async fn listing_where(&self, query: &ListingQuery, values: &mut Vec<Value>) -> Result<String> {
        let mut where_sql = String::from("i.hidden = 0");

        if !query.tag_ids.is_empty() {
            where_sql.push_str(&format!(
                " AND i.id IN (SELECT item_id FROM external_item_tags WHERE tag_id IN ({}))",
                placeholders_from(values.len() + 1, query.tag_ids.len())
            ));
            values.extend(query.tag_ids.iter().map(|id| Value::Integer(*id)));
        }

        if let Some(slug) = query.selected_tag.as_deref() {
            let slug = govsite_shared::normalize_slug(slug);
            let selected = self
                .tags_by_slugs(std::slice::from_ref(&slug))
                .await?
                .into_iter()
                .find(|tag| query.tag_ids.is_empty() || query.tag_ids.contains(&tag.id));
            if let Some(tag) = selected {
                values.push(Value::Integer(tag.id));
                where_sql.push_str(&format!(
                    " AND i.id IN (SELECT item_id FROM external_item_tags WHERE tag_id = ?{})",
                    values.len()
                ));
            }
        }
        Ok(where_sql)
    }
}

async fn upsert_item_in(conn: &Connection, url: &str, upsert: &ItemUpsert) -> Result<ItemUpsertOutcome> {
    let now = format_timestamp(&Utc::now());
    let metadata_json = serde_json::to_string(&upsert.metadata)
        .map_err(|e| GovsiteError::Storage(format!("failed to encode metadata: {e}")))?;
    let published_at = upsert.published_at.as_ref().map(format_timestamp);
    let created_at = upsert.created_at.as_ref().map(format_timestamp);
    let updated_at = upsert.updated_at.as_ref().map(format_timestamp);

    let existing_id = {
        let mut rows = conn
            .query("SELECT id FROM external_items WHERE url = ?1", params![url])
            .await
            .map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Some(row.get::<i64>(0).map_err(storage_err)?),
            Ok(None) => None,
            Err(e) => return Err(storage_err(e)),
        }
    };

    let outcome = match existing_id {
        Some(id) => {
            conn.execute(
                "UPDATE external_items SET
                   source_id = ?1, title = ?2, summary = ?3, published_at = ?4,
                   created_at = ?5, updated_at = ?6, metadata_json = ?7, last_seen_at = ?8
                 WHERE id = ?9",
                params![
                    upsert.source_id,
                    upsert.title.as_str(),
                    upsert.summary.as_str(),
                    published_at,
                    created_at,
                    updated_at,
                    metadata_json.as_str(),
                    now.as_str(),
                    id,
                ],
            )
            .await
            .map_err(storage_err)?;
            ItemUpsertOutcome { id, created: false }
        }
        None => {
            conn.execute(
                "INSERT INTO external_items
                   (key, source_id, url, title, summary, published_at, created_at, updated_at,
                    metadata_json, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    url_key(url),
                    upsert.source_id,
                    url,
                    upsert.title.as_str(),
                    upsert.summary.as_str(),
                    published_at,
                    created_at,
                    updated_at,
                    metadata_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
            ItemUpsertOutcome {
                id: conn.last_insert_rowid(),
                created: true,
            }
        }
    };

    for tag_id in &upsert.tag_ids {
        conn.execute(
            "INSERT OR IGNORE INTO external_item_tags (item_id, tag_id) VALUES (?1, ?2)",
            params![outcome.id, *tag_id],
        )
        .await
        .map_err(storage_err)?;
    }

    Ok(outcome)
}

async fn with_item_tags(conn: &Connection, mut item: ExternalItem) -> Result<ExternalItem> {
    let mut rows = conn
        .query(
            "SELECT tag_id FROM external_item_tags WHERE item_id = ?1 ORDER BY tag_id",
            params![item.id],
        )
        .await
        .map_err(storage_err)?;

    while let Ok(Some(row)) = rows.next().await {
        item.tag_ids.push(row.get::<i64>(0).map_err(storage_err)?);
    }
    Ok(item)
}

fn optional_timestamp(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    match row.get::<String>(idx).ok() {
        Some(s) => parse_timestamp(&s).map(Some),
        None => Ok(None),
    }
}

fn row_to_item(row: &libsql::Row) -> Result<ExternalItem> {
    let metadata_json = row.get::<String>(10).map_err(storage_err)?;
    let metadata: ItemMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| GovsiteError::Storage(format!("invalid item metadata: {e}")))?;

    Ok(ExternalItem {
        id: row.get::<i64>(0).map_err(storage_err)?,
        key: row.get::<String>(1).map_err(storage_err)?,
        source_id: row.get::<i64>(2).ok(),
        url: row.get::<String>(3).map_err(storage_err)?,
        title: row.get::<String>(4).map_err(storage_err)?,
        summary: row.get::<String>(5).map_err(storage_err)?,
        published_at: optional_timestamp(row, 6)?,
        created_at: optional_timestamp(row, 7)?,
        updated_at: optional_timestamp(row, 8)?,
        hidden: row.get::<i64>(9).map_err(storage_err)? != 0,
        metadata,
        first_seen_at: parse_timestamp(&row.get::<String>(11).map_err(storage_err)?)?,
        last_seen_at: parse_timestamp(&row.get::<String>(12).map_err(storage_err)?)?,
        tag_ids: Vec::new(),
    })
}
