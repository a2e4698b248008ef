//! Content discovery source persistence.
//!
//! Sources are unique per `(site_id, url)`; [`Storage::upsert_source`] is
//! the only write path and runs each upsert in its own transaction.

use chrono::Utc;
use govsite_shared::{ContentSource, GovsiteError, Result, format_timestamp};
use libsql::{Connection, params};

use crate::{Storage, placeholders_from, storage_err};

/// Values for creating or updating a source.
///
/// `None` fields are left untouched on update and defaulted on create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceUpsert {
    pub site_id: i64,
    pub url: String,
    pub name: Option<String>,
    pub disable_tls_verification: Option<bool>,
    pub default_tag_ids: Option<Vec<i64>>,
}

impl SourceUpsert {
    pub fn new(site_id: i64, url: impl Into<String>) -> Self {
        Self {
            site_id,
            url: url.into(),
            ..Default::default()
        }
    }
}

/// What an upsert did to the `(site_id, url)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUpsertOutcome {
    Created(i64),
    Updated(i64),
    Unchanged(i64),
}

impl SourceUpsertOutcome {
    /// The affected source ID.
    pub fn id(&self) -> i64 {
        match *self {
            Self::Created(id) | Self::Updated(id) | Self::Unchanged(id) => id,
        }
    }
}

/// Filter for selecting sources to sync or list.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    /// Limit to these source IDs (empty means all).
    pub source_ids: Vec<i64>,
    /// Limit to one site.
    pub site_id: Option<i64>,
}

const SOURCE_COLUMNS: &str =
    "id, site_id, sort_order, name, url, disable_tls_verification";

impl Storage {
    /// Create or update the source identified by `(site_id, url)`.
    pub async fn upsert_source(&self, upsert: &SourceUpsert) -> Result<SourceUpsertOutcome> {
        self.check_writable()?;
        if upsert.url.is_empty() {
            return Err(GovsiteError::validation("source url cannot be blank"));
        }

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        match upsert_source_in(&tx, upsert).await {
            Ok(outcome) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed upsert");
                }
                Err(e)
            }
        }
    }

    /// Find a source by its natural key.
    pub async fn find_source(&self, site_id: i64, url: &str) -> Result<Option<ContentSource>> {
        find_source_in(&self.conn, site_id, url).await
    }

    /// Get a source by ID.
    pub async fn get_source(&self, id: i64) -> Result<Option<ContentSource>> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1");
        let mut rows = self
            .conn
            .query(&sql, params![id])
            .await
            .map_err(storage_err)?;

        let source = match rows.next().await {
            Ok(Some(row)) => row_to_source(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };
        with_tags(&self.conn, source).await.map(Some)
    }

    /// List sources matching `filter`, ordered by ID.
    pub async fn list_sources(&self, filter: &SourceFilter) -> Result<Vec<ContentSource>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !filter.source_ids.is_empty() {
            clauses.push(format!(
                "id IN ({})",
                placeholders_from(values.len() + 1, filter.source_ids.len())
            ));
            values.extend(filter.source_ids.iter().map(|id| libsql::Value::Integer(*id)));
        }
        if let Some(site_id) = filter.site_id {
            values.push(libsql::Value::Integer(site_id));
            clauses.push(format!("site_id = ?{}", values.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources{where_sql} ORDER BY id");

        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut sources = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            sources.push(row_to_source(&row)?);
        }

        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            results.push(with_tags(&self.conn, source).await?);
        }
        Ok(results)
    }

    /// List one site's sources in their configured order.
    pub async fn list_site_sources(&self, site_id: i64) -> Result<Vec<ContentSource>> {
        let mut sources = self
            .list_sources(&SourceFilter {
                site_id: Some(site_id),
                ..Default::default()
            })
            .await?;
        sources.sort_by_key(|s| (s.sort_order, s.id));
        Ok(sources)
    }
}

// ---------------------------------------------------------------------------
// Transaction bodies (usable on a plain connection or inside a transaction)
// ---------------------------------------------------------------------------

async fn upsert_source_in(conn: &Connection, upsert: &SourceUpsert) -> Result<SourceUpsertOutcome> {
    let now = format_timestamp(&Utc::now());

    let Some(existing) = find_source_in(conn, upsert.site_id, &upsert.url).await? else {
        let sort_order = next_sort_order(conn, upsert.site_id).await?;
        conn.execute(
            "INSERT INTO sources
               (site_id, sort_order, name, url, disable_tls_verification, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                upsert.site_id,
                sort_order,
                upsert.name.clone().unwrap_or_default(),
                upsert.url.as_str(),
                i64::from(upsert.disable_tls_verification.unwrap_or(false)),
                now.as_str(),
            ],
        )
        .await
        .map_err(storage_err)?;

        let id = conn.last_insert_rowid();
        if let Some(tag_ids) = &upsert.default_tag_ids {
            replace_default_tags(conn, id, tag_ids).await?;
        }
        return Ok(SourceUpsertOutcome::Created(id));
    };

    let mut changed = false;

    if let Some(name) = &upsert.name {
        if *name != existing.name {
            conn.execute(
                "UPDATE sources SET name = ?1 WHERE id = ?2",
                params![name.as_str(), existing.id],
            )
            .await
            .map_err(storage_err)?;
            changed = true;
        }
    }
    if let Some(flag) = upsert.disable_tls_verification {
        if flag != existing.disable_tls_verification {
            conn.execute(
                "UPDATE sources SET disable_tls_verification = ?1 WHERE id = ?2",
                params![i64::from(flag), existing.id],
            )
            .await
            .map_err(storage_err)?;
            changed = true;
        }
    }
    if let Some(tag_ids) = &upsert.default_tag_ids {
        if dedup_ids(tag_ids) != existing.default_tag_ids {
            replace_default_tags(conn, existing.id, tag_ids).await?;
            changed = true;
        }
    }

    if !changed {
        return Ok(SourceUpsertOutcome::Unchanged(existing.id));
    }

    conn.execute(
        "UPDATE sources SET updated_at = ?1 WHERE id = ?2",
        params![now.as_str(), existing.id],
    )
    .await
    .map_err(storage_err)?;
    Ok(SourceUpsertOutcome::Updated(existing.id))
}

async fn find_source_in(
    conn: &Connection,
    site_id: i64,
    url: &str,
) -> Result<Option<ContentSource>> {
    let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE site_id = ?1 AND url = ?2");
    let mut rows = conn
        .query(&sql, params![site_id, url])
        .await
        .map_err(storage_err)?;

    let source = match rows.next().await {
        Ok(Some(row)) => row_to_source(&row)?,
        Ok(None) => return Ok(None),
        Err(e) => return Err(storage_err(e)),
    };
    with_tags(conn, source).await.map(Some)
}

async fn next_sort_order(conn: &Connection, site_id: i64) -> Result<i64> {
    let mut rows = conn
        .query(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM sources WHERE site_id = ?1",
            params![site_id],
        )
        .await
        .map_err(storage_err)?;

    match rows.next().await {
        Ok(Some(row)) => row.get::<i64>(0).map_err(storage_err),
        Ok(None) => Ok(0),
        Err(e) => Err(storage_err(e)),
    }
}

async fn replace_default_tags(conn: &Connection, source_id: i64, tag_ids: &[i64]) -> Result<()> {
    conn.execute(
        "DELETE FROM source_default_tags WHERE source_id = ?1",
        params![source_id],
    )
    .await
    .map_err(storage_err)?;

    for (position, tag_id) in dedup_ids(tag_ids).into_iter().enumerate() {
        conn.execute(
            "INSERT INTO source_default_tags (source_id, tag_id, position) VALUES (?1, ?2, ?3)",
            params![source_id, tag_id, position as i64],
        )
        .await
        .map_err(storage_err)?;
    }
    Ok(())
}

async fn with_tags(conn: &Connection, mut source: ContentSource) -> Result<ContentSource> {
    let mut rows = conn
        .query(
            "SELECT tag_id FROM source_default_tags WHERE source_id = ?1 ORDER BY position",
            params![source.id],
        )
        .await
        .map_err(storage_err)?;

    while let Ok(Some(row)) = rows.next().await {
        source
            .default_tag_ids
            .push(row.get::<i64>(0).map_err(storage_err)?);
    }
    Ok(source)
}

/// Drop repeated IDs, keeping first occurrences in order.
fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn row_to_source(row: &libsql::Row) -> Result<ContentSource> {
    Ok(ContentSource {
        id: row.get::<i64>(0).map_err(storage_err)?,
        site_id: row.get::<i64>(1).map_err(storage_err)?,
        sort_order: row.get::<i64>(2).map_err(storage_err)?,
        name: row.get::<String>(3).map_err(storage_err)?,
        url: row.get::<String>(4).map_err(storage_err)?,
        disable_tls_verification: row.get::<i64>(5).map_err(storage_err)? != 0,
        default_tag_ids: Vec::new(),
    })
}
