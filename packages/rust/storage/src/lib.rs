//! libSQL storage layer for govsite.
//!
//! The [`Storage`] struct wraps a libSQL database holding sites, the tag
//! vocabulary, content discovery sources, discovered external items and
//! sync history.
//!
//! **Access rules:**
//! - CLI commands that write: read-write via [`Storage::open`]
//! - Listing/inspection: read-only via [`Storage::open_readonly`]

mod items;
mod migrations;
mod sources;

use std::path::Path;

use chrono::{DateTime, Utc};
use govsite_shared::{GovsiteError, Result, Site, Tag, format_timestamp, normalize_slug};
use libsql::{Connection, Database, params};
use uuid::Uuid;

pub use items::{ItemUpsert, ItemUpsertOutcome, ListingPage, ListingQuery, LISTING_PAGE_SIZE};
pub use sources::{SourceFilter, SourceUpsert, SourceUpsertOutcome};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GovsiteError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        GovsiteError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(GovsiteError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Site operations
    // -----------------------------------------------------------------------

    /// Insert a site. When `is_default` is set, any previous default is cleared.
    pub async fn insert_site(&self, hostname: &str, port: u16, is_default: bool) -> Result<Site> {
        self.check_writable()?;
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(GovsiteError::validation("site hostname cannot be blank"));
        }

        if is_default {
            self.conn
                .execute("UPDATE sites SET is_default = 0", params![])
                .await
                .map_err(storage_err)?;
        }
        self.conn
            .execute(
                "INSERT INTO sites (hostname, port, is_default) VALUES (?1, ?2, ?3)",
                params![hostname, i64::from(port), i64::from(is_default)],
            )
            .await
            .map_err(storage_err)?;

        Ok(Site {
            id: self.conn.last_insert_rowid(),
            hostname: hostname.to_string(),
            port,
            is_default,
        })
    }

    /// Get a site by ID.
    pub async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, hostname, port, is_default FROM sites WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_site(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all sites ordered by ID.
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, hostname, port, is_default FROM sites ORDER BY id",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_site(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Tag operations
    // -----------------------------------------------------------------------

    /// Insert a tag into the vocabulary. The slug is trimmed and lower-cased.
    pub async fn insert_tag(&self, slug: &str, name: &str) -> Result<Tag> {
        self.check_writable()?;
        let slug = normalize_slug(slug);
        if slug.is_empty() {
            return Err(GovsiteError::validation("tag slug cannot be blank"));
        }
        if !self.tags_by_slugs(std::slice::from_ref(&slug)).await?.is_empty() {
            return Err(GovsiteError::validation(format!(
                "tag slug '{slug}' already exists"
            )));
        }

        let name = name.trim();
        self.conn
            .execute(
                "INSERT INTO tags (slug, name) VALUES (?1, ?2)",
                params![slug.as_str(), name],
            )
            .await
            .map_err(storage_err)?;

        Ok(Tag {
            id: self.conn.last_insert_rowid(),
            slug,
            name: name.to_string(),
        })
    }

    /// List the whole vocabulary ordered by slug.
    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut rows = self
            .conn
            .query("SELECT id, slug, name FROM tags ORDER BY slug", params![])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_tag(&row)?);
        }
        Ok(results)
    }

    /// Look up tags by slug. Unknown slugs are simply absent from the result.
    pub async fn tags_by_slugs(&self, slugs: &[String]) -> Result<Vec<Tag>> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, slug, name FROM tags WHERE slug IN ({}) ORDER BY slug",
            placeholders(slugs.len())
        );
        let values = slugs
            .iter()
            .map(|s| libsql::Value::Text(s.clone()))
            .collect();

        let mut rows = self
            .conn
            .query(&sql, libsql::params::Params::Positional(values))
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_tag(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Sync run operations
    // -----------------------------------------------------------------------

    /// Record the start of a source sync. Returns the generated run ID.
    pub async fn insert_sync_run(&self, source_id: i64) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, source_id, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), source_id, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a sync run finished with either stats or an error message.
    pub async fn finish_sync_run(
        &self,
        run_id: &str,
        stats_json: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, stats_json = ?2, error = ?3 WHERE id = ?4",
                params![now.as_str(), stats_json, error, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Count finished sync runs for a source, split into `(succeeded, failed)`.
    pub async fn sync_run_counts(&self, source_id: i64) -> Result<(u64, u64)> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                   COALESCE(SUM(CASE WHEN error IS NULL THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN error IS NOT NULL THEN 1 ELSE 0 END), 0)
                 FROM sync_runs WHERE source_id = ?1 AND finished_at IS NOT NULL",
                params![source_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok((
                row.get::<i64>(0).map_err(storage_err)? as u64,
                row.get::<i64>(1).map_err(storage_err)? as u64,
            )),
            Ok(None) => Ok((0, 0)),
            Err(e) => Err(storage_err(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn storage_err(e: libsql::Error) -> GovsiteError {
    GovsiteError::Storage(e.to_string())
}

/// `?1, ?2, ...` for `n` positional parameters, starting at `?1`.
pub(crate) fn placeholders(n: usize) -> String {
    placeholders_from(1, n)
}

/// `?start, ?start+1, ...` for `n` positional parameters.
pub(crate) fn placeholders_from(start: usize, n: usize) -> String {
    (start..start + n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GovsiteError::Storage(format!("invalid date '{s}': {e}")))
}

fn row_to_site(row: &libsql::Row) -> Result<Site> {
    Ok(Site {
        id: row.get::<i64>(0).map_err(storage_err)?,
        hostname: row.get::<String>(1).map_err(storage_err)?,
        port: row.get::<i64>(2).map_err(storage_err)? as u16,
        is_default: row.get::<i64>(3).map_err(storage_err)? != 0,
    })
}

fn row_to_tag(row: &libsql::Row) -> Result<Tag> {
    Ok(Tag {
        id: row.get::<i64>(0).map_err(storage_err)?,
        slug: row.get::<String>(1).map_err(storage_err)?,
        name: row.get::<String>(2).map_err(storage_err)?,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("govsite_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }
}
