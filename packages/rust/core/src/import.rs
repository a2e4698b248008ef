//! CSV bulk import of content discovery sources.
//!
//! The whole file is read and structurally validated first; only then are
//! rows applied, one transaction per row. File-level problems abort with
//! [`GovsiteError::Import`] before anything is written. Row-level problems
//! become [`RowError`] values in the [`ImportReport`] and do not stop the
//! run.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use govsite_shared::{GovsiteError, Result};
use govsite_storage::{SourceUpsert, SourceUpsertOutcome, Storage};
use tracing::{debug, info, instrument, warn};

/// Tokens accepted as `true` for boolean columns.
const TRUTHY: &[&str] = &["1", "true", "t", "yes", "y", "on"];

/// Tokens accepted as `false` for boolean columns. Empty is also false.
const FALSY: &[&str] = &["0", "false", "f", "no", "n", "off"];

/// Separator between tag slugs in `default_tags`.
const TAG_SEPARATOR: char = '|';

const COL_SITE_ID: &str = "site_id";
const COL_URL: &str = "url";
const COL_NAME: &str = "name";
const COL_TLS: &str = "disable_tls_verification";
const COL_DEFAULT_TAGS: &str = "default_tags";

// ---------------------------------------------------------------------------
// Options and report types
// ---------------------------------------------------------------------------

/// How to read and scope an import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Field delimiter; must be exactly one character.
    pub delimiter: String,
    /// Site for rows with an empty `site_id` cell.
    pub default_site_id: Option<i64>,
    /// When set, rows for any other site fail.
    pub allowed_site_ids: Option<BTreeSet<i64>>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delimiter: ",".into(),
            default_site_id: None,
            allowed_site_ids: None,
        }
    }
}

impl ImportOptions {
    /// Options for an upload from a site's settings page: every row belongs
    /// to that site and no other site may be touched.
    pub fn for_site_upload(site_id: i64) -> Self {
        Self {
            delimiter: ",".into(),
            default_site_id: Some(site_id),
            allowed_site_ids: Some(BTreeSet::from([site_id])),
        }
    }

    fn delimiter_byte(&self) -> Result<u8> {
        let mut chars = self.delimiter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii() => Ok(c as u8),
            _ => Err(GovsiteError::import("Delimiter must be a single character.")),
        }
    }
}

/// Why a single row was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("missing site_id and no --site-id fallback provided")]
    MissingSiteId,

    #[error("site_id '{0}' must be a positive integer")]
    InvalidSiteId(String),

    #[error("site_id {0} is not allowed for this import")]
    SiteNotAllowed(i64),

    #[error("site_id {0} does not exist")]
    UnknownSite(i64),

    #[error("missing required field 'url'")]
    MissingUrl,

    #[error("'{field}' must be one of 1, true, t, yes, y, on, 0, false, f, no, n, off or empty (got '{value}')")]
    InvalidBoolean { field: String, value: String },

    #[error("unknown tag key(s): {}", .0.join(", "))]
    UnknownTags(Vec<String>),

    #[error("could not save source: {0}")]
    Storage(String),
}

/// What happened to one processed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Created { id: i64 },
    Updated { id: i64 },
    Unchanged { id: i64 },
    Failed(RowError),
}

/// One processed (non-empty) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    /// 1-based row number; the header is row 1.
    pub row: usize,
    pub url: String,
    pub status: RowStatus,
}

/// Totals and per-row outcomes of an import.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    pub rows: Vec<RowOutcome>,
}

impl ImportReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// One-line summary for command output and admin messages.
    pub fn summary_line(&self) -> String {
        format!(
            "Imported content discovery sources: processed {} row(s), created {}, updated {}, \
             unchanged {}, skipped empty {}, failed {}.",
            self.processed,
            self.created,
            self.updated,
            self.unchanged,
            self.skipped_empty,
            self.failed
        )
    }

    /// `Row R (url): reason` for each failed row, in input order.
    pub fn failure_lines(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|outcome| match &outcome.status {
                RowStatus::Failed(err) => {
                    let url = if outcome.url.is_empty() {
                        "no url"
                    } else {
                        outcome.url.as_str()
                    };
                    Some(format!("Row {} ({}): {}", outcome.row, url, err))
                }
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, row: usize, url: String, status: RowStatus) {
        match &status {
            RowStatus::Created { .. } => self.created += 1,
            RowStatus::Updated { .. } => self.updated += 1,
            RowStatus::Unchanged { .. } => self.unchanged += 1,
            RowStatus::Failed(_) => self.failed += 1,
        }
        self.rows.push(RowOutcome { row, url, status });
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Import sources from a CSV file on disk.
pub async fn import_sources_from_path(
    storage: &Storage,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    if !path.is_file() {
        return Err(GovsiteError::import(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }
    let file = std::fs::File::open(path).map_err(|e| GovsiteError::io(path, e))?;
    import_sources(storage, file, options).await
}

/// Import sources from an uploaded CSV for a single site.
pub async fn import_upload(storage: &Storage, bytes: &[u8], site_id: i64) -> Result<ImportReport> {
    import_sources(storage, bytes, &ImportOptions::for_site_upload(site_id)).await
}

/// Import sources from any CSV reader.
#[instrument(skip_all, fields(delimiter = %options.delimiter, default_site_id = ?options.default_site_id))]
pub async fn import_sources<R: Read>(
    storage: &Storage,
    reader: R,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let delimiter = options.delimiter_byte()?;
    if let Some(site_id) = options.default_site_id {
        if site_id <= 0 {
            return Err(GovsiteError::import("--site-id must be a positive integer."));
        }
    }

    let csv = read_csv(reader, delimiter)?;
    if !csv.columns.contains(COL_URL) {
        return Err(GovsiteError::import("CSV header must include a 'url' column."));
    }
    if !csv.columns.contains(COL_SITE_ID) && options.default_site_id.is_none() {
        return Err(GovsiteError::import(
            "Provide a 'site_id' column or pass --site-id for all rows.",
        ));
    }
    debug!(rows = csv.rows.len(), columns = ?csv.columns, "CSV parsed");

    let mut importer = RowImporter {
        storage,
        options,
        has_name: csv.columns.contains(COL_NAME),
        has_tls: csv.columns.contains(COL_TLS),
        has_default_tags: csv.columns.contains(COL_DEFAULT_TAGS),
        known_sites: HashMap::new(),
    };

    let mut report = ImportReport::default();
    for row in &csv.rows {
        if row.values.values().all(String::is_empty) {
            report.skipped_empty += 1;
            continue;
        }
        report.processed += 1;

        let url = row.get(COL_URL).to_string();
        let status = match importer.apply(row).await {
            Ok(SourceUpsertOutcome::Created(id)) => RowStatus::Created { id },
            Ok(SourceUpsertOutcome::Updated(id)) => RowStatus::Updated { id },
            Ok(SourceUpsertOutcome::Unchanged(id)) => RowStatus::Unchanged { id },
            Err(err) => {
                warn!(row = row.number, url = %url, error = %err, "row failed");
                RowStatus::Failed(err)
            }
        };
        report.record(row.number, url, status);
    }

    info!(
        processed = report.processed,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped_empty = report.skipped_empty,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// CSV reading
// ---------------------------------------------------------------------------

struct ParsedCsv {
    columns: HashSet<String>,
    rows: Vec<CsvRow>,
}

struct CsvRow {
    number: usize,
    /// Normalised column name -> trimmed value.
    values: HashMap<String, String>,
}

impl CsvRow {
    fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }
}

/// Read every record up front so structural errors abort before any write.
fn read_csv<R: Read>(reader: R, delimiter: u8) -> Result<ParsedCsv> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();
    // A header of blank names is a header; it just lacks the url column.
    if headers.is_empty() {
        return Err(GovsiteError::import("CSV file is missing a header row."));
    }

    let mut rows = Vec::new();
    for (index, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let values = headers
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.clone(), value.trim().to_string()))
            .collect();
        rows.push(CsvRow {
            number: index + 2,
            values,
        });
    }

    Ok(ParsedCsv {
        columns: headers.into_iter().filter(|h| !h.is_empty()).collect(),
        rows,
    })
}

fn csv_error(err: csv::Error) -> GovsiteError {
    GovsiteError::import(format!("CSV file could not be read: {err}"))
}

// ---------------------------------------------------------------------------
// Row application
// ---------------------------------------------------------------------------

struct RowImporter<'a> {
    storage: &'a Storage,
    options: &'a ImportOptions,
    has_name: bool,
    has_tls: bool,
    has_default_tags: bool,
    /// Site existence, looked up once per site.
    known_sites: HashMap<i64, bool>,
}

impl RowImporter<'_> {
    async fn apply(&mut self, row: &CsvRow) -> std::result::Result<SourceUpsertOutcome, RowError> {
        let site_id = self.resolve_site_id(row)?;
        if !self.site_exists(site_id).await? {
            return Err(RowError::UnknownSite(site_id));
        }

        let url = row.get(COL_URL);
        if url.is_empty() {
            return Err(RowError::MissingUrl);
        }

        let mut upsert = SourceUpsert::new(site_id, url);
        if self.has_name {
            upsert.name = Some(row.get(COL_NAME).to_string());
        }
        if self.has_tls {
            upsert.disable_tls_verification = Some(parse_bool(COL_TLS, row.get(COL_TLS))?);
        }
        if self.has_default_tags {
            upsert.default_tag_ids = Some(self.resolve_tags(row.get(COL_DEFAULT_TAGS)).await?);
        }

        self.storage
            .upsert_source(&upsert)
            .await
            .map_err(|e| RowError::Storage(e.to_string()))
    }

    fn resolve_site_id(&self, row: &CsvRow) -> std::result::Result<i64, RowError> {
        let raw = row.get(COL_SITE_ID);
        let site_id = if raw.is_empty() {
            self.options.default_site_id.ok_or(RowError::MissingSiteId)?
        } else {
            match raw.parse::<i64>() {
                Ok(id) if id > 0 && raw.bytes().all(|b| b.is_ascii_digit()) => id,
                _ => return Err(RowError::InvalidSiteId(raw.to_string())),
            }
        };

        if let Some(allowed) = &self.options.allowed_site_ids {
            if !allowed.contains(&site_id) {
                return Err(RowError::SiteNotAllowed(site_id));
            }
        }
        Ok(site_id)
    }

    async fn site_exists(&mut self, site_id: i64) -> std::result::Result<bool, RowError> {
        if let Some(exists) = self.known_sites.get(&site_id) {
            return Ok(*exists);
        }
        let exists = self
            .storage
            .get_site(site_id)
            .await
            .map_err(|e| RowError::Storage(e.to_string()))?
            .is_some();
        self.known_sites.insert(site_id, exists);
        Ok(exists)
    }

    /// Resolve `a|b|c` slugs to tag ids, keeping first-occurrence order.
    async fn resolve_tags(&self, raw: &str) -> std::result::Result<Vec<i64>, RowError> {
        let slugs = parse_tag_slugs(raw);
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        let tags = self
            .storage
            .tags_by_slugs(&slugs)
            .await
            .map_err(|e| RowError::Storage(e.to_string()))?;
        let by_slug: HashMap<&str, i64> = tags.iter().map(|t| (t.slug.as_str(), t.id)).collect();

        let missing: Vec<String> = slugs
            .iter()
            .filter(|slug| !by_slug.contains_key(slug.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(RowError::UnknownTags(missing));
        }
        Ok(slugs.iter().map(|slug| by_slug[slug.as_str()]).collect())
    }
}

/// Split, trim, lower-case and de-duplicate tag slugs.
fn parse_tag_slugs(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(TAG_SEPARATOR)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn parse_bool(field: &str, raw: &str) -> std::result::Result<bool, RowError> {
    let token = raw.trim().to_lowercase();
    if TRUTHY.contains(&token.as_str()) {
        Ok(true)
    } else if token.is_empty() || FALSY.contains(&token.as_str()) {
        Ok(false)
    } else {
        Err(RowError::InvalidBoolean {
            field: field.to_string(),
            value: raw.to_string(),
        })
    }
}
