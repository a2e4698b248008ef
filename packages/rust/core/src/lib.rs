//! Core workflows for govsite.
//!
//! This crate ties storage and feed fetching together: CSV import of
//! content discovery sources, syncing those sources into external items,
//! and building tag listings from the result.

pub mod import;
pub mod listing;
pub mod sync;

pub use import::{
    ImportOptions, ImportReport, RowError, RowOutcome, RowStatus, import_sources,
    import_sources_from_path, import_upload,
};
pub use listing::{Listing, ListingRequest, build_listing};
pub use sync::{
    SilentProgress, SourceSyncResult, SyncFailure, SyncFilter, SyncProgress, SyncReport,
    sync_source, sync_sources,
};
