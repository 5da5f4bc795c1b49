//! Configuration of one migration job. Every job in the catalog is an instance
//! of [`JobSpec`]; the orchestrator holds no per-entity logic.
use crate::backend::{ConflictPolicy, Filter, Row};
use crate::pipeline::mapping::FieldMapping;

/// Which backend a table lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Destination => "destination",
        }
    }
}

/// The table walked page by page.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub side: Side,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    /// Stable ascending ordering key, unique within the table.
    pub key: &'static str,
    pub filters: Vec<Filter>,
}

/// Rows of another table fetched for each scanned page; these become the
/// migration candidates instead of the scanned rows.
#[derive(Debug, Clone)]
pub struct RelatedSpec {
    pub side: Side,
    pub table: &'static str,
    pub columns: &'static [&'static str],
    /// Column matched against the scanned rows' keys.
    pub match_column: &'static str,
    /// Key of the related rows themselves.
    pub key: &'static str,
}

/// Destination-side staging table consulted before any work is done.
#[derive(Debug, Clone)]
pub struct DedupSpec {
    pub table: &'static str,
    pub key_column: &'static str,
    /// Fields that must all be non-empty for a key to count as migrated.
    /// Empty means a staging row's existence is enough.
    pub fields: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    /// Copy the field whenever the overlay row carries it, null included.
    WhenPresent,
    /// Copy only non-null, non-blank values.
    WhenNonEmpty,
    /// Always set the field; null when there is no overlay row.
    Always,
}

/// Values from another table merged into each candidate by key.
#[derive(Debug, Clone)]
pub struct OverlaySpec {
    pub side: Side,
    pub table: &'static str,
    pub key_column: &'static str,
    pub fields: &'static [&'static str],
    pub mode: OverlayMode,
}

/// A candidate field holding a storage reference.
#[derive(Debug, Clone)]
pub struct TransferField {
    pub field: &'static str,
    /// Run the avatar normalization before upload.
    pub normalize: bool,
    /// Bucket for inline `data:` payloads; `None` leaves inline values alone.
    pub inline_bucket: Option<&'static str>,
    /// File stem for inline payloads, stored as `<key>/<stem>.<ext>`.
    pub inline_stem: &'static str,
}

impl TransferField {
    pub const fn object(field: &'static str) -> Self {
        Self {
            field,
            normalize: false,
            inline_bucket: None,
            inline_stem: field,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteSpec {
    pub table: &'static str,
    /// Comma separated conflict target.
    pub conflict_key: &'static str,
    pub policy: ConflictPolicy,
    /// Write a row only when at least one object field was transferred or
    /// carried over; transfer fields that held no reference are dropped.
    pub only_transferred: bool,
    /// Rows where any of these is missing or empty are dropped.
    pub require_fields: &'static [&'static str],
}

/// Turns one mapped row into the rows actually written.
pub type Expander = fn(&Row) -> Vec<Row>;

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub scan: ScanSpec,
    pub related: Option<RelatedSpec>,
    pub dedup: Option<DedupSpec>,
    pub overlay: Option<OverlaySpec>,
    /// Processed in this order for every row.
    pub transfers: Vec<TransferField>,
    pub mapping: FieldMapping,
    pub expand: Option<Expander>,
    pub write: WriteSpec,
}

impl JobSpec {
    /// Key column of the candidate rows.
    pub fn candidate_key(&self) -> &'static str {
        self.related.as_ref().map_or(self.scan.key, |r| r.key)
    }
}
