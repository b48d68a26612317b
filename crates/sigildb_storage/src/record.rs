//! Row types.

/// One persisted version of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Exact JSON text, as signed.
    pub json: String,
    /// Base64 record signature, absent only for rows that were never signed.
    pub signature: Option<String>,
    /// Local, strictly increasing insertion counter.
    pub arrival: i64,
    /// Node id of the peer the record came from; `None` for local writes.
    pub received_from: Option<String>,
}

/// Sync bookkeeping for one remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRow {
    /// Remote node id.
    pub peer_id: String,
    /// Highest remote arrival known to be reflected here without gaps.
    pub last_arrival: i64,
    /// Earliest remote arrival from which that guarantee holds.
    pub horizon: i64,
    /// Free-form diagnostic text.
    pub info: Option<String>,
}

/// Position of a row in a sort-time ordered scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageCursor {
    /// Sort time of the row (`documentTime`, else `time`).
    pub sort_time: f64,
    /// Physical row id, the tie breaker.
    pub rowid: i64,
}

/// A row returned by a paged scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    /// Where the row sits in the scan.
    pub cursor: PageCursor,
    /// Document JSON text.
    pub json: String,
}

/// Range scan over documents of one type.
#[derive(Debug, Clone, Copy)]
pub struct TypeRange<'a> {
    /// Type tag to match.
    pub doc_type: &'a str,
    /// Parent to match; `None` scans every parent.
    pub parent: Option<&'a str>,
    /// Inclusive lower bound on sort time.
    pub start: i64,
    /// Inclusive upper bound on sort time.
    pub end: i64,
    /// Newest first when true.
    pub descending: bool,
    /// Resume strictly after this row.
    pub after: Option<PageCursor>,
    /// Maximum rows to return.
    pub limit: usize,
}
