//! SQLite-backed document table.

use crate::error::{StorageError, StorageResult};
use crate::record::{PageCursor, PageRow, PeerRow, StoredRecord, TypeRange};
use crate::schema::{self, PARENT, SORT_TIME};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix given to store files that failed to open.
pub const ARCHIVE_SUFFIX: &str = ".error_archived";

/// An open document table.
///
/// Writes start a transaction lazily and stay invisible to other
/// connections until [`Database::commit`]. Reads on the same handle see
/// uncommitted writes.
///
/// The handle is not `Sync`; callers serialize access to it.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens or creates the store file at `path`.
    ///
    /// A file whose schema cannot be initialized is renamed with
    /// [`ARCHIVE_SUFFIX`] and a fresh file is created in its place.
    ///
    /// # Errors
    ///
    /// Returns an error if the fresh file cannot be created either.
    pub fn open(path: &Path) -> StorageResult<Self> {
        match Self::try_open(path) {
            Ok(db) => Ok(db),
            Err(err) if path.exists() => {
                warn!(path = %path.display(), error = %err, "store file unreadable, archiving it");
                archive(path)?;
                Self::try_open(path)
            }
            Err(err) => Err(err),
        }
    }

    /// Opens a private in-memory table.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        Ok(Self { conn, path: None })
    }

    fn try_open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        schema::init(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Returns the file path, `None` for in-memory tables.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if uncommitted writes are pending.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin(&self) -> StorageResult<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Makes pending writes durable. A no-op when nothing is pending.
    pub fn commit(&self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Discards pending writes.
    pub fn rollback(&self) -> StorageResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Returns the highest arrival in the table, `0` when empty.
    pub fn max_arrival(&self) -> StorageResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT IFNULL(MAX(arrival), 0) FROM document", [], |row| {
                row.get(0)
            })?)
    }

    /// Returns the number of stored rows, tombstones included.
    pub fn record_count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM document", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the stored record for `id`.
    pub fn record(&self, id: &str) -> StorageResult<Option<StoredRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT json, signature, arrival, receivedFrom FROM document \
                 WHERE json_extract(json,'$.id')=?1",
                params![id],
                read_record,
            )
            .optional()?)
    }

    /// Inserts a record. Any previous version must already be deleted.
    pub fn insert_record(&self, record: &StoredRecord) -> StorageResult<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT INTO document (json, signature, arrival, receivedFrom) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.json,
                record.signature,
                record.arrival,
                record.received_from
            ],
        )?;
        Ok(())
    }

    /// Deletes the row for `id`, returning the number of rows removed.
    pub fn delete_record(&self, id: &str) -> StorageResult<usize> {
        self.begin()?;
        Ok(self.conn.execute(
            "DELETE FROM document WHERE json_extract(json,'$.id')=?1",
            params![id],
        )?)
    }

    /// Deletes the row for `id` only if its `time` is at most `time`.
    pub fn delete_if_not_newer(&self, id: &str, time: i64) -> StorageResult<usize> {
        self.begin()?;
        Ok(self.conn.execute(
            "DELETE FROM document WHERE json_extract(json,'$.id')=?1 \
             AND json_extract(json,'$.time')<=?2",
            params![id, time],
        )?)
    }

    /// Replaces the signature stored for `id`.
    pub fn update_signature(&self, id: &str, signature: &str) -> StorageResult<()> {
        self.begin()?;
        self.conn.execute(
            "UPDATE document SET signature=?1 WHERE json_extract(json,'$.id')=?2",
            params![signature, id],
        )?;
        Ok(())
    }

    /// Returns the JSON of up to `limit` children of `parent` whose `time`
    /// is strictly below `time`.
    pub fn children_older_than(
        &self,
        parent: &str,
        time: i64,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let sql = format!(
            "SELECT json FROM document WHERE {PARENT}=?1 AND json_extract(json,'$.time')<?2 LIMIT ?3"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![parent, time, to_sql_limit(limit)], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Returns every direct child of `parent`, tombstones included.
    pub fn children(&self, parent: &str) -> StorageResult<Vec<StoredRecord>> {
        let sql = format!(
            "SELECT json, signature, arrival, receivedFrom FROM document WHERE {PARENT}=?1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![parent], read_record)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Returns up to `limit` records with `arrival > after` in arrival order,
    /// skipping records received from `exclude`.
    pub fn arrivals_after(
        &self,
        after: i64,
        exclude: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<StoredRecord>> {
        let limit = to_sql_limit(limit);
        let rows = match exclude {
            Some(peer) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT json, signature, arrival, receivedFrom FROM document \
                     WHERE arrival>?1 AND IFNULL(receivedFrom,'')!=?2 ORDER BY arrival LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![after, peer, limit], read_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT json, signature, arrival, receivedFrom FROM document \
                     WHERE arrival>?1 ORDER BY arrival LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![after, limit], read_record)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Returns one page of documents of a type ordered by sort time.
    pub fn by_type(&self, range: &TypeRange<'_>) -> StorageResult<Vec<PageRow>> {
        let mut sql = format!(
            "SELECT rowid, json, {SORT_TIME} AS sort_time FROM document \
             WHERE json_extract(json,'$.type')=? AND {SORT_TIME}>=? AND {SORT_TIME}<=?"
        );
        let mut args: Vec<SqlValue> = vec![
            SqlValue::Text(range.doc_type.to_string()),
            SqlValue::Integer(range.start),
            SqlValue::Integer(range.end),
        ];
        if let Some(parent) = range.parent {
            sql.push_str(&format!(" AND {PARENT}=?"));
            args.push(SqlValue::Text(parent.to_string()));
        }
        let order = if range.descending { "DESC" } else { "ASC" };
        if let Some(after) = range.after {
            let cmp = if range.descending { "<" } else { ">" };
            sql.push_str(&format!(" AND ({SORT_TIME}, rowid) {cmp} (?, ?)"));
            args.push(SqlValue::Real(after.sort_time));
            args.push(SqlValue::Integer(after.rowid));
        }
        sql.push_str(&format!(" ORDER BY sort_time {order}, rowid {order} LIMIT ?"));
        args.push(SqlValue::Integer(to_sql_limit(range.limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(PageRow {
                cursor: PageCursor {
                    rowid: row.get(0)?,
                    sort_time: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                },
                json: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Full-text search over `tags`, `title`, `description` and `body`.
    ///
    /// Returns up to `limit` matching documents of `doc_type`, newest first.
    pub fn search(
        &self,
        query: &str,
        doc_type: &str,
        parent: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let mut sql = String::from(
            "SELECT json FROM (SELECT docid AS hit FROM search WHERE search MATCH ?) \
             INNER JOIN document ON hit=document.rowid \
             WHERE json_extract(json,'$.type')=?",
        );
        let mut args = vec![
            SqlValue::Text(query.to_string()),
            SqlValue::Text(doc_type.to_string()),
        ];
        if let Some(parent) = parent {
            sql.push_str(&format!(" AND {PARENT}=?"));
            args.push(SqlValue::Text(parent.to_string()));
        }
        sql.push_str(&format!(" ORDER BY {SORT_TIME} DESC LIMIT ?"));
        args.push(SqlValue::Integer(to_sql_limit(limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Deletes documents in a retention channel whose sort time is below
    /// `before`, sparing `keep_id`.
    ///
    /// `channel` is the JSON text of the `autoclean` value.
    pub fn purge_channel(
        &self,
        channel: &str,
        parent: &str,
        doc_type: &str,
        before: i64,
        keep_id: &str,
    ) -> StorageResult<usize> {
        self.begin()?;
        let sql = format!(
            "DELETE FROM document WHERE json_extract(json,'$.autoclean')=json_extract(?1,'$') \
             AND {PARENT}=?2 AND json_extract(json,'$.type')=?3 AND {SORT_TIME}<?4 \
             AND json_extract(json,'$.id')!=?5"
        );
        let removed = self
            .conn
            .execute(&sql, params![channel, parent, doc_type, before, keep_id])?;
        if removed > 0 {
            debug!(removed, channel, "purged expired documents");
        }
        Ok(removed)
    }

    /// Calls `f` with every stored signature.
    pub fn for_each_signature(&self, mut f: impl FnMut(&str)) -> StorageResult<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT signature FROM document WHERE signature IS NOT NULL")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let signature: String = row.get(0)?;
            f(&signature);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Metadata and peers
    // ------------------------------------------------------------------

    /// Reads a metadata value.
    pub fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key=?1", params![key], |row| {
                row.get(0)
            })
            .optional()?
            .flatten())
    }

    /// Writes a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Reads the row for one peer.
    pub fn peer(&self, peer_id: &str) -> StorageResult<Option<PeerRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT peerID, lastArrival, horizon, info FROM peers WHERE peerID=?1",
                params![peer_id],
                read_peer,
            )
            .optional()?)
    }

    /// Inserts or replaces a peer row.
    pub fn upsert_peer(&self, peer: &PeerRow) -> StorageResult<()> {
        self.begin()?;
        self.conn.execute(
            "INSERT INTO peers (peerID, lastArrival, horizon, info) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(peerID) DO UPDATE SET lastArrival=excluded.lastArrival, \
             horizon=excluded.horizon, info=excluded.info",
            params![peer.peer_id, peer.last_arrival, peer.horizon, peer.info],
        )?;
        Ok(())
    }

    /// Returns every peer row.
    pub fn peers(&self) -> StorageResult<Vec<PeerRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT peerID, lastArrival, horizon, info FROM peers ORDER BY peerID")?;
        let rows = stmt.query_map([], read_peer)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        json: row.get(0)?,
        signature: row.get(1)?,
        arrival: row.get(2)?,
        received_from: row.get(3)?,
    })
}

fn read_peer(row: &Row<'_>) -> rusqlite::Result<PeerRow> {
    Ok(PeerRow {
        peer_id: row.get(0)?,
        last_arrival: row.get(1)?,
        horizon: row.get(2)?,
        info: row.get(3)?,
    })
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Moves a damaged store file and its WAL sidecars out of the way.
fn archive(path: &Path) -> StorageResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut from = path.as_os_str().to_owned();
        from.push(suffix);
        let mut to = from.clone();
        to.push(ARCHIVE_SUFFIX);
        match std::fs::rename(&from, &to) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StorageError::Archive {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
    Ok(())
}
