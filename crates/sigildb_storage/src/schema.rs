//! Table, index and trigger definitions.
//!
//! Documents are stored as JSON text and every secondary index is an
//! expression index over `json_extract`, so the same expressions must be
//! spelled identically in queries for the planner to use them.

use rusqlite::Connection;

/// Sort key expression: `documentTime` when set, else `time`.
pub(crate) const SORT_TIME: &str =
    "IFNULL(json_extract(json,'$.documentTime'), json_extract(json,'$.time'))";

/// Parent expression; the root is the empty string.
pub(crate) const PARENT: &str = "IFNULL(json_extract(json,'$.parent'),'')";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS document (
    rowid INTEGER PRIMARY KEY,
    json TEXT NOT NULL,
    signature TEXT,
    arrival INTEGER NOT NULL,
    receivedFrom TEXT
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT
);

CREATE TABLE IF NOT EXISTS peers (
    peerID TEXT PRIMARY KEY,
    lastArrival INTEGER NOT NULL,
    horizon INTEGER NOT NULL,
    info TEXT
);

CREATE INDEX IF NOT EXISTS document_parent_type_time ON document(
    IFNULL(json_extract(json,'$.parent'),''),
    json_extract(json,'$.type'),
    IFNULL(json_extract(json,'$.documentTime'), json_extract(json,'$.time'))
);

CREATE INDEX IF NOT EXISTS document_type_time ON document(
    json_extract(json,'$.type'),
    IFNULL(json_extract(json,'$.documentTime'), json_extract(json,'$.time'))
);

CREATE INDEX IF NOT EXISTS document_parent_pinrank ON document(
    IFNULL(json_extract(json,'$.parent'),''),
    IFNULL(json_extract(json,'$.pinRank'),0)
) WHERE json_extract(json,'$.pinRank') IS NOT NULL;

CREATE INDEX IF NOT EXISTS document_link ON document(json_extract(json,'$.link'))
    WHERE json_extract(json,'$.link') IS NOT NULL;

CREATE INDEX IF NOT EXISTS document_name ON document(json_extract(json,'$.name'));

CREATE UNIQUE INDEX IF NOT EXISTS document_id ON document(json_extract(json,'$.id'));

CREATE INDEX IF NOT EXISTS document_arrival ON document(arrival);

CREATE VIRTUAL TABLE IF NOT EXISTS search USING fts4(tags, title, description, body);

CREATE TRIGGER IF NOT EXISTS search_index_bu BEFORE UPDATE ON document BEGIN
    DELETE FROM search WHERE docid=old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS search_index_bd BEFORE DELETE ON document BEGIN
    DELETE FROM search WHERE docid=old.rowid;
END;

CREATE TRIGGER IF NOT EXISTS search_index_au AFTER UPDATE ON document BEGIN
    INSERT INTO search(docid, tags, title, description, body) VALUES (
        new.rowid,
        IFNULL(json_extract(new.json,'$.tags'),''),
        IFNULL(json_extract(new.json,'$.title'),''),
        IFNULL(json_extract(new.json,'$.description'),''),
        IFNULL(json_extract(new.json,'$.body'),'')
    );
END;

CREATE TRIGGER IF NOT EXISTS search_index_ai AFTER INSERT ON document BEGIN
    INSERT INTO search(docid, tags, title, description, body) VALUES (
        new.rowid,
        IFNULL(json_extract(new.json,'$.tags'),''),
        IFNULL(json_extract(new.json,'$.title'),''),
        IFNULL(json_extract(new.json,'$.description'),''),
        IFNULL(json_extract(new.json,'$.body'),'')
    );
END;
"#;

/// Creates every table, index and trigger that is missing, then checks that
/// the document table is readable.
pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    conn.execute_batch(SCHEMA)?;
    conn.query_row("SELECT COUNT(*) FROM document", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}
