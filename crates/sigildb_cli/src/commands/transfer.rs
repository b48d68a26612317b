//! Export and import commands.

use crate::error::{CliError, CliResult};
use sigildb_core::Store;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Pretty JSON array.
    Json,
    /// Title-keyed TOML tables.
    Toml,
}

impl Format {
    /// Picks the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Exports `ids` with their ancestors and descendants.
pub fn export(store: &Store, ids: &[String], format: Format, out: &mut impl Write) -> CliResult<()> {
    if ids.is_empty() {
        return Err(CliError::usage("export needs at least one id"));
    }
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let text = match format {
        Format::Json => store.export_json(&ids)?,
        Format::Toml => store.export_toml(&ids)?,
    };
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}

/// Imports an export file; the format follows the extension.
pub fn import(store: &Store, file: &Path, out: &mut impl Write) -> CliResult<usize> {
    let text = fs::read_to_string(file)?;
    let written = match Format::from_path(file) {
        Format::Json => store.import_json(&text)?,
        Format::Toml => store.import_toml(&text)?,
    };
    info!(file = %file.display(), written, "imported documents");
    writeln!(out, "imported {written} documents from {}", file.display())?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_codec::json;
    use sigildb_core::Config;
    use sigildb_crypto::KeyPair;

    fn store() -> Store {
        Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap()
    }

    #[test]
    fn toml_export_imports_into_another_store() {
        let source = store();
        source
            .set_document(json!({"id": "guide", "type": "page", "title": "Guide", "time": 10}))
            .unwrap();
        source
            .set_document(json!({"type": "page", "title": "Chapter", "parent": "guide", "time": 11}))
            .unwrap();
        source.commit().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("guide.toml");
        let mut text = Vec::new();
        export(&source, &["guide".to_string()], Format::Toml, &mut text).unwrap();
        fs::write(&file, &text).unwrap();
        assert!(String::from_utf8(text).unwrap().contains("[Guide]"));

        let target = store();
        assert_eq!(import(&target, &file, &mut Vec::new()).unwrap(), 2);
        assert!(target.get_document_by_id("guide").unwrap().is_some());
    }

    #[test]
    fn export_needs_ids() {
        assert!(export(&store(), &[], Format::Json, &mut Vec::new()).is_err());
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path(Path::new("a.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("a.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("a")), Format::Json);
    }
}
