//! Init command implementation.

use crate::error::{CliError, CliResult};
use sigildb_core::{Config, SidecarFile, Store};
use std::io::Write;
use std::path::Path;

/// Creates a new store with a fresh keypair.
///
/// The keys land in the sidecar file next to the store; `server` is
/// recorded there as the peer `sigildb sync` dials by default.
pub fn run(path: &Path, config: Config, server: Option<&str>, out: &mut impl Write) -> CliResult<Store> {
    if path.exists() {
        return Err(CliError::usage(format!("{} already exists", path.display())));
    }
    let store = Store::open_with_config(path, config.create_if_missing(true))?;
    if let Some(server) = server {
        store.use_sync_server(Some(server), true)?;
    }

    writeln!(out, "created {}", path.display())?;
    writeln!(out, "keys:    {}", SidecarFile::path_for(path).display())?;
    writeln!(out, "node:    {}", store.node_id())?;
    writeln!(out, "hint:    {}", store.sync_key().key_hint())?;
    if let Some(server) = store.sync_server() {
        writeln!(out, "server:  {server}")?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_sidecar_and_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.db");
        let mut out = Vec::new();

        let store = run(&path, Config::new().node_secret([1; 32]), Some("10.0.0.2:7004"), &mut out).unwrap();
        store.close();
        assert!(SidecarFile::path_for(&path).exists());
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("server:  10.0.0.2:7004"));

        let err = run(&path, Config::new().node_secret([1; 32]), None, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }
}
