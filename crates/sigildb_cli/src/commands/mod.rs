//! CLI command implementations.
//!
//! Commands write to a caller-supplied writer so they can be tested without
//! a terminal.

pub mod documents;
pub mod info;
pub mod init;
pub mod network;
pub mod transfer;

use crate::error::{CliError, CliResult};
use sigildb_core::{Config, Store};
use std::path::Path;

/// Opens an existing store.
pub fn open(path: &Path) -> CliResult<Store> {
    if !path.exists() {
        return Err(CliError::usage(format!(
            "no store at {} (run `sigildb init` first)",
            path.display()
        )));
    }
    Ok(Store::open_with_config(path, Config::new().create_if_missing(false))?)
}
