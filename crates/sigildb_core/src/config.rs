//! Store configuration and the per-store sidecar file.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use sigildb_crypto::{KeyPair, SyncKey, WriteKey};
use std::path::{Path, PathBuf};

/// Suffix appended to a store path to find its sidecar file.
pub const SIDECAR_SUFFIX: &str = ".sync.toml";

/// Default probability that a write to an `autoclean` channel purges it.
pub const DEFAULT_AUTOCLEAN_PROBABILITY: f64 = 0.01;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store file if it doesn't exist.
    pub create_if_missing: bool,

    /// Retention window in days for `autoclean` channels. `None` defers to
    /// the sidecar file; `0` disables purging.
    pub autoclean_days: Option<f64>,

    /// Probability that a write to an `autoclean` channel purges it.
    pub autoclean_probability: f64,

    /// Keys to open with. `None` loads them from the sidecar file, creating
    /// a fresh keypair if the file is missing.
    pub keys: Option<KeyPair>,

    /// Machine secret used to derive the node identity. `None` reads (or
    /// creates) the secret file under the user config directory.
    pub node_secret: Option<[u8; 32]>,

    /// Whether the store accepts inbound sync connections.
    pub servable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            autoclean_days: None,
            autoclean_probability: DEFAULT_AUTOCLEAN_PROBABILITY,
            keys: None,
            node_secret: None,
            servable: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the retention window in days.
    #[must_use]
    pub fn autoclean_days(mut self, days: f64) -> Self {
        self.autoclean_days = Some(days);
        self
    }

    /// Sets the purge probability. `1.0` purges on every write.
    #[must_use]
    pub fn autoclean_probability(mut self, probability: f64) -> Self {
        self.autoclean_probability = probability;
        self
    }

    /// Opens with explicit keys instead of the sidecar file.
    #[must_use]
    pub fn keys(mut self, keys: KeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Uses an explicit machine secret.
    #[must_use]
    pub fn node_secret(mut self, secret: [u8; 32]) -> Self {
        self.node_secret = Some(secret);
        self
    }

    /// Sets whether the store accepts inbound sync connections.
    #[must_use]
    pub fn servable(mut self, value: bool) -> Self {
        self.servable = value;
        self
    }
}

/// The `[sync]` table of a sidecar file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Base64 sync key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_key: Option<String>,
    /// Base64 write key; absent on read-only replicas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_key: Option<String>,
    /// Peer to keep a client session open to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Whether to accept inbound sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve: Option<bool>,
}

/// The `[database]` table of a sidecar file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Retention window in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoclean_days: Option<f64>,
}

/// Per-store settings kept next to the store file as `<path>.sync.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarFile {
    /// Key material and peer settings.
    pub sync: SyncSection,
    /// Storage settings.
    pub database: DatabaseSection,
}

impl SidecarFile {
    /// Returns the sidecar path for a store path.
    #[must_use]
    pub fn path_for(store: &Path) -> PathBuf {
        let mut name = store.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Parses sidecar text.
    pub fn parse(text: &str) -> StoreResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads the sidecar file, `None` if it does not exist.
    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the sidecar file.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Stores `keys` in the `[sync]` table.
    pub fn set_keys(&mut self, keys: &KeyPair) {
        self.sync.sync_key = Some(keys.sync.to_base64());
        self.sync.write_key = keys.write.as_ref().map(WriteKey::to_base64);
    }

    /// Decodes the keys in the `[sync]` table.
    ///
    /// Returns `None` when no sync key is recorded. A write key that does
    /// not match the sync key is an error.
    pub fn keys(&self) -> StoreResult<Option<KeyPair>> {
        let Some(sync) = self.sync.sync_key.as_deref() else {
            return Ok(None);
        };
        let sync = SyncKey::from_base64(sync)?;
        let write = match self.sync.write_key.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(WriteKey::from_base64(text)?),
            _ => None,
        };
        match write {
            Some(write) if write.sync_key() != sync => Err(StoreError::config(
                "write_key does not belong to sync_key",
            )),
            Some(write) => Ok(Some(KeyPair::from_write_key(write))),
            None => Ok(Some(KeyPair::read_only(sync))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.servable);
        assert_eq!(config.autoclean_days, None);
        assert!((config.autoclean_probability - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .autoclean_days(7.0)
            .autoclean_probability(1.0)
            .servable(false)
            .node_secret([4; 32]);

        assert!(!config.create_if_missing);
        assert_eq!(config.autoclean_days, Some(7.0));
        assert!(!config.servable);
        assert_eq!(config.node_secret, Some([4; 32]));
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        assert_eq!(
            SidecarFile::path_for(Path::new("/tmp/notes.db")),
            PathBuf::from("/tmp/notes.db.sync.toml")
        );
    }

    #[test]
    fn sidecar_keys_roundtrip() {
        let keys = KeyPair::generate();
        let mut file = SidecarFile::default();
        file.set_keys(&keys);
        file.sync.server = Some("127.0.0.1:7004".into());
        file.database.autoclean_days = Some(3.0);

        let text = toml::to_string_pretty(&file).unwrap();
        assert!(text.contains("[sync]"));
        let parsed = SidecarFile::parse(&text).unwrap();
        assert_eq!(parsed, file);

        let loaded = parsed.keys().unwrap().unwrap();
        assert_eq!(loaded.sync, keys.sync);
        assert!(loaded.can_write());
    }

    #[test]
    fn read_only_sidecar() {
        let sync = KeyPair::generate().sync;
        let text = format!("[sync]\nsync_key = \"{}\"\nwrite_key = \"\"\n", sync.to_base64());
        let keys = SidecarFile::parse(&text).unwrap().keys().unwrap().unwrap();
        assert!(!keys.can_write());
    }

    #[test]
    fn mismatched_write_key_is_rejected() {
        let mut file = SidecarFile::default();
        file.sync.sync_key = Some(KeyPair::generate().sync.to_base64());
        file.sync.write_key = Some(WriteKey::generate().to_base64());
        assert!(matches!(file.keys(), Err(StoreError::Config { .. })));
    }

    #[test]
    fn missing_sidecar_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SidecarFile::load(&dir.path().join("x.sync.toml")).unwrap(), None);
    }
}
