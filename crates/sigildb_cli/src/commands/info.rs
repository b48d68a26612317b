//! Info command implementation.

use crate::error::CliResult;
use serde::Serialize;
use sigildb_core::Store;
use std::collections::BTreeMap;
use std::io::Write;

/// Store identity and replication state.
#[derive(Debug, Serialize)]
pub struct StoreInfo {
    /// Store path, absent for in-memory stores.
    pub path: Option<String>,
    /// This node's id.
    pub node_id: String,
    /// Routing hint of the sync key.
    pub key_hint: String,
    /// Whether this replica holds the write key.
    pub writable: bool,
    /// Whether servers may host this store.
    pub servable: bool,
    /// Configured upstream server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_server: Option<String>,
    /// Stored rows, tombstones included.
    pub record_count: u64,
    /// State digest, equal on converged replicas.
    pub digest: String,
    /// Latest local arrival.
    pub latest_arrival: i64,
    /// Known peers.
    pub peers: Vec<PeerInfo>,
    /// Server address to last contact, `-1` when disconnected.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub connected_servers: BTreeMap<String, i64>,
}

/// Sync progress with one peer.
#[derive(Debug, Serialize)]
pub struct PeerInfo {
    /// Remote node id.
    pub peer_id: String,
    /// Highest remote arrival reflected here without gaps.
    pub last_arrival: i64,
    /// Earliest remote arrival covered.
    pub horizon: i64,
}

/// Collects [`StoreInfo`] for `store`.
pub fn collect(store: &Store) -> CliResult<StoreInfo> {
    let digest = store.state_digest()?;
    let peers = store
        .peers()?
        .into_iter()
        .map(|row| PeerInfo {
            peer_id: row.peer_id,
            last_arrival: row.last_arrival,
            horizon: row.horizon,
        })
        .collect();
    Ok(StoreInfo {
        path: store.path().map(|p| p.display().to_string()),
        node_id: store.node_id().to_string(),
        key_hint: store.sync_key().key_hint().to_string(),
        writable: store.can_write()?,
        servable: store.servable(),
        sync_server: store.sync_server(),
        record_count: store.record_count()?,
        digest: digest.to_string(),
        latest_arrival: digest.latest_arrival,
        peers,
        connected_servers: store.connected_servers(),
    })
}

/// Runs the info command.
pub fn run(store: &Store, format: &str, out: &mut impl Write) -> CliResult<()> {
    let info = collect(store)?;
    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?,
        _ => print_text_output(&info, out)?,
    }
    Ok(())
}

fn print_text_output(info: &StoreInfo, out: &mut impl Write) -> CliResult<()> {
    writeln!(out, "SigilDB Store")?;
    writeln!(out, "=============")?;
    if let Some(path) = &info.path {
        writeln!(out, "Path:        {path}")?;
    }
    writeln!(out, "Node:        {}", info.node_id)?;
    writeln!(out, "Key hint:    {}", info.key_hint)?;
    writeln!(
        out,
        "Access:      {}{}",
        if info.writable { "read-write" } else { "read-only" },
        if info.servable { ", servable" } else { "" }
    )?;
    if let Some(server) = &info.sync_server {
        writeln!(out, "Server:      {server}")?;
    }
    writeln!(out, "Records:     {}", info.record_count)?;
    writeln!(out, "Digest:      {}", info.digest)?;
    writeln!(out)?;

    if info.peers.is_empty() {
        writeln!(out, "No peers.")?;
    } else {
        writeln!(out, "Peers:")?;
        writeln!(out, "  {:<46} {:>18} {:>18}", "Node", "Last arrival", "Horizon")?;
        for peer in &info.peers {
            writeln!(
                out,
                "  {:<46} {:>18} {:>18}",
                peer.peer_id, peer.last_arrival, peer.horizon
            )?;
        }
    }
    Ok(())
}
