//! Serve and sync commands.

use crate::error::{CliError, CliResult};
use sigildb_core::Store;
use sigildb_sync_engine::{ClientHandle, RetryConfig, SyncClient};
use sigildb_sync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use tracing::info;

/// Hosts `store` on `bind` until interrupted.
///
/// If the store names an upstream server, a client session to it runs
/// alongside so this node relays between the two.
pub async fn serve(store: Store, bind: SocketAddr, max_connections: usize) -> CliResult<()> {
    let server = SyncServer::new(ServerConfig::new(bind).with_max_connections(max_connections));
    let hint = server.register(store.clone())?;
    let handle = server.spawn().await?;
    println!("serving {hint} on {}", handle.local_addr());

    let upstream = store.sync_server().map(|address| dial(&store, address));

    tokio::signal::ctrl_c().await?;
    info!("interrupted");
    if let Some(upstream) = upstream {
        upstream.stop();
    }
    handle.shutdown();
    handle.join().await?;
    store.close();
    Ok(())
}

/// Keeps `store` synced with `address` (or the configured server) until
/// interrupted or retries run out.
pub async fn sync(store: Store, address: Option<String>, max_attempts: Option<u32>) -> CliResult<()> {
    let address = address
        .or_else(|| store.sync_server())
        .ok_or_else(|| CliError::usage("no server given and none configured (see `sigildb init --server`)"))?;
    let mut retry = RetryConfig::new().with_jitter(true);
    if let Some(attempts) = max_attempts {
        retry = retry.with_max_attempts(attempts);
    }
    println!("syncing {} with {address}", store.sync_key().key_hint());
    let handle = SyncClient::new(store.clone(), address).with_retry(retry).spawn();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted");
        }
        result = handle.join() => {
            store.close();
            return result.map_err(CliError::from);
        }
    }
    store.close();
    Ok(())
}

fn dial(store: &Store, address: String) -> ClientHandle {
    info!(server = %address, "connecting upstream");
    SyncClient::new(store.clone(), address)
        .with_retry(RetryConfig::new().with_jitter(true))
        .spawn()
}
