//! End-to-end sync between clients and a server over loopback TCP.

use sigildb_codec::json;
use sigildb_core::{Config, Lookup, Store};
use sigildb_crypto::KeyPair;
use sigildb_sync_engine::{RetryConfig, SessionConfig, SyncClient};
use sigildb_sync_protocol::InsertDocument;
use sigildb_sync_server::{ServerConfig, ServerHandle, SyncServer};
use sigildb_testkit::prelude::*;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn session_config() -> SessionConfig {
    SessionConfig::new()
        .with_client_keepalive(Duration::from_millis(100))
        .with_server_keepalive(Duration::from_millis(100))
        .with_poll_interval(Duration::from_millis(20))
}

fn retry() -> RetryConfig {
    RetryConfig::new()
        .with_initial_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(200))
}

async fn serve(stores: &[&Store]) -> ServerHandle {
    let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_session_config(session_config());
    let server = SyncServer::new(config);
    for store in stores {
        server.register((*store).clone()).unwrap();
    }
    server.spawn().await.unwrap()
}

fn client(store: &Store, server: &ServerHandle) -> SyncClient {
    SyncClient::new(store.clone(), server.local_addr().to_string())
        .with_session_config(session_config())
        .with_retry(retry())
}

#[tokio::test]
async fn client_and_server_converge() {
    let (hub, phone) = paired_stores();
    let on_hub = hub.set_document(json!({"type": "note", "title": "from hub"})).unwrap();
    hub.commit().unwrap();
    let on_phone = phone.set_document(json!({"type": "note", "title": "from phone"})).unwrap();
    phone.commit().unwrap();

    let server = serve(&[&hub.store]).await;
    let handle = client(&phone, &server).spawn();

    assert!(wait_for_document(&phone, &on_hub.to_string(), WAIT).await);
    assert!(wait_for_document(&hub, &on_phone.to_string(), WAIT).await);
    assert!(wait_converged(&hub, &phone, WAIT).await);

    // Later writes are pushed without a new handshake.
    let later = phone.set_document(json!({"type": "note", "title": "later"})).unwrap();
    phone.commit().unwrap();
    assert!(wait_for_document(&hub, &later.to_string(), WAIT).await);

    handle.stop();
    server.shutdown();
}

#[tokio::test]
async fn burns_reach_every_replica() {
    let keys = KeyPair::generate();
    let hub = TestStore::memory_with(keys.clone());
    let alice = TestStore::memory_with(keys.clone());
    let bob = TestStore::memory_with(keys);

    alice.set_document(json!({"id": "thread", "type": "post", "title": "thread"})).unwrap();
    alice.set_document(json!({"id": "reply", "type": "post", "parent": "thread"})).unwrap();
    alice.commit().unwrap();

    let server = serve(&[&hub.store]).await;
    let a = client(&alice, &server).spawn();
    let b = client(&bob, &server).spawn();
    assert!(wait_for_document(&bob, "reply", WAIT).await);

    alice.delete_document("thread", true).unwrap();
    alice.commit().unwrap();

    assert!(
        eventually(WAIT, || {
            bob.get_document_by_id("reply").unwrap().is_none()
                && bob
                    .get_document("thread", Lookup::AllowOrphans)
                    .unwrap()
                    .is_some_and(|doc| doc.is_tombstone())
        })
        .await,
        "burn never reached bob"
    );
    assert!(wait_converged(&alice, &bob, WAIT).await);

    a.stop();
    b.stop();
    server.shutdown();
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let (hub, phone) = paired_stores();
    let server = serve(&[&hub.store]).await;
    let address = server.local_addr();
    let handle = client(&phone, &server).spawn();

    let first = hub.set_document(json!({"type": "note", "title": "before"})).unwrap();
    hub.commit().unwrap();
    assert!(wait_for_document(&phone, &first.to_string(), WAIT).await);

    server.shutdown();
    server.join().await.unwrap();
    assert!(
        eventually(WAIT, || phone.connected_servers().get(&address.to_string()) == Some(&-1)).await,
        "client never noticed the restart"
    );

    let second = hub.set_document(json!({"type": "note", "title": "while down"})).unwrap();
    hub.commit().unwrap();

    let config = ServerConfig::new(address).with_session_config(session_config());
    let restarted = SyncServer::new(config);
    restarted.register(hub.store.clone()).unwrap();
    let restarted = restarted.spawn().await.unwrap();

    assert!(wait_for_document(&phone, &second.to_string(), WAIT).await);
    assert!(
        eventually(WAIT, || {
            phone
                .connected_servers()
                .get(&address.to_string())
                .is_some_and(|seen| *seen > 0)
        })
        .await
    );

    handle.stop();
    restarted.shutdown();
}

#[tokio::test]
async fn privileged_insert_is_signed_by_the_server() {
    let (hub, phone) = paired_stores();
    let server = serve(&[&hub.store]).await;
    let handle = client(&phone, &server).spawn();

    let id = sigildb_codec::DocId::from_seed("pinned");
    let json = json!({"id": id.to_string(), "type": "note", "title": "pinned"}).to_string();
    handle
        .insert_documents(vec![InsertDocument {
            json,
            signature: None,
        }])
        .unwrap();

    assert!(wait_for_document(&hub, &id.to_string(), WAIT).await);
    assert!(wait_for_document(&phone, &id.to_string(), WAIT).await);

    handle.stop();
    server.shutdown();
}

#[tokio::test]
async fn read_only_replica_cannot_insert() {
    let hub = TestStore::memory();
    let viewer = read_only_replica(&hub);
    let server = serve(&[&hub.store]).await;
    let handle = client(&viewer, &server).spawn();

    let result = handle.insert_documents(vec![InsertDocument {
        json: json!({"type": "note"}).to_string(),
        signature: None,
    }]);
    assert!(result.is_err());

    handle.stop();
    server.shutdown();
}

#[tokio::test]
async fn one_port_routes_by_sync_key() {
    let (notes, notes_copy) = paired_stores();
    let (tasks, tasks_copy) = paired_stores();
    let note = notes.set_document(json!({"type": "note"})).unwrap();
    notes.commit().unwrap();
    let task = tasks.set_document(json!({"type": "task"})).unwrap();
    tasks.commit().unwrap();

    let server = serve(&[&notes.store, &tasks.store]).await;
    assert_eq!(server.registry().len(), 2);
    let a = client(&notes_copy, &server).spawn();
    let b = client(&tasks_copy, &server).spawn();

    assert!(wait_for_document(&notes_copy, &note.to_string(), WAIT).await);
    assert!(wait_for_document(&tasks_copy, &task.to_string(), WAIT).await);
    assert!(notes_copy.get_document_by_id(&task.to_string()).unwrap().is_none());
    assert!(tasks_copy.get_document_by_id(&note.to_string()).unwrap().is_none());

    a.stop();
    b.stop();
    server.shutdown();
}

#[tokio::test]
async fn unknown_store_gives_up_without_retry() {
    let hub = TestStore::memory();
    let stranger = TestStore::memory();
    let server = serve(&[&hub.store]).await;

    let client = SyncClient::new(stranger.store.clone(), server.local_addr().to_string())
        .with_session_config(session_config())
        .with_retry(RetryConfig::no_retry());
    let (_keep, mut outbox) = tokio::sync::mpsc::unbounded_channel();
    // The server hangs up without a word; a reset is as good as a clean close.
    if let Ok(handled) = within(WAIT, client.connect_once(&mut outbox)).await {
        assert_eq!(handled, 0);
    }

    assert!(within(WAIT, client.spawn().join()).await.is_err());
    server.shutdown();
}

#[tokio::test]
async fn self_bridge_shares_connected_servers() {
    let keys = KeyPair::generate();
    let upstream_store = TestStore::memory_with(keys.clone());
    let upstream = serve(&[&upstream_store.store]).await;

    // The hub dials upstream and also accepts connections.
    let hub = TestStore::file_with(keys.clone());
    let hub_client = client(&hub, &upstream).spawn();
    let upstream_address = upstream.local_addr().to_string();
    assert!(
        eventually(WAIT, || hub
            .connected_servers()
            .get(&upstream_address)
            .is_some_and(|seen| *seen > 0))
        .await
    );
    let hub_server = serve(&[&hub.store]).await;

    // A second handle on the same file is the same node.
    let path = hub.path().unwrap();
    let local = Store::open_with_config(&path, Config::new().keys(keys).node_secret(TEST_NODE_SECRET)).unwrap();
    assert_eq!(local.node_id(), hub.node_id());
    let bridge = client(&local, &hub_server).spawn();

    assert!(
        eventually(WAIT, || local.connected_servers().contains_key(&upstream_address)).await,
        "connected servers never crossed the bridge"
    );

    bridge.stop();
    hub_client.stop();
    hub_server.shutdown();
    upstream.shutdown();
    local.close();
}
