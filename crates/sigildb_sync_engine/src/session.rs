//! The per-connection sync state machine.
//!
//! A [`Session`] turns inbound packets into store operations and replies.
//! It does no I/O of its own; [`run_session`](crate::run_session) drives it
//! over a framed stream.
//!
//! ```text
//! Handshake ──first authentic packet──▶ Syncing ──close / remote change──▶ Closed
//! ```

use crate::error::{SyncError, SyncResult};
use sigildb_core::{now_micros, InboundRecord, Store, StoreError, StoredRecord};
use sigildb_crypto::NodeId;
use sigildb_sync_protocol::{Envelope, InsertDocument, SyncMessage, WireRecord};
use tracing::{debug, info, warn};

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dialed out.
    Client,
    /// We accepted the connection.
    Server,
}

/// The current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first authentic packet to learn who the peer is.
    Handshake,
    /// The peer is known; records flow both ways.
    Syncing,
    /// The session ended and must not be used again.
    Closed,
}

impl SessionState {
    /// Returns true if packets can still be handled.
    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closed)
    }
}

/// Sync state for one connection to one peer.
#[derive(Debug)]
pub struct Session {
    store: Store,
    role: Role,
    state: SessionState,
    remote: Option<NodeId>,
    remote_text: String,
    server_address: Option<String>,
    initial_sync_done: bool,
    last_flush: i64,
    last_stamp: i64,
    batch_size: usize,
    handled: u64,
}

impl Session {
    /// Creates a session for `store`.
    pub fn new(store: Store, role: Role, batch_size: usize) -> Self {
        Self {
            store,
            role,
            state: SessionState::Handshake,
            remote: None,
            remote_text: String::new(),
            server_address: None,
            initial_sync_done: false,
            last_flush: 0,
            last_stamp: 0,
            batch_size: batch_size.max(1),
            handled: 0,
        }
    }

    /// Records contact times for `address` in the store's
    /// connected-servers map whenever a packet arrives.
    #[must_use]
    pub fn with_server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Returns the store this session serves.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns which end of the connection we are.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the peer's node id once known.
    pub fn remote(&self) -> Option<NodeId> {
        self.remote
    }

    /// Returns true if the peer is this store itself, opened elsewhere.
    pub fn is_self_bridge(&self) -> bool {
        self.remote == Some(self.store.node_id())
    }

    /// Highest arrival the peer is known to have asked for or been sent.
    pub fn last_flush(&self) -> i64 {
        self.last_flush
    }

    /// Number of authentic packets handled so far.
    pub fn packets_handled(&self) -> u64 {
        self.handled
    }

    /// Marks the session closed.
    pub fn close(&mut self) {
        if self.state.is_open() {
            debug!(remote = ?self.remote, "session closed");
        }
        self.state = SessionState::Closed;
    }

    /// The message a client sends first: empty, it only announces who we
    /// are through the envelope.
    pub fn greeting(&self) -> SyncMessage {
        SyncMessage::new()
    }

    /// The idle keep-alive. A server tells a client that is really this
    /// same store which servers it is connected to.
    pub fn keepalive(&self) -> SyncMessage {
        if self.role == Role::Server && self.is_self_bridge() {
            SyncMessage::new().with_connected_servers(self.store.connected_servers())
        } else {
            SyncMessage::new()
        }
    }

    /// Builds a privileged write request for the peer to apply with its
    /// own copy of the write key.
    pub fn insert_request(&self, documents: Vec<InsertDocument>) -> SyncResult<SyncMessage> {
        let proof = self.store.write_proof()?.ok_or(StoreError::Unauthorized)?;
        Ok(SyncMessage::new().with_insert(&proof, documents))
    }

    /// Seals a message for the peer.
    pub fn seal(&mut self, message: &SyncMessage) -> SyncResult<Vec<u8>> {
        // Timestamps double as nonces, so never reuse one.
        let stamp = now_micros().max(self.last_stamp + 1);
        self.last_stamp = stamp;
        Ok(Envelope::seal(
            message,
            &self.store.sync_key(),
            self.store.node_identity(),
            stamp,
        )?)
    }

    /// Opens and handles one inbound packet, returning the sealed reply.
    pub fn receive(&mut self, packet: &[u8]) -> SyncResult<Option<Vec<u8>>> {
        if !self.state.is_open() {
            return Err(SyncError::Closed);
        }
        let envelope = Envelope::open(packet, &self.store.sync_key(), now_micros())?;
        match self.handle(envelope)? {
            Some(reply) => Ok(Some(self.seal(&reply)?)),
            None => Ok(None),
        }
    }

    /// Handles an authenticated message, returning the reply if there is
    /// anything to say.
    pub fn handle(&mut self, envelope: Envelope) -> SyncResult<Option<SyncMessage>> {
        if !self.state.is_open() {
            return Err(SyncError::Closed);
        }
        self.bind(envelope.sender)?;
        self.handled += 1;
        if let Some(address) = &self.server_address {
            self.store.mark_server(address, now_micros());
        }

        let message = envelope.message;
        let mut reply = SyncMessage::new();

        if self.is_self_bridge() {
            match self.role {
                Role::Server => reply.connected_servers = Some(self.store.connected_servers()),
                Role::Client => {
                    if let Some(servers) = &message.connected_servers {
                        self.store.merge_connected_servers(servers);
                    }
                }
            }
        } else {
            if !self.initial_sync_done {
                reply.get_new_arrivals = Some(self.store.resume_point(&self.remote_text)?);
                self.initial_sync_done = true;
            }
            if let Some(after) = message.get_new_arrivals {
                self.last_flush = self.last_flush.max(after);
                let records = self.collect(after)?;
                debug!(peer = %self.remote_text, after, count = records.len(), "answering request");
                if !records.is_empty() {
                    reply.records = Some(records);
                }
                reply.records_start_from = Some(after);
            }
        }

        if let Some(documents) = &message.insert_documents {
            self.insert(&message, documents)?;
        }

        if let Some(records) = message.records.filter(|r| !r.is_empty()) {
            let inbound: Vec<InboundRecord> = records.into_iter().map(inbound).collect();
            if self.is_self_bridge() {
                self.store.relay_records(&inbound)?;
            } else {
                let outcome =
                    self.store
                        .apply_batch(&self.remote_text, &inbound, message.records_start_from)?;
                debug!(
                    peer = %self.remote_text,
                    applied = outcome.applied,
                    rejected = outcome.rejected,
                    "applied batch"
                );
                if let Some(latest) = outcome.latest {
                    reply.get_new_arrivals = Some(latest);
                }
            }
        }

        Ok((!reply.is_empty()).then_some(reply))
    }

    /// Collects records committed since the last flush for an unsolicited
    /// push. Until the peer has asked for anything, `send_after` is used as
    /// the cursor; without either nothing is sent.
    pub fn flush(&mut self, send_after: Option<i64>) -> SyncResult<Option<SyncMessage>> {
        if self.state != SessionState::Syncing {
            return Ok(None);
        }
        let cursor = if self.last_flush > 0 {
            self.last_flush
        } else {
            match send_after {
                Some(cursor) => cursor,
                None => return Ok(None),
            }
        };
        let records = self.collect(cursor)?;
        if records.is_empty() {
            return Ok(None);
        }
        debug!(peer = %self.remote_text, after = cursor, count = records.len(), "flushing");
        Ok(Some(SyncMessage::batch(records, cursor)))
    }

    fn bind(&mut self, sender: NodeId) -> SyncResult<()> {
        match self.remote {
            Some(expected) if expected != sender => {
                self.close();
                Err(SyncError::RemoteChanged {
                    expected,
                    actual: sender,
                })
            }
            Some(_) => Ok(()),
            None => {
                self.remote = Some(sender);
                self.remote_text = sender.to_string();
                self.state = SessionState::Syncing;
                info!(peer = %self.remote_text, role = ?self.role, self_bridge = self.is_self_bridge(), "session established");
                Ok(())
            }
        }
    }

    fn collect(&mut self, after: i64) -> SyncResult<Vec<WireRecord>> {
        let batch = self
            .store
            .outbound_batch(after, Some(&self.remote_text), self.batch_size)?;
        if let Some(high) = batch.high_water {
            self.last_flush = self.last_flush.max(high);
        }
        Ok(batch.records.into_iter().filter_map(outbound).collect())
    }

    fn insert(&self, message: &SyncMessage, documents: &[InsertDocument]) -> SyncResult<()> {
        let proof = message.write_proof()?.unwrap_or_default();
        if !self.store.write_proof_matches(&proof)? {
            warn!(peer = %self.remote_text, "ignoring insert without a valid write proof");
            return Ok(());
        }
        let documents: Vec<(String, Option<String>)> = documents
            .iter()
            .map(|d| (d.json.clone(), d.signature.clone()))
            .collect();
        let applied = self.store.insert_documents(&documents)?;
        info!(peer = %self.remote_text, applied, "applied privileged insert");
        Ok(())
    }
}

fn inbound(record: WireRecord) -> InboundRecord {
    InboundRecord {
        json: record.json,
        signature: record.signature,
        arrival: record.arrival,
    }
}

fn outbound(record: StoredRecord) -> Option<WireRecord> {
    Some(WireRecord {
        signature: record.signature?,
        json: record.json,
        arrival: record.arrival,
    })
}
