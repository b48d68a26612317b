//! Length-delimited framing and the session driver.
//!
//! Each frame is a 4-byte big-endian length followed by one envelope. The
//! driver owns the stream; store work happens on the blocking pool so the
//! I/O loop never waits on SQLite.

use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::{Role, Session};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sigildb_sync_protocol::SyncMessage;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A byte stream split into envelopes.
pub type PacketStream<S> = Framed<S, LengthDelimitedCodec>;

/// Wraps a stream in the sync framing.
pub fn framed<S>(io: S) -> PacketStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    Framed::new(
        io,
        LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec(),
    )
}

/// A session shared between the driver and blocking store work.
pub type SharedSession = Arc<Mutex<Session>>;

/// Runs `session` over `stream` until the peer hangs up, the store is
/// closed or a fatal error occurs.
///
/// `first_frame` is a packet the caller already read, typically to route
/// the connection. Messages queued on `outbox` are sealed and forwarded;
/// the receiver is borrowed so that a reconnecting caller keeps its queue.
pub async fn run_session<S>(
    mut stream: PacketStream<S>,
    session: SharedSession,
    config: &SessionConfig,
    first_frame: Option<Bytes>,
    outbox: &mut mpsc::UnboundedReceiver<SyncMessage>,
) -> SyncResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (store, role) = {
        let session = session.lock();
        (session.store().clone(), session.role())
    };

    let (commit_tx, mut commits) = mpsc::unbounded_channel();
    store.on_commit(move |notice| commit_tx.send(*notice).is_ok());

    if role == Role::Client {
        let greeting = session.lock().greeting();
        send(&mut stream, &session, greeting).await?;
    }
    if let Some(frame) = first_frame {
        receive(&mut stream, &session, frame).await?;
    }

    let mut keepalive = interval(config.client_keepalive.min(config.server_keepalive));
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.reset();
    let mut poll = interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_keepalive = Instant::now();

    let result = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                None => break Ok(()),
                Some(Err(err)) => break Err(SyncError::from(err)),
                Some(Ok(frame)) => {
                    if let Err(err) = receive(&mut stream, &session, frame.freeze()).await {
                        break Err(err);
                    }
                }
            },
            Some(notice) = commits.recv() => {
                if let Err(err) = flush(&mut stream, &session, notice.send_after).await {
                    break Err(err);
                }
            },
            Some(message) = outbox.recv() => {
                if let Err(err) = send(&mut stream, &session, message).await {
                    break Err(err);
                }
            },
            _ = keepalive.tick() => {
                let period = {
                    let session = session.lock();
                    if session.role() == Role::Client || session.is_self_bridge() {
                        config.client_keepalive
                    } else {
                        config.server_keepalive
                    }
                };
                if last_keepalive.elapsed() >= period {
                    last_keepalive = Instant::now();
                    let message = session.lock().keepalive();
                    if let Err(err) = send(&mut stream, &session, message).await {
                        break Err(err);
                    }
                    if let Err(err) = flush(&mut stream, &session, None).await {
                        break Err(err);
                    }
                }
            },
            _ = poll.tick() => {
                if store.is_closed() {
                    break Ok(());
                }
            },
        }
    };

    session.lock().close();
    result
}

async fn receive<S>(stream: &mut PacketStream<S>, session: &SharedSession, frame: Bytes) -> SyncResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let worker = Arc::clone(session);
    let reply = tokio::task::spawn_blocking(move || worker.lock().receive(&frame)).await?;
    match reply {
        Ok(Some(packet)) => {
            stream.send(Bytes::from(packet)).await?;
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) if err.ends_session() => Err(err),
        Err(err) => {
            warn!(error = %err, "dropped packet");
            Ok(())
        }
    }
}

async fn flush<S>(stream: &mut PacketStream<S>, session: &SharedSession, send_after: Option<i64>) -> SyncResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let worker = Arc::clone(session);
    let packet = tokio::task::spawn_blocking(move || {
        let mut session = worker.lock();
        match session.flush(send_after)? {
            Some(message) => session.seal(&message).map(Some),
            None => Ok(None),
        }
    })
    .await??;
    if let Some(packet) = packet {
        debug!(bytes = packet.len(), "pushing committed records");
        stream.send(Bytes::from(packet)).await?;
    }
    Ok(())
}

async fn send<S>(stream: &mut PacketStream<S>, session: &SharedSession, message: SyncMessage) -> SyncResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let packet = session.lock().seal(&message)?;
    stream.send(Bytes::from(packet)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigildb_codec::json;
    use sigildb_core::{Config, Store};
    use sigildb_crypto::KeyPair;
    use std::time::Duration;

    fn quick() -> SessionConfig {
        SessionConfig::new().with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn sessions_over_a_duplex_pipe_converge() {
        let keys = KeyPair::generate();
        let a = Store::open_in_memory(Config::new().keys(keys.clone())).unwrap();
        let b = Store::open_in_memory(Config::new().keys(keys)).unwrap();
        let id = a.set_document(json!({"type": "note", "title": "hello"})).unwrap();
        a.commit().unwrap();

        let (left, right) = tokio::io::duplex(64 * 1024);
        let client = Arc::new(Mutex::new(Session::new(a.clone(), Role::Client, 100)));
        let server = Arc::new(Mutex::new(Session::new(b.clone(), Role::Server, 100)));
        let (_keep_a, mut outbox_a) = mpsc::unbounded_channel();
        let (_keep_b, mut outbox_b) = mpsc::unbounded_channel();
        let config = quick();

        let config_a = config.clone();
        let task_a = tokio::spawn(async move {
            run_session(framed(left), client, &config_a, None, &mut outbox_a).await
        });
        let task_b = tokio::spawn(async move {
            run_session(framed(right), server, &config, None, &mut outbox_b).await
        });

        let mut found = false;
        for _ in 0..100 {
            if b.get_document_by_id(&id.to_string()).unwrap().is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(found, "record never arrived");

        // Writes after the handshake are pushed on commit.
        let later = b.set_document(json!({"type": "note", "title": "reply"})).unwrap();
        b.commit().unwrap();
        let mut found = false;
        for _ in 0..100 {
            if a.get_document_by_id(&later.to_string()).unwrap().is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(found, "pushed record never arrived");

        a.close();
        assert!(task_a.await.unwrap().is_ok());
        task_b.await.unwrap().ok();
    }

    #[tokio::test]
    async fn garbage_frames_are_dropped_not_fatal() {
        let store = Store::open_in_memory(Config::new().keys(KeyPair::generate())).unwrap();
        let (left, right) = tokio::io::duplex(4096);
        let session = Arc::new(Mutex::new(Session::new(store.clone(), Role::Server, 100)));
        let (_keep, mut outbox) = mpsc::unbounded_channel();
        let config = quick();
        let task = tokio::spawn(async move {
            run_session(framed(right), session, &config, None, &mut outbox).await
        });

        let mut peer = framed(left);
        peer.send(Bytes::from_static(b"not an envelope")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        drop(peer);
        assert!(task.await.unwrap().is_ok());
    }
}
