//! Coordination transport: TCP accept loop, per-connection reader and writer tasks, tick loop.
//! Frames are 4-byte LE length + JSON (see swarm_core::wire).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::wire::{decode_payload, frame_len, LEN_SIZE};
use swarm_core::{
    encode_frame, ConnectionId, FileLookup, FileService, FrameDecodeError, Message,
    OutboundAction, SwarmCore,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

type Senders = Arc<Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outgoing>>>>;

/// State shared by every connection task, the tick loop and the status page.
/// Lock order: `core` before `senders`.
#[derive(Clone)]
pub struct Shared {
    pub core: Arc<Mutex<SwarmCore>>,
    files: Arc<dyn FileService>,
    senders: Senders,
}

impl Shared {
    pub fn new(core: SwarmCore) -> Self {
        let files = core.file_service();
        Self {
            core: Arc::new(Mutex::new(core)),
            files,
            senders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue actions on the connections' writers. Called with the core lock held so
    /// messages reach each connection in the order the core produced them.
    async fn deliver(&self, actions: Vec<OutboundAction>) {
        if actions.is_empty() {
            return;
        }
        let senders = self.senders.lock().await;
        for action in actions {
            let (conn, out) = match action {
                OutboundAction::SendMessage(conn, msg) => match encode_frame(&msg) {
                    Ok(frame) => (conn, Outgoing::Frame(frame)),
                    Err(e) => {
                        tracing::warn!(%conn, kind = msg.kind(), error = %e, "dropping unencodable message");
                        continue;
                    }
                },
                OutboundAction::Close(conn) => (conn, Outgoing::Close),
            };
            if let Some(tx) = senders.get(&conn) {
                let _ = tx.send(out);
            }
        }
    }

    /// Resolve file lookups on a blocking thread, then dispatch under the lock.
    /// Returns `true` when the message ended the session and nothing more may be read.
    async fn handle_message(&self, conn: ConnectionId, msg: Message) -> bool {
        let files = self.files.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            let lookup = FileLookup::resolve(files.as_ref(), &msg);
            (msg, lookup)
        })
        .await;
        let (msg, lookup) = match resolved {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(%conn, error = %e, "file lookup task failed");
                return false;
            }
        };

        let kind = msg.kind();
        let mut core = self.core.lock().await;
        let (actions, fatal) = match core.on_resolved_message(conn, msg, lookup) {
            Ok(actions) => (actions, false),
            Err(err) => {
                tracing::warn!(%conn, kind, %err, "protocol violation");
                let mut actions = vec![OutboundAction::SendMessage(conn, err.to_message())];
                let fatal = err.is_fatal();
                if fatal {
                    actions.push(OutboundAction::Close(conn));
                }
                (actions, fatal)
            }
        };
        self.deliver(actions).await;
        fatal
    }

    /// One periodic pass: stall sweep and scheduler retry.
    pub async fn tick(&self) {
        let mut core = self.core.lock().await;
        let actions = core.tick();
        self.deliver(actions).await;
    }
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
}

/// Accept coordination connections until the listener fails.
pub async fn serve(listener: TcpListener, shared: Shared) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            run_connection(stream, addr, shared).await;
        });
    }
}

/// Tick the core every `interval` forever.
pub async fn run_ticks(shared: Shared, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        shared.tick().await;
    }
}

async fn run_connection(stream: TcpStream, addr: SocketAddr, shared: Shared) {
    let _ = stream.set_nodelay(true);
    let (tx, rx) = mpsc::unbounded_channel::<Outgoing>();
    let closed = Arc::new(Notify::new());
    let conn = {
        let mut core = shared.core.lock().await;
        let conn = core.on_connect(addr);
        shared.senders.lock().await.insert(conn, tx);
        conn
    };

    let (mut reader, writer) = stream.into_split();
    tokio::spawn(write_loop(conn, writer, rx, closed.clone()));

    loop {
        let read = tokio::select! {
            _ = closed.notified() => break,
            read = read_message(&mut reader) => read,
        };
        match read {
            Ok(Some(msg)) => {
                tracing::trace!(%conn, kind = msg.kind(), "received");
                // frames already buffered behind a fatal one are never dispatched
                if shared.handle_message(conn, msg).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(ReadError::Io(e)) => {
                tracing::debug!(%conn, error = %e, "read failed");
                break;
            }
            Err(ReadError::Frame(e)) => {
                tracing::warn!(%conn, error = %e, "bad frame");
                let message = match e {
                    FrameDecodeError::Decode(e) => format!("Unhandled message type: {e}"),
                    other => other.to_string(),
                };
                let _core = shared.core.lock().await;
                shared
                    .deliver(vec![
                        OutboundAction::SendMessage(conn, Message::ProtocolError { message }),
                        OutboundAction::Close(conn),
                    ])
                    .await;
                break;
            }
        }
    }

    // Writer drains whatever is queued, then exits once its sender is gone.
    let mut core = shared.core.lock().await;
    shared.senders.lock().await.remove(&conn);
    let actions = core.on_disconnect(conn);
    shared.deliver(actions).await;
}

/// Next message, or `None` on clean end of stream.
async fn read_message(reader: &mut OwnedReadHalf) -> Result<Option<Message>, ReadError> {
    let mut header = [0u8; LEN_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = frame_len(header)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(decode_payload(&payload)?))
}

async fn write_loop(
    conn: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    closed: Arc<Notify>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outgoing::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!(%conn, error = %e, "write failed");
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = writer.shutdown().await;
    closed.notify_one();
}
