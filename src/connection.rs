/*!
 * @file connection.rs
 * @brief Request Multiplexer: one socket, one in-flight map, full duplex
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use bson::{doc, Document};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};

use crate::auth;
use crate::commands;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::namespace::{Database, Namespace};
use crate::oid::ObjectIdGenerator;
use crate::wire::header::{Header, OP_REPLY};
use crate::wire::{op_msg, op_query, op_reply, Frame, DEFAULT_MAX_BSON_OBJECT_SIZE};
use crate::{fauxdb_client_debug, fauxdb_client_error, fauxdb_client_info, fauxdb_client_warn};

/// Single self-description of the socket this connection owns, learned
/// from the `isMaster`/`hello` handshake reply. Not topology discovery:
/// this connection never looks past its own socket.
#[derive(Debug, Clone, Copy)]
pub struct ServerDescription {
    pub is_master: bool,
    pub max_wire_version: i32,
    pub max_bson_object_size: i64,
    pub max_message_size_bytes: i64,
    pub max_write_batch_size: i64,
}

impl Default for ServerDescription {
    fn default() -> Self {
        Self {
            is_master: false,
            max_wire_version: 0,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE,
            max_message_size_bytes: 48 * 1024 * 1024,
            max_write_batch_size: 100_000,
        }
    }
}

type Awaiter = oneshot::Sender<std::result::Result<Document, String>>;

/// Request-id counter and in-flight map, guarded by one lock so
/// allocation and registration are a single critical section.
struct Dispatch {
    next_request_id: i32,
    in_flight: HashMap<i32, Awaiter>,
}

impl Dispatch {
    fn new() -> Self {
        Self {
            next_request_id: 1,
            in_flight: HashMap::new(),
        }
    }

    fn allocate_and_register(&mut self) -> (i32, oneshot::Receiver<std::result::Result<Document, String>>) {
        let id = self.next_request_id;
        self.next_request_id = if id == i32::MAX { 1 } else { id + 1 };
        let (tx, rx) = oneshot::channel();
        self.in_flight.insert(id, tx);
        (id, rx)
    }

    fn complete(&mut self, response_to: i32, payload: std::result::Result<Document, String>) {
        if let Some(tx) = self.in_flight.remove(&response_to) {
            let _ = tx.send(payload);
        }
    }

    fn drain_with_error(&mut self, reason: &str) {
        for (_, tx) in self.in_flight.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

pub(crate) struct PendingKill {
    pub namespace: Namespace,
    pub cursor_id: i64,
}

/// Owns the socket, the request-id/in-flight bookkeeping, the per-
/// connection ObjectId generator, and the cursor reaper channel.
pub struct Connection {
    write_half: TokioMutex<OwnedWriteHalf>,
    dispatch: TokioMutex<Dispatch>,
    terminal: StdMutex<Option<String>>,
    authenticated: AtomicBool,
    use_op_msg: AtomicBool,
    server: StdMutex<ServerDescription>,
    oids: ObjectIdGenerator,
    kill_tx: mpsc::UnboundedSender<PendingKill>,
}

impl Connection {
    /// Opens a socket, starts the reader and cursor-reaper background
    /// tasks, runs the `isMaster` handshake, and authenticates if a
    /// credential is configured.
    pub async fn dial(config: &ConnectionConfig) -> Result<Arc<Connection>> {
        fauxdb_client_info!("connecting to {}", config.address());
        let stream = TcpStream::connect(config.address()).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();

        let connection = Arc::new_cyclic(|weak: &Weak<Connection>| {
            spawn_reader(weak.clone(), read_half);
            spawn_reaper(weak.clone(), kill_rx);

            Connection {
                write_half: TokioMutex::new(write_half),
                dispatch: TokioMutex::new(Dispatch::new()),
                terminal: StdMutex::new(None),
                authenticated: AtomicBool::new(false),
                use_op_msg: AtomicBool::new(config.use_op_msg),
                server: StdMutex::new(ServerDescription::default()),
                oids: ObjectIdGenerator::new(),
                kill_tx,
            }
        });

        let handshake_reply = connection.send_command("admin", doc! { "isMaster": 1 }).await?;
        let description = parse_server_description(&handshake_reply);
        *connection.server.lock().unwrap() = description;
        fauxdb_client_debug!(
            "handshake complete: maxWireVersion={} maxBsonObjectSize={}",
            description.max_wire_version,
            description.max_bson_object_size
        );

        if let Some(credential) = &config.auth {
            auth::authenticate(&connection, credential).await?;
            connection.authenticated.store(true, Ordering::SeqCst);
        }

        Ok(connection)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn server_description(&self) -> ServerDescription {
        *self.server.lock().unwrap()
    }

    pub fn database(self: &Arc<Self>, name: impl Into<String>) -> Database {
        Database::new(self.clone(), name)
    }

    /// Generates the next `ObjectId` from this connection's generator,
    /// for callers assembling documents that need a client-side `_id`.
    pub fn generate_object_id(&self) -> crate::oid::ObjectId {
        self.oids.generate()
    }

    /// Queues a `killCursors` for a cursor abandoned without a clean
    /// `close()` (typically from `Drop`). Non-blocking; the reaper task
    /// does the actual I/O and any failure is logged, never surfaced.
    pub(crate) fn schedule_kill(&self, namespace: Namespace, cursor_id: i64) {
        if self.kill_tx.send(PendingKill { namespace, cursor_id }).is_err() {
            fauxdb_client_warn!("cursor reaper channel closed; cursor {} leaked", cursor_id);
        }
    }

    /// Allocates a request id, registers an awaiter, serializes,
    /// writes, and awaits the reply. `command` must not already carry
    /// `$db`.
    pub async fn run_command(&self, db: &str, mut command: Document) -> Result<Document> {
        if let Some(reason) = self.terminal.lock().unwrap().clone() {
            return Err(Error::ConnectionClosed(reason));
        }

        let use_op_msg = self.use_op_msg.load(Ordering::SeqCst);

        let (request_id, receiver) = {
            let mut dispatch = self.dispatch.lock().await;
            dispatch.allocate_and_register()
        };

        let frame = if use_op_msg {
            command.insert("$db", db);
            op_msg::encode(request_id, &command)?
        } else {
            op_query::encode(request_id, &Namespace::command(db).full_name(), &command)?
        };

        fauxdb_client_debug!("-> request {} ({} bytes)", request_id, frame.len());

        {
            let mut write_half = self.write_half.lock().await;
            if let Err(e) = write_half.write_all(&frame).await {
                let reason = format!("write failed: {e}");
                self.terminate(reason.clone()).await;
                return Err(Error::ConnectionClosed(reason));
            }
        }

        match receiver.await {
            Ok(Ok(document)) => Ok(document),
            Ok(Err(reason)) => Err(Error::ConnectionClosed(reason)),
            Err(_) => Err(Error::ConnectionClosed(
                "connection terminated before a reply arrived".to_string(),
            )),
        }
    }

    /// Alias kept for readability at call sites that dispatch a command
    /// rather than run one through the typed command layer.
    pub async fn send_command(&self, db: &str, command: Document) -> Result<Document> {
        self.run_command(db, command).await
    }

    async fn terminate(&self, reason: String) {
        let mut terminal = self.terminal.lock().unwrap();
        if terminal.is_some() {
            return;
        }
        fauxdb_client_error!("connection terminated: {}", reason);
        *terminal = Some(reason.clone());
        drop(terminal);

        let mut dispatch = self.dispatch.lock().await;
        dispatch.drain_with_error(&reason);
    }
}

fn parse_server_description(reply: &Document) -> ServerDescription {
    let mut description = ServerDescription::default();
    description.is_master = reply
        .get_bool("ismaster")
        .or_else(|_| reply.get_bool("isWritablePrimary"))
        .unwrap_or(false);
    if let Ok(v) = reply.get_i32("maxWireVersion") {
        description.max_wire_version = v;
    }
    if let Ok(v) = reply.get_i64("maxBsonObjectSize") {
        description.max_bson_object_size = v;
    } else if let Ok(v) = reply.get_i32("maxBsonObjectSize") {
        description.max_bson_object_size = v as i64;
    }
    if let Ok(v) = reply.get_i64("maxMessageSizeBytes") {
        description.max_message_size_bytes = v;
    } else if let Ok(v) = reply.get_i32("maxMessageSizeBytes") {
        description.max_message_size_bytes = v as i64;
    }
    if let Ok(v) = reply.get_i64("maxWriteBatchSize") {
        description.max_write_batch_size = v;
    } else if let Ok(v) = reply.get_i32("maxWriteBatchSize") {
        description.max_write_batch_size = v as i64;
    }
    description
}

fn spawn_reader(connection: Weak<Connection>, read_half: OwnedReadHalf) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut header_buf = [0u8; 16];

        loop {
            if let Err(e) = reader.read_exact(&mut header_buf).await {
                if let Some(conn) = connection.upgrade() {
                    conn.terminate(format!("socket read failed: {e}")).await;
                }
                break;
            }

            let header = match Header::parse(&header_buf) {
                Ok(h) => h,
                Err(e) => {
                    if let Some(conn) = connection.upgrade() {
                        conn.terminate(e.to_string()).await;
                    }
                    break;
                }
            };

            let mut body = vec![0u8; header.body_len()];
            if let Err(e) = reader.read_exact(&mut body).await {
                if let Some(conn) = connection.upgrade() {
                    conn.terminate(format!("socket read failed: {e}")).await;
                }
                break;
            }

            let frame = Frame { header, body };
            let max_size = connection
                .upgrade()
                .map(|c| c.server_description().max_bson_object_size)
                .unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE);
            if let Err(e) = frame.check_size(max_size) {
                if let Some(conn) = connection.upgrade() {
                    conn.terminate(e.to_string()).await;
                }
                break;
            }

            let document = match frame.header.op_code {
                OP_REPLY => op_reply::parse(&frame.body).map(|r| r.documents.into_iter().next()),
                crate::wire::OP_MSG => op_msg::parse(&frame.body).map(|m| Some(m.body)),
                other => Err(Error::Protocol(format!("unsupported reply opcode {other}"))),
            };

            let conn = match connection.upgrade() {
                Some(c) => c,
                None => break,
            };

            match document {
                Ok(Some(doc)) => {
                    fauxdb_client_debug!("<- response {} ({} bytes)", frame.header.response_to, frame.header.message_length);
                    let mut dispatch = conn.dispatch.lock().await;
                    dispatch.complete(frame.header.response_to, Ok(doc));
                }
                Ok(None) => {
                    let mut dispatch = conn.dispatch.lock().await;
                    dispatch.complete(
                        frame.header.response_to,
                        Err("reply carried no document".to_string()),
                    );
                }
                Err(e) => {
                    conn.terminate(e.to_string()).await;
                    break;
                }
            }
        }
    });
}

fn spawn_reaper(connection: Weak<Connection>, mut kill_rx: mpsc::UnboundedReceiver<PendingKill>) {
    tokio::spawn(async move {
        while let Some(pending) = kill_rx.recv().await {
            let conn = match connection.upgrade() {
                Some(c) => c,
                None => break,
            };
            let command = commands::kill_cursors_document(&pending.namespace.collection, pending.cursor_id);
            match conn.run_command(&pending.namespace.database, command).await {
                Ok(_) => fauxdb_client_debug!("reaped cursor {}", pending.cursor_id),
                Err(e) => fauxdb_client_warn!("killCursors failed for cursor {}: {}", pending.cursor_id, e),
            }
        }
    });
}
