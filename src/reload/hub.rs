//! Single-writer broadcast hub.
//!
//! One task owns the connection set and drains one command mailbox
//! (register / unregister / broadcast / shutdown), so membership changes and
//! fan-out never race against concurrent iteration. Client sockets are
//! polled for keepalive/close traffic from the same task.
//!
//! A write failure marks only that connection for removal - delivery to the
//! rest always proceeds.

use std::net::TcpStream;
use std::time::Duration;

use tokio::sync::mpsc;
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use super::message::ReloadMessage;

/// How often the owner task polls client sockets for close/keepalive.
const CLIENT_POLL: Duration = Duration::from_millis(100);

/// Commands accepted by the hub mailbox.
pub enum HubMsg {
    /// Adopt a freshly handshaken connection
    Register(WebSocket<TcpStream>),
    /// Drop a connection by id
    Unregister(u64),
    /// Fan a message out to every connection
    Broadcast(ReloadMessage),
    /// Close everything and stop
    Shutdown,
}

impl std::fmt::Debug for HubMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(_) => write!(f, "Register"),
            Self::Unregister(id) => write!(f, "Unregister({id})"),
            Self::Broadcast(msg) => write!(f, "Broadcast({msg:?})"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Cloneable handle for talking to the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubMsg>,
}

impl HubHandle {
    /// Broadcast a message to all connected browsers (fire-and-forget).
    pub fn broadcast(&self, msg: ReloadMessage) {
        if self.tx.try_send(HubMsg::Broadcast(msg)).is_err() {
            crate::debug!("reload"; "hub mailbox unavailable, message dropped");
        }
    }

    /// Register a connection from the accept loop (blocking context).
    pub fn register(&self, ws: WebSocket<TcpStream>) -> bool {
        self.tx.blocking_send(HubMsg::Register(ws)).is_ok()
    }

    /// Drop a connection by id.
    pub fn unregister(&self, id: u64) {
        let _ = self.tx.try_send(HubMsg::Unregister(id));
    }

    /// Ask the hub to close all connections and stop.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(HubMsg::Shutdown);
    }
}

/// One adopted connection.
struct Client {
    id: u64,
    ws: WebSocket<TcpStream>,
}

/// The single-writer hub task.
pub struct ReloadHub {
    rx: mpsc::Receiver<HubMsg>,
    clients: Vec<Client>,
    next_id: u64,
    /// Last error broadcast, replayed to newly connected clients so a
    /// browser opened mid-failure still shows the overlay.
    pending_error: Option<ReloadMessage>,
}

impl ReloadHub {
    /// Create the hub and its handle.
    pub fn new() -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                rx,
                clients: Vec::new(),
                next_id: 0,
                pending_error: None,
            },
            HubHandle { tx },
        )
    }

    /// Run the owner task until shutdown.
    pub async fn run(mut self) {
        let mut poll = tokio::time::interval(CLIENT_POLL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => {
                            if !self.handle(msg) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = poll.tick() => self.poll_clients(),
            }
        }

        for mut client in self.clients.drain(..) {
            let _ = client.ws.close(None);
        }
        crate::debug!("reload"; "hub stopped");
    }

    /// Process one command. Returns false on shutdown.
    fn handle(&mut self, msg: HubMsg) -> bool {
        match msg {
            HubMsg::Register(ws) => self.add_client(ws),
            HubMsg::Unregister(id) => {
                self.clients.retain(|c| c.id != id);
            }
            HubMsg::Broadcast(msg) => {
                // Track overlay state for late joiners
                match &msg {
                    ReloadMessage::Error { .. } => self.pending_error = Some(msg.clone()),
                    ReloadMessage::Success { .. } | ReloadMessage::Reload { .. } => {
                        self.pending_error = None;
                    }
                    ReloadMessage::Building { .. } => {}
                }
                self.broadcast(&msg);
            }
            HubMsg::Shutdown => return false,
        }
        true
    }

    /// Adopt a connection, replaying any pending error overlay.
    fn add_client(&mut self, mut ws: WebSocket<TcpStream>) {
        // Non-blocking from here on: the owner task must never stall on a
        // slow client
        let _ = ws.get_ref().set_nonblocking(true);

        if let Some(ref err) = self.pending_error
            && ws.send(Message::Text(err.to_json().into())).is_err()
        {
            crate::debug!("reload"; "client rejected pending error, dropping");
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.clients.push(Client { id, ws });
        crate::debug!("reload"; "client connected (total: {})", self.clients.len());
    }

    /// Serialize once, write to every connection; drop only the failed ones.
    fn broadcast(&mut self, msg: &ReloadMessage) {
        if self.clients.is_empty() {
            crate::debug!("reload"; "no clients connected");
            return;
        }

        let json = msg.to_json();
        let count = self.clients.len();

        self.clients.retain_mut(|client| {
            match client.ws.send(Message::Text(json.clone().into())) {
                Ok(_) => true,
                Err(e) => {
                    crate::debug!("reload"; "client disconnected: {}", e);
                    false
                }
            }
        });
        crate::debug!("reload"; "broadcast to {} client(s)", count);
    }

    /// Drain client traffic. Browsers only send keepalives; anything
    /// unreadable means the connection is gone.
    fn poll_clients(&mut self) {
        self.clients.retain_mut(|client| {
            loop {
                match client.ws.read() {
                    Ok(Message::Close(_)) => return false,
                    Ok(_) => continue, // keepalive/pong noise
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        return true;
                    }
                    Err(_) => return false,
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
