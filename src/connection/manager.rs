//! Connection lifecycle: socket ownership, handshake, reconnection.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state::{ConnectionState, StateCell, StateChangeFn};
use crate::error::{PulseError, Result};
use crate::events::EventDispatcher;
use crate::options::Config;
use crate::protocol::{ConnectionEstablished, Protocol, PulseEvent};
use crate::reachability::Reachability;
use crate::transport::{Transport, TransportHooks, WsTransport};
use crate::utils::CancellableTimer;

/// Interval between WebSocket-level pings while connected
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Commands handled by the socket task
#[derive(Debug)]
enum ConnectionCommand {
    Connect,
    Disconnect,
    Send(String),
}

/// Owns the WebSocket and drives the connection state machine.
///
/// All socket writes funnel through the command channel into a single task;
/// inbound frames are decoded on the reader callback and emitted through the
/// connection dispatcher, where the client's routing is bound. Reconnection
/// is driven by the close callback, the reachability monitor and a single
/// replaceable backoff timer.
pub struct Connection {
    config: Arc<Config>,
    state: StateCell,
    socket_id: RwLock<Option<String>>,
    dispatcher: EventDispatcher,
    command_tx: RwLock<Option<mpsc::Sender<ConnectionCommand>>>,
    /// Consecutive failed attempts; reset on a parsed handshake
    reconnect_attempts: RwLock<u32>,
    /// Single-shot backoff timer; replacing it cancels the previous one
    reconnect_timer: Mutex<Option<CancellableTimer>>,
    reachability: Arc<dyn Reachability>,
}

impl Connection {
    pub fn new(config: Config, reachability: Arc<dyn Reachability>) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            state: StateCell::new(),
            socket_id: RwLock::new(None),
            dispatcher: EventDispatcher::new(),
            command_tx: RwLock::new(None),
            reconnect_attempts: RwLock::new(0),
            reconnect_timer: Mutex::new(None),
            reachability,
        })
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Socket id assigned by the server at handshake
    pub fn socket_id(&self) -> Option<String> {
        self.socket_id.read().clone()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Install the `(old, new)` state transition observer
    pub fn set_state_observer(&self, observer: Option<StateChangeFn>) {
        self.state.set_observer(observer);
    }

    /// Bind to a named connection event (raw frames plus the synthesized
    /// `connected` / `disconnected` lifecycle events)
    pub fn bind(
        &self,
        event_name: impl Into<String>,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> crate::events::BindingId {
        self.dispatcher.bind(event_name, callback)
    }

    /// Bind to every connection event
    pub fn bind_all(
        &self,
        callback: impl Fn(&PulseEvent) + Send + Sync + 'static,
    ) -> crate::events::BindingId {
        self.dispatcher.bind_all(callback)
    }

    /// Connect to the server.
    ///
    /// No-op when already connecting or connected. A pending reconnect timer
    /// is cancelled; the explicit request takes over.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state().is_active() {
            return Ok(());
        }

        self.reconnect_timer.lock().take();
        self.state.transition(ConnectionState::Connecting);

        let tx = self.ensure_task();
        tx.send(ConnectionCommand::Connect)
            .await
            .map_err(|_| PulseError::connection("Failed to send connect command"))
    }

    /// Disconnect from the server.
    ///
    /// Cancels any pending reconnect, tears down the socket, and settles in
    /// `Disconnected` once the close completes.
    pub async fn disconnect(&self) {
        self.reconnect_timer.lock().take();

        match self.state() {
            ConnectionState::Disconnected => return,
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.state.transition(ConnectionState::Disconnecting);
                let tx = self.command_tx.read().clone();
                if let Some(tx) = tx {
                    let _ = tx.send(ConnectionCommand::Disconnect).await;
                }
            }
            // No live socket while waiting to reconnect
            _ => {
                self.state.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Queue a raw frame for the socket. Returns false when not connected.
    pub fn send(&self, message: &str) -> bool {
        if !self.is_connected() {
            return false;
        }

        match *self.command_tx.read() {
            Some(ref tx) => tx
                .try_send(ConnectionCommand::Send(message.to_string()))
                .is_ok(),
            None => false,
        }
    }

    /// Serialize and send an event
    pub fn send_event(&self, event_name: &str, data: &serde_json::Value, channel: Option<&str>) -> bool {
        let mut event = PulseEvent::new(event_name);
        event.data = Some(data.clone());
        event.channel = channel.map(|s| s.to_string());

        match Protocol::encode_message(&event) {
            Ok(msg) => self.send(&msg),
            Err(e) => {
                error!("Failed to encode event: {}", e);
                false
            }
        }
    }

    /// Get a live command sender, spawning the socket task if needed
    fn ensure_task(self: &Arc<Self>) -> mpsc::Sender<ConnectionCommand> {
        if let Some(ref tx) = *self.command_tx.read() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let (tx, rx) = mpsc::channel(32);
        *self.command_tx.write() = Some(tx.clone());
        tokio::spawn(connection_task(self.clone(), rx));
        tx
    }

    /// Decode and process one inbound frame
    fn handle_raw_frame(self: &Arc<Self>, raw: &str) {
        let event = match Protocol::decode_message(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        match event.event.as_str() {
            "pusher:ping" => {
                debug!("Received ping, replying with pong");
                if let Ok(pong) = Protocol::encode_message(&Protocol::create_pong_event()) {
                    if let Some(ref tx) = *self.command_tx.read() {
                        let _ = tx.try_send(ConnectionCommand::Send(pong));
                    }
                }
                return;
            }
            "pusher:connection_established" => {
                self.handle_connection_established(&event);
            }
            _ => {}
        }

        self.dispatcher.emit(&event);
    }

    /// Process the handshake frame.
    ///
    /// The attempt counter and backoff timer are only touched when the
    /// socket id parses; a malformed handshake leaves both alone.
    fn handle_connection_established(&self, event: &PulseEvent) {
        match event.parse_data::<ConnectionEstablished>() {
            Ok(data) => {
                info!("Connection established, socket_id={}", data.socket_id);
                *self.socket_id.write() = Some(data.socket_id);
                *self.reconnect_attempts.write() = 0;
                self.reconnect_timer.lock().take();
                self.state.transition(ConnectionState::Connected);

                let mut connected = event.clone();
                connected.event = "connected".to_string();
                self.dispatcher.emit(&connected);
            }
            Err(e) => {
                warn!("Malformed connection_established payload: {}", e);
            }
        }
    }

    /// React to the socket closing, expectedly or not
    fn handle_close(self: &Arc<Self>, code: Option<u16>, reason: Option<String>) {
        let current = self.state();
        match current {
            ConnectionState::Disconnecting => {
                *self.socket_id.write() = None;
                self.state.transition(ConnectionState::Disconnected);
                self.dispatcher.emit(&PulseEvent::new("disconnected"));
                return;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
            // Close already accounted for
            _ => return,
        }

        warn!(
            "Socket closed unexpectedly (code={:?}, reason={:?})",
            code, reason
        );
        *self.socket_id.write() = None;
        self.dispatcher.emit(&PulseEvent::new("disconnected"));

        if Protocol::is_normal_close(code) || !self.config.auto_reconnect {
            self.state.transition(ConnectionState::Disconnected);
            return;
        }

        self.schedule_reconnect();
    }

    /// Schedule the next reconnect attempt, or give up when the policy is
    /// exhausted, or park until the network is reachable again.
    fn schedule_reconnect(self: &Arc<Self>) {
        let attempts = *self.reconnect_attempts.read();

        if let Some(max) = self.config.max_reconnect_attempts {
            if attempts >= max {
                warn!("{}", PulseError::reconnect_exhausted(attempts));
                self.state.transition(ConnectionState::Disconnected);
                return;
            }
        }

        if !self.reachability.is_reachable() {
            info!("Network unreachable, deferring reconnect");
            self.state
                .transition(ConnectionState::ReconnectingWhenNetworkBecomesReachable);

            let conn = self.clone();
            let mut watcher = self.reachability.watch();
            tokio::spawn(async move {
                loop {
                    if conn.state() != ConnectionState::ReconnectingWhenNetworkBecomesReachable {
                        return;
                    }
                    if *watcher.borrow() {
                        break;
                    }
                    if watcher.changed().await.is_err() {
                        return;
                    }
                }
                if conn.state() == ConnectionState::ReconnectingWhenNetworkBecomesReachable {
                    info!("Network reachable again, resuming reconnect");
                    conn.schedule_reconnect();
                }
            });
            return;
        }

        self.state.transition(ConnectionState::Reconnecting);

        let delay = reconnect_delay(attempts, self.config.max_reconnect_gap);
        *self.reconnect_attempts.write() = attempts + 1;
        info!("Reconnect attempt {} in {:?}", attempts, delay);

        let conn = self.clone();
        *self.reconnect_timer.lock() = Some(CancellableTimer::new(delay, move || {
            if conn.state() == ConnectionState::Reconnecting {
                conn.begin_reconnect_attempt();
            }
        }));
    }

    fn begin_reconnect_attempt(self: &Arc<Self>) {
        self.state.transition(ConnectionState::Connecting);
        let tx = self.ensure_task();
        if tx.try_send(ConnectionCommand::Connect).is_err() {
            error!("Socket task rejected reconnect command");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("socket_id", &self.socket_id())
            .finish()
    }
}

/// Backoff before the nth consecutive attempt: n squared seconds, capped.
pub(crate) fn reconnect_delay(attempt: u32, cap: Option<Duration>) -> Duration {
    let delay = Duration::from_secs(u64::from(attempt).pow(2));
    match cap {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// Task owning the transport for the lifetime of a connection session.
///
/// Reconnect attempts reuse the task; an explicit disconnect ends it.
async fn connection_task(conn: Arc<Connection>, mut cmd_rx: mpsc::Receiver<ConnectionCommand>) {
    use tokio::time::interval;

    let mut transport = WsTransport::new();

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    ConnectionCommand::Connect => {
                        info!("Connecting to {}", conn.config.ws_url);
                        let hooks = socket_hooks(&conn);
                        if let Err(e) = transport.connect(&conn.config.ws_url, hooks).await {
                            error!("Failed to connect: {}", e);
                            // Dial failures never reach the close hook, so
                            // the retry policy is driven from here
                            conn.handle_close(None, Some(e.to_string()));
                        }
                    }
                    ConnectionCommand::Disconnect => {
                        transport.disconnect().await;
                        if conn.state() == ConnectionState::Disconnecting {
                            *conn.socket_id.write() = None;
                            conn.state.transition(ConnectionState::Disconnected);
                            conn.dispatcher.emit(&PulseEvent::new("disconnected"));
                        }
                        break;
                    }
                    ConnectionCommand::Send(msg) => {
                        if let Err(e) = transport.send(&msg).await {
                            error!("Failed to send message: {}", e);
                        }
                    }
                }
            }

            _ = ping_interval.tick() => {
                if conn.state().is_connected() {
                    let _ = transport.ping().await;
                }
            }
        }
    }

    debug!("Connection task ended");
}

/// Callback sinks wiring one socket lifetime back into the state machine.
fn socket_hooks(conn: &Arc<Connection>) -> TransportHooks {
    let conn_for_frames = conn.clone();
    let conn_for_close = conn.clone();

    TransportHooks {
        on_frame: Box::new(move |raw| {
            conn_for_frames.handle_raw_frame(raw);
        }),
        on_close: Box::new(move |code, reason| {
            conn_for_close.handle_close(code, reason);
        }),
        on_error: Box::new(|error| {
            error!("Transport error: {}", error);
        }),
    }
}
