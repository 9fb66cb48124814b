//! Gateway client.
//!
//! Maintains one WebSocket connection to the agent gateway: handshake with
//! challenge debounce, session auto-bind, agent event normalization, and
//! reconnect with capped exponential backoff. Protocol decisions live in
//! [`protocol`] as pure functions over a small connection state machine;
//! this module pumps the socket.

pub mod protocol;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentState;
use crate::config::GatewayConfig;
use self::protocol::{
    is_protocol_mismatch, new_request, parse_frame, pick_recent_session, route_agent_event,
    Backoff, EventFrame, Frame, ResponseFrame, SESSION_ACTIVE_WINDOW_MS,
};

/// How long after socket open to wait for an unsolicited challenge before
/// sending a bare connect.
const CHALLENGE_DEBOUNCE: Duration = Duration::from_millis(750);

/// Notifications delivered to the animator/host.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Handshake completed.
    Connected,
    /// Connection lost; reconnect is in progress.
    Disconnected,
    /// One normalized agent event.
    Agent(AgentState),
    /// The bound session changed; `avatar` carries a configured model
    /// override for the new session, when one exists.
    SessionChanged { key: String, avatar: Option<String> },
    /// The gateway speaks an incompatible protocol version; no reconnect.
    ProtocolMismatch(String),
}

/// What an in-flight request id was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Connect,
    SessionsList,
    AgentsList,
    ChatSend,
}

/// Side effects requested by the state machine.
#[derive(Debug)]
enum Action {
    Send(String),
    Emit(GatewayEvent),
    /// Connect succeeded; reset reconnect backoff.
    ConnectedOk,
    /// Tear down this attempt and back off.
    Abort(String),
    /// Unrecoverable; stop reconnecting entirely.
    Fatal(String),
}

/// Per-connection protocol state. Recreated from scratch on every attempt.
struct ConnState {
    config: GatewayConfig,
    pending: HashMap<String, Pending>,
    sent_connect: bool,
    session_key: Option<String>,
}

impl ConnState {
    fn new(config: GatewayConfig) -> Self {
        let session_key = config.session.clone();
        Self {
            config,
            pending: HashMap::new(),
            sent_connect: false,
            session_key,
        }
    }

    /// The debounce window elapsed without a challenge.
    fn on_debounce(&mut self) -> Vec<Action> {
        if self.sent_connect {
            return Vec::new();
        }
        self.send_connect(None)
    }

    fn send_connect(&mut self, nonce: Option<&str>) -> Vec<Action> {
        self.sent_connect = true;
        let timestamp = chrono::Utc::now().to_rfc3339();
        let params = protocol::connect_params(&self.config, nonce, &timestamp);
        let (id, raw) = new_request("connect", params);
        self.pending.insert(id, Pending::Connect);
        vec![Action::Send(raw)]
    }

    fn on_text(&mut self, raw: &str, now_ms: i64) -> Vec<Action> {
        let Some(frame) = parse_frame(raw) else {
            debug!("ignoring unparseable gateway frame");
            return Vec::new();
        };
        match frame {
            Frame::Event(event) => self.on_event(event),
            Frame::Response(response) => self.on_response(response, now_ms),
        }
    }

    fn on_event(&mut self, event: EventFrame) -> Vec<Action> {
        match event.event.as_str() {
            "connect.challenge" => {
                if self.sent_connect {
                    return Vec::new();
                }
                let nonce = event
                    .payload
                    .get("nonce")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                self.send_connect(nonce.as_deref())
            }
            "agent" => {
                let Some((state, session)) = route_agent_event(&event.payload) else {
                    return Vec::new();
                };
                let mut actions = Vec::new();
                if let Some(key) = session {
                    if self.session_key.as_deref() != Some(key.as_str()) {
                        actions.push(self.bind_session(key));
                    }
                }
                actions.push(Action::Emit(GatewayEvent::Agent(state)));
                actions
            }
            other => {
                debug!("ignoring gateway event: {other}");
                Vec::new()
            }
        }
    }

    fn on_response(&mut self, response: ResponseFrame, now_ms: i64) -> Vec<Action> {
        match self.pending.remove(&response.id) {
            None => {
                debug!("response for unknown request {}", response.id);
                Vec::new()
            }
            Some(Pending::Connect) => self.on_connect_response(response),
            Some(Pending::SessionsList) => {
                if response.ok {
                    if let Some(key) = pick_recent_session(&response.payload, now_ms) {
                        return vec![self.bind_session(key)];
                    }
                }
                // Empty or failed listing: try the agent roster instead.
                let (id, raw) = new_request("agents.list", json!({}));
                self.pending.insert(id, Pending::AgentsList);
                vec![Action::Send(raw)]
            }
            Some(Pending::AgentsList) => {
                if response.ok {
                    if let Some(key) = protocol::fallback_session_from_agents(&response.payload) {
                        return vec![self.bind_session(key)];
                    }
                }
                // Stay unbound; the first agent event carries its own key.
                info!("no session to auto-bind; waiting for agent events");
                Vec::new()
            }
            Some(Pending::ChatSend) => {
                if !response.ok {
                    let message = response.error.map(|e| e.message).unwrap_or_default();
                    warn!("chat.send rejected: {message}");
                }
                Vec::new()
            }
        }
    }

    fn on_connect_response(&mut self, response: ResponseFrame) -> Vec<Action> {
        if !response.ok {
            let message = response
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "connect rejected".to_owned());
            if is_protocol_mismatch(response.error.as_ref()) {
                return vec![Action::Fatal(message)];
            }
            return vec![Action::Abort(format!("connect failed: {message}"))];
        }

        let mut actions = vec![Action::ConnectedOk, Action::Emit(GatewayEvent::Connected)];
        match self.session_key.clone() {
            // Explicitly configured session: announce it so any avatar
            // override applies.
            Some(key) => {
                let avatar = self.config.session_avatars.get(&key).cloned();
                actions.push(Action::Emit(GatewayEvent::SessionChanged { key, avatar }));
            }
            // Exactly once per connection: discover the session to follow.
            None => {
                let (id, raw) = new_request(
                    "sessions.list",
                    json!({ "activeWithinMs": SESSION_ACTIVE_WINDOW_MS }),
                );
                self.pending.insert(id, Pending::SessionsList);
                actions.push(Action::Send(raw));
            }
        }
        actions
    }

    fn bind_session(&mut self, key: String) -> Action {
        let avatar = self.config.session_avatars.get(&key).cloned();
        info!("bound to session {key}");
        self.session_key = Some(key.clone());
        Action::Emit(GatewayEvent::SessionChanged { key, avatar })
    }
}

/// An outbound request queued by the public API, registered in the pending
/// map just before it hits the socket.
struct OutboundReq {
    id: String,
    kind: Pending,
    raw: String,
}

/// Handle to the background gateway connection.
pub struct GatewayClient {
    outbound: mpsc::UnboundedSender<OutboundReq>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
    shutdown: CancellationToken,
}

impl GatewayClient {
    /// Spawn the connection loop. Must be called inside a tokio runtime.
    pub fn connect(config: GatewayConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(connection_loop(
            config,
            outbound_rx,
            events_tx,
            shutdown.clone(),
        ));

        Self {
            outbound,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown,
        }
    }

    /// Send a chat message into a session. Queued until connected; dropped
    /// if the client is destroyed first.
    pub fn send_chat(&self, session_key: &str, text: &str) {
        let (id, raw) = new_request(
            "chat.send",
            json!({ "sessionKey": session_key, "text": text }),
        );
        let _ = self.outbound.send(OutboundReq {
            id,
            kind: Pending::ChatSend,
            raw,
        });
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>> {
        self.events_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Stop the connection loop and drop the socket. Idempotent.
    pub fn destroy(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum ConnFailure {
    Transient(String),
    Fatal(String),
}

async fn connection_loop(
    config: GatewayConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundReq>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    shutdown: CancellationToken,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.base_backoff_ms),
        Duration::from_millis(config.max_backoff_ms),
    );

    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match run_connection(&config, &mut outbound_rx, &events, &shutdown, &mut backoff).await {
            Ok(()) => break,
            Err(ConnFailure::Fatal(message)) => {
                warn!("gateway handshake fatal: {message}");
                let _ = events.send(GatewayEvent::ProtocolMismatch(message));
                break;
            }
            Err(ConnFailure::Transient(message)) => {
                let _ = events.send(GatewayEvent::Disconnected);
                let delay = backoff.next_delay();
                warn!("gateway connection lost ({message}); retrying in {delay:?}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// One connection attempt. `Ok(())` only on explicit destroy.
async fn run_connection(
    config: &GatewayConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundReq>,
    events: &mpsc::UnboundedSender<GatewayEvent>,
    shutdown: &CancellationToken,
    backoff: &mut Backoff,
) -> Result<(), ConnFailure> {
    let (ws, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        connected = connect_async(&config.url) => {
            connected.map_err(|e| ConnFailure::Transient(format!("connect: {e}")))?
        }
    };
    debug!("socket open to {}", config.url);
    let (mut write, mut read) = ws.split();
    let mut state = ConnState::new(config.clone());

    let debounce = tokio::time::sleep(CHALLENGE_DEBOUNCE);
    tokio::pin!(debounce);
    let mut debounced = false;

    loop {
        let actions = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = &mut debounce, if !debounced => {
                debounced = true;
                state.on_debounce()
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    state.on_text(&text, chrono::Utc::now().timestamp_millis())
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ConnFailure::Transient("closed by gateway".into()));
                }
                Some(Err(e)) => {
                    return Err(ConnFailure::Transient(format!("read error: {e}")));
                }
                _ => Vec::new(),
            },
            Some(request) = outbound_rx.recv() => {
                state.pending.insert(request.id.clone(), request.kind);
                vec![Action::Send(request.raw)]
            }
        };

        for action in actions {
            match action {
                Action::Send(raw) => {
                    write
                        .send(Message::Text(raw))
                        .await
                        .map_err(|e| ConnFailure::Transient(format!("send error: {e}")))?;
                }
                Action::Emit(event) => {
                    let _ = events.send(event);
                }
                Action::ConnectedOk => backoff.reset(),
                Action::Abort(message) => return Err(ConnFailure::Transient(message)),
                Action::Fatal(message) => return Err(ConnFailure::Fatal(message)),
            }
        }
    }
}
