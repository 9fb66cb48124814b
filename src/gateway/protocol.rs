//! Gateway wire protocol: frame types and the pure decision logic.
//!
//! JSON frames over WebSocket, three shapes: `event` (server push), `req`
//! (client request), `res` (response correlated by id). Everything here is
//! side-effect free; the connection loop in the parent module does the I/O.

use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::agent::{AgentPhase, AgentState};
use crate::config::GatewayConfig;

/// The single protocol version this client speaks. Pinned on both ends of
/// the negotiation range; a gateway outside it is a fatal mismatch.
pub const PROTOCOL_VERSION: u32 = 3;

/// Sessions older than this are not auto-bind candidates.
pub const SESSION_ACTIVE_WINDOW_MS: i64 = 60 * 60 * 1_000;

/// Server event frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Response frame correlated to a request by `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

/// Any inbound frame this client understands.
#[derive(Debug, Clone)]
pub enum Frame {
    Event(EventFrame),
    Response(ResponseFrame),
}

/// Parse an inbound frame. Unknown shapes and malformed JSON return `None`;
/// a bad frame must never take the connection down.
pub fn parse_frame(raw: &str) -> Option<Frame> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("type")?.as_str()? {
        "event" => serde_json::from_value(value).ok().map(Frame::Event),
        "res" => serde_json::from_value(value).ok().map(Frame::Response),
        _ => None,
    }
}

/// Serialize an outbound request frame with a fresh correlation id.
pub fn new_request(method: &str, params: Value) -> (String, String) {
    let id = uuid::Uuid::new_v4().to_string();
    let raw = json!({
        "type": "req",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string();
    (id, raw)
}

/// Build `connect` params.
///
/// Always pins the protocol range and identifies the client. A configured
/// device identity plus a challenge nonce yields a signed payload; a bare
/// token rides along either way.
pub fn connect_params(config: &GatewayConfig, nonce: Option<&str>, timestamp: &str) -> Value {
    let mut params = json!({
        "minProtocol": PROTOCOL_VERSION,
        "maxProtocol": PROTOCOL_VERSION,
        "client": {
            "id": config.client_id,
            "mode": "overlay",
            "role": "viewer",
            "scopes": config.scopes,
        },
    });

    if let Some(token) = &config.token {
        params["auth"] = json!({ "token": token });
    }

    if let (Some(nonce), Some(device_id), Some(secret)) =
        (nonce, &config.device_id, &config.device_secret)
    {
        let signature = sign_connect(
            device_id,
            &config.client_id,
            &config.scopes,
            timestamp,
            nonce,
            secret,
        );
        params["device"] = json!({
            "id": device_id,
            "nonce": nonce,
            "timestamp": timestamp,
            "signature": signature,
        });
    }

    params
}

/// Signature over the identifying connect fields plus the shared secret.
fn sign_connect(
    device_id: &str,
    client_id: &str,
    scopes: &[String],
    timestamp: &str,
    nonce: &str,
    secret: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update(b"|");
    hasher.update(client_id.as_bytes());
    hasher.update(b"|");
    hasher.update(scopes.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.as_bytes());
    hasher.update(b"|");
    hasher.update(secret.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Whether a failed `connect` response is a version mismatch. Reconnecting
/// cannot fix those.
pub fn is_protocol_mismatch(error: Option<&ErrorBody>) -> bool {
    error.is_some_and(|e| e.message.to_ascii_lowercase().contains("protocol"))
}

/// Reconnect delay generator: doubles from base up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// The delay to wait before the next attempt; doubles for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the base delay. Called only after a fully successful connect.
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Most recently active session from a `sessions.list` payload, if any is
/// inside the active window.
pub fn pick_recent_session(payload: &Value, now_ms: i64) -> Option<String> {
    payload
        .get("sessions")?
        .as_array()?
        .iter()
        .filter_map(|session| {
            let key = session.get("key")?.as_str()?;
            let updated = session.get("updatedAt")?.as_i64()?;
            (now_ms.saturating_sub(updated) <= SESSION_ACTIVE_WINDOW_MS)
                .then(|| (key.to_owned(), updated))
        })
        .max_by_key(|&(_, updated)| updated)
        .map(|(key, _)| key)
}

/// Synthesize a session key from the first agent in an `agents.list`
/// payload.
pub fn fallback_session_from_agents(payload: &Value) -> Option<String> {
    let id = payload.get("agents")?.as_array()?.first()?.get("id")?.as_str()?;
    Some(format!("agent:{id}:main"))
}

/// Normalize one `agent` event payload into an [`AgentState`] plus the
/// session key it belongs to.
///
/// Unknown streams return `None` and are dropped by the caller.
pub fn route_agent_event(payload: &Value) -> Option<(AgentState, Option<String>)> {
    let stream = payload.get("stream")?.as_str()?;
    let session_key = payload
        .get("sessionKey")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let data = payload.get("data");

    let mut state = match stream {
        "lifecycle.start" => AgentState::phase(AgentPhase::Thinking),
        "lifecycle.end" | "lifecycle.error" | "error" => AgentState::phase(AgentPhase::Idle),
        "assistant" => {
            let text = data
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            AgentState::speaking(text)
        }
        "tool" => AgentState::phase(AgentPhase::Working),
        _ => return None,
    };

    state.agent_id = data
        .and_then(|d| d.get("agentId"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    Some((state, session_key))
}
