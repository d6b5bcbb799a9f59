//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is a JSON envelope `{"code": "...", "payload": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::world::{PlayerId, WorldSnapshot};

/// Inbound codes
pub const CODE_MOVEMENT: &str = "movement";
pub const CODE_SET_NAME: &str = "set_name";
pub const CODE_PROJECTILES: &str = "projectiles";
pub const CODE_PLAYER_HIT: &str = "player_hit";

/// Raw envelope, before the payload is validated against its code
#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    payload: Value,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    /// Client-authoritative position report
    Movement(MovementPayload),
    /// Display name and optional ship tag
    SetName(SetNamePayload),
    /// Full list of the sender's live projectiles
    Projectiles(ProjectilesPayload),
    /// Claim that the sender hit another player
    PlayerHit(PlayerHitPayload),
}

impl ClientMsg {
    /// Wire code this message arrived under
    pub fn code(&self) -> &'static str {
        match self {
            Self::Movement(_) => CODE_MOVEMENT,
            Self::SetName(_) => CODE_SET_NAME,
            Self::Projectiles(_) => CODE_PROJECTILES,
            Self::PlayerHit(_) => CODE_PLAYER_HIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementPayload {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetNamePayload {
    pub name: String,
    #[serde(default)]
    pub ship: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectilesPayload {
    pub projectiles: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerHitPayload {
    #[serde(rename = "playerHit")]
    pub player_hit: PlayerId,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", content = "payload", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Identity assigned to this connection
    Register { id: PlayerId },

    /// Full world snapshot, published once per tick
    PlayerState(WorldSnapshot),

    /// Round-trip latency of the first liveness probe, e.g. "12ms"
    Ping { ping: String },

    /// Tells an attacker that its hit claim finished the target
    PlayerKilled { name: String },
}

impl ServerMsg {
    pub fn ping(latency_ms: u64) -> Self {
        Self::Ping {
            ping: format!("{}ms", latency_ms),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Json)
    }
}

/// Decode failures. None of them terminate the connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Json(#[source] serde_json::Error),

    #[error("unknown message code {0:?}")]
    UnknownCode(String),

    #[error("invalid {code} payload: {source}")]
    Payload {
        code: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Unknown codes are dropped quietly for forward compatibility
    pub fn is_unknown_code(&self) -> bool {
        matches!(self, Self::UnknownCode(_))
    }
}

/// Decode one inbound text frame
pub fn decode_client(text: &str) -> Result<ClientMsg, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Json)?;

    match envelope.code.as_str() {
        CODE_MOVEMENT => payload(CODE_MOVEMENT, envelope.payload).map(ClientMsg::Movement),
        CODE_SET_NAME => payload(CODE_SET_NAME, envelope.payload).map(ClientMsg::SetName),
        CODE_PROJECTILES => {
            payload(CODE_PROJECTILES, envelope.payload).map(ClientMsg::Projectiles)
        }
        CODE_PLAYER_HIT => payload(CODE_PLAYER_HIT, envelope.payload).map(ClientMsg::PlayerHit),
        _ => Err(ProtocolError::UnknownCode(envelope.code)),
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    code: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::Payload { code, source })
}
