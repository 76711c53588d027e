//! Wire messages, one closed enum per direction.
//!
//! Encoded as JSON objects carrying a `type` tag, e.g.
//! `{"type":"tap","x":0.5,"y":0.5}`.

use std::time::{SystemTime, UNIX_EPOCH};

use arena_common::{BodyConfig, BodyState, SettingsPatch, WorldSettings};
use arena_kernel::Tap;
use serde::{Deserialize, Serialize};

/// Errors decoding or encoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tap has non-finite coordinates or force")]
    InvalidTap,
}

/// Observer → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Tap(Tap),
    #[serde(rename_all = "camelCase")]
    Join { client_id: String },
}

impl ClientMessage {
    /// Decode one message. Taps come back clamped into `[0,1]`.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str(text)? {
            Self::Tap(tap) => tap
                .sanitized()
                .map(Self::Tap)
                .ok_or(ProtocolError::InvalidTap),
            other => Ok(other),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Bootstrap snapshot sent once to a newly connected observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSync {
    pub body_configs: Vec<BodyConfig>,
    pub body_states: Vec<BodyState>,
    pub settings: WorldSettings,
    pub viewer_count: usize,
}

/// Body states tagged with a broadcast tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub tick: u64,
    pub bodies: Vec<BodyState>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Result of a config reconcile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body_configs: Option<Vec<BodyConfig>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub settings: Option<SettingsPatch>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.body_configs.is_none() && self.settings.is_none()
    }
}

/// Visual feedback for a tap, in normalized coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapEffect {
    pub x: f32,
    pub y: f32,
    pub timestamp: u64,
}

/// Server → observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    FullSync(FullSync),
    State(StateUpdate),
    ConfigUpdate(ConfigUpdate),
    UserCount { count: usize },
    TapEffect(TapEffect),
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::FullSync(_) => "fullSync",
            Self::State(_) => "state",
            Self::ConfigUpdate(_) => "configUpdate",
            Self::UserCount { .. } => "userCount",
            Self::TapEffect(_) => "tapEffect",
        }
    }
}

/// Milliseconds since the Unix epoch, saturating to 0 on a clock before 1970.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
