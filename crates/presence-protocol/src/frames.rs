//! Session frames.
//!
//! Frames wrap stanzas for transport between a client session and the
//! server. Each frame is serialized using MessagePack.

use crate::jid::Jid;
use crate::stanza::Stanza;
use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Stanza = 0x03,
    Ping = 0x04,
    Pong = 0x05,
    Error = 0x06,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Stanza),
            0x04 => Ok(FrameType::Ping),
            0x05 => Ok(FrameType::Pong),
            0x06 => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod error_code {
    /// The first frame was not `Connect`.
    pub const NOT_CONNECTED: u16 = 1001;
    /// Protocol major version mismatch.
    pub const VERSION_MISMATCH: u16 = 1002;
    /// The session JID is not a full JID of the served domain.
    pub const INVALID_JID: u16 = 1003;
    /// The presence could not be registered.
    pub const PRESENCE_REJECTED: u16 = 1004;
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1005;
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Session handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol major version.
        version: u8,
        /// Full JID the session binds to.
        jid: Jid,
    },

    /// Session established.
    #[serde(rename = "connected")]
    Connected {
        /// Bound full JID.
        jid: Jid,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// A stanza in either direction.
    #[serde(rename = "stanza")]
    Stanza {
        /// The stanza.
        stanza: Stanza,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Error report.
    #[serde(rename = "error")]
    Error {
        /// Error code, see [`error_code`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Stanza { .. } => FrameType::Stanza,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, jid: Jid) -> Self {
        Frame::Connect { version, jid }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(jid: Jid, heartbeat: u32) -> Self {
        Frame::Connected { jid, heartbeat }
    }

    /// Create a new Stanza frame.
    #[must_use]
    pub fn stanza(stanza: impl Into<Stanza>) -> Self {
        Frame::Stanza {
            stanza: stanza.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}
