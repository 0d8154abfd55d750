//! Swarm wire protocol: message types exchanged between peers and the server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open byte range of a file: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Direction of a peer-to-peer transfer from the connector's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Connector is the taker and downloads from the acceptor.
    Get,
    /// Connector is the giver and uploads to the acceptor.
    Put,
}

/// All wire message types. Encoding is JSON with a `type` tag; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Registration: must be the first message on every connection.
    ClientInfo { client_id: String, listen_port: u16 },
    /// Ask for size and chunking of a file.
    AskInfo { url: String },
    /// Reply to `AskInfo`. Size fields are absent when the file is unknown.
    TellInfo {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        streaming: Option<bool>,
    },
    Request { url: String, range: ByteRange },
    Provide { url: String, range: ByteRange },
    Unrequest { url: String, range: ByteRange },
    Unprovide { url: String, range: ByteRange },
    /// Server instructs the connector to dial the acceptor and move one chunk.
    Transfer {
        host: String,
        port: u16,
        method: Method,
        url: String,
        range: ByteRange,
        peer_id: String,
    },
    /// Acceptor asks whether an inbound transfer from `peer_id` is genuine.
    AskVerify {
        peer_id: String,
        url: String,
        range: ByteRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },
    TellVerify {
        peer_id: String,
        url: String,
        range: ByteRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
        is_authorized: bool,
    },
    /// Transfer finished; the taker reports the digest of what it received.
    Completed {
        peer_id: String,
        url: String,
        range: ByteRange,
        #[serde(default)]
        hash: Option<String>,
    },
    HashVerify {
        url: String,
        range: ByteRange,
        hash_ok: bool,
    },
    ChangePort { port: u16 },
    ProtocolError { message: String },
    ProtocolWarn { message: String },
}

impl Message {
    /// Wire name of this message's `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClientInfo { .. } => "client_info",
            Message::AskInfo { .. } => "ask_info",
            Message::TellInfo { .. } => "tell_info",
            Message::Request { .. } => "request",
            Message::Provide { .. } => "provide",
            Message::Unrequest { .. } => "unrequest",
            Message::Unprovide { .. } => "unprovide",
            Message::Transfer { .. } => "transfer",
            Message::AskVerify { .. } => "ask_verify",
            Message::TellVerify { .. } => "tell_verify",
            Message::Completed { .. } => "completed",
            Message::HashVerify { .. } => "hash_verify",
            Message::ChangePort { .. } => "change_port",
            Message::ProtocolError { .. } => "protocol_error",
            Message::ProtocolWarn { .. } => "protocol_warn",
        }
    }
}
