//! Connection handshake for the broker socket.
//!
//! Before any request frame is accepted, client and server exchange a JSON
//! handshake: the client sends `hello`, the server answers `hello_ack` (with
//! the negotiated version and the session id it assigned) or `hello_nack`.
//! After a successful handshake the connection switches to binary request
//! frames; a JSON frame arriving later is treated as a downgrade attempt and
//! the connection is terminated.
//!
//! Handshake frames are capped at [`MAX_HANDSHAKE_FRAME_SIZE`] because the
//! peer has not proven anything beyond socket access yet.

use serde::{Deserialize, Serialize};

use super::error::{MAX_HANDSHAKE_FRAME_SIZE, PROTOCOL_VERSION, ProtocolError, ProtocolResult};

/// Longest accepted `client_info` string. The field is echoed into logs, so
/// it is bounded.
pub const MAX_CLIENT_INFO_LEN: usize = 256;

/// Initial message sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Hello {
    /// Protocol version the client speaks.
    pub protocol_version: u32,
    /// Client identification, e.g. `procwarden-cli/0.4.2`.
    pub client_info: String,
    /// Capabilities the client wants to use.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Server acceptance of a [`Hello`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HelloAck {
    /// Negotiated protocol version.
    pub protocol_version: u32,
    /// Server identification, e.g. `procwarden-daemon/0.4.2`.
    pub server_info: String,
    /// Session identifier assigned to this connection. Appears in broker
    /// logs, so clients can quote it when reporting problems.
    pub session_id: String,
    /// Capabilities the server offers.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Server rejection of a [`Hello`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HelloNack {
    /// Why the handshake was rejected.
    pub error_code: HandshakeErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Version the server would have accepted.
    pub server_version: u32,
}

/// Machine-readable rejection reasons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeErrorCode {
    /// Client protocol version is not supported.
    VersionMismatch,
    /// Hello was rejected for a non-version reason.
    Rejected,
    /// Server is shutting down and not accepting sessions.
    ServerShuttingDown,
    /// Connection limit reached.
    TooManyConnections,
}

/// Envelope for handshake messages on the wire.
///
/// Serialized as JSON with a `type` tag:
/// `{"type": "hello", "protocol_version": 1, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// Client greeting.
    Hello(Hello),
    /// Server acceptance.
    HelloAck(HelloAck),
    /// Server rejection.
    HelloNack(HelloNack),
}

impl From<Hello> for HandshakeMessage {
    fn from(hello: Hello) -> Self {
        Self::Hello(hello)
    }
}

impl From<HelloAck> for HandshakeMessage {
    fn from(ack: HelloAck) -> Self {
        Self::HelloAck(ack)
    }
}

impl From<HelloNack> for HandshakeMessage {
    fn from(nack: HelloNack) -> Self {
        Self::HelloNack(nack)
    }
}

/// True if `frame` looks like a JSON handshake frame rather than a binary
/// request frame.
///
/// Request frames start with a message id byte, and no assigned id collides
/// with `b'{'`.
#[must_use]
pub fn is_json_frame(frame: &[u8]) -> bool {
    frame.first() == Some(&b'{')
}

/// Parse a handshake frame into a [`HandshakeMessage`].
pub fn parse_handshake_message(data: &[u8]) -> ProtocolResult<HandshakeMessage> {
    if data.is_empty() {
        return Err(ProtocolError::invalid_frame("empty handshake frame"));
    }
    if data.len() > MAX_HANDSHAKE_FRAME_SIZE {
        return Err(ProtocolError::frame_too_large(
            data.len(),
            MAX_HANDSHAKE_FRAME_SIZE,
        ));
    }
    serde_json::from_slice(data).map_err(|e| ProtocolError::Serialization {
        reason: format!("invalid handshake message: {e}"),
    })
}

/// Parse a handshake frame that must be a [`Hello`].
pub fn parse_hello(data: &[u8]) -> ProtocolResult<Hello> {
    match parse_handshake_message(data)? {
        HandshakeMessage::Hello(hello) => Ok(hello),
        other => Err(ProtocolError::handshake_failed(format!(
            "expected hello, got {}",
            handshake_message_kind(&other)
        ))),
    }
}

/// Serialize a handshake message for the wire.
pub fn serialize_handshake_message(message: &HandshakeMessage) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Serialization {
        reason: format!("failed to serialize handshake message: {e}"),
    })
}

fn handshake_message_kind(message: &HandshakeMessage) -> &'static str {
    match message {
        HandshakeMessage::Hello(_) => "hello",
        HandshakeMessage::HelloAck(_) => "hello_ack",
        HandshakeMessage::HelloNack(_) => "hello_nack",
    }
}

/// Handshake progress for one side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Waiting for the peer's opening message.
    #[default]
    AwaitingHello,
    /// Handshake completed successfully.
    Completed,
    /// Handshake failed; the connection should be closed.
    Failed,
}

/// Server side of the handshake.
#[derive(Debug)]
pub struct ServerHandshake {
    server_info: String,
    session_id: String,
    capabilities: Vec<String>,
    state: HandshakeState,
    negotiated_version: Option<u32>,
}

impl ServerHandshake {
    /// New handshake for an accepted connection.
    #[must_use]
    pub fn new(server_info: String, session_id: String, capabilities: Vec<String>) -> Self {
        Self {
            server_info,
            session_id,
            capabilities,
            state: HandshakeState::AwaitingHello,
            negotiated_version: None,
        }
    }

    /// Process a client hello, producing the ack or nack to send back.
    pub fn process_hello(&mut self, hello: &Hello) -> HandshakeMessage {
        if self.state != HandshakeState::AwaitingHello {
            return HelloNack {
                error_code: HandshakeErrorCode::Rejected,
                message: "handshake already completed".to_string(),
                server_version: PROTOCOL_VERSION,
            }
            .into();
        }

        if !is_version_compatible(hello.protocol_version) {
            self.state = HandshakeState::Failed;
            return HelloNack {
                error_code: HandshakeErrorCode::VersionMismatch,
                message: format!(
                    "unsupported protocol version {} (server speaks {})",
                    hello.protocol_version, PROTOCOL_VERSION
                ),
                server_version: PROTOCOL_VERSION,
            }
            .into();
        }

        if hello.client_info.len() > MAX_CLIENT_INFO_LEN {
            self.state = HandshakeState::Failed;
            return HelloNack {
                error_code: HandshakeErrorCode::Rejected,
                message: format!("client_info exceeds {MAX_CLIENT_INFO_LEN} bytes"),
                server_version: PROTOCOL_VERSION,
            }
            .into();
        }

        self.state = HandshakeState::Completed;
        self.negotiated_version = Some(hello.protocol_version);
        HelloAck {
            protocol_version: PROTOCOL_VERSION,
            server_info: self.server_info.clone(),
            session_id: self.session_id.clone(),
            capabilities: self.capabilities.clone(),
        }
        .into()
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Version agreed with the client, once completed.
    #[must_use]
    pub const fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }
}

/// Client side of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    client_info: String,
    capabilities: Vec<String>,
    state: HandshakeState,
    negotiated_version: Option<u32>,
}

impl ClientHandshake {
    /// New handshake for an outgoing connection.
    #[must_use]
    pub fn new(client_info: String, capabilities: Vec<String>) -> Self {
        Self {
            client_info,
            capabilities,
            state: HandshakeState::AwaitingHello,
            negotiated_version: None,
        }
    }

    /// The hello to open the connection with.
    #[must_use]
    pub fn create_hello(&self) -> HandshakeMessage {
        Hello {
            protocol_version: PROTOCOL_VERSION,
            client_info: self.client_info.clone(),
            capabilities: self.capabilities.clone(),
        }
        .into()
    }

    /// Process the server's response to our hello.
    pub fn process_response(&mut self, message: HandshakeMessage) -> ProtocolResult<HelloAck> {
        match message {
            HandshakeMessage::HelloAck(ack) => {
                self.state = HandshakeState::Completed;
                self.negotiated_version = Some(ack.protocol_version);
                Ok(ack)
            }
            HandshakeMessage::HelloNack(nack) => {
                self.state = HandshakeState::Failed;
                match nack.error_code {
                    HandshakeErrorCode::VersionMismatch => Err(ProtocolError::VersionMismatch {
                        client_version: PROTOCOL_VERSION,
                        server_version: nack.server_version,
                    }),
                    _ => Err(ProtocolError::handshake_failed(nack.message)),
                }
            }
            HandshakeMessage::Hello(_) => {
                self.state = HandshakeState::Failed;
                Err(ProtocolError::handshake_failed(
                    "server sent hello instead of ack",
                ))
            }
        }
    }

    /// Current handshake state.
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Version agreed with the server, once completed.
    #[must_use]
    pub const fn negotiated_version(&self) -> Option<u32> {
        self.negotiated_version
    }
}

/// Whether the server can talk to a client speaking `client_version`.
///
/// Exact match for now. Ranges can be introduced once a second version
/// exists.
#[must_use]
pub const fn is_version_compatible(client_version: u32) -> bool {
    client_version == PROTOCOL_VERSION
}
