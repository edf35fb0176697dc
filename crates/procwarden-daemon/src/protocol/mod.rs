//! Socket protocol and request dispatch.
//!
//! Everything between the Unix socket and the handlers lives here. The
//! stack, from the wire up:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Dispatch                    │  catalog, trust, handlers
//! ├─────────────────────────────────────────┤
//! │         Request envelopes                │  [tag][protobuf]
//! ├─────────────────────────────────────────┤
//! │              Handshake                   │  hello / hello_ack (JSON)
//! ├─────────────────────────────────────────┤
//! │               Framing                    │  [length: u32 BE][payload]
//! ├─────────────────────────────────────────┤
//! │            UDS transport                 │  SO_PEERCRED
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`error`]: protocol error types and wire limits
//! - [`framing`]: length-prefixed frame codec ([`FrameCodec`])
//! - [`handshake`]: hello negotiation and session assignment
//! - [`credentials`]: `SO_PEERCRED` extraction and baseline tiers
//! - [`messages`]: request and reply types, envelope codecs
//! - [`trust`]: per-operation required-tier evaluators
//! - [`catalog`]: the operation table pairing handlers with evaluators
//! - [`dispatch`]: authorization and handler invocation
//! - [`server`]: socket lifecycle ([`ProtocolServer`], [`Connection`])
//! - [`connection_handler`]: per-connection handshake and request loop
//!
//! # Security Considerations
//!
//! - Frame sizes are validated before allocation, with a stricter limit
//!   until the handshake completes
//! - Peer identity comes from `SO_PEERCRED`, never from the client
//! - Trust is re-evaluated on every request against the live session tier
//! - A JSON frame after the handshake terminates the connection

pub mod catalog;
pub mod connection_handler;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod messages;
pub mod server;
pub mod trust;

pub use connection_handler::{SessionSettings, handle_connection};
pub use credentials::PeerCredentials;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{
    MAX_FRAME_SIZE, MAX_HANDSHAKE_FRAME_SIZE, PROTOCOL_VERSION, ProtocolError, ProtocolResult,
};
pub use framing::FrameCodec;
pub use handshake::{
    ClientHandshake, HandshakeErrorCode, HandshakeMessage, HandshakeState, Hello, HelloAck,
    HelloNack, ServerHandshake, is_json_frame, parse_handshake_message, parse_hello,
    serialize_handshake_message,
};
pub use messages::{Message, MessageBody, MessageId};
pub use server::{Connection, ConnectionPermit, ProtocolServer, ServerConfig, connect};
