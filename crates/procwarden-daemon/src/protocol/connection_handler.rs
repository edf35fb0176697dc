//! Per-connection lifecycle: handshake, request loop, teardown.
//!
//! Each accepted connection runs through three phases. The handshake
//! exchanges JSON hello frames and assigns a session id; once it completes,
//! the peer's credentials are mapped to a baseline trust tier and a
//! [`ClientSession`] is created. The request loop then reads binary request
//! frames and answers each with exactly one reply frame. Teardown releases
//! everything the session still holds, so a client crash cannot leak
//! shutdown protection or session counts.
//!
//! # Connection termination
//!
//! Malformed payloads and unknown ids fail only the request that carried
//! them. The connection itself is terminated for transport-level
//! violations: an oversized frame, an empty frame, or a JSON frame arriving
//! after the handshake completed (a downgrade attempt).

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use procwarden_core::config::{BrokerConfig, TrustSection};

use crate::context::RuntimeContext;
use crate::session::ClientSession;

use super::dispatch::{DispatchOutcome, Dispatcher};
use super::error::PROTOCOL_VERSION;
use super::handshake::{
    HandshakeErrorCode, HandshakeMessage, HandshakeState, HelloNack, ServerHandshake,
    is_json_frame, parse_hello, serialize_handshake_message,
};
use super::messages::{
    DecodeConfig, FailureCode, INFORMER_SESSION_LIFECYCLE, Message, MessageId, encode_failure,
};
use super::server::{Connection, ConnectionPermit, default_server_info};

/// Capability advertised to every client: per-session informer events.
pub const CAP_INFORMER: &str = "informer";

/// Capability advertised when the broker holds a token secret and can
/// verify session tokens.
pub const CAP_SESSION_TOKENS: &str = "session-tokens";

/// Per-connection settings shared by every handler task.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Peer-to-tier mapping from the `[trust]` configuration section.
    pub trust: TrustSection,

    /// Uid the daemon runs as. Peers with this uid get the root tier.
    pub daemon_uid: u32,

    /// Initial per-request timeout for new sessions.
    pub request_timeout_ms: u64,

    /// Identity string sent in the hello ack.
    pub server_info: String,
}

impl SessionSettings {
    /// Settings derived from the broker configuration.
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            trust: config.trust.clone(),
            daemon_uid: nix::unistd::getuid().as_raw(),
            request_timeout_ms: config.timeouts.request_timeout_ms,
            server_info: default_server_info(),
        }
    }
}

/// Result of the handshake phase.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Handshake completed; requests may flow for this session.
    Accepted(Arc<ClientSession>),
    /// Handshake failed and a nack was sent.
    Rejected,
    /// Peer closed the connection before completing the handshake.
    ConnectionClosed,
}

/// Capabilities offered in the hello ack.
fn server_capabilities(ctx: &RuntimeContext) -> Vec<String> {
    let mut capabilities = vec![CAP_INFORMER.to_string()];
    if ctx.token_secret().is_some() {
        capabilities.push(CAP_SESSION_TOKENS.to_string());
    }
    capabilities
}

async fn send_handshake(connection: &mut Connection, message: &HandshakeMessage) -> Result<()> {
    let bytes =
        serialize_handshake_message(message).context("failed to serialize handshake message")?;
    connection.framed().send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Run the server side of the handshake and build the session.
///
/// On success the connection's frame limit is upgraded and the returned
/// session carries the baseline tier for the peer's credentials.
///
/// # Errors
///
/// Returns an error for I/O failures. A peer that misbehaves at the
/// protocol level gets a nack and [`HandshakeOutcome::Rejected`] instead.
pub async fn perform_handshake(
    connection: &mut Connection,
    settings: &SessionSettings,
    ctx: &RuntimeContext,
) -> Result<HandshakeOutcome> {
    let peer = connection
        .peer_credentials()
        .context("connection is missing peer credentials")?;

    let session_id = Uuid::new_v4();
    let mut handshake = ServerHandshake::new(
        settings.server_info.clone(),
        session_id.to_string(),
        server_capabilities(ctx),
    );

    let frame = match connection.framed().next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => {
            warn!(uid = peer.uid, "failed to receive handshake frame: {e}");
            return Err(e.into());
        }
        None => return Ok(HandshakeOutcome::ConnectionClosed),
    };

    let hello = match parse_hello(&frame) {
        Ok(hello) => hello,
        Err(e) => {
            warn!(uid = peer.uid, "invalid hello: {e}");
            let nack = HandshakeMessage::from(HelloNack {
                error_code: HandshakeErrorCode::Rejected,
                message: format!("invalid hello: {e}"),
                server_version: PROTOCOL_VERSION,
            });
            send_handshake(connection, &nack).await?;
            return Ok(HandshakeOutcome::Rejected);
        }
    };

    let response = handshake.process_hello(&hello);
    send_handshake(connection, &response).await?;

    if handshake.state() != HandshakeState::Completed {
        return Ok(HandshakeOutcome::Rejected);
    }

    connection.upgrade_to_full_frame_size();

    let baseline = peer.baseline_tier(&settings.trust, settings.daemon_uid);
    let session = Arc::new(ClientSession::new(
        session_id,
        peer,
        baseline,
        settings.request_timeout_ms,
    ));

    info!(
        session_id = %session_id,
        uid = peer.uid,
        pid = ?peer.pid,
        tier = %baseline,
        client = %hello.client_info,
        "session opened"
    );

    Ok(HandshakeOutcome::Accepted(session))
}

/// Drive one accepted connection from handshake to teardown.
///
/// The permit is held for the whole call, so the connection cap counts
/// established sessions rather than accepts in flight.
pub async fn handle_connection(
    mut connection: Connection,
    permit: ConnectionPermit,
    dispatcher: Arc<Dispatcher>,
    settings: Arc<SessionSettings>,
) {
    let _permit = permit;
    let ctx = dispatcher.context();

    let session = match perform_handshake(&mut connection, &settings, ctx).await {
        Ok(HandshakeOutcome::Accepted(session)) => session,
        Ok(HandshakeOutcome::Rejected) => {
            if let Some(metrics) = ctx.metrics() {
                metrics.connection("handshake_failed");
            }
            return;
        }
        Ok(HandshakeOutcome::ConnectionClosed) => {
            if let Some(metrics) = ctx.metrics() {
                metrics.connection("closed_early");
            }
            return;
        }
        Err(e) => {
            warn!("handshake error: {e:#}");
            if let Some(metrics) = ctx.metrics() {
                metrics.connection("handshake_error");
            }
            return;
        }
    };

    if let Some(metrics) = ctx.metrics() {
        metrics.connection("accepted");
        metrics.session_started();
    }
    ctx.state().session_opened();

    if let Err(e) = request_loop(&mut connection, &dispatcher, &session).await {
        debug!(
            session_id = %session.session_id(),
            "request loop ended with error: {e:#}"
        );
    }

    teardown(ctx, &session);
}

/// Answer request frames until the peer disconnects or violates the
/// protocol.
async fn request_loop(
    connection: &mut Connection,
    dispatcher: &Dispatcher,
    session: &ClientSession,
) -> Result<()> {
    let decode_config = DecodeConfig::default();

    while let Some(frame) = connection.framed().next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) if e.is_protocol_violation() => {
                warn!(
                    session_id = %session.session_id(),
                    "protocol violation, closing connection: {e}"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if frame.is_empty() {
            warn!(
                session_id = %session.session_id(),
                "empty request frame, closing connection"
            );
            return Ok(());
        }
        if is_json_frame(&frame) {
            // The handshake is over. A JSON frame now is a downgrade attempt.
            warn!(
                session_id = %session.session_id(),
                "JSON frame after handshake, closing connection"
            );
            return Ok(());
        }

        let tag = frame[0];
        let reply = match MessageId::from_tag(tag) {
            None => {
                debug!(session_id = %session.session_id(), tag, "unknown message id");
                encode_failure(FailureCode::UnsupportedOperation, tag)
            }
            Some(id) => match Message::decode_request(id, &frame[1..], &decode_config) {
                Err(e) => {
                    debug!(
                        session_id = %session.session_id(),
                        message = %id,
                        "malformed request: {e}"
                    );
                    encode_failure(FailureCode::MalformedRequest, tag)
                }
                Ok(mut message) => match dispatcher.dispatch(session, &mut message) {
                    Err(_) => encode_failure(FailureCode::Internal, tag),
                    Ok(DispatchOutcome::Unsupported) => {
                        encode_failure(FailureCode::UnsupportedOperation, tag)
                    }
                    Ok(DispatchOutcome::Denied { .. }) => {
                        encode_failure(FailureCode::AccessDenied, tag)
                    }
                    Ok(DispatchOutcome::Completed) => match message.encode_reply() {
                        Some(reply) => reply,
                        // Only the sentinel encodes to nothing, and it never
                        // completes.
                        None => encode_failure(FailureCode::Internal, tag),
                    },
                },
            },
        };

        connection.framed().send(reply).await?;
    }

    debug!(session_id = %session.session_id(), "peer closed connection");
    Ok(())
}

/// Release everything the session still holds.
fn teardown(ctx: &RuntimeContext, session: &ClientSession) {
    let abandoned = session.take_shutdown_protection();
    if abandoned > 0 {
        let remaining = ctx.state().protection_released(abandoned as usize);
        if let Some(metrics) = ctx.metrics() {
            metrics.set_shutdown_protection_held(remaining);
        }
        info!(
            session_id = %session.session_id(),
            abandoned,
            "released shutdown protection held by disconnected session"
        );
    }

    let active = ctx.state().session_closed();
    if let Some(metrics) = ctx.metrics() {
        metrics.session_ended();
    }

    if session.informer_enabled(INFORMER_SESSION_LIFECYCLE) {
        info!(
            target: "procwarden::informer",
            session_id = %session.session_id(),
            uid = session.peer().uid,
            "session closed"
        );
    }

    info!(session_id = %session.session_id(), active, "session closed");
}
