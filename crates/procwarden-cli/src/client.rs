//! Broker protocol client.
//!
//! Wraps the shared transport from `procwarden_daemon::protocol` behind
//! typed request methods. The CLI and the daemon compile the same framing,
//! handshake, and message code, so the two sides cannot drift apart.
//!
//! # Connection Lifecycle
//!
//! 1. Connect to the Unix control socket.
//! 2. Exchange the JSON handshake (`hello` / `hello_ack`) under the small
//!    pre-handshake frame limit.
//! 3. Lift the frame limit and issue `[tag][protobuf]` requests.
//!
//! # Error Mapping
//!
//! A missing socket and a refused connection both become
//! [`ClientError::DaemonNotRunning`] so every command reports the common
//! "daemon is down" case the same way. A `[0x00]` failure frame becomes
//! [`ClientError::Refused`] carrying the broker's failure code; an
//! operation that dispatched but did not succeed is *not* an error here,
//! because the reply's status field belongs to the command layer.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message as _;

use procwarden_daemon::protocol::messages::{
    AssignSessionTokenReply, AssignSessionTokenRequest, DispatchFailure,
    EnumerateProcessHandlesReply, EnumerateProcessHandlesRequest, FAILURE_REPLY_TAG, FailureCode,
    GetConnectedClientCountReply, GetConnectedClientCountRequest, GetInformerSettingsReply,
    GetInformerSettingsRequest, GetMessageTimeoutsReply, GetMessageTimeoutsRequest,
    OpenProcessReply, OpenProcessRequest, QueryClockReply, QueryClockRequest,
    QueryInformationProcessReply, QueryInformationProcessRequest, QueryMemoryMappingsReply,
    QueryMemoryMappingsRequest, ReadProcessMemoryReply, ReadProcessMemoryRequest,
    SetInformerSettingsReply, SetInformerSettingsRequest, SetMessageTimeoutsReply,
    SetMessageTimeoutsRequest, TerminateProcessReply, TerminateProcessRequest, encode_request,
};
use procwarden_daemon::protocol::{
    self as protocol, ClientHandshake, Connection, HelloAck, MessageId, ProtocolError,
    parse_handshake_message, serialize_handshake_message,
};

/// Client identification sent in the handshake hello.
const CLIENT_INFO: &str = concat!("procwarden/", env!("CARGO_PKG_VERSION"));

/// Default per-operation timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Failure talking to the broker daemon.
#[derive(Debug)]
pub enum ClientError {
    /// The control socket does not exist or nothing is listening on it.
    DaemonNotRunning,
    /// The daemon speaks an incompatible protocol version.
    VersionMismatch {
        /// Version this client speaks.
        client: u32,
        /// Version the daemon reported.
        server: u32,
    },
    /// The handshake failed for a reason other than version skew.
    HandshakeFailed(String),
    /// Transport-level I/O failure.
    Io(io::Error),
    /// Framing or handshake serialization failure.
    Protocol(ProtocolError),
    /// A reply frame arrived but did not decode.
    Decode(String),
    /// The broker refused to run the request.
    Refused {
        /// Why the request never reached its handler.
        code: FailureCode,
        /// Tag of the refused request, echoed by the broker.
        message_id: u32,
    },
    /// The daemon answered with a frame for a different operation.
    UnexpectedResponse(String),
    /// The daemon closed the connection mid-exchange.
    ConnectionClosed,
    /// The operation did not finish within the client timeout.
    Timeout,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DaemonNotRunning => {
                write!(f, "daemon is not running (socket not found or connection refused)")
            }
            Self::VersionMismatch { client, server } => {
                write!(
                    f,
                    "protocol version mismatch: client speaks {client}, server speaks {server}"
                )
            }
            Self::HandshakeFailed(reason) => write!(f, "handshake failed: {reason}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Decode(reason) => write!(f, "failed to decode reply: {reason}"),
            Self::Refused { code, message_id } => {
                write!(
                    f,
                    "broker refused {}: {}",
                    refused_operation(*message_id),
                    failure_code_name(*code)
                )
            }
            Self::UnexpectedResponse(reason) => write!(f, "unexpected response: {reason}"),
            Self::ConnectionClosed => write!(f, "connection closed by daemon"),
            Self::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => Self::DaemonNotRunning,
            _ => Self::Io(err),
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io_err) => Self::from(io_err),
            ProtocolError::VersionMismatch {
                client_version,
                server_version,
            } => Self::VersionMismatch {
                client: client_version,
                server: server_version,
            },
            ProtocolError::HandshakeFailed { reason } => Self::HandshakeFailed(reason),
            ProtocolError::ConnectionClosed => Self::ConnectionClosed,
            ProtocolError::Timeout { .. } => Self::Timeout,
            other => Self::Protocol(other),
        }
    }
}

/// Name of the operation a failure frame answers, for error text.
fn refused_operation(message_id: u32) -> String {
    u8::try_from(message_id)
        .ok()
        .and_then(MessageId::from_tag)
        .map_or_else(
            || format!("operation tag {message_id}"),
            |id| id.name().to_string(),
        )
}

/// Human wording for a broker failure code.
fn failure_code_name(code: FailureCode) -> &'static str {
    match code {
        FailureCode::Unspecified => "unspecified failure",
        FailureCode::UnsupportedOperation => "unsupported operation",
        FailureCode::AccessDenied => "access denied",
        FailureCode::MalformedRequest => "malformed request",
        FailureCode::Internal => "internal broker error",
    }
}

/// Connected, handshaken session with the broker daemon.
pub struct BrokerClient {
    connection: Connection,
    ack: HelloAck,
    timeout: Duration,
}

impl BrokerClient {
    /// Connect with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DaemonNotRunning`] when no daemon is listening,
    /// or another [`ClientError`] for handshake and transport failures.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        Self::connect_with_timeout(socket_path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect with a custom per-operation timeout.
    ///
    /// The timeout applies to the connect itself, to each handshake frame,
    /// and to every request issued through the client afterwards.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn connect_with_timeout(
        socket_path: &Path,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }

        let connected = tokio::time::timeout(timeout, protocol::connect(socket_path))
            .await
            .map_err(|_| ClientError::Timeout)?;
        let mut connection = connected?;

        let ack = perform_handshake(&mut connection, timeout).await?;
        // The ack is the last small frame; replies may now be full size.
        connection.upgrade_to_full_frame_size();

        Ok(Self {
            connection,
            ack,
            timeout,
        })
    }

    /// Server identification from the handshake ack.
    #[must_use]
    pub fn server_info(&self) -> &str {
        &self.ack.server_info
    }

    /// Session id the broker assigned to this connection.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.ack.session_id
    }

    /// Capabilities the broker advertised.
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.ack.capabilities
    }

    pub async fn get_informer_settings(
        &mut self,
    ) -> Result<GetInformerSettingsReply, ClientError> {
        self.roundtrip(MessageId::GetInformerSettings, &GetInformerSettingsRequest {})
            .await
    }

    pub async fn set_informer_settings(
        &mut self,
        flags: u64,
    ) -> Result<SetInformerSettingsReply, ClientError> {
        self.roundtrip(
            MessageId::SetInformerSettings,
            &SetInformerSettingsRequest { flags },
        )
        .await
    }

    pub async fn assign_session_token(
        &mut self,
        token: String,
    ) -> Result<AssignSessionTokenReply, ClientError> {
        self.roundtrip(
            MessageId::AssignSessionToken,
            &AssignSessionTokenRequest { token },
        )
        .await
    }

    pub async fn open_process(
        &mut self,
        process_id: u32,
        desired_access: u32,
    ) -> Result<OpenProcessReply, ClientError> {
        self.roundtrip(
            MessageId::OpenProcess,
            &OpenProcessRequest {
                process_id,
                desired_access,
            },
        )
        .await
    }

    pub async fn terminate_process(
        &mut self,
        process_handle: u64,
        signal: i32,
    ) -> Result<TerminateProcessReply, ClientError> {
        self.roundtrip(
            MessageId::TerminateProcess,
            &TerminateProcessRequest {
                process_handle,
                signal,
            },
        )
        .await
    }

    pub async fn read_process_memory(
        &mut self,
        process_handle: u64,
        address: u64,
        length: u32,
    ) -> Result<ReadProcessMemoryReply, ClientError> {
        self.roundtrip(
            MessageId::ReadProcessMemory,
            &ReadProcessMemoryRequest {
                process_handle,
                address,
                length,
            },
        )
        .await
    }

    pub async fn enumerate_process_handles(
        &mut self,
        process_handle: u64,
    ) -> Result<EnumerateProcessHandlesReply, ClientError> {
        self.roundtrip(
            MessageId::EnumerateProcessHandles,
            &EnumerateProcessHandlesRequest { process_handle },
        )
        .await
    }

    pub async fn query_information_process(
        &mut self,
        process_handle: u64,
        info_class: u32,
    ) -> Result<QueryInformationProcessReply, ClientError> {
        self.roundtrip(
            MessageId::QueryInformationProcess,
            &QueryInformationProcessRequest {
                process_handle,
                info_class,
            },
        )
        .await
    }

    pub async fn query_memory_mappings(
        &mut self,
        process_handle: u64,
        max_entries: u32,
    ) -> Result<QueryMemoryMappingsReply, ClientError> {
        self.roundtrip(
            MessageId::QueryMemoryMappings,
            &QueryMemoryMappingsRequest {
                process_handle,
                max_entries,
            },
        )
        .await
    }

    pub async fn query_clock(&mut self) -> Result<QueryClockReply, ClientError> {
        self.roundtrip(MessageId::QueryClock, &QueryClockRequest {})
            .await
    }

    pub async fn get_message_timeouts(&mut self) -> Result<GetMessageTimeoutsReply, ClientError> {
        self.roundtrip(MessageId::GetMessageTimeouts, &GetMessageTimeoutsRequest {})
            .await
    }

    pub async fn set_message_timeouts(
        &mut self,
        request_timeout_ms: u64,
    ) -> Result<SetMessageTimeoutsReply, ClientError> {
        self.roundtrip(
            MessageId::SetMessageTimeouts,
            &SetMessageTimeoutsRequest { request_timeout_ms },
        )
        .await
    }

    pub async fn get_connected_client_count(
        &mut self,
    ) -> Result<GetConnectedClientCountReply, ClientError> {
        self.roundtrip(
            MessageId::GetConnectedClientCount,
            &GetConnectedClientCountRequest {},
        )
        .await
    }

    /// Sends one request and decodes the matching reply.
    ///
    /// Replies arrive strictly in request order, so the next frame on the
    /// connection always answers this request.
    async fn roundtrip<Req, Resp>(
        &mut self,
        id: MessageId,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: prost::Message,
        Resp: prost::Message + Default,
    {
        let frame = encode_request(id, request);
        tokio::time::timeout(self.timeout, self.connection.framed().send(frame))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::from)?;

        let reply = tokio::time::timeout(self.timeout, self.connection.framed().next())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::ConnectionClosed)?
            .map_err(ClientError::from)?;

        decode_reply(id, &reply)
    }
}

async fn perform_handshake(
    connection: &mut Connection,
    timeout: Duration,
) -> Result<HelloAck, ClientError> {
    let mut handshake = ClientHandshake::new(CLIENT_INFO.to_string(), Vec::new());

    let hello = serialize_handshake_message(&handshake.create_hello())?;
    tokio::time::timeout(timeout, connection.framed().send(Bytes::from(hello)))
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::from)?;

    let frame = tokio::time::timeout(timeout, connection.framed().next())
        .await
        .map_err(|_| ClientError::Timeout)?
        .ok_or(ClientError::ConnectionClosed)?
        .map_err(ClientError::from)?;

    let response = parse_handshake_message(&frame)?;
    Ok(handshake.process_response(response)?)
}

/// Decodes a reply frame for the request tagged `id`.
///
/// An empty frame and a tag that matches neither the request nor the
/// failure tag are protocol violations; a well-formed failure frame becomes
/// [`ClientError::Refused`].
fn decode_reply<Resp>(id: MessageId, frame: &[u8]) -> Result<Resp, ClientError>
where
    Resp: prost::Message + Default,
{
    let Some((&tag, payload)) = frame.split_first() else {
        return Err(ClientError::Decode("empty reply frame".to_string()));
    };

    if tag == FAILURE_REPLY_TAG {
        let failure = DispatchFailure::decode(payload)
            .map_err(|err| ClientError::Decode(format!("malformed failure reply: {err}")))?;
        return Err(ClientError::Refused {
            code: failure.code(),
            message_id: failure.message_id,
        });
    }

    if tag != id.tag() {
        return Err(ClientError::UnexpectedResponse(format!(
            "expected {} reply (tag {}), got tag {tag}",
            id,
            id.tag()
        )));
    }

    Resp::decode(payload).map_err(|err| ClientError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use procwarden_core::OperationStatus;
    use procwarden_core::access::PROCESS_READ_ACCESS;
    use procwarden_daemon::protocol::messages::encode_failure;

    #[test]
    fn client_info_names_the_binary() {
        assert!(CLIENT_INFO.starts_with("procwarden/"));
    }

    #[test]
    fn error_display_is_stable() {
        assert_eq!(
            ClientError::DaemonNotRunning.to_string(),
            "daemon is not running (socket not found or connection refused)"
        );
        assert_eq!(ClientError::Timeout.to_string(), "operation timed out");
        assert_eq!(
            ClientError::VersionMismatch {
                client: 1,
                server: 2
            }
            .to_string(),
            "protocol version mismatch: client speaks 1, server speaks 2"
        );
        let refused = ClientError::Refused {
            code: FailureCode::AccessDenied,
            message_id: u32::from(MessageId::TerminateProcess.tag()),
        };
        assert_eq!(
            refused.to_string(),
            "broker refused terminate_process: access denied"
        );
    }

    #[test]
    fn refused_tags_without_a_catalog_slot_keep_the_raw_tag() {
        let refused = ClientError::Refused {
            code: FailureCode::UnsupportedOperation,
            message_id: 200,
        };
        assert_eq!(
            refused.to_string(),
            "broker refused operation tag 200: unsupported operation"
        );
    }

    #[test]
    fn io_errors_map_onto_daemon_state() {
        let err = ClientError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, ClientError::DaemonNotRunning));

        let err = ClientError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(err, ClientError::DaemonNotRunning));

        let err = ClientError::from(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn protocol_errors_collapse_to_client_variants() {
        let err = ClientError::from(ProtocolError::ConnectionClosed);
        assert!(matches!(err, ClientError::ConnectionClosed));

        let err = ClientError::from(ProtocolError::VersionMismatch {
            client_version: 1,
            server_version: 9,
        });
        assert!(matches!(
            err,
            ClientError::VersionMismatch {
                client: 1,
                server: 9
            }
        ));

        let err = ClientError::from(ProtocolError::Timeout { duration_ms: 50 });
        assert!(matches!(err, ClientError::Timeout));

        // ProtocolError::Io unwraps to the same mapping as a direct io::Error.
        let err = ClientError::from(ProtocolError::Io(io::Error::from(
            io::ErrorKind::ConnectionRefused,
        )));
        assert!(matches!(err, ClientError::DaemonNotRunning));
    }

    #[test]
    fn requests_are_tag_prefixed_protobuf() {
        let encoded = encode_request(
            MessageId::OpenProcess,
            &OpenProcessRequest {
                process_id: 42,
                desired_access: PROCESS_READ_ACCESS,
            },
        );

        assert_eq!(encoded[0], MessageId::OpenProcess.tag());
        if encoded.len() > 1 {
            assert_ne!(encoded[1], b'{', "request payloads are protobuf, not JSON");
        }

        let decoded = OpenProcessRequest::decode(&encoded[1..]).expect("payload decodes");
        assert_eq!(decoded.process_id, 42);
        assert_eq!(decoded.desired_access, PROCESS_READ_ACCESS);
    }

    #[test]
    fn empty_reply_frame_is_a_decode_error() {
        let err = decode_reply::<QueryClockReply>(MessageId::QueryClock, &[]).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn failure_frame_surfaces_the_refusal() {
        let frame = encode_failure(FailureCode::AccessDenied, MessageId::TerminateProcess.tag());
        let err = decode_reply::<TerminateProcessReply>(MessageId::TerminateProcess, &frame)
            .unwrap_err();

        match err {
            ClientError::Refused { code, message_id } => {
                assert_eq!(code, FailureCode::AccessDenied);
                assert_eq!(message_id, u32::from(MessageId::TerminateProcess.tag()));
            }
            other => panic!("expected refusal, got {other}"),
        }
    }

    #[test]
    fn malformed_failure_payload_is_a_decode_error() {
        // Field number 0 is never valid protobuf.
        let err = decode_reply::<QueryClockReply>(MessageId::QueryClock, &[FAILURE_REPLY_TAG, 0x07])
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn mismatched_reply_tag_is_unexpected() {
        let mut frame = vec![MessageId::QueryClock.tag()];
        QueryClockReply::default()
            .encode(&mut frame)
            .expect("encode");

        let err = decode_reply::<GetMessageTimeoutsReply>(MessageId::GetMessageTimeouts, &frame)
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[test]
    fn well_formed_reply_decodes() {
        let reply = QueryClockReply {
            status: OperationStatus::Success as i32,
            monotonic_ns: 1_234_567,
            realtime_unix_ns: 1_700_000_000_000_000_000,
            boot_id: "f2f1b9e0".to_string(),
        };
        let mut frame = vec![MessageId::QueryClock.tag()];
        reply.encode(&mut frame).expect("encode");

        let decoded: QueryClockReply =
            decode_reply(MessageId::QueryClock, &frame).expect("reply decodes");
        assert_eq!(decoded.status, OperationStatus::Success as i32);
        assert_eq!(decoded.boot_id, "f2f1b9e0");
    }
}
