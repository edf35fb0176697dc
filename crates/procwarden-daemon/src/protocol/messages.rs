//! Wire message types for the broker request protocol.
//!
//! Requests and replies travel as length-prefixed frames (see
//! [`framing`](super::framing)). The payload of a request frame is
//! `[message_id: u8][protobuf request]`; a completed reply echoes the id,
//! `[message_id: u8][protobuf reply]`; a request the broker refuses to run
//! is answered with `[0x00][DispatchFailure]`.
//!
//! # Message Categories
//!
//! - **Process**: [`OpenProcessRequest`], [`OpenProcessCredentialsRequest`],
//!   [`OpenProcessCgroupRequest`], [`TerminateProcessRequest`],
//!   [`ReadProcessMemoryRequest`], [`EnumerateProcessHandlesRequest`],
//!   [`QueryInformationProcessRequest`], [`SetInformationProcessRequest`],
//!   [`QueryMemoryMappingsRequest`]
//! - **Thread**: [`OpenThreadRequest`], [`OpenThreadProcessRequest`],
//!   [`CaptureThreadStackRequest`], [`QueryInformationThreadRequest`],
//!   [`SetInformationThreadRequest`]
//! - **Handle**: [`QueryInformationHandleRequest`],
//!   [`SetInformationHandleRequest`], [`DuplicateHandleRequest`],
//!   [`CompareHandlesRequest`]
//! - **File**: [`OpenFileRequest`], [`QueryInformationFileRequest`],
//!   [`QueryFileSystemInformationRequest`]
//! - **System**: [`OpenModuleRequest`], [`QueryInformationModuleRequest`],
//!   [`QueryClockRequest`], [`GetMessageTimeoutsRequest`],
//!   [`SetMessageTimeoutsRequest`], [`AcquireShutdownProtectionRequest`],
//!   [`ReleaseShutdownProtectionRequest`], [`GetConnectedClientCountRequest`],
//!   [`SystemControlRequest`]
//! - **Informer**: [`GetInformerSettingsRequest`],
//!   [`SetInformerSettingsRequest`], [`AssignSessionTokenRequest`]
//!
//! # Status Discipline
//!
//! Every reply carries an [`OperationStatus`] in field 1. A request the
//! dispatcher accepted always produces a reply frame, and a handler's
//! business failure (no such pid, permission refused by the host, bad info
//! class) is carried in that status, not as a dispatch failure. Reply
//! payloads are seeded with `OperationStatus::Internal` when the request is
//! decoded, so a handler that forgets to write a status produces a visible
//! internal error instead of a silent success.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message as _;
use thiserror::Error;

use procwarden_core::OperationStatus;
use procwarden_core::access::FileDisposition;

/// Upper bound on a single [`ReadProcessMemoryRequest`] read (4 MiB).
/// Longer ranges are refused with `BufferTooLarge`; callers page.
pub const MAX_MEMORY_READ_LEN: u32 = 4 * 1024 * 1024;

/// Informer flag: emit process lifecycle events while enabled.
pub const INFORMER_PROCESS_LIFECYCLE: u64 = 1 << 0;
/// Informer flag: emit an event when a request is denied.
pub const INFORMER_DENIAL_NOTICES: u64 = 1 << 1;
/// Informer flag: emit session connect/disconnect events.
pub const INFORMER_SESSION_LIFECYCLE: u64 = 1 << 2;
/// All defined informer flags. Setting any other bit is rejected.
pub const INFORMER_ALL_FLAGS: u64 =
    INFORMER_PROCESS_LIFECYCLE | INFORMER_DENIAL_NOTICES | INFORMER_SESSION_LIFECYCLE;

/// `QueryInformationProcess` info class: basic identity and memory figures.
pub const PROCESS_INFO_BASIC: u32 = 1;
/// `QueryInformationProcess` info class: broker-side tracking data for the
/// handle itself.
pub const PROCESS_INFO_TRACKING: u32 = 2;
/// `QueryInformationProcess` info class: credentials of the process.
/// Priced at the maximum tier.
pub const PROCESS_INFO_CREDENTIALS: u32 = 3;
/// `SetInformationProcess` info class: OOM score adjustment.
pub const PROCESS_SET_OOM_SCORE_ADJUST: u32 = 1;
/// `QueryInformationThread` info class: basic identity and scheduling state.
pub const THREAD_INFO_BASIC: u32 = 1;
/// `QueryInformationThread` info class: kernel stack frames.
pub const THREAD_INFO_KERNEL_STACK: u32 = 2;
/// `SetInformationThread` info class: scheduling priority (nice value).
pub const THREAD_SET_PRIORITY: u32 = 1;
/// `SetInformationHandle` info class: reduce the handle's granted access.
pub const HANDLE_SET_REDUCE_ACCESS: u32 = 1;
/// `QueryInformationModule` info class: basic module facts.
pub const MODULE_INFO_BASIC: u32 = 1;
/// `SystemControl` control class: write a sysctl value.
pub const SYSTEM_CONTROL_SYSCTL: u32 = 1;

/// Tag of the failure reply frame. Coincides with the reserved
/// [`MessageId::Invalid`] tag, which never identifies a real operation.
pub const FAILURE_REPLY_TAG: u8 = 0;

/// Operation identifiers.
///
/// Ids are dense and stable: they index the dispatch catalog directly and
/// appear on the wire as the first payload byte. Tag 0 is reserved; it never
/// identifies an operation and doubles as the failure reply tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageId {
    /// Reserved sentinel. Requests carrying it are answered unsupported.
    Invalid = 0,
    GetInformerSettings = 1,
    SetInformerSettings = 2,
    OpenProcess = 3,
    OpenProcessCredentials = 4,
    OpenProcessCgroup = 5,
    TerminateProcess = 6,
    ReadProcessMemory = 7,
    OpenThread = 8,
    OpenThreadProcess = 9,
    CaptureThreadStack = 10,
    EnumerateProcessHandles = 11,
    QueryInformationHandle = 12,
    SetInformationHandle = 13,
    OpenModule = 14,
    QueryInformationModule = 15,
    QueryInformationProcess = 16,
    SetInformationProcess = 17,
    QueryInformationThread = 18,
    SetInformationThread = 19,
    QueryInformationFile = 20,
    QueryFileSystemInformation = 21,
    OpenFile = 22,
    DuplicateHandle = 23,
    QueryClock = 24,
    QueryMemoryMappings = 25,
    CompareHandles = 26,
    GetMessageTimeouts = 27,
    SetMessageTimeouts = 28,
    AcquireShutdownProtection = 29,
    ReleaseShutdownProtection = 30,
    GetConnectedClientCount = 31,
    AssignSessionToken = 32,
    SystemControl = 33,
}

impl MessageId {
    /// Number of assigned ids, the sentinel included.
    pub const COUNT: usize = 34;

    /// Wire tag for this id.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag. Returns `None` for tags no catalog slot exists for.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Invalid,
            1 => Self::GetInformerSettings,
            2 => Self::SetInformerSettings,
            3 => Self::OpenProcess,
            4 => Self::OpenProcessCredentials,
            5 => Self::OpenProcessCgroup,
            6 => Self::TerminateProcess,
            7 => Self::ReadProcessMemory,
            8 => Self::OpenThread,
            9 => Self::OpenThreadProcess,
            10 => Self::CaptureThreadStack,
            11 => Self::EnumerateProcessHandles,
            12 => Self::QueryInformationHandle,
            13 => Self::SetInformationHandle,
            14 => Self::OpenModule,
            15 => Self::QueryInformationModule,
            16 => Self::QueryInformationProcess,
            17 => Self::SetInformationProcess,
            18 => Self::QueryInformationThread,
            19 => Self::SetInformationThread,
            20 => Self::QueryInformationFile,
            21 => Self::QueryFileSystemInformation,
            22 => Self::OpenFile,
            23 => Self::DuplicateHandle,
            24 => Self::QueryClock,
            25 => Self::QueryMemoryMappings,
            26 => Self::CompareHandles,
            27 => Self::GetMessageTimeouts,
            28 => Self::SetMessageTimeouts,
            29 => Self::AcquireShutdownProtection,
            30 => Self::ReleaseShutdownProtection,
            31 => Self::GetConnectedClientCount,
            32 => Self::AssignSessionToken,
            33 => Self::SystemControl,
            _ => return None,
        })
    }

    /// Stable name for logs and metric labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::GetInformerSettings => "get_informer_settings",
            Self::SetInformerSettings => "set_informer_settings",
            Self::OpenProcess => "open_process",
            Self::OpenProcessCredentials => "open_process_credentials",
            Self::OpenProcessCgroup => "open_process_cgroup",
            Self::TerminateProcess => "terminate_process",
            Self::ReadProcessMemory => "read_process_memory",
            Self::OpenThread => "open_thread",
            Self::OpenThreadProcess => "open_thread_process",
            Self::CaptureThreadStack => "capture_thread_stack",
            Self::EnumerateProcessHandles => "enumerate_process_handles",
            Self::QueryInformationHandle => "query_information_handle",
            Self::SetInformationHandle => "set_information_handle",
            Self::OpenModule => "open_module",
            Self::QueryInformationModule => "query_information_module",
            Self::QueryInformationProcess => "query_information_process",
            Self::SetInformationProcess => "set_information_process",
            Self::QueryInformationThread => "query_information_thread",
            Self::SetInformationThread => "set_information_thread",
            Self::QueryInformationFile => "query_information_file",
            Self::QueryFileSystemInformation => "query_file_system_information",
            Self::OpenFile => "open_file",
            Self::DuplicateHandle => "duplicate_handle",
            Self::QueryClock => "query_clock",
            Self::QueryMemoryMappings => "query_memory_mappings",
            Self::CompareHandles => "compare_handles",
            Self::GetMessageTimeouts => "get_message_timeouts",
            Self::SetMessageTimeouts => "set_message_timeouts",
            Self::AcquireShutdownProtection => "acquire_shutdown_protection",
            Self::ReleaseShutdownProtection => "release_shutdown_protection",
            Self::GetConnectedClientCount => "get_connected_client_count",
            Self::AssignSessionToken => "assign_session_token",
            Self::SystemControl => "system_control",
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Decode bounds
// ============================================================================

/// Default decode limit for a single request payload (8 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Request payload decode failure.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload length exceeded the configured decode limit.
    #[error("payload of {len} bytes exceeds decode limit of {max} bytes")]
    TooLarge {
        /// Payload length received.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Payload bytes are not a valid encoding of the expected message.
    #[error("malformed payload: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Limits applied when decoding untrusted request payloads.
#[derive(Debug, Clone, Copy)]
pub struct DecodeConfig {
    max_payload_bytes: usize,
}

impl DecodeConfig {
    /// Config with a custom payload limit.
    #[must_use]
    pub const fn new(max_payload_bytes: usize) -> Self {
        Self { max_payload_bytes }
    }

    /// Configured payload limit in bytes.
    #[must_use]
    pub const fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Length-checked protobuf decoding.
///
/// The length check runs before any protobuf parsing, so a hostile payload
/// cannot force large allocations past the configured limit.
pub trait BoundedDecode: Sized {
    /// Decode `buf`, refusing payloads longer than the configured limit.
    fn decode_bounded(buf: &[u8], config: &DecodeConfig) -> Result<Self, DecodeError>;
}

impl<T: prost::Message + Default> BoundedDecode for T {
    fn decode_bounded(buf: &[u8], config: &DecodeConfig) -> Result<Self, DecodeError> {
        if buf.len() > config.max_payload_bytes {
            return Err(DecodeError::TooLarge {
                len: buf.len(),
                max: config.max_payload_bytes,
            });
        }
        Ok(T::decode(buf)?)
    }
}

// ============================================================================
// Dispatch failure frame
// ============================================================================

/// Why a request was refused without running its handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FailureCode {
    /// Unset. Never sent deliberately.
    Unspecified = 0,
    /// No operation is assigned to the request's id.
    UnsupportedOperation = 1,
    /// The session's trust tier does not cover the operation.
    AccessDenied = 2,
    /// The request payload did not decode.
    MalformedRequest = 3,
    /// The broker failed internally before the handler could answer.
    Internal = 4,
}

/// Body of a `[0x00][...]` failure reply frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DispatchFailure {
    /// Failure classification.
    #[prost(enumeration = "FailureCode", tag = "1")]
    pub code: i32,
    /// Tag of the request this answers, echoed for correlation.
    #[prost(uint32, tag = "2")]
    pub message_id: u32,
}

/// Encode a failure reply frame for the request tagged `message_id`.
#[must_use]
pub fn encode_failure(code: FailureCode, message_id: u8) -> Bytes {
    let failure = DispatchFailure {
        code: code as i32,
        message_id: u32::from(message_id),
    };
    let payload = failure.encode_to_vec();
    let mut frame = BytesMut::with_capacity(1 + payload.len());
    frame.put_u8(FAILURE_REPLY_TAG);
    frame.extend_from_slice(&payload);
    frame.freeze()
}

/// Frame a request for the wire: `[tag][protobuf]`. The client-side
/// counterpart of [`Message::decode_request`].
#[must_use]
pub fn encode_request<T: prost::Message>(id: MessageId, request: &T) -> Bytes {
    let payload = request.encode_to_vec();
    let mut frame = BytesMut::with_capacity(1 + payload.len());
    frame.put_u8(id.tag());
    frame.extend_from_slice(&payload);
    frame.freeze()
}

// ============================================================================
// Informer settings (1, 2) and session tokens (32)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInformerSettingsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetInformerSettingsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Currently enabled informer flags for this session.
    #[prost(uint64, tag = "2")]
    pub flags: u64,
}

/// Replace the session's informer flags.
///
/// Bits outside [`INFORMER_ALL_FLAGS`] are rejected with `InvalidParameter`
/// and the previous flags stay in force.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformerSettingsRequest {
    #[prost(uint64, tag = "1")]
    pub flags: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformerSettingsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

/// Present a session token to raise this session's trust tier.
///
/// Elevation is monotonic. A token for a tier at or below the current one
/// succeeds without changing anything.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssignSessionTokenRequest {
    /// Hex-encoded token minted by `procwarden mint-token`.
    #[prost(string, tag = "1")]
    pub token: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssignSessionTokenReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Session tier after the assignment.
    #[prost(uint32, tag = "2")]
    pub tier: u32,
    /// Unix time the presented token expires, when it verified.
    #[prost(uint64, tag = "3")]
    pub expires_at: u64,
}

// ============================================================================
// Process operations (3..=7, 11, 16, 17, 25)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessRequest {
    #[prost(uint32, tag = "1")]
    pub process_id: u32,
    /// Requested `PROCESS_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
    /// Start time of the opened process, in clock ticks since boot. Pins the
    /// handle to this incarnation of the pid.
    #[prost(uint64, tag = "3")]
    pub start_time: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessCredentialsRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// Requested `CREDENTIALS_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessCredentialsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessCgroupRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// Requested `CGROUP_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenProcessCgroupReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

/// Send a termination signal through a process handle.
///
/// The handle must have been opened with `PROCESS_TERMINATE`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TerminateProcessRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// Signal number. Zero means SIGKILL.
    #[prost(int32, tag = "2")]
    pub signal: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TerminateProcessReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

/// Read a range of another process's address space.
///
/// Reads longer than [`MAX_MEMORY_READ_LEN`] are refused with
/// `BufferTooLarge`. Short reads at unmapped boundaries return the readable
/// prefix.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadProcessMemoryRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    #[prost(uint64, tag = "2")]
    pub address: u64,
    #[prost(uint32, tag = "3")]
    pub length: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadProcessMemoryReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnumerateProcessHandlesRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnumerateProcessHandlesReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub handles: ::prost::alloc::vec::Vec<HandleSummary>,
}

/// One open file descriptor of an inspected process.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandleSummary {
    #[prost(uint32, tag = "1")]
    pub fd: u32,
    /// Link target, e.g. a path or `socket:[12345]`.
    #[prost(string, tag = "2")]
    pub target: ::prost::alloc::string::String,
    /// Open flags as reported by the host.
    #[prost(uint32, tag = "3")]
    pub flags: u32,
    /// Current file offset.
    #[prost(int64, tag = "4")]
    pub offset: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationProcessRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// One of the `PROCESS_INFO_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationProcessReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Set for [`PROCESS_INFO_BASIC`].
    #[prost(message, optional, tag = "2")]
    pub basic: ::core::option::Option<ProcessBasicInformation>,
    /// Set for [`PROCESS_INFO_TRACKING`].
    #[prost(message, optional, tag = "3")]
    pub tracking: ::core::option::Option<ProcessTrackingInformation>,
    /// Set for [`PROCESS_INFO_CREDENTIALS`].
    #[prost(message, optional, tag = "4")]
    pub credentials: ::core::option::Option<ProcessCredentialsInformation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessBasicInformation {
    #[prost(uint32, tag = "1")]
    pub process_id: u32,
    #[prost(uint32, tag = "2")]
    pub parent_process_id: u32,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
    /// Single-letter scheduler state, e.g. `R`, `S`, `Z`.
    #[prost(string, tag = "4")]
    pub state: ::prost::alloc::string::String,
    #[prost(uint32, tag = "5")]
    pub uid: u32,
    #[prost(uint32, tag = "6")]
    pub gid: u32,
    #[prost(uint32, tag = "7")]
    pub thread_count: u32,
    /// Clock ticks since boot at process start.
    #[prost(uint64, tag = "8")]
    pub start_time: u64,
    #[prost(uint64, tag = "9")]
    pub virtual_size: u64,
    #[prost(uint64, tag = "10")]
    pub resident_size: u64,
}

/// Broker-side facts about the handle used for the query.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessTrackingInformation {
    #[prost(uint32, tag = "1")]
    pub granted_access: u32,
    /// How many handles this session holds to the same process.
    #[prost(uint32, tag = "2")]
    pub open_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessCredentialsInformation {
    #[prost(uint32, tag = "1")]
    pub uid: u32,
    #[prost(uint32, tag = "2")]
    pub euid: u32,
    #[prost(uint32, tag = "3")]
    pub gid: u32,
    #[prost(uint32, tag = "4")]
    pub egid: u32,
    #[prost(uint32, repeated, packed = "true", tag = "5")]
    pub groups: ::prost::alloc::vec::Vec<u32>,
    /// Effective capability mask.
    #[prost(uint64, tag = "6")]
    pub cap_effective: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationProcessRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// One of the `PROCESS_SET_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
    #[prost(int64, tag = "3")]
    pub value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationProcessReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryMemoryMappingsRequest {
    #[prost(uint64, tag = "1")]
    pub process_handle: u64,
    /// Cap on returned entries. Zero means no cap.
    #[prost(uint32, tag = "2")]
    pub max_entries: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryMemoryMappingsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, repeated, tag = "2")]
    pub mappings: ::prost::alloc::vec::Vec<MemoryMapping>,
}

/// One mapped region of an inspected process.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemoryMapping {
    #[prost(uint64, tag = "1")]
    pub start: u64,
    #[prost(uint64, tag = "2")]
    pub end: u64,
    /// Permission string as reported by the host, e.g. `r-xp`.
    #[prost(string, tag = "3")]
    pub permissions: ::prost::alloc::string::String,
    #[prost(uint64, tag = "4")]
    pub offset: u64,
    /// Backing path, empty for anonymous mappings.
    #[prost(string, tag = "5")]
    pub path: ::prost::alloc::string::String,
}

// ============================================================================
// Thread operations (8..=10, 18, 19)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenThreadRequest {
    #[prost(uint32, tag = "1")]
    pub thread_id: u32,
    /// Requested `THREAD_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenThreadReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

/// Open a process handle to the process owning a thread.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenThreadProcessRequest {
    #[prost(uint64, tag = "1")]
    pub thread_handle: u64,
    /// Requested `PROCESS_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenThreadProcessReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CaptureThreadStackRequest {
    #[prost(uint64, tag = "1")]
    pub thread_handle: u64,
    /// Cap on captured frames. Zero means the broker default.
    #[prost(uint32, tag = "2")]
    pub max_frames: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CaptureThreadStackReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Symbolic kernel stack frames, innermost first.
    #[prost(string, repeated, tag = "2")]
    pub frames: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationThreadRequest {
    #[prost(uint64, tag = "1")]
    pub thread_handle: u64,
    /// One of the `THREAD_INFO_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationThreadReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Set for [`THREAD_INFO_BASIC`].
    #[prost(message, optional, tag = "2")]
    pub basic: ::core::option::Option<ThreadBasicInformation>,
    /// Set for [`THREAD_INFO_KERNEL_STACK`].
    #[prost(message, optional, tag = "3")]
    pub kernel_stack: ::core::option::Option<ThreadKernelStackInformation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ThreadBasicInformation {
    #[prost(uint32, tag = "1")]
    pub thread_id: u32,
    #[prost(uint32, tag = "2")]
    pub process_id: u32,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
    /// Single-letter scheduler state.
    #[prost(string, tag = "4")]
    pub state: ::prost::alloc::string::String,
    /// Symbol the thread is blocked in, if any.
    #[prost(string, tag = "5")]
    pub wait_channel: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ThreadKernelStackInformation {
    #[prost(string, repeated, tag = "1")]
    pub frames: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationThreadRequest {
    #[prost(uint64, tag = "1")]
    pub thread_handle: u64,
    /// One of the `THREAD_SET_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
    #[prost(int64, tag = "3")]
    pub value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationThreadReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

// ============================================================================
// Handle operations (12, 13, 23, 26)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationHandleRequest {
    #[prost(uint64, tag = "1")]
    pub handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationHandleReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub info: ::core::option::Option<HandleObjectInfo>,
}

/// What a session handle refers to and with which access.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandleObjectInfo {
    /// Object kind, e.g. `process`, `thread`, `file`.
    #[prost(string, tag = "1")]
    pub kind: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub granted_access: u32,
    /// Human-readable object description.
    #[prost(string, tag = "3")]
    pub description: ::prost::alloc::string::String,
}

/// Mutate a session handle in place.
///
/// [`HANDLE_SET_REDUCE_ACCESS`] narrows the handle's granted access to
/// `value`; the new mask must be a subset of the current one. Widening is
/// refused with `AccessDenied`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationHandleRequest {
    #[prost(uint64, tag = "1")]
    pub handle: u64,
    /// One of the `HANDLE_SET_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
    #[prost(uint64, tag = "3")]
    pub value: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetInformationHandleReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

/// Duplicate a session handle, optionally narrowing its access.
///
/// The requested access must be a subset of the source handle's; widening is
/// refused with `AccessDenied`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DuplicateHandleRequest {
    #[prost(uint64, tag = "1")]
    pub source_handle: u64,
    /// Access mask for the duplicate. Zero copies the source mask.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DuplicateHandleReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompareHandlesRequest {
    #[prost(uint64, tag = "1")]
    pub first_handle: u64,
    #[prost(uint64, tag = "2")]
    pub second_handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompareHandlesReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// True when both handles refer to the same underlying object.
    #[prost(bool, tag = "2")]
    pub same_object: bool,
}

// ============================================================================
// File operations (20, 21, 22)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationFileRequest {
    #[prost(uint64, tag = "1")]
    pub file_handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationFileReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub info: ::core::option::Option<FileInformation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileInformation {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    /// Mode bits including file type.
    #[prost(uint32, tag = "3")]
    pub mode: u32,
    #[prost(uint32, tag = "4")]
    pub uid: u32,
    #[prost(uint32, tag = "5")]
    pub gid: u32,
    #[prost(int64, tag = "6")]
    pub modified_unix: i64,
    #[prost(uint64, tag = "7")]
    pub inode: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryFileSystemInformationRequest {
    #[prost(uint64, tag = "1")]
    pub file_handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryFileSystemInformationReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub info: ::core::option::Option<FileSystemInformation>,
}

/// Facts about the filesystem backing a file handle.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileSystemInformation {
    /// Filesystem type magic.
    #[prost(uint64, tag = "1")]
    pub magic: u64,
    #[prost(uint64, tag = "2")]
    pub block_size: u64,
    #[prost(uint64, tag = "3")]
    pub total_bytes: u64,
    #[prost(uint64, tag = "4")]
    pub free_bytes: u64,
    #[prost(uint64, tag = "5")]
    pub available_bytes: u64,
}

/// Open a file path into the session handle table.
///
/// Write access bits and non-open dispositions demand the maximum trust
/// tier; read-only opens of existing files are cheaper.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenFileRequest {
    #[prost(string, tag = "1")]
    pub path: ::prost::alloc::string::String,
    /// Requested `FILE_*` access bits.
    #[prost(uint32, tag = "2")]
    pub desired_access: u32,
    #[prost(enumeration = "FileDisposition", tag = "3")]
    pub disposition: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenFileReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

// ============================================================================
// System operations (14, 15, 24, 27..=31, 33)
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenModuleRequest {
    /// Loaded module name as listed by the host.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OpenModuleReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub handle: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationModuleRequest {
    #[prost(uint64, tag = "1")]
    pub module_handle: u64,
    /// One of the `MODULE_INFO_*` classes.
    #[prost(uint32, tag = "2")]
    pub info_class: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryInformationModuleReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub info: ::core::option::Option<ModuleInformation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleInformation {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    /// Reference count, `-1` when the host does not report one.
    #[prost(int64, tag = "3")]
    pub reference_count: i64,
    /// Module state as reported by the host, e.g. `Live`.
    #[prost(string, tag = "4")]
    pub state: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryClockRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryClockReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint64, tag = "2")]
    pub monotonic_ns: u64,
    #[prost(int64, tag = "3")]
    pub realtime_unix_ns: i64,
    /// Host boot identifier. Changes on every boot.
    #[prost(string, tag = "4")]
    pub boot_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMessageTimeoutsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetMessageTimeoutsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Per-request deadline for this session, in milliseconds.
    #[prost(uint64, tag = "2")]
    pub request_timeout_ms: u64,
}

/// Change this session's per-request deadline.
///
/// Values outside the broker's configured bounds are rejected with
/// `InvalidParameter`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetMessageTimeoutsRequest {
    #[prost(uint64, tag = "1")]
    pub request_timeout_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetMessageTimeoutsReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

/// Hold off broker shutdown while critical client work is in flight.
///
/// Acquisitions nest; shutdown waits until every acquisition is released or
/// the holding session disconnects.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireShutdownProtectionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireShutdownProtectionReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Acquisitions this session holds after the call.
    #[prost(uint32, tag = "2")]
    pub held: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseShutdownProtectionRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseShutdownProtectionReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    /// Acquisitions this session still holds after the call.
    #[prost(uint32, tag = "2")]
    pub held: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetConnectedClientCountRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetConnectedClientCountReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

/// Apply a host-level control, e.g. a sysctl write.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemControlRequest {
    /// One of the `SYSTEM_CONTROL_*` classes.
    #[prost(uint32, tag = "1")]
    pub control_class: u32,
    /// Control name, e.g. `kernel/task_delayacct`.
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub value: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemControlReply {
    #[prost(enumeration = "OperationStatus", tag = "1")]
    pub status: i32,
}

// ============================================================================
// Request envelope
// ============================================================================

/// Status every reply is seeded with until its handler writes one.
const REPLY_STATUS_SEED: i32 = OperationStatus::Internal as i32;

/// Parsed request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Operation id from the frame's tag byte.
    pub id: MessageId,
}

/// A decoded request with room for its reply.
///
/// Handlers receive the whole envelope mutably and write the reply half of
/// their variant in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
}

/// Typed request and reply pair for each operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Reserved id 0. Carries no payload and produces no reply frame.
    Invalid,
    GetInformerSettings {
        req: GetInformerSettingsRequest,
        reply: GetInformerSettingsReply,
    },
    SetInformerSettings {
        req: SetInformerSettingsRequest,
        reply: SetInformerSettingsReply,
    },
    OpenProcess {
        req: OpenProcessRequest,
        reply: OpenProcessReply,
    },
    OpenProcessCredentials {
        req: OpenProcessCredentialsRequest,
        reply: OpenProcessCredentialsReply,
    },
    OpenProcessCgroup {
        req: OpenProcessCgroupRequest,
        reply: OpenProcessCgroupReply,
    },
    TerminateProcess {
        req: TerminateProcessRequest,
        reply: TerminateProcessReply,
    },
    ReadProcessMemory {
        req: ReadProcessMemoryRequest,
        reply: ReadProcessMemoryReply,
    },
    OpenThread {
        req: OpenThreadRequest,
        reply: OpenThreadReply,
    },
    OpenThreadProcess {
        req: OpenThreadProcessRequest,
        reply: OpenThreadProcessReply,
    },
    CaptureThreadStack {
        req: CaptureThreadStackRequest,
        reply: CaptureThreadStackReply,
    },
    EnumerateProcessHandles {
        req: EnumerateProcessHandlesRequest,
        reply: EnumerateProcessHandlesReply,
    },
    QueryInformationHandle {
        req: QueryInformationHandleRequest,
        reply: QueryInformationHandleReply,
    },
    SetInformationHandle {
        req: SetInformationHandleRequest,
        reply: SetInformationHandleReply,
    },
    OpenModule {
        req: OpenModuleRequest,
        reply: OpenModuleReply,
    },
    QueryInformationModule {
        req: QueryInformationModuleRequest,
        reply: QueryInformationModuleReply,
    },
    QueryInformationProcess {
        req: QueryInformationProcessRequest,
        reply: QueryInformationProcessReply,
    },
    SetInformationProcess {
        req: SetInformationProcessRequest,
        reply: SetInformationProcessReply,
    },
    QueryInformationThread {
        req: QueryInformationThreadRequest,
        reply: QueryInformationThreadReply,
    },
    SetInformationThread {
        req: SetInformationThreadRequest,
        reply: SetInformationThreadReply,
    },
    QueryInformationFile {
        req: QueryInformationFileRequest,
        reply: QueryInformationFileReply,
    },
    QueryFileSystemInformation {
        req: QueryFileSystemInformationRequest,
        reply: QueryFileSystemInformationReply,
    },
    OpenFile {
        req: OpenFileRequest,
        reply: OpenFileReply,
    },
    DuplicateHandle {
        req: DuplicateHandleRequest,
        reply: DuplicateHandleReply,
    },
    QueryClock {
        req: QueryClockRequest,
        reply: QueryClockReply,
    },
    QueryMemoryMappings {
        req: QueryMemoryMappingsRequest,
        reply: QueryMemoryMappingsReply,
    },
    CompareHandles {
        req: CompareHandlesRequest,
        reply: CompareHandlesReply,
    },
    GetMessageTimeouts {
        req: GetMessageTimeoutsRequest,
        reply: GetMessageTimeoutsReply,
    },
    SetMessageTimeouts {
        req: SetMessageTimeoutsRequest,
        reply: SetMessageTimeoutsReply,
    },
    AcquireShutdownProtection {
        req: AcquireShutdownProtectionRequest,
        reply: AcquireShutdownProtectionReply,
    },
    ReleaseShutdownProtection {
        req: ReleaseShutdownProtectionRequest,
        reply: ReleaseShutdownProtectionReply,
    },
    GetConnectedClientCount {
        req: GetConnectedClientCountRequest,
        reply: GetConnectedClientCountReply,
    },
    AssignSessionToken {
        req: AssignSessionTokenRequest,
        reply: AssignSessionTokenReply,
    },
    SystemControl {
        req: SystemControlRequest,
        reply: SystemControlReply,
    },
}

impl MessageBody {
    /// The operation id this body belongs to.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        match self {
            Self::Invalid => MessageId::Invalid,
            Self::GetInformerSettings { .. } => MessageId::GetInformerSettings,
            Self::SetInformerSettings { .. } => MessageId::SetInformerSettings,
            Self::OpenProcess { .. } => MessageId::OpenProcess,
            Self::OpenProcessCredentials { .. } => MessageId::OpenProcessCredentials,
            Self::OpenProcessCgroup { .. } => MessageId::OpenProcessCgroup,
            Self::TerminateProcess { .. } => MessageId::TerminateProcess,
            Self::ReadProcessMemory { .. } => MessageId::ReadProcessMemory,
            Self::OpenThread { .. } => MessageId::OpenThread,
            Self::OpenThreadProcess { .. } => MessageId::OpenThreadProcess,
            Self::CaptureThreadStack { .. } => MessageId::CaptureThreadStack,
            Self::EnumerateProcessHandles { .. } => MessageId::EnumerateProcessHandles,
            Self::QueryInformationHandle { .. } => MessageId::QueryInformationHandle,
            Self::SetInformationHandle { .. } => MessageId::SetInformationHandle,
            Self::OpenModule { .. } => MessageId::OpenModule,
            Self::QueryInformationModule { .. } => MessageId::QueryInformationModule,
            Self::QueryInformationProcess { .. } => MessageId::QueryInformationProcess,
            Self::SetInformationProcess { .. } => MessageId::SetInformationProcess,
            Self::QueryInformationThread { .. } => MessageId::QueryInformationThread,
            Self::SetInformationThread { .. } => MessageId::SetInformationThread,
            Self::QueryInformationFile { .. } => MessageId::QueryInformationFile,
            Self::QueryFileSystemInformation { .. } => MessageId::QueryFileSystemInformation,
            Self::OpenFile { .. } => MessageId::OpenFile,
            Self::DuplicateHandle { .. } => MessageId::DuplicateHandle,
            Self::QueryClock { .. } => MessageId::QueryClock,
            Self::QueryMemoryMappings { .. } => MessageId::QueryMemoryMappings,
            Self::CompareHandles { .. } => MessageId::CompareHandles,
            Self::GetMessageTimeouts { .. } => MessageId::GetMessageTimeouts,
            Self::SetMessageTimeouts { .. } => MessageId::SetMessageTimeouts,
            Self::AcquireShutdownProtection { .. } => MessageId::AcquireShutdownProtection,
            Self::ReleaseShutdownProtection { .. } => MessageId::ReleaseShutdownProtection,
            Self::GetConnectedClientCount { .. } => MessageId::GetConnectedClientCount,
            Self::AssignSessionToken { .. } => MessageId::AssignSessionToken,
            Self::SystemControl { .. } => MessageId::SystemControl,
        }
    }

    /// Raw status value of the reply half, `None` for the sentinel.
    #[must_use]
    pub const fn reply_status_raw(&self) -> Option<i32> {
        match self {
            Self::Invalid => None,
            Self::GetInformerSettings { reply, .. } => Some(reply.status),
            Self::SetInformerSettings { reply, .. } => Some(reply.status),
            Self::OpenProcess { reply, .. } => Some(reply.status),
            Self::OpenProcessCredentials { reply, .. } => Some(reply.status),
            Self::OpenProcessCgroup { reply, .. } => Some(reply.status),
            Self::TerminateProcess { reply, .. } => Some(reply.status),
            Self::ReadProcessMemory { reply, .. } => Some(reply.status),
            Self::OpenThread { reply, .. } => Some(reply.status),
            Self::OpenThreadProcess { reply, .. } => Some(reply.status),
            Self::CaptureThreadStack { reply, .. } => Some(reply.status),
            Self::EnumerateProcessHandles { reply, .. } => Some(reply.status),
            Self::QueryInformationHandle { reply, .. } => Some(reply.status),
            Self::SetInformationHandle { reply, .. } => Some(reply.status),
            Self::OpenModule { reply, .. } => Some(reply.status),
            Self::QueryInformationModule { reply, .. } => Some(reply.status),
            Self::QueryInformationProcess { reply, .. } => Some(reply.status),
            Self::SetInformationProcess { reply, .. } => Some(reply.status),
            Self::QueryInformationThread { reply, .. } => Some(reply.status),
            Self::SetInformationThread { reply, .. } => Some(reply.status),
            Self::QueryInformationFile { reply, .. } => Some(reply.status),
            Self::QueryFileSystemInformation { reply, .. } => Some(reply.status),
            Self::OpenFile { reply, .. } => Some(reply.status),
            Self::DuplicateHandle { reply, .. } => Some(reply.status),
            Self::QueryClock { reply, .. } => Some(reply.status),
            Self::QueryMemoryMappings { reply, .. } => Some(reply.status),
            Self::CompareHandles { reply, .. } => Some(reply.status),
            Self::GetMessageTimeouts { reply, .. } => Some(reply.status),
            Self::SetMessageTimeouts { reply, .. } => Some(reply.status),
            Self::AcquireShutdownProtection { reply, .. } => Some(reply.status),
            Self::ReleaseShutdownProtection { reply, .. } => Some(reply.status),
            Self::GetConnectedClientCount { reply, .. } => Some(reply.status),
            Self::AssignSessionToken { reply, .. } => Some(reply.status),
            Self::SystemControl { reply, .. } => Some(reply.status),
        }
    }
}

impl Message {
    /// Decode a request payload (the frame bytes after the tag) into an
    /// envelope for `id`.
    ///
    /// The reply half is seeded with `OperationStatus::Internal`. The
    /// sentinel id ignores its payload entirely.
    pub fn decode_request(
        id: MessageId,
        payload: &[u8],
        config: &DecodeConfig,
    ) -> Result<Self, DecodeError> {
        let body = match id {
            MessageId::Invalid => MessageBody::Invalid,
            MessageId::GetInformerSettings => MessageBody::GetInformerSettings {
                req: GetInformerSettingsRequest::decode_bounded(payload, config)?,
                reply: GetInformerSettingsReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SetInformerSettings => MessageBody::SetInformerSettings {
                req: SetInformerSettingsRequest::decode_bounded(payload, config)?,
                reply: SetInformerSettingsReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::OpenProcess => MessageBody::OpenProcess {
                req: OpenProcessRequest::decode_bounded(payload, config)?,
                reply: OpenProcessReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::OpenProcessCredentials => MessageBody::OpenProcessCredentials {
                req: OpenProcessCredentialsRequest::decode_bounded(payload, config)?,
                reply: OpenProcessCredentialsReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::OpenProcessCgroup => MessageBody::OpenProcessCgroup {
                req: OpenProcessCgroupRequest::decode_bounded(payload, config)?,
                reply: OpenProcessCgroupReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::TerminateProcess => MessageBody::TerminateProcess {
                req: TerminateProcessRequest::decode_bounded(payload, config)?,
                reply: TerminateProcessReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::ReadProcessMemory => MessageBody::ReadProcessMemory {
                req: ReadProcessMemoryRequest::decode_bounded(payload, config)?,
                reply: ReadProcessMemoryReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::OpenThread => MessageBody::OpenThread {
                req: OpenThreadRequest::decode_bounded(payload, config)?,
                reply: OpenThreadReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::OpenThreadProcess => MessageBody::OpenThreadProcess {
                req: OpenThreadProcessRequest::decode_bounded(payload, config)?,
                reply: OpenThreadProcessReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::CaptureThreadStack => MessageBody::CaptureThreadStack {
                req: CaptureThreadStackRequest::decode_bounded(payload, config)?,
                reply: CaptureThreadStackReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::EnumerateProcessHandles => MessageBody::EnumerateProcessHandles {
                req: EnumerateProcessHandlesRequest::decode_bounded(payload, config)?,
                reply: EnumerateProcessHandlesReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryInformationHandle => MessageBody::QueryInformationHandle {
                req: QueryInformationHandleRequest::decode_bounded(payload, config)?,
                reply: QueryInformationHandleReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SetInformationHandle => MessageBody::SetInformationHandle {
                req: SetInformationHandleRequest::decode_bounded(payload, config)?,
                reply: SetInformationHandleReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::OpenModule => MessageBody::OpenModule {
                req: OpenModuleRequest::decode_bounded(payload, config)?,
                reply: OpenModuleReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryInformationModule => MessageBody::QueryInformationModule {
                req: QueryInformationModuleRequest::decode_bounded(payload, config)?,
                reply: QueryInformationModuleReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryInformationProcess => MessageBody::QueryInformationProcess {
                req: QueryInformationProcessRequest::decode_bounded(payload, config)?,
                reply: QueryInformationProcessReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SetInformationProcess => MessageBody::SetInformationProcess {
                req: SetInformationProcessRequest::decode_bounded(payload, config)?,
                reply: SetInformationProcessReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::QueryInformationThread => MessageBody::QueryInformationThread {
                req: QueryInformationThreadRequest::decode_bounded(payload, config)?,
                reply: QueryInformationThreadReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SetInformationThread => MessageBody::SetInformationThread {
                req: SetInformationThreadRequest::decode_bounded(payload, config)?,
                reply: SetInformationThreadReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::QueryInformationFile => MessageBody::QueryInformationFile {
                req: QueryInformationFileRequest::decode_bounded(payload, config)?,
                reply: QueryInformationFileReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryFileSystemInformation => MessageBody::QueryFileSystemInformation {
                req: QueryFileSystemInformationRequest::decode_bounded(payload, config)?,
                reply: QueryFileSystemInformationReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::OpenFile => MessageBody::OpenFile {
                req: OpenFileRequest::decode_bounded(payload, config)?,
                reply: OpenFileReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::DuplicateHandle => MessageBody::DuplicateHandle {
                req: DuplicateHandleRequest::decode_bounded(payload, config)?,
                reply: DuplicateHandleReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryClock => MessageBody::QueryClock {
                req: QueryClockRequest::decode_bounded(payload, config)?,
                reply: QueryClockReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::QueryMemoryMappings => MessageBody::QueryMemoryMappings {
                req: QueryMemoryMappingsRequest::decode_bounded(payload, config)?,
                reply: QueryMemoryMappingsReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::CompareHandles => MessageBody::CompareHandles {
                req: CompareHandlesRequest::decode_bounded(payload, config)?,
                reply: CompareHandlesReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::GetMessageTimeouts => MessageBody::GetMessageTimeouts {
                req: GetMessageTimeoutsRequest::decode_bounded(payload, config)?,
                reply: GetMessageTimeoutsReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SetMessageTimeouts => MessageBody::SetMessageTimeouts {
                req: SetMessageTimeoutsRequest::decode_bounded(payload, config)?,
                reply: SetMessageTimeoutsReply {
                    status: REPLY_STATUS_SEED,
                },
            },
            MessageId::AcquireShutdownProtection => MessageBody::AcquireShutdownProtection {
                req: AcquireShutdownProtectionRequest::decode_bounded(payload, config)?,
                reply: AcquireShutdownProtectionReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::ReleaseShutdownProtection => MessageBody::ReleaseShutdownProtection {
                req: ReleaseShutdownProtectionRequest::decode_bounded(payload, config)?,
                reply: ReleaseShutdownProtectionReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::GetConnectedClientCount => MessageBody::GetConnectedClientCount {
                req: GetConnectedClientCountRequest::decode_bounded(payload, config)?,
                reply: GetConnectedClientCountReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::AssignSessionToken => MessageBody::AssignSessionToken {
                req: AssignSessionTokenRequest::decode_bounded(payload, config)?,
                reply: AssignSessionTokenReply {
                    status: REPLY_STATUS_SEED,
                    ..Default::default()
                },
            },
            MessageId::SystemControl => MessageBody::SystemControl {
                req: SystemControlRequest::decode_bounded(payload, config)?,
                reply: SystemControlReply {
                    status: REPLY_STATUS_SEED,
                },
            },
        };
        Ok(Self {
            header: MessageHeader { id },
            body,
        })
    }

    /// Operation id from the header.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.header.id
    }

    /// Raw status of the reply half, `None` for the sentinel.
    #[must_use]
    pub const fn reply_status_raw(&self) -> Option<i32> {
        self.body.reply_status_raw()
    }

    /// Encode the reply frame, `[message_id][protobuf reply]`.
    ///
    /// Returns `None` for the sentinel, which is answered with a failure
    /// frame instead.
    #[must_use]
    pub fn encode_reply(&self) -> Option<Bytes> {
        fn frame(tag: u8, reply: &impl prost::Message) -> Bytes {
            let payload = reply.encode_to_vec();
            let mut buf = BytesMut::with_capacity(1 + payload.len());
            buf.put_u8(tag);
            buf.extend_from_slice(&payload);
            buf.freeze()
        }

        let tag = self.header.id.tag();
        let bytes = match &self.body {
            MessageBody::Invalid => return None,
            MessageBody::GetInformerSettings { reply, .. } => frame(tag, reply),
            MessageBody::SetInformerSettings { reply, .. } => frame(tag, reply),
            MessageBody::OpenProcess { reply, .. } => frame(tag, reply),
            MessageBody::OpenProcessCredentials { reply, .. } => frame(tag, reply),
            MessageBody::OpenProcessCgroup { reply, .. } => frame(tag, reply),
            MessageBody::TerminateProcess { reply, .. } => frame(tag, reply),
            MessageBody::ReadProcessMemory { reply, .. } => frame(tag, reply),
            MessageBody::OpenThread { reply, .. } => frame(tag, reply),
            MessageBody::OpenThreadProcess { reply, .. } => frame(tag, reply),
            MessageBody::CaptureThreadStack { reply, .. } => frame(tag, reply),
            MessageBody::EnumerateProcessHandles { reply, .. } => frame(tag, reply),
            MessageBody::QueryInformationHandle { reply, .. } => frame(tag, reply),
            MessageBody::SetInformationHandle { reply, .. } => frame(tag, reply),
            MessageBody::OpenModule { reply, .. } => frame(tag, reply),
            MessageBody::QueryInformationModule { reply, .. } => frame(tag, reply),
            MessageBody::QueryInformationProcess { reply, .. } => frame(tag, reply),
            MessageBody::SetInformationProcess { reply, .. } => frame(tag, reply),
            MessageBody::QueryInformationThread { reply, .. } => frame(tag, reply),
            MessageBody::SetInformationThread { reply, .. } => frame(tag, reply),
            MessageBody::QueryInformationFile { reply, .. } => frame(tag, reply),
            MessageBody::QueryFileSystemInformation { reply, .. } => frame(tag, reply),
            MessageBody::OpenFile { reply, .. } => frame(tag, reply),
            MessageBody::DuplicateHandle { reply, .. } => frame(tag, reply),
            MessageBody::QueryClock { reply, .. } => frame(tag, reply),
            MessageBody::QueryMemoryMappings { reply, .. } => frame(tag, reply),
            MessageBody::CompareHandles { reply, .. } => frame(tag, reply),
            MessageBody::GetMessageTimeouts { reply, .. } => frame(tag, reply),
            MessageBody::SetMessageTimeouts { reply, .. } => frame(tag, reply),
            MessageBody::AcquireShutdownProtection { reply, .. } => frame(tag, reply),
            MessageBody::ReleaseShutdownProtection { reply, .. } => frame(tag, reply),
            MessageBody::GetConnectedClientCount { reply, .. } => frame(tag, reply),
            MessageBody::AssignSessionToken { reply, .. } => frame(tag, reply),
            MessageBody::SystemControl { reply, .. } => frame(tag, reply),
        };
        Some(bytes)
    }
}
