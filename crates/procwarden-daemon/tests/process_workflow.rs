//! Multi-request process inspection workflows over a live broker socket.
//!
//! Each test drives a real connection through several dependent requests,
//! exercising what single-handler tests cannot: handles surviving across
//! requests on one session, pid-reuse detection through a held handle, and
//! host failures traveling inside completed replies rather than tearing the
//! connection down.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use nix::unistd::getuid;
use prost::Message as _;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use procwarden_core::access::{PROCESS_READ_ACCESS, PROCESS_TERMINATE};
use procwarden_core::config::TrustSection;
use procwarden_core::{OperationStatus, TrustTier};

use procwarden_daemon::context::RuntimeContext;
use procwarden_daemon::protocol::messages::{
    EnumerateProcessHandlesReply, EnumerateProcessHandlesRequest, GetConnectedClientCountReply,
    GetConnectedClientCountRequest, OpenProcessReply, OpenProcessRequest, PROCESS_INFO_BASIC,
    QueryClockRequest, QueryInformationProcessReply, QueryInformationProcessRequest,
    ReadProcessMemoryReply, ReadProcessMemoryRequest, TerminateProcessReply,
    TerminateProcessRequest, encode_request,
};
use procwarden_daemon::protocol::{
    ClientHandshake, Connection, Dispatcher, HelloAck, MessageId, ProtocolServer, ServerConfig,
    SessionSettings, connect, handle_connection, parse_handshake_message,
    serialize_handshake_message,
};
use procwarden_daemon::state::BrokerState;
use procwarden_daemon::system::{FdEntry, InMemorySystem, ProcessFacts, SystemFacade};

struct Broker {
    server: Arc<ProtocolServer>,
    dispatcher: Arc<Dispatcher>,
    settings: Arc<SessionSettings>,
    system: Arc<InMemorySystem>,
    _tmp: TempDir,
}

fn broker() -> Broker {
    let tmp = TempDir::new().expect("temp dir");
    let server = ProtocolServer::bind(ServerConfig::new(tmp.path().join("broker.sock")))
        .map(Arc::new)
        .expect("bind broker socket");

    let system = Arc::new(InMemorySystem::new());
    let facade: Arc<dyn SystemFacade> = system.clone();
    let ctx = RuntimeContext::new(facade, Arc::new(BrokerState::new()));
    let dispatcher = Arc::new(Dispatcher::new(ctx));

    // Workflow tests are about handler behavior, not authorization, so the
    // session starts at the top tier.
    let settings = Arc::new(SessionSettings {
        trust: TrustSection {
            root_tier: TrustTier::Maximum,
            ..TrustSection::default()
        },
        daemon_uid: getuid().as_raw(),
        request_timeout_ms: 5_000,
        server_info: "procwarden-daemon/e2e".to_string(),
    });

    Broker {
        server,
        dispatcher,
        settings,
        system,
        _tmp: tmp,
    }
}

fn serve(broker: &Broker) -> JoinHandle<()> {
    let server = Arc::clone(&broker.server);
    let dispatcher = Arc::clone(&broker.dispatcher);
    let settings = Arc::clone(&broker.settings);
    tokio::spawn(async move {
        while let Ok((conn, permit)) = server.accept().await {
            let dispatcher = Arc::clone(&dispatcher);
            let settings = Arc::clone(&settings);
            tokio::spawn(handle_connection(conn, permit, dispatcher, settings));
        }
    })
}

async fn establish(broker: &Broker) -> (Connection, HelloAck) {
    let mut conn = connect(broker.server.socket_path()).await.expect("connect");
    let mut handshake = ClientHandshake::new("e2e-client/1.0".to_string(), Vec::new());

    let hello = serialize_handshake_message(&handshake.create_hello()).expect("serialize hello");
    conn.framed().send(Bytes::from(hello)).await.expect("send hello");

    let frame = conn.framed().next().await.expect("ack frame").expect("ack frame");
    let response = parse_handshake_message(&frame).expect("parse ack");
    let ack = handshake.process_response(response).expect("handshake accepted");
    conn.upgrade_to_full_frame_size();
    (conn, ack)
}

async fn roundtrip(conn: &mut Connection, request: Bytes) -> Bytes {
    conn.framed().send(request).await.expect("send request");
    conn.framed()
        .next()
        .await
        .expect("reply frame")
        .expect("reply frame")
}

async fn open_process(
    conn: &mut Connection,
    process_id: u32,
    desired_access: u32,
) -> OpenProcessReply {
    let frame = roundtrip(
        conn,
        encode_request(
            MessageId::OpenProcess,
            &OpenProcessRequest {
                process_id,
                desired_access,
            },
        ),
    )
    .await;
    assert_eq!(frame[0], MessageId::OpenProcess.tag());
    OpenProcessReply::decode(&frame[1..]).expect("decode open reply")
}

#[tokio::test]
async fn open_query_read_terminate_workflow() {
    let broker = broker();
    broker.system.insert_process(ProcessFacts {
        pid: 4242,
        parent_pid: 1,
        name: "payments-agent".to_string(),
        state: "S".to_string(),
        uid: 1000,
        gid: 1000,
        thread_count: 7,
        start_time: 77_000,
        virtual_size: 8 * 1024 * 1024,
        resident_size: 3 * 1024 * 1024,
    });
    broker.system.push_fd(
        4242,
        FdEntry {
            fd: 3,
            target: "socket:[51966]".to_string(),
            flags: 0o2,
            offset: 0,
        },
    );
    broker
        .system
        .add_memory_region(4242, 0x7f00_0000, b"wire-visible-payload".to_vec());

    let _serving = serve(&broker);
    let (mut conn, _ack) = establish(&broker).await;

    let opened = open_process(&mut conn, 4242, PROCESS_READ_ACCESS | PROCESS_TERMINATE).await;
    assert_eq!(opened.status(), OperationStatus::Success);
    assert_eq!(opened.start_time, 77_000);
    let handle = opened.handle;

    // Basic information comes back through the handle.
    let frame = roundtrip(
        &mut conn,
        encode_request(
            MessageId::QueryInformationProcess,
            &QueryInformationProcessRequest {
                process_handle: handle,
                info_class: PROCESS_INFO_BASIC,
            },
        ),
    )
    .await;
    let reply = QueryInformationProcessReply::decode(&frame[1..]).expect("decode query reply");
    assert_eq!(reply.status(), OperationStatus::Success);
    let basic = reply.basic.expect("basic info present");
    assert_eq!(basic.process_id, 4242);
    assert_eq!(basic.parent_process_id, 1);
    assert_eq!(basic.name, "payments-agent");
    assert_eq!(basic.thread_count, 7);

    // Descriptor enumeration sees the seeded fd.
    let frame = roundtrip(
        &mut conn,
        encode_request(
            MessageId::EnumerateProcessHandles,
            &EnumerateProcessHandlesRequest {
                process_handle: handle,
            },
        ),
    )
    .await;
    let reply = EnumerateProcessHandlesReply::decode(&frame[1..]).expect("decode handles reply");
    assert_eq!(reply.status(), OperationStatus::Success);
    assert_eq!(reply.handles.len(), 1);
    assert_eq!(reply.handles[0].fd, 3);
    assert_eq!(reply.handles[0].target, "socket:[51966]");

    // A read past the region end returns the readable prefix.
    let frame = roundtrip(
        &mut conn,
        encode_request(
            MessageId::ReadProcessMemory,
            &ReadProcessMemoryRequest {
                process_handle: handle,
                address: 0x7f00_0000,
                length: 64,
            },
        ),
    )
    .await;
    let reply = ReadProcessMemoryReply::decode(&frame[1..]).expect("decode read reply");
    assert_eq!(reply.status(), OperationStatus::Success);
    assert_eq!(reply.data, b"wire-visible-payload");

    // Terminate delivers the signal to the host.
    let frame = roundtrip(
        &mut conn,
        encode_request(
            MessageId::TerminateProcess,
            &TerminateProcessRequest {
                process_handle: handle,
                signal: 15,
            },
        ),
    )
    .await;
    let reply = TerminateProcessReply::decode(&frame[1..]).expect("decode terminate reply");
    assert_eq!(reply.status(), OperationStatus::Success);
    assert_eq!(broker.system.sent_signals(), vec![(4242, 15)]);
}

#[tokio::test]
async fn handles_pin_one_incarnation_of_a_pid() {
    let broker = broker();
    broker.system.insert_process(ProcessFacts {
        pid: 600,
        name: "first-incarnation".to_string(),
        start_time: 1_000,
        ..ProcessFacts::default()
    });

    let _serving = serve(&broker);
    let (mut conn, _ack) = establish(&broker).await;

    let opened = open_process(&mut conn, 600, PROCESS_READ_ACCESS).await;
    assert_eq!(opened.status(), OperationStatus::Success);
    assert_eq!(opened.start_time, 1_000);

    // The pid dies and is reused by an unrelated process.
    broker.system.remove_process(600);
    broker.system.insert_process(ProcessFacts {
        pid: 600,
        name: "second-incarnation".to_string(),
        start_time: 2_000,
        ..ProcessFacts::default()
    });

    // The held handle refuses to resolve to the impostor.
    let frame = roundtrip(
        &mut conn,
        encode_request(
            MessageId::QueryInformationProcess,
            &QueryInformationProcessRequest {
                process_handle: opened.handle,
                info_class: PROCESS_INFO_BASIC,
            },
        ),
    )
    .await;
    assert_eq!(frame[0], MessageId::QueryInformationProcess.tag());
    let reply = QueryInformationProcessReply::decode(&frame[1..]).expect("decode query reply");
    assert_eq!(reply.status(), OperationStatus::NotFound);

    // Reopening binds to the new incarnation.
    let reopened = open_process(&mut conn, 600, PROCESS_READ_ACCESS).await;
    assert_eq!(reopened.status(), OperationStatus::Success);
    assert_eq!(reopened.start_time, 2_000);
}

#[tokio::test]
async fn missing_processes_fail_inside_the_reply() {
    let broker = broker();
    let _serving = serve(&broker);
    let (mut conn, _ack) = establish(&broker).await;

    // Authorization passed, so this is a completed reply carrying the
    // status, not a dispatch failure.
    let opened = open_process(&mut conn, 99_999, PROCESS_READ_ACCESS).await;
    assert_eq!(opened.status(), OperationStatus::NotFound);
    assert_eq!(opened.handle, 0);
}

#[tokio::test]
async fn client_count_tracks_live_sessions() {
    let broker = broker();
    let _serving = serve(&broker);

    let (mut first, _ack) = establish(&broker).await;
    let (mut second, _ack) = establish(&broker).await;

    // A completed request on each connection proves both sessions are
    // registered before the count is read.
    for conn in [&mut first, &mut second] {
        let frame = roundtrip(
            conn,
            encode_request(MessageId::QueryClock, &QueryClockRequest {}),
        )
        .await;
        assert_eq!(frame[0], MessageId::QueryClock.tag());
    }

    let frame = roundtrip(
        &mut first,
        encode_request(
            MessageId::GetConnectedClientCount,
            &GetConnectedClientCountRequest {},
        ),
    )
    .await;
    let reply = GetConnectedClientCountReply::decode(&frame[1..]).expect("decode count reply");
    assert_eq!(reply.status(), OperationStatus::Success);
    assert_eq!(reply.count, 2);
}
