//! System operations: kernel modules, clocks, session timeouts, shutdown
//! protection and host controls.

use tracing::info;

use procwarden_core::OperationStatus;
use procwarden_core::access::{MODULE_ALL_ACCESS, MODULE_QUERY, has_all};
use procwarden_core::config::{MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS};

use crate::context::RuntimeContext;
use crate::protocol::messages::{
    MODULE_INFO_BASIC, MessageBody, ModuleInformation, SYSTEM_CONTROL_SYSCTL,
};
use crate::session::{ClientSession, ObjectKey};

pub fn open_module(ctx: &RuntimeContext, session: &ClientSession, message: &mut super::Message) {
    let MessageBody::OpenModule { req, reply } = &mut message.body else {
        debug_assert!(false, "open_module invoked with mismatched body");
        return;
    };

    let facts = match ctx.system().module_facts(&req.name) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    let key = ObjectKey::Module { name: facts.name };
    let Some(handle) = session.handles().insert(key, MODULE_ALL_ACCESS) else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    reply.handle = handle;
    reply.status = OperationStatus::Success as i32;
}

pub fn query_information_module(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::QueryInformationModule { req, reply } = &mut message.body else {
        debug_assert!(false, "query_information_module invoked with mismatched body");
        return;
    };

    if req.info_class != MODULE_INFO_BASIC {
        reply.status = OperationStatus::InvalidInfoClass as i32;
        return;
    }

    let name = {
        let table = session.handles();
        let Some(entry) = table.get(req.module_handle) else {
            reply.status = OperationStatus::InvalidHandle as i32;
            return;
        };
        let ObjectKey::Module { name } = &entry.key else {
            reply.status = OperationStatus::InvalidHandle as i32;
            return;
        };
        if !has_all(entry.granted, MODULE_QUERY) {
            reply.status = OperationStatus::InvalidHandle as i32;
            return;
        }
        name.clone()
    };

    let facts = match ctx.system().module_facts(&name) {
        Ok(facts) => facts,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.info = Some(ModuleInformation {
        name: facts.name,
        size: facts.size,
        reference_count: facts.reference_count,
        state: facts.state,
    });
    reply.status = OperationStatus::Success as i32;
}

pub fn query_clock(ctx: &RuntimeContext, _session: &ClientSession, message: &mut super::Message) {
    let MessageBody::QueryClock { reply, .. } = &mut message.body else {
        debug_assert!(false, "query_clock invoked with mismatched body");
        return;
    };

    let clock = match ctx.system().clock_facts() {
        Ok(clock) => clock,
        Err(err) => {
            reply.status = OperationStatus::from(err) as i32;
            return;
        }
    };

    reply.monotonic_ns = clock.monotonic_ns;
    reply.realtime_unix_ns = clock.realtime_unix_ns;
    reply.boot_id = clock.boot_id;
    reply.status = OperationStatus::Success as i32;
}

pub fn get_message_timeouts(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::GetMessageTimeouts { reply, .. } = &mut message.body else {
        debug_assert!(false, "get_message_timeouts invoked with mismatched body");
        return;
    };

    reply.request_timeout_ms = session.request_timeout_ms();
    reply.status = OperationStatus::Success as i32;
}

pub fn set_message_timeouts(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::SetMessageTimeouts { req, reply } = &mut message.body else {
        debug_assert!(false, "set_message_timeouts invoked with mismatched body");
        return;
    };

    if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&req.request_timeout_ms) {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    session.set_request_timeout_ms(req.request_timeout_ms);
    reply.status = OperationStatus::Success as i32;
}

pub fn acquire_shutdown_protection(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::AcquireShutdownProtection { reply, .. } = &mut message.body else {
        debug_assert!(
            false,
            "acquire_shutdown_protection invoked with mismatched body"
        );
        return;
    };

    let held = session.acquire_shutdown_protection();
    let total = ctx.state().protection_acquired();
    if let Some(metrics) = ctx.metrics() {
        metrics.set_shutdown_protection_held(total);
    }

    info!(
        session_id = %session.session_id(),
        held,
        total,
        "shutdown protection acquired"
    );
    reply.held = held;
    reply.status = OperationStatus::Success as i32;
}

pub fn release_shutdown_protection(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::ReleaseShutdownProtection { reply, .. } = &mut message.body else {
        debug_assert!(
            false,
            "release_shutdown_protection invoked with mismatched body"
        );
        return;
    };

    // Releasing protection the session never acquired is a client bug.
    let Some(held) = session.try_release_shutdown_protection() else {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    };
    let total = ctx.state().protection_released(1);
    if let Some(metrics) = ctx.metrics() {
        metrics.set_shutdown_protection_held(total);
    }

    reply.held = held;
    reply.status = OperationStatus::Success as i32;
}

pub fn get_connected_client_count(
    ctx: &RuntimeContext,
    _session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::GetConnectedClientCount { reply, .. } = &mut message.body else {
        debug_assert!(
            false,
            "get_connected_client_count invoked with mismatched body"
        );
        return;
    };

    reply.count = ctx.state().active_sessions() as u32;
    reply.status = OperationStatus::Success as i32;
}

/// Applies a host control. Every accepted write is logged with the caller's
/// identity.
pub fn system_control(ctx: &RuntimeContext, session: &ClientSession, message: &mut super::Message) {
    let MessageBody::SystemControl { req, reply } = &mut message.body else {
        debug_assert!(false, "system_control invoked with mismatched body");
        return;
    };

    if req.control_class != SYSTEM_CONTROL_SYSCTL {
        reply.status = OperationStatus::InvalidInfoClass as i32;
        return;
    }
    if req.name.is_empty() {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    if let Err(err) = ctx.system().write_sysctl(&req.name, &req.value) {
        reply.status = OperationStatus::from(err) as i32;
        return;
    }

    info!(
        session_id = %session.session_id(),
        peer_uid = session.peer().uid,
        name = %req.name,
        value = %req.value,
        "sysctl written"
    );
    reply.status = OperationStatus::Success as i32;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procwarden_core::TrustTier;

    use super::super::testing::{request, runtime, session_at};
    use super::*;
    use crate::protocol::messages::{
        QueryInformationModuleRequest, SetMessageTimeoutsRequest, SystemControlRequest,
    };
    use crate::system::{ClockFacts, InMemorySystem, ModuleFacts};

    fn fixture() -> (Arc<InMemorySystem>, RuntimeContext, ClientSession) {
        let system = Arc::new(InMemorySystem::new());
        system.insert_module(ModuleFacts {
            name: "nf_tables".to_string(),
            size: 356_352,
            reference_count: 3,
            state: "Live".to_string(),
        });
        let ctx = runtime(&system);
        (system, ctx, session_at(TrustTier::Maximum))
    }

    #[test]
    fn module_open_then_query_round_trips_facts() {
        let (_system, ctx, session) = fixture();
        let mut open = request(MessageBody::OpenModule {
            req: crate::protocol::messages::OpenModuleRequest {
                name: "nf_tables".to_string(),
            },
            reply: Default::default(),
        });
        open_module(&ctx, &session, &mut open);
        let MessageBody::OpenModule { reply, .. } = &open.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let module_handle = reply.handle;

        let mut query = request(MessageBody::QueryInformationModule {
            req: QueryInformationModuleRequest {
                module_handle,
                info_class: MODULE_INFO_BASIC,
            },
            reply: Default::default(),
        });
        query_information_module(&ctx, &session, &mut query);
        let MessageBody::QueryInformationModule { reply, .. } = &query.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        let info = reply.info.as_ref().unwrap();
        assert_eq!(info.name, "nf_tables");
        assert_eq!(info.reference_count, 3);
    }

    #[test]
    fn unknown_module_is_not_found() {
        let (_system, ctx, session) = fixture();
        let mut message = request(MessageBody::OpenModule {
            req: crate::protocol::messages::OpenModuleRequest {
                name: "no_such_module".to_string(),
            },
            reply: Default::default(),
        });

        open_module(&ctx, &session, &mut message);

        let MessageBody::OpenModule { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::NotFound);
    }

    #[test]
    fn module_query_rejects_non_module_handles() {
        let (_system, ctx, session) = fixture();
        let stray = session
            .handles()
            .insert(
                ObjectKey::Process {
                    pid: 1,
                    start_time: 1,
                },
                u32::MAX,
            )
            .unwrap();
        let mut message = request(MessageBody::QueryInformationModule {
            req: QueryInformationModuleRequest {
                module_handle: stray,
                info_class: MODULE_INFO_BASIC,
            },
            reply: Default::default(),
        });

        query_information_module(&ctx, &session, &mut message);

        let MessageBody::QueryInformationModule { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidHandle);
    }

    #[test]
    fn clock_query_copies_host_readings() {
        let (system, ctx, session) = fixture();
        system.set_clock(ClockFacts {
            monotonic_ns: 123,
            realtime_unix_ns: 456,
            boot_id: "abcd-ef".to_string(),
        });
        let mut message = request(MessageBody::QueryClock {
            req: Default::default(),
            reply: Default::default(),
        });

        query_clock(&ctx, &session, &mut message);

        let MessageBody::QueryClock { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.monotonic_ns, 123);
        assert_eq!(reply.boot_id, "abcd-ef");
    }

    #[test]
    fn timeout_updates_are_bounds_checked() {
        let (_system, ctx, session) = fixture();

        let mut too_small = request(MessageBody::SetMessageTimeouts {
            req: SetMessageTimeoutsRequest {
                request_timeout_ms: MIN_REQUEST_TIMEOUT_MS - 1,
            },
            reply: Default::default(),
        });
        set_message_timeouts(&ctx, &session, &mut too_small);
        let MessageBody::SetMessageTimeouts { reply, .. } = &too_small.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
        assert_eq!(session.request_timeout_ms(), 30_000);

        let mut ok = request(MessageBody::SetMessageTimeouts {
            req: SetMessageTimeoutsRequest {
                request_timeout_ms: 5_000,
            },
            reply: Default::default(),
        });
        set_message_timeouts(&ctx, &session, &mut ok);
        let MessageBody::SetMessageTimeouts { reply, .. } = &ok.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(session.request_timeout_ms(), 5_000);
    }

    #[test]
    fn get_timeouts_reads_back_the_session_value() {
        let (_system, ctx, session) = fixture();
        session.set_request_timeout_ms(2_500);
        let mut message = request(MessageBody::GetMessageTimeouts {
            req: Default::default(),
            reply: Default::default(),
        });

        get_message_timeouts(&ctx, &session, &mut message);

        let MessageBody::GetMessageTimeouts { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.request_timeout_ms, 2_500);
    }

    #[test]
    fn protection_acquire_and_release_count_per_session() {
        let (_system, ctx, session) = fixture();

        let mut first = request(MessageBody::AcquireShutdownProtection {
            req: Default::default(),
            reply: Default::default(),
        });
        acquire_shutdown_protection(&ctx, &session, &mut first);
        let MessageBody::AcquireShutdownProtection { reply, .. } = &first.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.held, 1);

        let mut second = request(MessageBody::AcquireShutdownProtection {
            req: Default::default(),
            reply: Default::default(),
        });
        acquire_shutdown_protection(&ctx, &session, &mut second);
        let MessageBody::AcquireShutdownProtection { reply, .. } = &second.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.held, 2);
        assert_eq!(ctx.state().shutdown_protection(), 2);

        let mut release = request(MessageBody::ReleaseShutdownProtection {
            req: Default::default(),
            reply: Default::default(),
        });
        release_shutdown_protection(&ctx, &session, &mut release);
        let MessageBody::ReleaseShutdownProtection { reply, .. } = &release.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.held, 1);
        assert_eq!(ctx.state().shutdown_protection(), 1);
    }

    #[test]
    fn releasing_unheld_protection_is_a_parameter_error() {
        let (_system, ctx, session) = fixture();
        let mut message = request(MessageBody::ReleaseShutdownProtection {
            req: Default::default(),
            reply: Default::default(),
        });

        release_shutdown_protection(&ctx, &session, &mut message);

        let MessageBody::ReleaseShutdownProtection { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
        assert_eq!(ctx.state().shutdown_protection(), 0);
    }

    #[test]
    fn client_count_reflects_broker_state() {
        let (_system, ctx, session) = fixture();
        ctx.state().session_opened();
        ctx.state().session_opened();
        let mut message = request(MessageBody::GetConnectedClientCount {
            req: Default::default(),
            reply: Default::default(),
        });

        get_connected_client_count(&ctx, &session, &mut message);

        let MessageBody::GetConnectedClientCount { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.count, 2);
    }

    #[test]
    fn sysctl_control_records_the_write() {
        let (system, ctx, session) = fixture();
        let mut message = request(MessageBody::SystemControl {
            req: SystemControlRequest {
                control_class: SYSTEM_CONTROL_SYSCTL,
                name: "kernel/task_delayacct".to_string(),
                value: "1".to_string(),
            },
            reply: Default::default(),
        });

        system_control(&ctx, &session, &mut message);

        let MessageBody::SystemControl { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(
            system.sysctl_writes(),
            vec![("kernel/task_delayacct".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn malformed_sysctl_names_never_reach_the_host() {
        let (system, ctx, session) = fixture();
        let mut message = request(MessageBody::SystemControl {
            req: SystemControlRequest {
                control_class: SYSTEM_CONTROL_SYSCTL,
                name: "../../etc/passwd".to_string(),
                value: "x".to_string(),
            },
            reply: Default::default(),
        });

        system_control(&ctx, &session, &mut message);

        let MessageBody::SystemControl { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
        assert!(system.sysctl_writes().is_empty());
    }

    #[test]
    fn unknown_control_class_is_rejected() {
        let (_system, ctx, session) = fixture();
        let mut message = request(MessageBody::SystemControl {
            req: SystemControlRequest {
                control_class: 9,
                name: "kernel/task_delayacct".to_string(),
                value: "1".to_string(),
            },
            reply: Default::default(),
        });

        system_control(&ctx, &session, &mut message);

        let MessageBody::SystemControl { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidInfoClass);
    }
}
