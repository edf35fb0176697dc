//! Request dispatch: catalog lookup, trust check, handler invocation.
//!
//! Authorization is decided per request. The evaluator runs against the
//! decoded payload every time, so nothing about a previous request's pricing
//! carries over, and an elevated tier takes effect on the very next
//! dispatch.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use procwarden_core::{OperationStatus, TrustTier};

use crate::context::RuntimeContext;
use crate::protocol::catalog;
use crate::protocol::messages::{INFORMER_DENIAL_NOTICES, Message, MessageId};
use crate::session::ClientSession;

/// How a request left the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The id names no operation. The connection answers with a failure
    /// frame.
    Unsupported,
    /// The session's tier does not cover what the request asked for.
    Denied {
        /// Tier the evaluator priced the request at.
        required: TrustTier,
    },
    /// The handler ran and wrote a reply. The reply's own status says
    /// whether the operation worked.
    Completed,
}

/// Broker-side faults that abort a single request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The envelope's header names one operation but its body decodes as
    /// another. A correct decoder never produces this.
    #[error("request header names {header} but the body is {body}")]
    ContractViolation {
        header: MessageId,
        body: MessageId,
    },
}

/// Routes decoded requests through the catalog.
pub struct Dispatcher {
    ctx: RuntimeContext,
}

impl Dispatcher {
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        Self { ctx }
    }

    /// The runtime context handlers run against.
    #[must_use]
    pub const fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Dispatch one request.
    ///
    /// May block while the handler works; long operations consume the
    /// session's request timeout internally.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ContractViolation`] when the envelope is
    /// internally inconsistent. The connection drops the request and keeps
    /// the session.
    pub fn dispatch(
        &self,
        session: &ClientSession,
        message: &mut Message,
    ) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();
        let id = message.header.id;
        let body_id = message.body.id();
        if id != body_id {
            error!(
                session_id = %session.session_id(),
                header = %id,
                body = %body_id,
                "request envelope is internally inconsistent"
            );
            debug_assert!(false, "envelope header/body mismatch");
            return Err(DispatchError::ContractViolation {
                header: id,
                body: body_id,
            });
        }

        let entry = catalog::entry(id);
        let Some(handler) = entry.handler else {
            debug!(
                session_id = %session.session_id(),
                message = %id,
                "unsupported operation"
            );
            if let Some(metrics) = self.ctx.metrics() {
                let elapsed = started.elapsed().as_secs_f64();
                metrics.request_completed(id.name(), "unsupported", elapsed);
            }
            return Ok(DispatchOutcome::Unsupported);
        };

        if let Some(required_tier) = entry.required_tier {
            let required = required_tier(message);
            let held = session.tier();
            if !held.grants(required) {
                debug!(
                    session_id = %session.session_id(),
                    message = %id,
                    required = required.name(),
                    held = held.name(),
                    "request denied"
                );
                if let Some(metrics) = self.ctx.metrics() {
                    metrics.request_denied(id.name(), held.name());
                    metrics.request_completed(
                        id.name(),
                        "denied",
                        started.elapsed().as_secs_f64(),
                    );
                }
                if session.informer_enabled(INFORMER_DENIAL_NOTICES) {
                    info!(
                        target: "procwarden::informer",
                        session_id = %session.session_id(),
                        message = %id,
                        required = required.name(),
                        held = held.name(),
                        "request denied"
                    );
                }
                return Ok(DispatchOutcome::Denied { required });
            }
        }

        handler(&self.ctx, session, message);

        if let Some(metrics) = self.ctx.metrics() {
            metrics.request_completed(id.name(), "completed", started.elapsed().as_secs_f64());
            if let Some(raw) = message.body.reply_status_raw() {
                let status =
                    OperationStatus::try_from(raw).map_or("unknown", OperationStatus::name);
                metrics.handler_status(id.name(), status);
            }
        }
        Ok(DispatchOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use procwarden_core::access::{
        PROCESS_ALL_ACCESS, PROCESS_READ_ACCESS, PROCESS_TERMINATE,
    };

    use super::*;
    use crate::handlers::testing::{request, runtime, session_at};
    use crate::metrics::new_shared_registry;
    use crate::protocol::messages::{
        MessageBody, MessageHeader, OpenProcessRequest, QueryInformationFileRequest,
        TerminateProcessRequest,
    };
    use crate::session::ObjectKey;
    use crate::state::BrokerState;
    use crate::system::{InMemorySystem, ProcessFacts};

    fn seeded_system() -> Arc<InMemorySystem> {
        let system = Arc::new(InMemorySystem::new());
        system.insert_process(ProcessFacts {
            pid: 100,
            start_time: 5000,
            ..ProcessFacts::default()
        });
        system
    }

    fn terminate_request(handle: u64) -> Message {
        request(MessageBody::TerminateProcess {
            req: TerminateProcessRequest {
                process_handle: handle,
                signal: 15,
            },
            reply: Default::default(),
        })
    }

    #[test]
    fn sentinel_requests_complete_as_unsupported() {
        let dispatcher = Dispatcher::new(runtime(&seeded_system()));
        let session = session_at(TrustTier::Maximum);
        let mut message = Message {
            header: MessageHeader {
                id: MessageId::Invalid,
            },
            body: MessageBody::Invalid,
        };

        let outcome = dispatcher.dispatch(&session, &mut message).unwrap();

        assert_eq!(outcome, DispatchOutcome::Unsupported);
    }

    #[test]
    fn low_sessions_are_denied_destructive_operations() {
        let system = seeded_system();
        let dispatcher = Dispatcher::new(runtime(&system));
        let session = session_at(TrustTier::Low);
        let mut message = terminate_request(1);

        let outcome = dispatcher.dispatch(&session, &mut message).unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Denied {
                required: TrustTier::Maximum
            }
        );
        assert!(system.sent_signals().is_empty());
    }

    #[test]
    fn elevation_unlocks_previously_denied_requests() {
        let system = seeded_system();
        let dispatcher = Dispatcher::new(runtime(&system));
        let session = session_at(TrustTier::Low);
        let handle = session
            .handles()
            .insert(
                ObjectKey::Process {
                    pid: 100,
                    start_time: 5000,
                },
                PROCESS_ALL_ACCESS,
            )
            .unwrap();

        let mut first = terminate_request(handle);
        assert_eq!(
            dispatcher.dispatch(&session, &mut first).unwrap(),
            DispatchOutcome::Denied {
                required: TrustTier::Maximum
            }
        );

        session.elevate_to(TrustTier::Maximum);

        let mut second = terminate_request(handle);
        assert_eq!(
            dispatcher.dispatch(&session, &mut second).unwrap(),
            DispatchOutcome::Completed
        );
        let MessageBody::TerminateProcess { reply, .. } = &second.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(system.sent_signals(), vec![(100, 15)]);
    }

    #[test]
    fn authorization_is_rechecked_on_every_dispatch() {
        let system = seeded_system();
        let dispatcher = Dispatcher::new(runtime(&system));
        let session = session_at(TrustTier::Maximum);
        let handle = session
            .handles()
            .insert(
                ObjectKey::Process {
                    pid: 100,
                    start_time: 5000,
                },
                PROCESS_ALL_ACCESS,
            )
            .unwrap();

        let mut first = terminate_request(handle);
        assert_eq!(
            dispatcher.dispatch(&session, &mut first).unwrap(),
            DispatchOutcome::Completed
        );

        // A request granted a moment ago buys nothing once the tier drops.
        session.override_tier(TrustTier::Low);

        let mut second = terminate_request(handle);
        assert_eq!(
            dispatcher.dispatch(&session, &mut second).unwrap(),
            DispatchOutcome::Denied {
                required: TrustTier::Maximum
            }
        );
        assert_eq!(system.sent_signals(), vec![(100, 15)]);
    }

    #[test]
    fn content_pricing_runs_against_every_request() {
        let dispatcher = Dispatcher::new(runtime(&seeded_system()));
        let session = session_at(TrustTier::Medium);

        let mut read_only = request(MessageBody::OpenProcess {
            req: OpenProcessRequest {
                process_id: 100,
                desired_access: PROCESS_READ_ACCESS,
            },
            reply: Default::default(),
        });
        assert_eq!(
            dispatcher.dispatch(&session, &mut read_only).unwrap(),
            DispatchOutcome::Completed
        );

        let mut destructive = request(MessageBody::OpenProcess {
            req: OpenProcessRequest {
                process_id: 100,
                desired_access: PROCESS_READ_ACCESS | PROCESS_TERMINATE,
            },
            reply: Default::default(),
        });
        assert_eq!(
            dispatcher.dispatch(&session, &mut destructive).unwrap(),
            DispatchOutcome::Denied {
                required: TrustTier::Maximum
            }
        );
    }

    #[test]
    fn token_assignment_is_reachable_from_the_lowest_tier() {
        let dispatcher = Dispatcher::new(runtime(&seeded_system()));
        let session = session_at(TrustTier::Low);
        let mut message = request(MessageBody::AssignSessionToken {
            req: crate::protocol::messages::AssignSessionTokenRequest {
                token: "irrelevant".to_string(),
            },
            reply: Default::default(),
        });

        // No evaluator is wired for this slot, so the request reaches its
        // handler even at the lowest tier. Without a configured secret the
        // handler answers unavailable rather than the dispatcher denying.
        let outcome = dispatcher.dispatch(&session, &mut message).unwrap();

        assert_eq!(outcome, DispatchOutcome::Completed);
        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Unavailable);
    }

    #[test]
    #[should_panic(expected = "envelope header/body mismatch")]
    fn mismatched_envelopes_panic_in_debug_builds() {
        let dispatcher = Dispatcher::new(runtime(&seeded_system()));
        let session = session_at(TrustTier::Maximum);
        let mut message = Message {
            header: MessageHeader {
                id: MessageId::TerminateProcess,
            },
            body: MessageBody::QueryClock {
                req: Default::default(),
                reply: Default::default(),
            },
        };

        let _ = dispatcher.dispatch(&session, &mut message);
    }

    #[test]
    fn business_failures_still_complete() {
        let dispatcher = Dispatcher::new(runtime(&seeded_system()));
        let session = session_at(TrustTier::Medium);
        let mut message = request(MessageBody::QueryInformationFile {
            req: QueryInformationFileRequest { file_handle: 404 },
            reply: Default::default(),
        });

        let outcome = dispatcher.dispatch(&session, &mut message).unwrap();

        assert_eq!(outcome, DispatchOutcome::Completed);
        let MessageBody::QueryInformationFile { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidHandle);
    }

    #[test]
    fn metrics_track_every_outcome() {
        let system: Arc<dyn crate::system::SystemFacade> = seeded_system();
        let registry = new_shared_registry().unwrap();
        let ctx = RuntimeContext::new(system, Arc::new(BrokerState::new()))
            .with_metrics(Arc::clone(&registry));
        let dispatcher = Dispatcher::new(ctx);
        let session = session_at(TrustTier::Low);

        let mut denied = terminate_request(1);
        dispatcher.dispatch(&session, &mut denied).unwrap();

        let mut completed = request(MessageBody::QueryClock {
            req: Default::default(),
            reply: Default::default(),
        });
        dispatcher.dispatch(&session, &mut completed).unwrap();

        let metrics = registry.broker_metrics();
        assert_eq!(metrics.request_count("terminate_process", "denied"), 1.0);
        assert_eq!(metrics.denial_count("terminate_process", "low"), 1.0);
        assert_eq!(metrics.request_count("query_clock", "completed"), 1.0);
        assert_eq!(metrics.handler_status_count("query_clock", "success"), 1.0);
    }
}
