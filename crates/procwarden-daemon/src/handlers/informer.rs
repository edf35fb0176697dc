//! Informer settings and session-token elevation.

use tracing::{info, warn};

use procwarden_core::token::{self, TokenError};
use procwarden_core::OperationStatus;

use crate::context::RuntimeContext;
use crate::protocol::messages::{INFORMER_ALL_FLAGS, MessageBody};
use crate::session::ClientSession;

pub fn get_informer_settings(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::GetInformerSettings { reply, .. } = &mut message.body else {
        debug_assert!(false, "get_informer_settings invoked with mismatched body");
        return;
    };

    reply.flags = session.informer_flags();
    reply.status = OperationStatus::Success as i32;
}

pub fn set_informer_settings(
    _ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::SetInformerSettings { req, reply } = &mut message.body else {
        debug_assert!(false, "set_informer_settings invoked with mismatched body");
        return;
    };

    if req.flags & !INFORMER_ALL_FLAGS != 0 {
        reply.status = OperationStatus::InvalidParameter as i32;
        return;
    }

    session.set_informer_flags(req.flags);
    reply.status = OperationStatus::Success as i32;
}

/// Verifies a presented token against the broker's shared secret and raises
/// the session tier to the token's, never lowering it.
pub fn assign_session_token(
    ctx: &RuntimeContext,
    session: &ClientSession,
    message: &mut super::Message,
) {
    let MessageBody::AssignSessionToken { req, reply } = &mut message.body else {
        debug_assert!(false, "assign_session_token invoked with mismatched body");
        return;
    };

    let Some(secret) = ctx.token_secret() else {
        reply.status = OperationStatus::Unavailable as i32;
        return;
    };

    let claims = match token::verify(secret, &req.token, token::unix_now()) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(
                session_id = %session.session_id(),
                peer_uid = session.peer().uid,
                error = %err,
                "session token rejected"
            );
            reply.status = match err {
                TokenError::Malformed
                | TokenError::UnknownVersion { .. }
                | TokenError::UnknownTier { .. } => OperationStatus::InvalidParameter,
                TokenError::VerificationFailed | TokenError::Expired { .. } => {
                    OperationStatus::AccessDenied
                }
                _ => OperationStatus::Internal,
            } as i32;
            return;
        }
    };

    let before = session.tier();
    let effective = session.elevate_to(claims.tier);
    if effective > before {
        info!(
            session_id = %session.session_id(),
            peer_uid = session.peer().uid,
            from = before.name(),
            to = effective.name(),
            "session tier elevated"
        );
        if let Some(metrics) = ctx.metrics() {
            metrics.session_elevated(effective.name());
        }
    }

    reply.tier = u32::from(effective.as_repr());
    reply.expires_at = claims.expires_at;
    reply.status = OperationStatus::Success as i32;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use procwarden_core::TrustTier;
    use procwarden_core::token;

    use super::super::testing::{request, runtime, session_at};
    use super::*;
    use crate::protocol::messages::{
        AssignSessionTokenRequest, INFORMER_DENIAL_NOTICES, INFORMER_PROCESS_LIFECYCLE,
        SetInformerSettingsRequest,
    };
    use crate::system::InMemorySystem;

    fn secret() -> SecretString {
        SecretString::from("0123456789abcdef0123456789abcdef-test-secret")
    }

    fn context_with_secret() -> RuntimeContext {
        let system = Arc::new(InMemorySystem::new());
        runtime(&system).with_token_secret(secret())
    }

    #[test]
    fn settings_round_trip_through_the_session() {
        let system = Arc::new(InMemorySystem::new());
        let ctx = runtime(&system);
        let session = session_at(TrustTier::Low);

        let mut set = request(MessageBody::SetInformerSettings {
            req: SetInformerSettingsRequest {
                flags: INFORMER_PROCESS_LIFECYCLE | INFORMER_DENIAL_NOTICES,
            },
            reply: Default::default(),
        });
        set_informer_settings(&ctx, &session, &mut set);
        let MessageBody::SetInformerSettings { reply, .. } = &set.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);

        let mut get = request(MessageBody::GetInformerSettings {
            req: Default::default(),
            reply: Default::default(),
        });
        get_informer_settings(&ctx, &session, &mut get);
        let MessageBody::GetInformerSettings { reply, .. } = &get.body else {
            panic!("body changed shape");
        };
        assert_eq!(
            reply.flags,
            INFORMER_PROCESS_LIFECYCLE | INFORMER_DENIAL_NOTICES
        );
    }

    #[test]
    fn undefined_flag_bits_leave_settings_untouched() {
        let system = Arc::new(InMemorySystem::new());
        let ctx = runtime(&system);
        let session = session_at(TrustTier::Low);
        session.set_informer_flags(INFORMER_PROCESS_LIFECYCLE);

        let mut message = request(MessageBody::SetInformerSettings {
            req: SetInformerSettingsRequest { flags: 1 << 40 },
            reply: Default::default(),
        });
        set_informer_settings(&ctx, &session, &mut message);

        let MessageBody::SetInformerSettings { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
        assert_eq!(session.informer_flags(), INFORMER_PROCESS_LIFECYCLE);
    }

    #[test]
    fn valid_token_elevates_the_session() {
        let ctx = context_with_secret();
        let session = session_at(TrustTier::Low);
        let expires_at = token::unix_now() + 600;
        let minted = token::mint(&secret(), TrustTier::Maximum, expires_at).unwrap();

        let mut message = request(MessageBody::AssignSessionToken {
            req: AssignSessionTokenRequest { token: minted },
            reply: Default::default(),
        });
        assign_session_token(&ctx, &session, &mut message);

        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.tier, u32::from(TrustTier::Maximum.as_repr()));
        assert_eq!(reply.expires_at, expires_at);
        assert_eq!(session.tier(), TrustTier::Maximum);
    }

    #[test]
    fn elevation_never_lowers_the_tier() {
        let ctx = context_with_secret();
        let session = session_at(TrustTier::Maximum);
        let minted =
            token::mint(&secret(), TrustTier::Low, token::unix_now() + 600).unwrap();

        let mut message = request(MessageBody::AssignSessionToken {
            req: AssignSessionTokenRequest { token: minted },
            reply: Default::default(),
        });
        assign_session_token(&ctx, &session, &mut message);

        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Success);
        assert_eq!(reply.tier, u32::from(TrustTier::Maximum.as_repr()));
        assert_eq!(session.tier(), TrustTier::Maximum);
    }

    #[test]
    fn forged_tokens_are_denied() {
        let ctx = context_with_secret();
        let session = session_at(TrustTier::Low);
        let other = SecretString::from("another-secret-that-is-long-enough-0000");
        let forged =
            token::mint(&other, TrustTier::Maximum, token::unix_now() + 600).unwrap();

        let mut message = request(MessageBody::AssignSessionToken {
            req: AssignSessionTokenRequest { token: forged },
            reply: Default::default(),
        });
        assign_session_token(&ctx, &session, &mut message);

        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::AccessDenied);
        assert_eq!(session.tier(), TrustTier::Low);
    }

    #[test]
    fn garbage_tokens_are_a_parameter_error() {
        let ctx = context_with_secret();
        let session = session_at(TrustTier::Low);

        let mut message = request(MessageBody::AssignSessionToken {
            req: AssignSessionTokenRequest {
                token: "not-hex".to_string(),
            },
            reply: Default::default(),
        });
        assign_session_token(&ctx, &session, &mut message);

        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::InvalidParameter);
    }

    #[test]
    fn tokens_are_unavailable_without_a_configured_secret() {
        let system = Arc::new(InMemorySystem::new());
        let ctx = runtime(&system);
        let session = session_at(TrustTier::Low);

        let mut message = request(MessageBody::AssignSessionToken {
            req: AssignSessionTokenRequest {
                token: "anything".to_string(),
            },
            reply: Default::default(),
        });
        assign_session_token(&ctx, &session, &mut message);

        let MessageBody::AssignSessionToken { reply, .. } = &message.body else {
            panic!("body changed shape");
        };
        assert_eq!(reply.status(), OperationStatus::Unavailable);
    }
}
