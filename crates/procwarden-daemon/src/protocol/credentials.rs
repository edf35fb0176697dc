//! Peer credential extraction and baseline trust assignment.
//!
//! Credentials come from `SO_PEERCRED`, which the kernel fills from the
//! connecting process; they cannot be forged by the peer. The baseline trust
//! tier derived here is the floor for the session. It can later be raised by
//! a session token, never lowered.

use std::io;

use nix::sys::socket::{getsockopt, sockopt};
use nix::unistd::{Gid, Group, Uid, User};
use subtle::ConstantTimeEq;
use tokio::net::UnixStream;
use tracing::{debug, warn};

use procwarden_core::TrustTier;
use procwarden_core::config::TrustSection;

/// Credentials of the process on the other end of a Unix socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Peer effective user id.
    pub uid: u32,
    /// Peer effective group id.
    pub gid: u32,
    /// Peer process id. `None` when the kernel reports pid 0, which happens
    /// for peers outside our pid namespace.
    pub pid: Option<i32>,
}

impl PeerCredentials {
    /// Read `SO_PEERCRED` from a connected stream.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        let creds = getsockopt(stream, sockopt::PeerCredentials)?;
        let pid = creds.pid();
        Ok(Self {
            uid: creds.uid(),
            gid: creds.gid(),
            pid: (pid != 0).then_some(pid),
        })
    }

    /// Baseline trust tier for these credentials under `trust`.
    ///
    /// Root and the daemon's own uid get `root_tier`; members of the
    /// configured trusted group get `trusted_group_tier`; everyone else gets
    /// `default_tier`. Group resolution failures count as no match.
    #[must_use]
    pub fn baseline_tier(&self, trust: &TrustSection, daemon_uid: u32) -> TrustTier {
        let tier = if uid_eq(self.uid, 0) || uid_eq(self.uid, daemon_uid) {
            trust.root_tier
        } else if self.in_trusted_group(trust) {
            trust.trusted_group_tier
        } else {
            trust.default_tier
        };

        debug!(
            uid = self.uid,
            gid = self.gid,
            pid = ?self.pid,
            tier = %tier,
            "assigned baseline trust tier"
        );
        tier
    }

    fn in_trusted_group(&self, trust: &TrustSection) -> bool {
        let Some(group_name) = trust.trusted_group.as_deref() else {
            return false;
        };

        let group = match Group::from_name(group_name) {
            Ok(Some(group)) => group,
            Ok(None) => {
                warn!(group = group_name, "trusted group does not exist");
                return false;
            }
            Err(e) => {
                warn!(group = group_name, error = %e, "trusted group lookup failed");
                return false;
            }
        };

        let user_name = match User::from_uid(Uid::from_raw(self.uid)) {
            Ok(user) => user.map(|u| u.name),
            Err(e) => {
                debug!(uid = self.uid, error = %e, "peer user lookup failed");
                None
            }
        };

        group_grants(self.gid, user_name.as_deref(), &group)
    }
}

/// Constant-time uid comparison.
fn uid_eq(a: u32, b: u32) -> bool {
    a.to_ne_bytes().ct_eq(&b.to_ne_bytes()).unwrap_u8() == 1
}

/// True if a peer with primary group `peer_gid` (and user name `peer_user`,
/// when resolvable) belongs to `group`.
fn group_grants(peer_gid: u32, peer_user: Option<&str>, group: &Group) -> bool {
    if Gid::from_raw(peer_gid) == group.gid {
        return true;
    }
    match peer_user {
        Some(name) => group.mem.iter().any(|member| member == name),
        None => false,
    }
}
