//! Ordered trust tiers.
//!
//! Every client session holds exactly one [`TrustTier`] at any moment, and
//! every catalog entry names the minimum tier its operation requires. Tiers
//! are totally ordered: a session at [`TrustTier::Maximum`] can do everything
//! a [`TrustTier::Medium`] session can, which can do everything a
//! [`TrustTier::Low`] session can. Authorization is always the single
//! comparison [`TrustTier::grants`]; there are no partial privileges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Privilege level attached to a client session.
///
/// The discriminants are stable and wire-visible (session tokens carry the
/// `u8` repr), so variants must never be reordered or renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TrustTier {
    /// Baseline tier granted to any authenticated peer.
    Low = 0,
    /// Tier for read-oriented inspection of other processes.
    Medium = 1,
    /// Tier for state-changing and memory-reading operations.
    Maximum = 2,
}

impl TrustTier {
    /// Number of tiers.
    pub const COUNT: usize = 3;

    /// All tiers in ascending order.
    pub const ALL: [Self; Self::COUNT] = [Self::Low, Self::Medium, Self::Maximum];

    /// Stable numeric representation, used in session tokens and in the
    /// session's atomic tier cell.
    #[must_use]
    pub const fn as_repr(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Self::as_repr`]. Returns `None` for out-of-range values
    /// so corrupted tokens and torn state never map to a valid tier.
    #[must_use]
    pub const fn from_repr(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::Maximum),
            _ => None,
        }
    }

    /// Whether a session holding `self` satisfies a requirement of
    /// `required`.
    #[must_use]
    pub const fn grants(self, required: Self) -> bool {
        self as u8 >= required as u8
    }

    /// Lower-case name, matching the serde representation used in
    /// configuration files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Maximum => "maximum",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// The ordering of the enum is load-bearing for `grants`.
const _: () = assert!(TrustTier::Low.as_repr() < TrustTier::Medium.as_repr());
const _: () = assert!(TrustTier::Medium.as_repr() < TrustTier::Maximum.as_repr());
