//! procwarden-daemon - Privileged Process Inspection Broker
//!
//! This library implements the broker side of procwarden: a Unix domain
//! socket server that accepts sessions from local clients, evaluates every
//! request against the session's trust tier, and executes the authorized
//! ones against the host's process tables.
//!
//! Authorization is decided per request, never per connection. A session
//! starts at the baseline tier derived from its `SO_PEERCRED` identity and
//! may only move up (token elevation is monotonic), but the dispatcher
//! re-reads the tier and re-runs the catalog's trust evaluator on every
//! message, so a revoked or never-granted privilege fails closed even on a
//! long-lived connection.
//!
//! # Modules
//!
//! - [`context`]: Runtime wiring ([`context::RuntimeContext`]) threaded
//!   through every dispatch
//! - [`handlers`]: One handler per catalog operation, grouped by domain
//! - [`metrics`]: Prometheus counters, gauges, and histograms for broker
//!   observability
//! - [`protocol`]: UDS transport, framing, handshake, message catalog, and
//!   the dispatcher
//! - [`session`]: Per-connection state: trust tier, handle table, informer
//!   flags, timeouts
//! - [`state`]: Broker-wide counters shared by every connection
//! - [`system`]: Host process access behind the [`system::SystemFacade`]
//!   trait, with procfs and in-memory implementations

pub mod context;
pub mod handlers;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod state;
pub mod system;
