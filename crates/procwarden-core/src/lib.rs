//! procwarden-core - Shared contract types for the procwarden broker.
//!
//! This crate defines the vocabulary both sides of the broker protocol agree
//! on: the ordered trust tiers a client session can hold, the per-object
//! access masks requests carry, the operation status codes handlers write
//! into replies, the HMAC session tokens used for tier elevation, and the
//! daemon configuration schema.
//!
//! Nothing in this crate performs I/O against the system being inspected;
//! it is deliberately small so the daemon and the CLI share one source of
//! truth for the wire-visible contract.
//!
//! # Modules
//!
//! - [`tier`]: Ordered trust tiers ([`TrustTier`])
//! - [`access`]: Access-mask bits and read-only subsets per object class
//! - [`status`]: In-message operation result codes ([`OperationStatus`])
//! - [`token`]: Session-token mint/verify for tier elevation
//! - [`config`]: TOML configuration schema ([`config::BrokerConfig`])

pub mod access;
pub mod config;
pub mod status;
pub mod tier;
pub mod token;

pub use status::OperationStatus;
pub use tier::TrustTier;
