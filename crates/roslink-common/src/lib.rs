//! Roslink Common Types, Validation and Transport
//!
//! Shared foundation for the roslink device-client framework: the protocol
//! view of the device (command tokens, query/reply frames, priorities), the
//! error taxonomy and classifier, the input validator, and the narrow
//! transport surface the resilience layer is built on.
//!
//! # Overview
//!
//! Roslink is the client framework an ISP billing application uses to talk
//! to a RouterOS-style hotspot device over a persistent, session-oriented
//! control protocol. This crate contains everything the higher layers share:
//!
//! - **Protocol layer**: [`protocol`] — command classification, frames,
//!   priorities, and the [`RoslinkError`] taxonomy
//! - **Classification**: [`classify`] — severity, retryability, recovery
//!   advice and running error statistics
//! - **Validation**: [`validate`] — attack-signature gate plus per-type
//!   format rules
//! - **Transport layer**: [`transport`] — connect/login/run_query/close,
//!   with TCP and mock implementations
//!
//! [`RoslinkError`]: protocol::error::RoslinkError

pub mod classify;
pub mod protocol;
pub mod transport;
pub mod validate;

pub use protocol::error::{Result, RoslinkError};
pub use protocol::{CommandClass, Priority};
