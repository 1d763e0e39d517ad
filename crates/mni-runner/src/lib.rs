//! Reference driving loop for the master-node link.
//!
//! The protocol crate answers *how* a request/response pair is encoded and
//! recognized as complete; this crate decides *when*. It provides:
//!
//! - [`LinkConfig`]: YAML configuration for one end of the link.
//! - [`Capabilities`]: the application operations the drivers may call,
//!   injected at construction ([`MemoryCapabilities`] for config-seeded use).
//! - [`MasterDriver`] / [`NodeDriver`]: tick-based drivers with a
//!   caller-side [`PollBudget`] standing in for the timeout the protocol does
//!   not have.

pub mod capability;
pub mod config;
pub mod driver;
mod error;

pub use capability::{Capabilities, MemoryCapabilities};
pub use config::{Credential, Generation, LinkConfig};
pub use driver::{ExchangeReport, MasterDriver, NodeDriver, NodeLink, NodeReply, PollBudget};
pub use error::*;
