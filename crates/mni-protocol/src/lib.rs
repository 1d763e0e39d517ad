//! Master-Node Interface (MNI)
//!
//! This crate implements the serial protocol that links a *master* controller,
//! which issues requests and consumes results, to a *node* controller, which
//! owns a sensor and answers them. One master, one node, one in-order byte
//! stream; no checksums, retransmission or arbitration.
//!
//! # Layers
//!
//! - [`Transport`]: byte-exact send and receive over a [`Port`], plus a
//!   non-blocking readiness probe that is true only when *exactly* the
//!   expected number of bytes is buffered.
//! - Record codec ([`TypedRecord`], [`RawRecord`]): fixed-size records. Typed
//!   records are sequences of big-endian `u32` fields addressed by byte
//!   offset; raw records are opaque bytes.
//! - [`RoleAdapter`]: the master or node end of the link. Owns the send and
//!   receive buffers and exposes encode / transmit / is_ready / receive /
//!   decode.
//!
//! # Wire Layout
//!
//! | Direction     | 0            | 4      | 8      | 12     |
//! |---------------|--------------|--------|--------|--------|
//! | Master → Node | `0xAA` QUERY | user 1 | user 2 | user 3 |
//! | Node → Master | `0xBB` ACK   | user 1 | user 2 | user 3 |
//!
//! # Example
//!
//! ```rust
//! use mni_protocol::{MasterAdapter, NodeAdapter, Role, RoleAdapter, Transport};
//! use mni_protocol::{OPCODE, QUERY, USER_1};
//!
//! let (m, n) = Transport::loopback_pair();
//! let mut master: MasterAdapter<_> = RoleAdapter::new(Role::Master, m);
//! let mut node: NodeAdapter<_> = RoleAdapter::new(Role::Node, n);
//!
//! master.encode(OPCODE, QUERY);
//! master.encode(USER_1, 100);
//! master.transmit()?;
//!
//! while !node.is_ready() {}
//! node.receive()?;
//! assert_eq!(node.decode(USER_1), 100);
//! # Ok::<(), mni_protocol::MniError>(())
//! ```

mod constants;
mod error;
mod record;
mod role;
mod transport;

pub use constants::*;
pub use error::*;
pub use record::*;
pub use role::*;
pub use transport::*;
