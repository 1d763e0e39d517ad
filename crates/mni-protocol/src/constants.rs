//! Protocol constants
//!
//! Opcodes, field identifiers and record sizes shared by the master and the
//! node. Field identifiers are byte offsets into a record and are part of the
//! wire contract: renumbering them breaks compatibility with deployed peers.

use crate::record::FieldId;

// ============================================================================
// Opcodes (offset 0 of every typed record)
// ============================================================================

/// Request opcode, sent master → node.
pub const QUERY: u32 = 0xAA;
/// Response opcode, sent node → master.
pub const ACK: u32 = 0xBB;

// ============================================================================
// Field Identifiers
// ============================================================================

/// Width of one typed field in bytes.
pub const FIELD_WIDTH: usize = 4;

/// Opcode field. The only field guaranteed to sit at the same offset in both
/// directions.
pub const OPCODE: FieldId = FieldId::new(0);
/// First user field (recharge amount or accumulated volume for user 1).
pub const USER_1: FieldId = FieldId::new(4);
/// Second user field.
pub const USER_2: FieldId = FieldId::new(8);
/// Third user field.
pub const USER_3: FieldId = FieldId::new(12);

/// The user fields in wire order.
pub const USER_FIELDS: [FieldId; 3] = [USER_1, USER_2, USER_3];

// ============================================================================
// Record Sizes
// ============================================================================

/// Size of a master → node record.
pub const MASTER_TX_SIZE: usize = 16;
/// Size of a node → master record.
pub const NODE_TX_SIZE: usize = 16;

/// Bytes the node polls for. Must equal what the master sends.
pub const NODE_RX_SIZE: usize = MASTER_TX_SIZE;
/// Bytes the master polls for. Must equal what the node sends.
pub const MASTER_RX_SIZE: usize = NODE_TX_SIZE;

// ============================================================================
// Link Defaults
// ============================================================================

/// Default baud rate of the master-node link.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

// Layout checks. A mismatch here is a latent wire incompatibility, so it has
// to fail the build rather than surface as a stalled readiness probe.
const _: () = assert!(NODE_RX_SIZE == MASTER_TX_SIZE);
const _: () = assert!(MASTER_RX_SIZE == NODE_TX_SIZE);
const _: () = assert!(OPCODE.offset() == 0);
const _: () = assert!(USER_3.end() <= MASTER_TX_SIZE);
const _: () = assert!(USER_3.end() <= NODE_TX_SIZE);
