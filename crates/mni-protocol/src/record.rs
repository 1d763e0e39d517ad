//! Fixed-layout record encoding and decoding.
//!
//! A record is a fixed-size byte buffer exchanged in one piece over the link.
//! Two generations of record coexist and both implement [`WireRecord`]:
//!
//! - [`TypedRecord`]: a flat sequence of 4-byte big-endian `u32` fields,
//!   addressed by [`FieldId`] (the field's byte offset). Offset 0 holds the
//!   opcode.
//! - [`RawRecord`]: an opaque byte sequence of agreed size. No field structure.
//!
//! ## Typed Record Format
//!
//! ```text
//! +--------+--------+--------+--------+-----
//! | opcode | user 1 | user 2 | user 3 | ...
//! | 4B BE  | 4B BE  | 4B BE  | 4B BE  |
//! +--------+--------+--------+--------+-----
//!  0        4        8        12
//! ```
//!
//! Buffers are never cleared between exchanges. A field that is not
//! re-encoded before the next send goes out with whatever value it held last.

use std::fmt;
use std::ops::Range;

use crate::constants::FIELD_WIDTH;

// ============================================================================
// Field Identifiers
// ============================================================================

/// Identifier of a typed field. The identifier *is* the field's byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(usize);

impl FieldId {
    /// Create a field identifier at the given byte offset.
    pub const fn new(offset: usize) -> Self {
        FieldId(offset)
    }

    /// Byte offset of the first byte of the field.
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Byte offset one past the last byte of the field, saturating at
    /// `usize::MAX`.
    pub const fn end(self) -> usize {
        self.0.saturating_add(FIELD_WIDTH)
    }

    /// Byte range covered by the field.
    pub const fn range(self) -> Range<usize> {
        self.0..self.end()
    }

    /// Whether the field fits in a record of `size` bytes.
    pub const fn fits(self, size: usize) -> bool {
        self.end() <= size
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field@{}", self.0)
    }
}

// ============================================================================
// Codec Functions
// ============================================================================

/// Write `value` big-endian into the 4 bytes of `buffer` at `id`.
///
/// Only those 4 bytes are touched, so fields can be encoded independently and
/// in any order before a single send.
///
/// # Panics
///
/// Panics if the field does not fit in `buffer`.
pub fn encode_field(buffer: &mut [u8], id: FieldId, value: u32) {
    check_bounds(buffer.len(), id);
    buffer[id.range()].copy_from_slice(&value.to_be_bytes());
}

/// Read the big-endian `u32` stored in `buffer` at `id`.
///
/// # Panics
///
/// Panics if the field does not fit in `buffer`.
pub fn decode_field(buffer: &[u8], id: FieldId) -> u32 {
    check_bounds(buffer.len(), id);
    let b = &buffer[id.range()];
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn check_bounds(len: usize, id: FieldId) {
    assert!(
        id.fits(len),
        "{} overruns a {}-byte record (needs {} bytes)",
        id,
        len,
        id.end()
    );
}

// ============================================================================
// Record Generations
// ============================================================================

/// A fixed-size record that can be moved across the link byte by byte.
pub trait WireRecord {
    /// Size of the record on the wire, in bytes.
    const SIZE: usize;

    /// Create a zero-filled record.
    fn zeroed() -> Self;

    /// The record's bytes, in wire order.
    fn as_bytes(&self) -> &[u8];

    /// Mutable access to the record's bytes.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// A record of `N` bytes made of 4-byte big-endian fields.
#[derive(Clone, PartialEq, Eq)]
pub struct TypedRecord<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> TypedRecord<N> {
    const HOLDS_OPCODE: () = assert!(
        N >= FIELD_WIDTH,
        "a typed record must be large enough for its opcode field"
    );

    /// Create a zero-filled record.
    pub const fn new() -> Self {
        let () = Self::HOLDS_OPCODE;
        TypedRecord { bytes: [0; N] }
    }

    /// Encode `value` into the field at `id`.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in `N` bytes.
    pub fn encode_field(&mut self, id: FieldId, value: u32) {
        encode_field(&mut self.bytes, id, value);
    }

    /// Decode the field at `id`.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in `N` bytes.
    pub fn decode_field(&self, id: FieldId) -> u32 {
        decode_field(&self.bytes, id)
    }

    /// Decode the opcode field (offset 0).
    pub fn opcode(&self) -> u32 {
        self.decode_field(crate::constants::OPCODE)
    }

    /// Build a record from wire bytes.
    pub fn from_bytes(bytes: [u8; N]) -> Self {
        let () = Self::HOLDS_OPCODE;
        TypedRecord { bytes }
    }
}

impl<const N: usize> Default for TypedRecord<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> WireRecord for TypedRecord<N> {
    const SIZE: usize = N;

    fn zeroed() -> Self {
        Self::new()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl<const N: usize> fmt::Debug for TypedRecord<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedRecord<{}>(opcode=0x{:02X}, bytes={:?})", N, self.opcode(), self.bytes)
    }
}

/// An opaque record of `N` bytes. The codec only moves these bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> RawRecord<N> {
    /// Create a zero-filled record.
    pub const fn new() -> Self {
        RawRecord { bytes: [0; N] }
    }

    /// Overwrite the leading bytes of the record with `data`.
    ///
    /// Bytes past `data.len()` keep their previous contents.
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than the record.
    pub fn copy_from(&mut self, data: &[u8]) {
        assert!(
            data.len() <= N,
            "{} bytes do not fit in a {}-byte record",
            data.len(),
            N
        );
        self.bytes[..data.len()].copy_from_slice(data);
    }

    /// Whether the record begins with `prefix`.
    ///
    /// Lets a peer recognize an opcode byte group without decoding.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes.starts_with(prefix)
    }
}

impl<const N: usize> Default for RawRecord<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> WireRecord for RawRecord<N> {
    const SIZE: usize = N;

    fn zeroed() -> Self {
        Self::new()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
