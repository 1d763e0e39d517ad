//! Master-side and node-side role adapters.
//!
//! A [`RoleAdapter`] owns one transport, the record it sends and the record it
//! expects back. Both sides run the same exchange cycle, offset by who
//! initiates:
//!
//! ```text
//! Idle --encode--> ArmedToSend --transmit--> AwaitingPeer
//! Idle --is_ready--> Receivable --receive--> DecodeReady --encode--> ArmedToSend
//! ```
//!
//! The adapter never clears its buffers. Fields that are not re-encoded
//! before the next transmit are resent with their previous value, and the
//! receive buffer holds the last record until it is overwritten.

use std::fmt;

use crate::constants::{ACK, MASTER_RX_SIZE, MASTER_TX_SIZE, NODE_RX_SIZE, NODE_TX_SIZE, OPCODE, QUERY};
use crate::record::{FieldId, RawRecord, TypedRecord, WireRecord};
use crate::transport::{Port, Transport};
use crate::MniResult;

/// Which end of the link an adapter serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Issues requests and consumes results.
    Master,
    /// Owns the sensor and answers requests.
    Node,
}

impl Role {
    /// Opcode this role puts at offset 0 of the records it sends.
    pub const fn tx_opcode(self) -> u32 {
        match self {
            Role::Master => QUERY,
            Role::Node => ACK,
        }
    }

    /// Opcode this role expects at offset 0 of the records it receives.
    pub const fn rx_opcode(self) -> u32 {
        match self {
            Role::Master => ACK,
            Role::Node => QUERY,
        }
    }

    /// Returns the role as a lowercase string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of an adapter in the exchange cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing pending.
    Idle,
    /// At least one field was encoded since the last transmit.
    ArmedToSend,
    /// The send buffer went out; the exchange is with the peer now.
    AwaitingPeer,
    /// The readiness probe saw a full record buffered.
    Receivable,
    /// A record was received and its fields can be decoded.
    DecodeReady,
}

/// Record sent by the master.
pub type MasterRecord = TypedRecord<MASTER_TX_SIZE>;
/// Record sent by the node.
pub type NodeRecord = TypedRecord<NODE_TX_SIZE>;

/// Master side: sends QUERY records, receives ACK records.
pub type MasterAdapter<P> = RoleAdapter<P, TypedRecord<MASTER_TX_SIZE>, TypedRecord<MASTER_RX_SIZE>>;
/// Node side: receives QUERY records, sends ACK records.
pub type NodeAdapter<P> = RoleAdapter<P, TypedRecord<NODE_TX_SIZE>, TypedRecord<NODE_RX_SIZE>>;
/// Node side for the raw-transfer generation: the request is taken as opaque
/// bytes and only its opcode byte group is recognized.
pub type RawNodeAdapter<P> = RoleAdapter<P, TypedRecord<NODE_TX_SIZE>, RawRecord<NODE_RX_SIZE>>;

/// Exchange-oriented view of one end of the link.
pub struct RoleAdapter<P, Tx, Rx> {
    role: Role,
    transport: Transport<P>,
    tx: Tx,
    rx: Rx,
    state: ExchangeState,
    /// Write position of [`RoleAdapter::poll_receive`] in the receive buffer.
    rx_cursor: usize,
    records_received: u64,
}

impl<P: Port, Tx: WireRecord, Rx: WireRecord> RoleAdapter<P, Tx, Rx> {
    /// Create an adapter bound to `transport`. Buffers start zero-filled.
    pub fn new(role: Role, transport: Transport<P>) -> Self {
        RoleAdapter {
            role,
            transport,
            tx: Tx::zeroed(),
            rx: Rx::zeroed(),
            state: ExchangeState::Idle,
            rx_cursor: 0,
            records_received: 0,
        }
    }

    /// Role of this adapter.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current position in the exchange cycle.
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Size of the record this adapter sends.
    pub fn tx_size(&self) -> usize {
        Tx::SIZE
    }

    /// Size of the record this adapter waits for.
    pub fn rx_size(&self) -> usize {
        Rx::SIZE
    }

    /// Number of complete records received so far.
    pub fn records_received(&self) -> u64 {
        self.records_received
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport<P> {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut Transport<P> {
        &mut self.transport
    }

    /// The send buffer as it will go out on the next transmit.
    pub fn tx_record(&self) -> &Tx {
        &self.tx
    }

    /// The receive buffer, holding the most recently received record.
    pub fn rx_record(&self) -> &Rx {
        &self.rx
    }

    /// Send the whole send buffer, one byte at a time.
    pub fn transmit(&mut self) -> MniResult<()> {
        for i in 0..Tx::SIZE {
            let byte = &self.tx.as_bytes()[i..=i];
            self.transport.send(byte)?;
        }
        log::debug!(
            "{} [{}] tx buffer: {:?}",
            self.role,
            self.transport.endpoint(),
            self.tx.as_bytes()
        );
        self.state = ExchangeState::AwaitingPeer;
        Ok(())
    }

    /// Non-blocking check for a full record from the peer.
    ///
    /// True iff exactly one record's worth of bytes is buffered.
    pub fn is_ready(&mut self) -> bool {
        let ready = self.transport.is_ready(Rx::SIZE);
        if ready {
            self.state = ExchangeState::Receivable;
        }
        ready
    }

    /// Fill the receive buffer from the transport, one byte at a time.
    ///
    /// Must only be called after [`RoleAdapter::is_ready`] returned true.
    pub fn receive(&mut self) -> MniResult<()> {
        let buffer = self.rx.as_bytes_mut();
        for i in 0..Rx::SIZE {
            self.transport.receive(&mut buffer[i..=i])?;
        }
        self.rx_cursor = 0;
        self.complete_receive();
        Ok(())
    }

    /// Move at most one buffered byte into the receive buffer.
    ///
    /// Returns true once a full record has been assembled, after which the
    /// cursor starts over. Meant to be called once per driving-loop tick as
    /// an alternative to [`RoleAdapter::is_ready`] plus
    /// [`RoleAdapter::receive`]. Unlike the readiness probe it does not
    /// guard against surplus bytes.
    pub fn poll_receive(&mut self) -> MniResult<bool> {
        if self.rx_cursor < Rx::SIZE {
            let cursor = self.rx_cursor;
            let read = self
                .transport
                .receive(&mut self.rx.as_bytes_mut()[cursor..=cursor])?;
            self.rx_cursor += read;
        }
        if self.rx_cursor == Rx::SIZE {
            self.rx_cursor = 0;
            self.complete_receive();
            return Ok(true);
        }
        Ok(false)
    }

    fn complete_receive(&mut self) {
        self.records_received += 1;
        self.state = ExchangeState::DecodeReady;
        log::trace!(
            "{} [{}] rx buffer: {:?}",
            self.role,
            self.transport.endpoint(),
            self.rx.as_bytes()
        );
    }

    fn assert_received(&self) {
        assert!(
            self.records_received > 0,
            "{} adapter read its receive buffer before any record was received",
            self.role
        );
    }
}

impl<P: Port, const T: usize, Rx: WireRecord> RoleAdapter<P, TypedRecord<T>, Rx> {
    /// Encode `value` into the send buffer at `id`.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in the send record.
    pub fn encode(&mut self, id: FieldId, value: u32) {
        self.tx.encode_field(id, value);
        self.state = ExchangeState::ArmedToSend;
    }

    /// Encode this role's opcode at offset 0.
    pub fn encode_opcode(&mut self) {
        self.encode(OPCODE, self.role.tx_opcode());
    }
}

impl<P: Port, Tx: WireRecord, const R: usize> RoleAdapter<P, Tx, TypedRecord<R>> {
    /// Decode the field at `id` from the last received record.
    ///
    /// # Panics
    ///
    /// Panics if no record has been received yet or the field does not fit
    /// in the receive record.
    pub fn decode(&self, id: FieldId) -> u32 {
        self.assert_received();
        self.rx.decode_field(id)
    }

    /// Whether the last received record carries the opcode this role expects.
    pub fn received_expected_opcode(&self) -> bool {
        self.decode(OPCODE) == self.role.rx_opcode()
    }
}

impl<P: Port, const T: usize, Rx: WireRecord> RoleAdapter<P, RawRecord<T>, Rx> {
    /// Copy `data` into the leading bytes of the send buffer.
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than the send record.
    pub fn load(&mut self, data: &[u8]) {
        self.tx.copy_from(data);
        self.state = ExchangeState::ArmedToSend;
    }
}

impl<P: Port, Tx: WireRecord, const R: usize> RoleAdapter<P, Tx, RawRecord<R>> {
    /// Whether the last received record begins with `prefix`.
    ///
    /// # Panics
    ///
    /// Panics if no record has been received yet.
    pub fn received_starts_with(&self, prefix: &[u8]) -> bool {
        self.assert_received();
        self.rx.starts_with(prefix)
    }

    /// Whether the last received record begins with the big-endian byte
    /// group of the opcode this role expects.
    pub fn received_expected_opcode_bytes(&self) -> bool {
        self.received_starts_with(&self.role.rx_opcode().to_be_bytes())
    }
}

impl<P, Tx, Rx> fmt::Debug for RoleAdapter<P, Tx, Rx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleAdapter")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("rx_cursor", &self.rx_cursor)
            .field("records_received", &self.records_received)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::*;
    use crate::transport::LoopbackPort;

    fn linked() -> (MasterAdapter<LoopbackPort>, NodeAdapter<LoopbackPort>) {
        let (m, n) = Transport::loopback_pair();
        (
            RoleAdapter::new(Role::Master, m),
            RoleAdapter::new(Role::Node, n),
        )
    }

    #[test]
    fn test_end_to_end_exchange() {
        let (mut master, mut node) = linked();

        master.encode(OPCODE, QUERY);
        master.encode(USER_1, 100);
        master.encode(USER_2, 0);
        master.encode(USER_3, 50);
        master.transmit().unwrap();

        assert!(node.is_ready());
        node.receive().unwrap();
        assert_eq!(node.decode(OPCODE), 0xAA);
        assert_eq!(node.decode(USER_2), 0);

        node.encode(OPCODE, ACK);
        node.encode(USER_1, 500);
        node.encode(USER_2, 1200);
        node.encode(USER_3, 75);
        node.transmit().unwrap();

        assert!(master.is_ready());
        master.receive().unwrap();
        assert_eq!(master.decode(USER_3), 75);
        assert!(master.received_expected_opcode());
    }

    #[test]
    fn test_opcode_discrimination() {
        let (mut master, mut node) = linked();

        master.encode_opcode();
        master.transmit().unwrap();
        node.is_ready();
        node.receive().unwrap();
        assert_eq!(node.decode(OPCODE), QUERY);
        assert!(node.received_expected_opcode());

        node.encode_opcode();
        node.transmit().unwrap();
        master.is_ready();
        master.receive().unwrap();
        assert_eq!(master.decode(OPCODE), ACK);
    }

    #[test]
    fn test_state_transitions() {
        let (mut master, mut node) = linked();
        assert_eq!(master.state(), ExchangeState::Idle);

        master.encode_opcode();
        assert_eq!(master.state(), ExchangeState::ArmedToSend);

        master.transmit().unwrap();
        assert_eq!(master.state(), ExchangeState::AwaitingPeer);

        assert!(node.is_ready());
        assert_eq!(node.state(), ExchangeState::Receivable);

        node.receive().unwrap();
        assert_eq!(node.state(), ExchangeState::DecodeReady);
        assert_eq!(node.records_received(), 1);
    }

    #[test]
    fn test_not_ready_until_full_record() {
        let (mut master, mut node) = linked();
        master.encode_opcode();
        master.transmit().unwrap();

        // Swallow one byte so only 15 remain.
        let mut one = [0u8; 1];
        node.transport_mut().receive(&mut one).unwrap();
        assert!(!node.is_ready());
        assert_eq!(node.state(), ExchangeState::Idle);
    }

    #[test]
    fn test_surplus_byte_blocks_readiness() {
        let (mut master, mut node) = linked();
        master.encode_opcode();
        master.transmit().unwrap();
        node.transport().port().inject(&[0x00]);

        assert!(!node.is_ready());
        node.transport_mut().drain().unwrap();
        assert!(!node.is_ready());
    }

    #[test]
    fn test_untouched_fields_are_resent() {
        let (mut master, mut node) = linked();

        master.encode(OPCODE, QUERY);
        master.encode(USER_1, 11);
        master.encode(USER_2, 22);
        master.encode(USER_3, 33);
        master.transmit().unwrap();
        node.is_ready();
        node.receive().unwrap();

        // Second exchange only re-encodes user 2.
        master.encode(USER_2, 99);
        master.transmit().unwrap();
        assert!(node.is_ready());
        node.receive().unwrap();

        assert_eq!(node.decode(OPCODE), QUERY);
        assert_eq!(node.decode(USER_1), 11);
        assert_eq!(node.decode(USER_2), 99);
        assert_eq!(node.decode(USER_3), 33);
    }

    #[test]
    fn test_receive_buffer_keeps_last_record() {
        let (mut master, mut node) = linked();
        master.encode(OPCODE, QUERY);
        master.encode(USER_1, 7);
        master.transmit().unwrap();
        node.is_ready();
        node.receive().unwrap();

        // Nothing new arrives; the last record is still readable.
        assert!(!node.is_ready());
        assert_eq!(node.decode(USER_1), 7);
    }

    #[test]
    fn test_poll_receive_one_byte_per_tick() {
        let (mut master, mut node) = linked();
        master.encode(OPCODE, QUERY);
        master.encode(USER_3, 50);
        master.transmit().unwrap();

        let mut ticks = 0;
        loop {
            ticks += 1;
            if node.poll_receive().unwrap() {
                break;
            }
            assert!(ticks < 100, "record never completed");
        }
        assert_eq!(ticks, NODE_RX_SIZE);
        assert_eq!(node.decode(USER_3), 50);
    }

    #[test]
    fn test_poll_receive_waits_for_trickled_bytes() {
        let (_, n) = Transport::loopback_pair();
        let mut node: NodeAdapter<LoopbackPort> = RoleAdapter::new(Role::Node, n);
        let mut record = MasterRecord::new();
        record.encode_field(OPCODE, QUERY);
        record.encode_field(USER_1, 100);
        let bytes = record.as_bytes().to_vec();

        node.transport().port().inject(&bytes[..10]);
        for _ in 0..20 {
            assert!(!node.poll_receive().unwrap());
        }
        node.transport().port().inject(&bytes[10..]);
        let mut done = false;
        for _ in 0..6 {
            done = node.poll_receive().unwrap();
        }
        assert!(done);
        assert_eq!(node.decode(USER_1), 100);
    }

    #[test]
    #[should_panic(expected = "before any record was received")]
    fn test_decode_before_receive_panics() {
        let (master, _) = linked();
        master.decode(USER_1);
    }

    #[test]
    fn test_raw_node_recognizes_query() {
        let (m, n) = Transport::loopback_pair();
        let mut master: MasterAdapter<LoopbackPort> = RoleAdapter::new(Role::Master, m);
        let mut node: RawNodeAdapter<LoopbackPort> = RoleAdapter::new(Role::Node, n);

        master.encode_opcode();
        master.transmit().unwrap();
        assert!(node.is_ready());
        node.receive().unwrap();
        assert!(node.received_expected_opcode_bytes());
        assert_eq!(node.rx_record().as_bytes().len(), NODE_RX_SIZE);

        node.encode_opcode();
        node.encode(USER_1, 500);
        node.transmit().unwrap();
        assert!(master.is_ready());
        master.receive().unwrap();
        assert!(master.received_expected_opcode());
        assert_eq!(master.decode(USER_1), 500);
    }

    #[test]
    fn test_raw_sender_load() {
        let (a, b) = Transport::loopback_pair();
        let mut sender: RoleAdapter<LoopbackPort, RawRecord<4>, RawRecord<4>> =
            RoleAdapter::new(Role::Node, a);
        let mut receiver: RoleAdapter<LoopbackPort, RawRecord<4>, RawRecord<4>> =
            RoleAdapter::new(Role::Master, b);

        sender.load(&[1, 2, 3, 4]);
        sender.transmit().unwrap();
        assert!(receiver.is_ready());
        receiver.receive().unwrap();
        assert!(receiver.received_starts_with(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_role_opcodes() {
        assert_eq!(Role::Master.tx_opcode(), QUERY);
        assert_eq!(Role::Master.rx_opcode(), ACK);
        assert_eq!(Role::Node.tx_opcode(), ACK);
        assert_eq!(Role::Node.rx_opcode(), QUERY);
        assert_eq!(Role::Node.to_string(), "node");
    }
}
