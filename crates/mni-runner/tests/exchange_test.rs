//! Integration tests for master/node exchanges over a loopback wire.
//!
//! Both drivers run in the same thread and are ticked alternately, the way
//! two cooperative device loops would interleave.

use std::thread;
use std::time::Duration;

use mni_protocol::{
    LoopbackPort, MasterAdapter, Role, RoleAdapter, Transport, ACK, OPCODE, QUERY, USER_1, USER_2,
    USER_3,
};
use mni_runner::{
    Capabilities, DriverError, Generation, MasterDriver, MemoryCapabilities, NodeDriver,
};

// ============================================================================
// Helpers
// ============================================================================

fn master_caps() -> MemoryCapabilities {
    MemoryCapabilities::new()
        .with_user("1001", "4321")
        .with_parameter("recharge.user1", 100)
        .with_parameter("recharge.user2", 0)
        .with_parameter("recharge.user3", 50)
}

fn node_caps() -> MemoryCapabilities {
    MemoryCapabilities::new()
        .with_parameter("volume.user1", 500)
        .with_parameter("volume.user2", 1200)
        .with_parameter("volume.user3", 75)
}

type Drivers = (
    MasterDriver<LoopbackPort, MemoryCapabilities>,
    NodeDriver<LoopbackPort, MemoryCapabilities>,
);

fn linked(generation: Generation, budget: u32) -> Drivers {
    let (m, n) = Transport::loopback_pair();
    (
        MasterDriver::new(m, master_caps(), budget),
        NodeDriver::new(generation, n, node_caps()),
    )
}

// ============================================================================
// Driver Exchanges
// ============================================================================

#[test]
fn test_typed_exchange_end_to_end() {
    let (mut master, mut node) = linked(Generation::Typed, 10);

    master.request("1001", "4321").expect("request should be sent");
    assert!(master.is_awaiting());

    let reply = node.tick().expect("node tick").expect("node should answer");
    assert_eq!(reply.recharges, Some([100, 0, 50]));
    assert_eq!(reply.volumes, [Some(500), Some(1200), Some(75)]);

    let report = master.tick().expect("master tick").expect("ACK should be complete");
    assert_eq!(report.volumes, [500, 1200, 75]);
    assert_eq!(report.polls, 0);
    assert!(!master.is_awaiting());

    // Both sides persisted what they received.
    assert_eq!(node.capabilities().fetch_parameter("recharge.user2"), Some(0));
    assert_eq!(master.capabilities().fetch_parameter("volume.user3"), Some(75));
}

#[test]
fn test_master_polls_until_node_answers() {
    let (mut master, mut node) = linked(Generation::Typed, 10);
    master.request("1001", "4321").unwrap();

    for _ in 0..3 {
        assert_eq!(master.tick().unwrap(), None);
    }
    node.tick().unwrap();
    let report = master.tick().unwrap().expect("ACK should be complete");
    assert_eq!(report.polls, 3);
}

#[test]
fn test_raw_generation_node() {
    let (mut master, mut node) = linked(Generation::Raw, 10);
    master.request("1001", "4321").unwrap();

    let reply = node.tick().unwrap().expect("raw node should answer QUERY");
    assert_eq!(reply.recharges, None);
    assert_eq!(node.link().generation(), Generation::Raw);

    let report = master.tick().unwrap().unwrap();
    assert_eq!(report.volumes, [500, 1200, 75]);
}

#[test]
fn test_repeated_exchanges() {
    let (mut master, mut node) = linked(Generation::Typed, 10);
    for _ in 0..5 {
        master.request("1001", "4321").unwrap();
        node.tick().unwrap();
        let report = master.tick().unwrap().unwrap();
        assert_eq!(report.volumes, [500, 1200, 75]);
    }
    assert_eq!(master.adapter().records_received(), 5);
}

// ============================================================================
// Failure Paths
// ============================================================================

#[test]
fn test_stall_exhausts_budget() {
    let (mut master, _node) = linked(Generation::Typed, 4);
    master.request("1001", "4321").unwrap();

    for _ in 0..3 {
        assert_eq!(master.tick().unwrap(), None);
    }
    match master.tick() {
        Err(DriverError::PeerUnresponsive { polls }) => assert_eq!(polls, 4),
        other => panic!("expected PeerUnresponsive, got {:?}", other),
    }
    assert!(!master.is_awaiting());
    // Idle again: further ticks do nothing.
    assert_eq!(master.tick().unwrap(), None);
}

#[test]
fn test_late_reply_is_discarded_before_next_request() {
    let (mut master, mut node) = linked(Generation::Typed, 1);
    master.request("1001", "4321").unwrap();
    assert!(master.tick().is_err());

    // The node answers too late; its ACK sits in the master's queue.
    node.tick().unwrap();
    master.request("1001", "4321").unwrap();
    assert_eq!(master.adapter().transport().port().queued(), 0);

    node.tick().unwrap();
    assert!(master.tick().unwrap().is_some());
}

#[test]
fn test_node_answers_newest_after_master_retries() {
    let (mut master, mut node) = linked(Generation::Typed, 2);

    // The node is busy elsewhere while the master times out and retries.
    for _ in 0..3 {
        master.request("1001", "4321").unwrap();
        assert_eq!(master.tick().unwrap(), None);
        assert!(matches!(
            master.tick(),
            Err(DriverError::PeerUnresponsive { polls: 2 })
        ));
    }
    master.request("1001", "4321").unwrap();

    let reply = node.tick().unwrap().expect("node should answer the newest QUERY");
    assert_eq!(reply.recharges, Some([100, 0, 50]));
    assert_eq!(node.link().endpoint(), "loopback:b");

    let report = master.tick().unwrap().expect("ACK should be complete");
    assert_eq!(report.volumes, [500, 1200, 75]);

    // The link stays aligned for the next exchange.
    master.request("1001", "4321").unwrap();
    assert!(node.tick().unwrap().is_some());
    assert!(master.tick().unwrap().is_some());
}

#[test]
fn test_node_keeps_only_tail_of_stray_bytes() {
    let (m, n) = Transport::loopback_pair();
    let noise = n.port().clone();
    let mut master = MasterDriver::new(m, master_caps(), 10);
    let mut node = NodeDriver::new(Generation::Raw, n, node_caps());

    // Line noise ahead of a real request.
    noise.inject(&[0xFF; 3]);
    master.request("1001", "4321").unwrap();
    assert_eq!(noise.queued(), 19);

    assert!(node.tick().unwrap().is_some());
    assert_eq!(noise.queued(), 0);
    assert!(master.tick().unwrap().is_some());
}

#[test]
fn test_access_denied() {
    let (mut master, node) = linked(Generation::Typed, 10);
    let err = master.request("1001", "0000").unwrap_err();
    assert!(matches!(err, DriverError::AccessDenied { ref user } if user == "1001"));
    assert!(!master.is_awaiting());
    assert_eq!(node.link().endpoint(), "loopback:b");
}

#[test]
fn test_request_while_awaiting_is_busy() {
    let (mut master, _node) = linked(Generation::Typed, 10);
    master.request("1001", "4321").unwrap();
    assert!(matches!(master.request("1001", "4321"), Err(DriverError::Busy)));
}

#[test]
fn test_node_rejects_wrong_opcode() {
    let (m, n) = Transport::loopback_pair();
    let mut node = NodeDriver::new(Generation::Typed, n, node_caps());
    let mut impostor: MasterAdapter<LoopbackPort> = RoleAdapter::new(Role::Master, m);

    impostor.encode(OPCODE, ACK);
    impostor.transmit().unwrap();

    match node.tick() {
        Err(DriverError::UnexpectedOpcode { expected, actual }) => {
            assert_eq!(expected, QUERY);
            assert_eq!(actual, ACK);
        }
        other => panic!("expected UnexpectedOpcode, got {:?}", other),
    }
    // No reply went out.
    assert!(!impostor.is_ready());
}

#[test]
fn test_raw_node_rejects_wrong_opcode_bytes() {
    let (m, n) = Transport::loopback_pair();
    let mut node = NodeDriver::new(Generation::Raw, n, node_caps());
    let mut wire = m;
    wire.send(&[0, 0, 0, 0x55]).unwrap();
    wire.send(&[0; 12]).unwrap();

    assert!(matches!(
        node.tick(),
        Err(DriverError::UnexpectedOpcode { actual: 0x55, .. })
    ));
}

// ============================================================================
// Buffer Reuse
// ============================================================================

#[test]
fn test_missing_parameter_resends_previous_value() {
    let (m, n) = Transport::loopback_pair();
    let mut master = MasterDriver::new(m, master_caps(), 10);
    // The node has no stored volume for user 2.
    let caps = MemoryCapabilities::new()
        .with_parameter("volume.user1", 1)
        .with_parameter("volume.user3", 3);
    let mut node = NodeDriver::new(Generation::Typed, n, caps);

    master.request("1001", "4321").unwrap();
    let reply = node.tick().unwrap().unwrap();
    assert_eq!(reply.volumes, [Some(1), None, Some(3)]);

    // Never encoded: still the zero the buffer started with.
    let report = master.tick().unwrap().unwrap();
    assert_eq!(report.volumes, [1, 0, 3]);
}

#[test]
fn test_master_record_layout_on_wire() {
    let (m, n) = Transport::loopback_pair();
    let mut master = MasterDriver::new(m, master_caps(), 10);
    master.request("1001", "4321").unwrap();

    let mut bytes = [0u8; 16];
    let mut wire = n;
    assert!(wire.is_ready(16));
    wire.receive(&mut bytes).unwrap();
    assert_eq!(
        bytes,
        [0, 0, 0, 0xAA, 0, 0, 0, 100, 0, 0, 0, 0, 0, 0, 0, 50]
    );
}

// ============================================================================
// Threads
// ============================================================================

#[test]
fn test_exchange_across_threads() {
    let (m, n) = Transport::loopback_pair();
    let node_thread = thread::spawn(move || {
        let mut node = NodeDriver::new(Generation::Typed, n, node_caps());
        for _ in 0..1000 {
            if let Some(reply) = node.tick().expect("node tick") {
                return Some(reply);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    });

    let mut master = MasterDriver::new(m, master_caps(), 5000);
    master.request("1001", "4321").unwrap();
    let report = loop {
        if let Some(report) = master.tick().expect("master tick") {
            break report;
        }
        thread::sleep(Duration::from_millis(1));
    };

    assert_eq!(report.volumes, [500, 1200, 75]);
    let reply = node_thread.join().expect("node thread should join");
    assert_eq!(reply.map(|r| r.recharges), Some(Some([100, 0, 50])));
}

#[test]
fn test_adapter_fields_through_driver() {
    let (mut master, mut node) = linked(Generation::Typed, 10);
    master.request("1001", "4321").unwrap();
    node.tick().unwrap();
    master.tick().unwrap();

    let adapter = master.adapter();
    assert_eq!(adapter.decode(OPCODE), ACK);
    assert_eq!(adapter.decode(USER_1), 500);
    assert_eq!(adapter.decode(USER_2), 1200);
    assert_eq!(adapter.decode(USER_3), 75);
}
