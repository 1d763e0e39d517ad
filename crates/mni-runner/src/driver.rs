//! Cooperative driving loop for both ends of the link.
//!
//! The protocol core never waits and never times out. The drivers here add
//! that policy on top of it: the master issues a request and then polls once
//! per [`MasterDriver::tick`], giving up after a [`PollBudget`]; the node
//! polls once per [`NodeDriver::tick`] and answers every complete request.
//!
//! A tick never blocks beyond moving one record's bytes, so ticks can be
//! interleaved with other device duties.

use mni_metrics::metric_defs::{
    EXCHANGE_POLLS, LINK_DISCARDED_BYTES, LINK_NOT_READY_POLLS, LINK_OPCODE_MISMATCHES,
    LINK_RX_BYTES, LINK_RX_RECORDS, LINK_STALLS, LINK_TX_BYTES, LINK_TX_RECORDS,
};
use mni_metrics::{LinkLabels, Metric};
use mni_protocol::{
    decode_field, MasterAdapter, NodeAdapter, NodeRecord, Port, RawNodeAdapter, Role,
    RoleAdapter, Transport, WireRecord, OPCODE, USER_FIELDS,
};
use tracing::{debug, info, trace, warn};

use crate::capability::{parameter_key, Capabilities, RECHARGE_PREFIX, VOLUME_PREFIX};
use crate::config::Generation;
use crate::{DriverError, DriverResult};

// ============================================================================
// Poll Budget
// ============================================================================

/// Upper bound on unsuccessful readiness probes for one exchange.
///
/// The probe that uses up the last unit of the budget is the last one: with
/// a limit of `n`, the `n`th unsuccessful probe ends the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    limit: u32,
    used: u32,
}

impl PollBudget {
    /// Create a budget of `limit` unsuccessful probes.
    pub fn new(limit: u32) -> Self {
        PollBudget { limit, used: 0 }
    }

    /// Record one unsuccessful probe. Returns false when that probe spent
    /// the last of the budget.
    pub fn spend(&mut self) -> bool {
        self.used = self.used.saturating_add(1);
        self.used < self.limit
    }

    /// Probes recorded since the last reset.
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Maximum number of unsuccessful probes.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Whether the budget is spent.
    pub fn exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Start a new exchange.
    pub fn reset(&mut self) {
        self.used = 0;
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone)]
struct LinkMetrics {
    labels: Vec<(&'static str, String)>,
}

impl LinkMetrics {
    fn new(role: Role, endpoint: &str) -> Self {
        LinkMetrics {
            labels: LinkLabels::new(role.as_str(), endpoint).to_labels(),
        }
    }

    fn count(&self, metric: &Metric, n: u64) {
        metrics::counter!(metric.name, &self.labels).increment(n);
    }

    fn record(&self, metric: &Metric, value: f64) {
        metrics::histogram!(metric.name, &self.labels).record(value);
    }

    fn sent(&self, bytes: usize) {
        self.count(&LINK_TX_RECORDS, 1);
        self.count(&LINK_TX_BYTES, bytes as u64);
    }

    fn received(&self, bytes: usize) {
        self.count(&LINK_RX_RECORDS, 1);
        self.count(&LINK_RX_BYTES, bytes as u64);
    }
}

// ============================================================================
// Master Driver
// ============================================================================

/// Result of one completed master exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Accumulated volumes reported by the node, user 1 to 3.
    pub volumes: [u32; 3],
    /// Unsuccessful readiness probes before the response was complete.
    pub polls: u32,
}

/// Master end of the link: issues QUERY requests and collects ACKs.
pub struct MasterDriver<P, C> {
    adapter: MasterAdapter<P>,
    caps: C,
    budget: PollBudget,
    awaiting: bool,
    metrics: LinkMetrics,
}

impl<P: Port, C: Capabilities> MasterDriver<P, C> {
    /// Create a master driver over `transport`.
    pub fn new(transport: Transport<P>, caps: C, poll_budget: u32) -> Self {
        let metrics = LinkMetrics::new(Role::Master, transport.endpoint());
        MasterDriver {
            adapter: RoleAdapter::new(Role::Master, transport),
            caps,
            budget: PollBudget::new(poll_budget),
            awaiting: false,
            metrics,
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &MasterAdapter<P> {
        &self.adapter
    }

    /// Mutable access to the underlying adapter.
    pub fn adapter_mut(&mut self) -> &mut MasterAdapter<P> {
        &mut self.adapter
    }

    /// The injected capabilities.
    pub fn capabilities(&self) -> &C {
        &self.caps
    }

    /// Whether a request is outstanding.
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    /// Send a QUERY on behalf of `user`.
    ///
    /// Recharge amounts come from the `recharge.userN` parameters. A missing
    /// parameter leaves its field as it was, so the previous value is resent.
    /// Bytes left in the input queue by an earlier, abandoned exchange are
    /// discarded first.
    pub fn request(&mut self, user: &str, pin: &str) -> DriverResult<()> {
        if self.awaiting {
            return Err(DriverError::Busy);
        }
        if !self.caps.validate_credentials(user, pin) {
            warn!("Master: rejected credentials for user {}", user);
            return Err(DriverError::AccessDenied {
                user: user.to_string(),
            });
        }

        let stray = self.adapter.transport_mut().drain()?;
        if stray > 0 {
            self.metrics.count(&LINK_DISCARDED_BYTES, stray as u64);
            warn!("Master: discarded {} stray bytes before request", stray);
        }

        self.adapter.encode_opcode();
        for (i, field) in USER_FIELDS.iter().enumerate() {
            let key = parameter_key(RECHARGE_PREFIX, i + 1);
            match self.caps.fetch_parameter(&key) {
                Some(amount) => self.adapter.encode(*field, amount),
                None => debug!("Master: no {} stored, resending previous value", key),
            }
        }
        self.adapter.transmit()?;
        self.metrics.sent(self.adapter.tx_size());

        self.budget.reset();
        self.awaiting = true;
        debug!("Master: QUERY sent for user {}", user);
        Ok(())
    }

    /// Advance the outstanding exchange by one readiness probe.
    ///
    /// Returns `Ok(Some(report))` when the ACK is complete, `Ok(None)` while
    /// still waiting (or when idle), and [`DriverError::PeerUnresponsive`]
    /// once the poll budget runs out.
    pub fn tick(&mut self) -> DriverResult<Option<ExchangeReport>> {
        if !self.awaiting {
            return Ok(None);
        }

        if !self.adapter.is_ready() {
            self.metrics.count(&LINK_NOT_READY_POLLS, 1);
            if !self.budget.spend() {
                self.awaiting = false;
                self.metrics.count(&LINK_STALLS, 1);
                let polls = self.budget.used();
                warn!("Master: node unresponsive after {} polls", polls);
                return Err(DriverError::PeerUnresponsive { polls });
            }
            return Ok(None);
        }

        self.adapter.receive()?;
        self.awaiting = false;
        self.metrics.received(self.adapter.rx_size());

        let opcode = self.adapter.decode(OPCODE);
        if !self.adapter.received_expected_opcode() {
            self.metrics.count(&LINK_OPCODE_MISMATCHES, 1);
            return Err(DriverError::UnexpectedOpcode {
                expected: Role::Master.rx_opcode(),
                actual: opcode,
            });
        }

        let mut volumes = [0u32; 3];
        for (i, field) in USER_FIELDS.iter().enumerate() {
            volumes[i] = self.adapter.decode(*field);
            self.caps
                .persist_parameter(&parameter_key(VOLUME_PREFIX, i + 1), volumes[i]);
        }

        let polls = self.budget.used();
        self.metrics.record(&EXCHANGE_POLLS, f64::from(polls));
        info!("Master: ACK received, volumes {:?} after {} polls", volumes, polls);
        Ok(Some(ExchangeReport { volumes, polls }))
    }
}

// ============================================================================
// Node Driver
// ============================================================================

/// Node adapter for either record generation.
pub enum NodeLink<P> {
    /// Requests are decoded field by field.
    Typed(NodeAdapter<P>),
    /// Requests are recognized by their opcode byte group only.
    Raw(RawNodeAdapter<P>),
}

impl<P: Port> NodeLink<P> {
    /// Create a node adapter of the given generation over `transport`.
    pub fn new(generation: Generation, transport: Transport<P>) -> Self {
        match generation {
            Generation::Typed => NodeLink::Typed(RoleAdapter::new(Role::Node, transport)),
            Generation::Raw => NodeLink::Raw(RoleAdapter::new(Role::Node, transport)),
        }
    }

    /// Which generation this link uses.
    pub fn generation(&self) -> Generation {
        match self {
            NodeLink::Typed(_) => Generation::Typed,
            NodeLink::Raw(_) => Generation::Raw,
        }
    }

    /// Endpoint of the underlying transport.
    pub fn endpoint(&self) -> &str {
        match self {
            NodeLink::Typed(a) => a.transport().endpoint(),
            NodeLink::Raw(a) => a.transport().endpoint(),
        }
    }

    /// Drops queued requests older than the newest one.
    fn keep_newest(&mut self) -> DriverResult<usize> {
        let dropped = match self {
            NodeLink::Typed(a) => {
                let size = a.rx_size();
                a.transport_mut().keep_newest(size)?
            }
            NodeLink::Raw(a) => {
                let size = a.rx_size();
                a.transport_mut().keep_newest(size)?
            }
        };
        Ok(dropped)
    }

    fn is_ready(&mut self) -> bool {
        match self {
            NodeLink::Typed(a) => a.is_ready(),
            NodeLink::Raw(a) => a.is_ready(),
        }
    }

    fn receive(&mut self) -> DriverResult<usize> {
        match self {
            NodeLink::Typed(a) => {
                a.receive()?;
                Ok(a.rx_size())
            }
            NodeLink::Raw(a) => {
                a.receive()?;
                Ok(a.rx_size())
            }
        }
    }

    /// Checks the opcode of the received record.
    fn check_request(&self) -> DriverResult<()> {
        let ok = match self {
            NodeLink::Typed(a) => a.received_expected_opcode(),
            NodeLink::Raw(a) => a.received_expected_opcode_bytes(),
        };
        if ok {
            return Ok(());
        }
        let actual = match self {
            NodeLink::Typed(a) => a.decode(OPCODE),
            NodeLink::Raw(a) => decode_field(a.rx_record().as_bytes(), OPCODE),
        };
        Err(DriverError::UnexpectedOpcode {
            expected: Role::Node.rx_opcode(),
            actual,
        })
    }

    /// Recharge amounts carried by the request. The raw generation carries
    /// none the node can read.
    fn recharges(&self) -> Option<[u32; 3]> {
        match self {
            NodeLink::Typed(a) => Some([
                a.decode(USER_FIELDS[0]),
                a.decode(USER_FIELDS[1]),
                a.decode(USER_FIELDS[2]),
            ]),
            NodeLink::Raw(_) => None,
        }
    }

    fn encode_reply(&mut self, volumes: [Option<u32>; 3]) -> DriverResult<usize> {
        match self {
            NodeLink::Typed(a) => {
                fill_reply(a, volumes);
                a.transmit()?;
                Ok(a.tx_size())
            }
            NodeLink::Raw(a) => {
                fill_reply(a, volumes);
                a.transmit()?;
                Ok(a.tx_size())
            }
        }
    }
}

fn fill_reply<P: Port, Rx: WireRecord>(
    adapter: &mut RoleAdapter<P, NodeRecord, Rx>,
    volumes: [Option<u32>; 3],
) {
    adapter.encode_opcode();
    for (field, volume) in USER_FIELDS.iter().zip(volumes) {
        if let Some(volume) = volume {
            adapter.encode(*field, volume);
        }
    }
}

/// What the node did with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReply {
    /// Recharge amounts from the request, when the generation carries them.
    pub recharges: Option<[u32; 3]>,
    /// Volumes sent back. `None` marks a field resent with its previous value.
    pub volumes: [Option<u32>; 3],
}

/// Node end of the link: answers every QUERY with an ACK.
pub struct NodeDriver<P, C> {
    link: NodeLink<P>,
    caps: C,
    metrics: LinkMetrics,
}

impl<P: Port, C: Capabilities> NodeDriver<P, C> {
    /// Create a node driver of the given generation over `transport`.
    pub fn new(generation: Generation, transport: Transport<P>, caps: C) -> Self {
        let metrics = LinkMetrics::new(Role::Node, transport.endpoint());
        NodeDriver {
            link: NodeLink::new(generation, transport),
            caps,
            metrics,
        }
    }

    /// The underlying adapter.
    pub fn link(&self) -> &NodeLink<P> {
        &self.link
    }

    /// The injected capabilities.
    pub fn capabilities(&self) -> &C {
        &self.caps
    }

    /// Probe once for a request and answer it if one is complete.
    ///
    /// Returns `Ok(None)` when no complete request is buffered. If more than
    /// one request has piled up (the master retried while this node was not
    /// ticking), only the newest is answered. A request with the wrong opcode
    /// is consumed and reported as [`DriverError::UnexpectedOpcode`] without
    /// a reply.
    pub fn tick(&mut self) -> DriverResult<Option<NodeReply>> {
        let dropped = self.link.keep_newest()?;
        if dropped > 0 {
            self.metrics.count(&LINK_DISCARDED_BYTES, dropped as u64);
            warn!("Node: dropped {} bytes of stale requests", dropped);
        }
        if !self.link.is_ready() {
            return Ok(None);
        }
        let bytes = self.link.receive()?;
        self.metrics.received(bytes);

        if let Err(e) = self.link.check_request() {
            self.metrics.count(&LINK_OPCODE_MISMATCHES, 1);
            warn!("Node: {}", e);
            return Err(e);
        }

        let recharges = self.link.recharges();
        if let Some(amounts) = recharges {
            for (i, amount) in amounts.iter().enumerate() {
                self.caps
                    .persist_parameter(&parameter_key(RECHARGE_PREFIX, i + 1), *amount);
            }
            trace!("Node: recharge amounts {:?}", amounts);
        }

        let volumes: [Option<u32>; 3] = std::array::from_fn(|i| {
            self.caps
                .fetch_parameter(&parameter_key(VOLUME_PREFIX, i + 1))
        });
        let sent = self.link.encode_reply(volumes)?;
        self.metrics.sent(sent);
        debug!("Node: ACK sent with volumes {:?}", volumes);

        Ok(Some(NodeReply { recharges, volumes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_of_one_fails_on_first_probe() {
        let mut budget = PollBudget::new(1);
        assert!(!budget.spend());
        assert!(budget.exhausted());
    }

    #[test]
    fn test_poll_budget() {
        let mut budget = PollBudget::new(3);
        assert!(budget.spend());
        assert!(budget.spend());
        assert!(!budget.exhausted());
        assert!(!budget.spend());
        assert!(budget.exhausted());
        assert_eq!(budget.used(), 3);

        budget.reset();
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.limit(), 3);
    }
}
