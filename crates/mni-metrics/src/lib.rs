//! Metrics for the master-node link.
//!
//! Every metric the runner emits is declared here as a const [`Metric`] so
//! names are spelled once. The crate re-exports [`metrics`] for convenience.
//!
//! # Example
//!
//! ```rust,ignore
//! use mni_metrics::{describe_metrics, metric_defs, LinkLabels};
//!
//! describe_metrics();
//!
//! let labels = LinkLabels::new("master", "/dev/ttyUSB0");
//! metrics::counter!(metric_defs::LINK_TX_BYTES.name, &labels.to_labels()).increment(16);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count of events or bytes.
    Counter,
    /// Distribution of observed values.
    Histogram,
}

/// A metric declaration: name plus the metadata handed to the recorder.
///
/// ```rust
/// use mni_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const POLLS: Metric = Metric::counter("mni.link.polls", "Readiness probes issued")
///     .in_unit(Unit::Count);
///
/// assert_eq!(POLLS.kind, MetricKind::Counter);
/// assert_eq!(POLLS.labels, &["role", "endpoint"]);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted metric name, e.g. `mni.link.tx_bytes`.
    pub name: &'static str,
    /// Counter or histogram.
    pub kind: MetricKind,
    /// Human-readable description handed to the recorder.
    pub description: &'static str,
    /// Unit of measurement; described as [`Unit::Count`] when unset.
    pub unit: Option<Unit>,
    /// Label keys every emission carries.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// A counter labelled with [`metric_defs::LINK_LABELS`].
    pub const fn counter(name: &'static str, description: &'static str) -> Self {
        Metric {
            name,
            kind: MetricKind::Counter,
            description,
            unit: None,
            labels: metric_defs::LINK_LABELS,
        }
    }

    /// A histogram labelled with [`metric_defs::LINK_LABELS`].
    pub const fn histogram(name: &'static str, description: &'static str) -> Self {
        Metric {
            kind: MetricKind::Histogram,
            ..Self::counter(name, description)
        }
    }

    /// Sets the unit of measurement.
    pub const fn in_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Hand the description to the installed recorder, if any.
    pub fn describe(&self) {
        let unit = self.unit.unwrap_or(Unit::Count);
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, unit, self.description),
        }
    }
}

/// All metric definitions for the link.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every link metric.
    pub const LINK_LABELS: &[&str] = &["role", "endpoint"];

    pub const LINK_TX_BYTES: Metric =
        Metric::counter("mni.link.tx_bytes", "Bytes written to the serial link").in_unit(Unit::Bytes);

    pub const LINK_RX_BYTES: Metric =
        Metric::counter("mni.link.rx_bytes", "Bytes read from the serial link").in_unit(Unit::Bytes);

    pub const LINK_TX_RECORDS: Metric =
        Metric::counter("mni.link.tx_records", "Records transmitted");

    pub const LINK_RX_RECORDS: Metric =
        Metric::counter("mni.link.rx_records", "Records received");

    /// Readiness probes that came back false.
    pub const LINK_NOT_READY_POLLS: Metric = Metric::counter(
        "mni.link.not_ready_polls",
        "Readiness probes that found no complete record",
    );

    /// Exchanges abandoned because the poll budget ran out.
    pub const LINK_STALLS: Metric = Metric::counter(
        "mni.link.stalls",
        "Exchanges abandoned after the poll budget was exhausted",
    );

    /// Stale bytes dropped so the readiness probe can see a whole record.
    pub const LINK_DISCARDED_BYTES: Metric = Metric::counter(
        "mni.link.discarded_bytes",
        "Stale bytes dropped from the input queue",
    )
    .in_unit(Unit::Bytes);

    pub const LINK_OPCODE_MISMATCHES: Metric = Metric::counter(
        "mni.link.opcode_mismatches",
        "Records received with an unexpected opcode",
    );

    /// Unsuccessful probes before a master exchange completed.
    pub const EXCHANGE_POLLS: Metric = Metric::histogram(
        "mni.exchange.polls",
        "Readiness probes issued before the response was complete",
    );

    /// All metrics, for [`describe_metrics`](super::describe_metrics).
    pub const ALL: &[&Metric] = &[
        &LINK_TX_BYTES,
        &LINK_RX_BYTES,
        &LINK_TX_RECORDS,
        &LINK_RX_RECORDS,
        &LINK_NOT_READY_POLLS,
        &LINK_STALLS,
        &LINK_OPCODE_MISMATCHES,
        &LINK_DISCARDED_BYTES,
        &EXCHANGE_POLLS,
    ];
}

/// Labels identifying one end of the link.
#[derive(Debug, Clone)]
pub struct LinkLabels {
    /// `master` or `node`.
    pub role: String,
    /// Serial endpoint name.
    pub endpoint: String,
}

impl LinkLabels {
    /// Creates labels for the given role and endpoint.
    pub fn new(role: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Label pairs in the form `metrics::counter!` accepts.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("role", self.role.clone()),
            ("endpoint", self.endpoint.clone()),
        ]
    }
}

/// Registers descriptions for every link metric. Call once at startup, after
/// the recorder is installed.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
