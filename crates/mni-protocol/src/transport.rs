//! Raw-byte transport over one serial endpoint.
//!
//! [`Transport`] moves bytes verbatim and answers "has exactly the expected
//! amount of data arrived yet?" without blocking. It adds no framing, does no
//! parsing and never retries.
//!
//! The hardware side is abstracted behind [`Port`] so the same transport runs
//! over a real serial device ([`SerialDevice`], feature `serial`) or an
//! in-memory [`LoopbackPort`] pair.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::constants::DEFAULT_BAUD_RATE;
use crate::{MniError, MniResult};

// ============================================================================
// Port Abstraction
// ============================================================================

/// One physical (or simulated) serial endpoint.
pub trait Port {
    /// Number of bytes currently buffered for reading.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Write one byte to the wire.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Read one byte, or `None` if nothing is buffered.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        (**self).read_byte()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Byte-exact send/receive plus a readiness probe over one [`Port`].
#[derive(Debug)]
pub struct Transport<P> {
    port: P,
    endpoint: String,
    baud_rate: u32,
}

impl<P: Port> Transport<P> {
    /// Bind a transport to an already opened port.
    pub fn new(port: P, endpoint: impl Into<String>, baud_rate: u32) -> MniResult<Self> {
        if baud_rate == 0 {
            return Err(MniError::InvalidBaudRate(baud_rate));
        }
        Ok(Transport {
            port,
            endpoint: endpoint.into(),
            baud_rate,
        })
    }

    /// Endpoint name this transport is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Baud rate the endpoint was configured with.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Access the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable access to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// True iff exactly `expected` bytes are buffered.
    ///
    /// This is an equality test. Surplus bytes from a misaligned peer keep the
    /// probe false until they are drained. An I/O failure on the port reads as
    /// "not ready".
    pub fn is_ready(&mut self, expected: usize) -> bool {
        match self.port.bytes_available() {
            Ok(available) => available == expected,
            Err(e) => {
                log::warn!("{}: readiness probe failed: {}", self.endpoint, e);
                false
            }
        }
    }

    /// Write `data` verbatim and in order. No framing is added.
    pub fn send(&mut self, data: &[u8]) -> MniResult<()> {
        for &byte in data {
            self.port.write_byte(byte)?;
        }
        Ok(())
    }

    /// Read `buffer.len()` bytes from the input queue into `buffer`.
    ///
    /// Callers must confirm readiness for the same size first. If fewer bytes
    /// are buffered, the remaining positions of `buffer` are left untouched.
    /// Returns the number of bytes actually read.
    pub fn receive(&mut self, buffer: &mut [u8]) -> MniResult<usize> {
        let mut read = 0;
        for slot in buffer.iter_mut() {
            match self.port.read_byte()? {
                Some(byte) => {
                    *slot = byte;
                    read += 1;
                }
                None => break,
            }
        }
        if read < buffer.len() {
            log::trace!(
                "{}: short receive, {} of {} bytes",
                self.endpoint,
                read,
                buffer.len()
            );
        }
        Ok(read)
    }

    /// Drop the oldest buffered bytes until at most `keep` remain.
    ///
    /// A peer that sent several records while nobody was reading leaves the
    /// newest one at the tail of the queue; this discards everything before
    /// it. Returns how many bytes were dropped.
    pub fn keep_newest(&mut self, keep: usize) -> MniResult<usize> {
        let surplus = self.port.bytes_available()?.saturating_sub(keep);
        let mut dropped = 0;
        while dropped < surplus && self.port.read_byte()?.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("{}: dropped {} stale bytes", self.endpoint, dropped);
        }
        Ok(dropped)
    }

    /// Discard every byte currently buffered. Returns how many were dropped.
    pub fn drain(&mut self) -> MniResult<usize> {
        let mut dropped = 0;
        while self.port.read_byte()?.is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("{}: drained {} stray bytes", self.endpoint, dropped);
        }
        Ok(dropped)
    }
}

// ============================================================================
// Loopback Port
// ============================================================================

type ByteQueue = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory, cross-connected serial pair.
///
/// Bytes written on one end become readable on the other in write order.
/// Both ends may live on different threads.
#[derive(Debug, Clone)]
pub struct LoopbackPort {
    rx: ByteQueue,
    tx: ByteQueue,
}

impl LoopbackPort {
    /// Create two connected ends.
    pub fn pair() -> (LoopbackPort, LoopbackPort) {
        let a_to_b: ByteQueue = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a: ByteQueue = Arc::new(Mutex::new(VecDeque::new()));
        (
            LoopbackPort {
                rx: b_to_a.clone(),
                tx: a_to_b.clone(),
            },
            LoopbackPort {
                rx: a_to_b,
                tx: b_to_a,
            },
        )
    }

    /// Push bytes directly into this end's input queue, as if they had
    /// arrived from the wire.
    pub fn inject(&self, data: &[u8]) {
        self.rx.lock().extend(data.iter().copied());
    }

    /// Number of bytes waiting to be read on this end.
    pub fn queued(&self) -> usize {
        self.rx.lock().len()
    }

    /// Number of bytes written by this end and not yet read by the peer.
    pub fn in_flight(&self) -> usize {
        self.tx.lock().len()
    }
}

impl Port for LoopbackPort {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.queued())
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.tx.lock().push_back(byte);
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.rx.lock().pop_front())
    }
}

impl Transport<LoopbackPort> {
    /// Create two transports joined by an in-memory wire.
    pub fn loopback_pair() -> (Transport<LoopbackPort>, Transport<LoopbackPort>) {
        let (a, b) = LoopbackPort::pair();
        (
            Transport {
                port: a,
                endpoint: "loopback:a".to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            Transport {
                port: b,
                endpoint: "loopback:b".to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
        )
    }
}

// ============================================================================
// Serial Device
// ============================================================================

#[cfg(feature = "serial")]
pub use serial::SerialDevice;

#[cfg(feature = "serial")]
mod serial {
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use serialport::{DataBits, FlowControl, Parity, StopBits};

    use super::Port;
    use crate::{MniError, MniResult};

    /// Read timeout for a single byte. Reads only happen after the readiness
    /// probe has confirmed the bytes are buffered.
    const READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// An OS serial device configured 8N1 without flow control.
    pub struct SerialDevice {
        inner: Box<dyn serialport::SerialPort>,
    }

    impl std::fmt::Debug for SerialDevice {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialDevice")
                .field("name", &self.inner.name())
                .finish()
        }
    }

    impl SerialDevice {
        /// Open and configure `endpoint` at `baud_rate`, 8N1.
        pub fn open(endpoint: &str, baud_rate: u32) -> MniResult<Self> {
            if baud_rate == 0 {
                return Err(MniError::InvalidBaudRate(baud_rate));
            }
            let inner = serialport::new(endpoint, baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(READ_TIMEOUT)
                .open()
                .map_err(|e| MniError::open(endpoint, e.to_string()))?;
            Ok(SerialDevice { inner })
        }
    }

    impl Port for SerialDevice {
        fn bytes_available(&mut self) -> io::Result<usize> {
            self.inner
                .bytes_to_read()
                .map(|n| n as usize)
                .map_err(io::Error::from)
        }

        fn write_byte(&mut self, byte: u8) -> io::Result<()> {
            self.inner.write_all(&[byte])
        }

        fn read_byte(&mut self) -> io::Result<Option<u8>> {
            let mut byte = [0u8; 1];
            match self.inner.read(&mut byte) {
                Ok(1) => Ok(Some(byte[0])),
                Ok(_) => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
                Err(e) => Err(e),
            }
        }
    }
}
