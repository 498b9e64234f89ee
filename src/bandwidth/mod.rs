//! Byte accounting for connection traffic.
//!
//! A [`BandwidthMeter`] sits at the very front of the chain: the server feeds it
//! the raw byte counts it reads from and writes to each socket, before any parsing
//! or after all serialization. One meter is usually shared by every connection.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of bytes received from and sent to clients.
///
/// # Examples
///
/// ```rust
/// use rttp_chain::bandwidth::BandwidthMeter;
///
/// let meter = BandwidthMeter::new();
/// meter.record_received(94);
/// meter.record_sent(79);
/// assert_eq!((meter.bytes_received(), meter.bytes_sent()), (94, 79));
///
/// meter.reset();
/// assert_eq!((meter.bytes_received(), meter.bytes_sent()), (0, 0));
/// ```
#[derive(Debug, Default)]
pub struct BandwidthMeter {
    sent: AtomicU64,
    received: AtomicU64,
}

impl BandwidthMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Zero both counters.
    ///
    /// The two stores are independent, so traffic recorded concurrently with a
    /// reset may land on either side of it.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
    }
}
