//! Duplex byte channel trait

use osdp_core::OsdpResult;

/// Byte-oriented duplex channel to one physical link
///
/// Implementations wrap a serial port or any other transport the embedding
/// application provides. Several devices may share one channel; the engine
/// enforces half-duplex discipline on top of it.
///
/// All methods must be non-blocking: `read` returns whatever is already
/// buffered (possibly nothing), `write` queues bytes for transmission.
pub trait Channel {
    /// Read already-received bytes into `buf`
    ///
    /// # Returns
    /// Number of bytes copied; 0 when nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> OsdpResult<usize>;

    /// Queue bytes for transmission
    ///
    /// # Returns
    /// Number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> OsdpResult<usize>;

    /// Number of received bytes pending, used for timeout math
    fn available(&self) -> usize;

    /// Discard any received bytes not yet read
    ///
    /// Used when abandoning a timed-out or desynchronized exchange so stale
    /// reply bytes cannot be mistaken for the next reply.
    fn flush(&mut self) -> OsdpResult<()>;
}
