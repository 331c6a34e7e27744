//! In-memory loopback channel
//!
//! Connects two `Channel` endpoints through shared byte queues. Used by the
//! test suite to wire the engine to a simulated peripheral device without a
//! physical link.

use bytes::{Buf, BytesMut};
use osdp_core::OsdpResult;
use std::sync::{Arc, Mutex};

use crate::channel::Channel;

type SharedBuf = Arc<Mutex<BytesMut>>;

/// One endpoint of an in-memory duplex link
///
/// `MemoryChannel::pair()` returns two endpoints; bytes written to one are
/// readable on the other.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    rx: SharedBuf,
    tx: SharedBuf,
}

impl MemoryChannel {
    /// Create a connected pair of endpoints
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let a = Arc::new(Mutex::new(BytesMut::new()));
        let b = Arc::new(Mutex::new(BytesMut::new()));
        (
            MemoryChannel {
                rx: a.clone(),
                tx: b.clone(),
            },
            MemoryChannel { rx: b, tx: a },
        )
    }
}

impl Channel for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> OsdpResult<usize> {
        let mut rx = self.rx.lock().expect("memory channel lock poisoned");
        let n = rx.len().min(buf.len());
        rx.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> OsdpResult<usize> {
        let mut tx = self.tx.lock().expect("memory channel lock poisoned");
        tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn available(&self) -> usize {
        self.rx.lock().expect("memory channel lock poisoned").len()
    }

    fn flush(&mut self) -> OsdpResult<()> {
        self.rx
            .lock()
            .expect("memory channel lock poisoned")
            .clear();
        Ok(())
    }
}
