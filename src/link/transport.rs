//! Boundary to the radio layer.

use std::io::Write;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::protocol::to_hex;

/// Bytes the link layer adds to every write (ATT opcode and handle).
pub const ATT_OVERHEAD: usize = 3;

/// Smallest payload ceiling ever used, even if the reported MTU is lower.
pub const MIN_PAYLOAD: usize = 20;

/// Default MTU before negotiation.
pub const DEFAULT_MTU: usize = 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Peripheral acknowledges the write at the link layer.
    WithResponse,
    /// Fire and forget; the completion only means the bytes left the host.
    WithoutResponse,
}

/// Called exactly once when a write finishes.
pub type Completion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// Write side of the radio connection.
///
/// `write` returns as soon as the bytes are handed off; the outcome arrives
/// through `done`, possibly on another thread, possibly before `write`
/// returns. Implementations must not call `done` if they return `Err`.
pub trait Transport: Send + Sync {
    /// Currently negotiated transmission unit. May change between calls.
    fn mtu(&self) -> usize;

    fn supports_write_without_response(&self) -> bool {
        false
    }

    fn write(&self, bytes: &[u8], mode: WriteMode, done: Completion) -> Result<(), TransportError>;
}

/// Largest frame that fits one write for a given MTU.
pub fn payload_ceiling(mtu: usize) -> usize {
    mtu.saturating_sub(ATT_OVERHEAD).max(MIN_PAYLOAD)
}

/// Transport that prints each frame as hex and completes immediately.
pub struct HexDumpTransport<W> {
    out: Mutex<W>,
    mtu: usize,
    without_response: bool,
}

impl<W: Write + Send> HexDumpTransport<W> {
    pub fn new(out: W, mtu: usize) -> Self {
        Self {
            out: Mutex::new(out),
            mtu,
            without_response: true,
        }
    }

    /// Report write-without-response as unsupported.
    pub fn with_response_only(mut self) -> Self {
        self.without_response = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> Transport for HexDumpTransport<W> {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn supports_write_without_response(&self) -> bool {
        self.without_response
    }

    fn write(&self, bytes: &[u8], mode: WriteMode, done: Completion) -> Result<(), TransportError> {
        let tag = match mode {
            WriteMode::WithResponse => "W ",
            WriteMode::WithoutResponse => "WN",
        };
        {
            let mut out = self.out.lock();
            writeln!(out, "{} {}", tag, to_hex(bytes))
                .map_err(|e| TransportError::WriteRejected(e.to_string()))?;
        }
        done(Ok(()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn ceiling_subtracts_overhead() {
        assert_eq!(payload_ceiling(23), 20);
        assert_eq!(payload_ceiling(0), 20);
        assert_eq!(payload_ceiling(185), 182);
        assert_eq!(payload_ceiling(247), 244);
    }

    #[test]
    fn hex_dump_writes_line_and_completes() {
        let t = HexDumpTransport::new(Vec::new(), 23);
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        t.write(
            &[0x01, 0x06, 0xAB],
            WriteMode::WithoutResponse,
            Box::new(move |r| flag.store(r.is_ok(), Ordering::SeqCst)),
        )
        .unwrap();
        assert!(completed.load(Ordering::SeqCst));
        let text = String::from_utf8(t.into_inner()).unwrap();
        assert_eq!(text, "WN 01 06 AB\n");
    }

    #[test]
    fn response_only_transport() {
        let t = HexDumpTransport::new(Vec::new(), 23).with_response_only();
        assert!(!t.supports_write_without_response());
    }
}
