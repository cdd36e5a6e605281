#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nichirin::error::TransportError;
use nichirin::link::{Completion, Transport, WriteMode};
use nichirin::protocol::crc::append_crc;
use parking_lot::Mutex;

/// Records writes; completes them immediately or holds them until told to.
pub struct MockTransport {
    mtu: AtomicUsize,
    without_response: bool,
    auto_complete: bool,
    writes: Mutex<Vec<(Vec<u8>, WriteMode)>>,
    held: Mutex<VecDeque<Completion>>,
}

impl MockTransport {
    fn build(mtu: usize, auto_complete: bool, without_response: bool) -> Arc<Self> {
        Arc::new(Self {
            mtu: AtomicUsize::new(mtu),
            without_response,
            auto_complete,
            writes: Mutex::new(Vec::new()),
            held: Mutex::new(VecDeque::new()),
        })
    }

    /// Completions wait for [`MockTransport::complete_next`].
    pub fn holding(mtu: usize) -> Arc<Self> {
        Self::build(mtu, false, false)
    }

    pub fn auto(mtu: usize) -> Arc<Self> {
        Self::build(mtu, true, false)
    }

    pub fn auto_without_response(mtu: usize) -> Arc<Self> {
        Self::build(mtu, true, true)
    }

    pub fn set_mtu(&self, mtu: usize) {
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().iter().map(|(b, _)| b.clone()).collect()
    }

    pub fn modes(&self) -> Vec<WriteMode> {
        self.writes.lock().iter().map(|(_, m)| *m).collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// Finish the oldest held write. Returns false if none was held.
    pub fn complete_next(&self, result: Result<(), TransportError>) -> bool {
        let done = self.held.lock().pop_front();
        match done {
            Some(done) => {
                done(result);
                true
            }
            None => false,
        }
    }
}

impl Transport for MockTransport {
    fn mtu(&self) -> usize {
        self.mtu.load(Ordering::SeqCst)
    }

    fn supports_write_without_response(&self) -> bool {
        self.without_response
    }

    fn write(&self, bytes: &[u8], mode: WriteMode, done: Completion) -> Result<(), TransportError> {
        self.writes.lock().push((bytes.to_vec(), mode));
        if self.auto_complete {
            done(Ok(()));
        } else {
            self.held.lock().push_back(done);
        }
        Ok(())
    }
}

/// Read-holding-registers reply carrying `values`.
pub fn read_reply(address: u8, values: &[u16]) -> Vec<u8> {
    let mut frame = vec![address, 0x03, (values.len() * 2) as u8];
    for v in values {
        frame.extend_from_slice(&v.to_be_bytes());
    }
    append_crc(&mut frame);
    frame
}

/// Register values of a write-multiple request, with its start register.
pub fn write_multiple_values(frame: &[u8]) -> (u16, Vec<u16>) {
    assert_eq!(frame[1], 0x10, "not a write-multiple frame");
    let start = u16::from_be_bytes([frame[2], frame[3]]);
    let count = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    assert_eq!(frame[6] as usize, count * 2);
    let values = (0..count)
        .map(|i| u16::from_be_bytes([frame[7 + 2 * i], frame[8 + 2 * i]]))
        .collect();
    (start, values)
}
