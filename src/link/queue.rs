//! Serialized, MTU-aware write queue.
//!
//! At most one write is handed to the transport at a time. A request that
//! expects a reply additionally blocks the next such request until the reply
//! arrives. Both waits are force-cleared after the response timeout so a lost
//! notification cannot stall the queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::transport::{payload_ceiling, Completion, Transport, WriteMode};
use super::LinkEvent;
use crate::dsp::BandIntensity;
use crate::error::TransportError;
use crate::protocol::frame::{encode_write_multiple, spectrum_frame, CRC_LEN, WRITE_MULTIPLE_HEADER};
use crate::protocol::registers::{BAND_BASE, BAND_COUNT};
use crate::protocol::WireFrame;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(400);

/// Frame bytes besides register values in a write-multiple request.
const CHUNK_OVERHEAD: usize = WRITE_MULTIPLE_HEADER + CRC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Reads and configuration writes; never dropped by a newer update.
    Control,
    /// Band updates; a newer update replaces any still pending.
    Stream,
}

struct Pending {
    frame: WireFrame,
    kind: FrameKind,
    mode: WriteMode,
}

struct InFlight {
    seq: u64,
    since: Instant,
    expects_response: bool,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Pending>,
    in_flight: Option<InFlight>,
    awaiting_response: Option<Instant>,
    seq: u64,
    offset: usize,
}

impl State {
    /// Force-clear waits older than `timeout`.
    fn expire(&mut self, timeout: Duration) -> Option<TransportError> {
        let ms = timeout.as_millis() as u64;
        let mut expired = None;
        if let Some(f) = &self.in_flight {
            if f.since.elapsed() >= timeout {
                log::warn!("Write #{} got no completion in {} ms, releasing slot", f.seq, ms);
                self.in_flight = None;
                expired = Some(TransportError::Timeout(ms));
            }
        }
        if let Some(since) = self.awaiting_response {
            if since.elapsed() >= timeout {
                log::warn!("No reply within {} ms, giving up on it", ms);
                self.awaiting_response = None;
                expired = Some(TransportError::Timeout(ms));
            }
        }
        expired
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    timeout: Duration,
    events: Sender<LinkEvent>,
}

/// Cloneable handle to the write queue of one connection.
#[derive(Clone)]
pub struct TxQueue {
    shared: Arc<Shared>,
}

impl TxQueue {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, events: Sender<LinkEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                state: Mutex::new(State::default()),
                timeout,
                events,
            }),
        }
    }

    /// Payload ceiling for the transport's current MTU.
    pub fn ceiling(&self) -> usize {
        payload_ceiling(self.shared.transport.mtu())
    }

    /// Queue a band update, replacing any band frames not yet sent.
    ///
    /// Returns the number of frames the update was split into.
    pub fn submit_spectrum(&self, address: u8, bands: &BandIntensity) -> usize {
        let ceiling = self.ceiling();
        let mode = if self.shared.transport.supports_write_without_response() {
            WriteMode::WithoutResponse
        } else {
            WriteMode::WithResponse
        };
        let count = {
            let mut st = self.shared.state.lock();
            let frames = plan_spectrum(address, bands.values(), ceiling, &mut st.offset);
            let count = frames.len();
            st.pending.retain(|p| p.kind != FrameKind::Stream);
            st.pending.extend(frames.into_iter().map(|frame| Pending {
                frame,
                kind: FrameKind::Stream,
                mode,
            }));
            count
        };
        drain(&self.shared);
        count
    }

    /// Queue a single control frame behind whatever is pending.
    pub fn submit(&self, frame: WireFrame) -> Result<(), TransportError> {
        let ceiling = self.ceiling();
        if frame.len() > ceiling {
            return Err(TransportError::MtuTooSmall {
                frame: frame.len(),
                ceiling,
            });
        }
        self.shared.state.lock().pending.push_back(Pending {
            frame,
            kind: FrameKind::Control,
            mode: WriteMode::WithResponse,
        });
        drain(&self.shared);
        Ok(())
    }

    /// A reply to the outstanding read arrived.
    pub fn response_received(&self) {
        self.shared.state.lock().awaiting_response = None;
        drain(&self.shared);
    }

    /// Apply the timeout fallback and send whatever became unblocked.
    pub fn poll(&self) {
        drain(&self.shared);
    }

    /// Drop everything, including the outstanding write and rotation state.
    pub fn clear(&self) {
        let mut st = self.shared.state.lock();
        st.pending.clear();
        st.in_flight = None;
        st.awaiting_response = None;
        st.offset = 0;
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn write_outstanding(&self) -> bool {
        self.shared.state.lock().in_flight.is_some()
    }

    pub fn awaiting_response(&self) -> bool {
        self.shared.state.lock().awaiting_response.is_some()
    }

    /// Band index the next chunked update starts at.
    pub fn chunk_offset(&self) -> usize {
        self.shared.state.lock().offset
    }
}

/// Frames for one band update: the whole frame if it fits, chunks otherwise.
fn plan_spectrum(
    address: u8,
    bands: &[u8; BAND_COUNT],
    ceiling: usize,
    offset: &mut usize,
) -> Vec<WireFrame> {
    let full = spectrum_frame(address, bands);
    if full.len() <= ceiling {
        *offset = 0;
        return vec![full];
    }
    chunk_spectrum(address, bands, ceiling, offset)
}

/// Split twelve bands into write-multiple frames of at most `ceiling` bytes.
///
/// Chunks cover every band register exactly once, beginning at `offset` and
/// wrapping at the last band; no chunk crosses the wrap. `offset` then
/// advances by one chunk so that a bandwidth-limited link rotates which bands
/// go out first.
pub fn chunk_spectrum(
    address: u8,
    bands: &[u8; BAND_COUNT],
    ceiling: usize,
    offset: &mut usize,
) -> Vec<WireFrame> {
    let per = (ceiling.saturating_sub(CHUNK_OVERHEAD) / 2).clamp(1, BAND_COUNT);
    let start = *offset % BAND_COUNT;

    let mut frames = Vec::with_capacity(BAND_COUNT.div_ceil(per) + 1);
    let mut pos = start;
    let mut remaining = BAND_COUNT;
    while remaining > 0 {
        let len = per.min(BAND_COUNT - pos).min(remaining);
        frames.push(encode_write_multiple(
            address,
            BAND_BASE + pos as u16,
            &bands[pos..pos + len],
            255,
        ));
        pos = (pos + len) % BAND_COUNT;
        remaining -= len;
    }

    *offset = (start + per) % BAND_COUNT;
    frames
}

fn report(shared: &Shared, err: TransportError) {
    let _ = shared.events.send(LinkEvent::TransportFailed(err));
}

fn drain(shared: &Arc<Shared>) {
    let (next, expired) = {
        let mut st = shared.state.lock();
        let expired = st.expire(shared.timeout);
        let blocked = st.in_flight.is_some()
            || st
                .pending
                .front()
                .map_or(true, |p| p.frame.expects_response() && st.awaiting_response.is_some());
        let next = if blocked {
            None
        } else {
            st.pending.pop_front().map(|p| {
                st.seq += 1;
                st.in_flight = Some(InFlight {
                    seq: st.seq,
                    since: Instant::now(),
                    expects_response: p.frame.expects_response(),
                });
                (st.seq, p)
            })
        };
        (next, expired)
    };

    if let Some(err) = expired {
        report(shared, err);
    }

    let Some((seq, p)) = next else {
        return;
    };

    log::trace!("tx #{} {:?} {} bytes", seq, p.kind, p.frame.len());
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let done: Completion = Box::new(move |result| {
        if let Some(shared) = weak.upgrade() {
            complete(&shared, seq, result);
        }
    });
    if let Err(e) = shared.transport.write(p.frame.as_bytes(), p.mode, done) {
        complete(shared, seq, Err(e));
    }
}

fn complete(shared: &Arc<Shared>, seq: u64, result: Result<(), TransportError>) {
    {
        let mut st = shared.state.lock();
        if st.in_flight.as_ref().map(|f| f.seq) != Some(seq) {
            log::debug!("Ignoring stale completion for write #{}", seq);
            return;
        }
        let expects_response = st.in_flight.take().is_some_and(|f| f.expects_response);
        match result {
            Ok(()) => {
                if expects_response {
                    st.awaiting_response = Some(Instant::now());
                }
            }
            Err(e) => {
                log::warn!("Write #{} failed, dropping {} queued frames: {}", seq, st.pending.len(), e);
                st.pending.clear();
                st.awaiting_response = None;
                drop(st);
                report(shared, e);
                return;
            }
        }
    }
    drain(shared);
}
