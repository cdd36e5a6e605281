//! Audio sources feeding the spectrum processor.
//!
//! Every source pushes mono samples into an [`Analyzer`], which keeps a ring of
//! the last `fft_size` samples and runs the processor once per hop. The newest
//! result is published to a shared [`LatestBands`] cell.

pub mod file;
pub mod mic;
pub mod playback;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::dsp::{BandIntensity, SpectrumProcessor};
use crate::error::DspError;

/// Hop sizes never go below this many samples.
pub const MIN_HOP: usize = 80;

/// Default analysis refresh rate in Hz.
pub const DEFAULT_TARGET_HZ: u32 = 400;

/// Single-slot cell holding the most recent band levels.
#[derive(Clone)]
pub struct LatestBands {
    cell: Arc<ArcSwap<BandIntensity>>,
}

impl LatestBands {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(BandIntensity::SILENT)),
        }
    }

    pub fn publish(&self, bands: BandIntensity) {
        self.cell.store(Arc::new(bands));
    }

    pub fn load(&self) -> BandIntensity {
        **self.cell.load()
    }

    pub fn reset(&self) {
        self.publish(BandIntensity::SILENT);
    }
}

impl Default for LatestBands {
    fn default() -> Self {
        Self::new()
    }
}

/// Floor/range settings shared with a running source.
///
/// Changes are picked up by the next analysis window.
#[derive(Debug)]
pub struct Sensitivity {
    floor_db: AtomicU32,
    range_db: AtomicU32,
}

impl Sensitivity {
    pub fn new(floor_db: f32, range_db: f32) -> Arc<Self> {
        Arc::new(Self {
            floor_db: AtomicU32::new(floor_db.to_bits()),
            range_db: AtomicU32::new(range_db.max(1.0).to_bits()),
        })
    }

    pub fn floor_db(&self) -> f32 {
        f32::from_bits(self.floor_db.load(Ordering::Relaxed))
    }

    pub fn range_db(&self) -> f32 {
        f32::from_bits(self.range_db.load(Ordering::Relaxed))
    }

    pub fn set_floor_db(&self, db: f32) {
        self.floor_db.store(db.to_bits(), Ordering::Relaxed);
    }

    pub fn set_range_db(&self, db: f32) {
        self.range_db.store(db.max(1.0).to_bits(), Ordering::Relaxed);
    }
}

/// Samples per hop for a refresh rate of roughly `target_hz`.
pub fn hop_size(sample_rate: u32, target_hz: u32, fft_size: usize) -> usize {
    let hop = (sample_rate / target_hz.max(1)) as usize;
    hop.max(MIN_HOP).min(fft_size / 2).max(1)
}

/// Round a requested block size up to a power of two in `128..=8192`.
pub fn normalize_block_size(n: i64) -> usize {
    if n <= 0 {
        return 512;
    }
    (n as usize).next_power_of_two().clamp(128, 8192)
}

/// Clamp a requested capture rate to what the analyzer accepts.
pub fn clamp_sample_rate(sample_rate: u32) -> u32 {
    sample_rate.clamp(8_000, 192_000)
}

/// Sliding analysis window over a mono sample stream.
pub struct Analyzer {
    processor: SpectrumProcessor,
    sensitivity: Arc<Sensitivity>,
    latest: LatestBands,
    ring: Vec<f32>,
    frame: Vec<f32>,
    pos: usize,
    filled: usize,
    since_hop: usize,
    hop: usize,
}

impl Analyzer {
    pub fn new(
        processor: SpectrumProcessor,
        hop: usize,
        sensitivity: Arc<Sensitivity>,
        latest: LatestBands,
    ) -> Self {
        let n = processor.fft_size();
        Self {
            processor,
            sensitivity,
            latest,
            ring: vec![0.0; n],
            frame: vec![0.0; n],
            pos: 0,
            filled: 0,
            since_hop: 0,
            hop: hop.max(1),
        }
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn fft_size(&self) -> usize {
        self.ring.len()
    }

    /// Feed samples; returns how many windows were analyzed.
    pub fn push(&mut self, samples: &[f32]) -> Result<usize, DspError> {
        let n = self.ring.len();
        let mut windows = 0;
        for &s in samples {
            self.ring[self.pos] = s.clamp(-1.0, 1.0);
            self.pos = (self.pos + 1) % n;
            self.filled = (self.filled + 1).min(n);
            self.since_hop += 1;

            if self.filled >= n && self.since_hop >= self.hop {
                self.since_hop = 0;
                self.analyze()?;
                windows += 1;
            }
        }
        Ok(windows)
    }

    /// Forget buffered samples, e.g. after a seek.
    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
        self.filled = 0;
        self.since_hop = 0;
    }

    fn analyze(&mut self) -> Result<(), DspError> {
        // Oldest sample sits at the write cursor.
        let (newer, older) = self.ring.split_at(self.pos);
        self.frame[..older.len()].copy_from_slice(older);
        self.frame[older.len()..].copy_from_slice(newer);

        self.processor.set_floor_db(self.sensitivity.floor_db());
        self.processor.set_range_db(self.sensitivity.range_db());
        let bands = self.processor.process(&self.frame)?;
        self.latest.publish(bands);
        Ok(())
    }
}

/// Convert a signed 16-bit sample to `[-1, 1]`.
#[inline]
pub fn i16_to_f32(s: i16) -> f32 {
    (s as f32 / 32768.0).clamp(-1.0, 1.0)
}

/// Average interleaved frames down to mono, appending to `out`.
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    let channels = channels.max(1);
    if channels == 1 {
        out.extend(interleaved.iter().map(|s| s.clamp(-1.0, 1.0)));
        return;
    }
    for frame in interleaved.chunks_exact(channels) {
        let mono = frame.iter().sum::<f32>() / channels as f32;
        out.push(mono.clamp(-1.0, 1.0));
    }
}

/// Handle to a source's background thread.
///
/// The thread owns a clone of `done` and drops it on exit, so a disconnected
/// `done` channel means the thread is gone.
pub(crate) struct Worker {
    name: &'static str,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl Worker {
    pub(crate) fn new(
        name: &'static str,
        stop_tx: Sender<()>,
        done_rx: Receiver<()>,
        handle: JoinHandle<()>,
        join_timeout: Duration,
    ) -> Self {
        Self {
            name,
            stop_tx,
            done_rx,
            handle: Some(handle),
            join_timeout,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some() && matches!(self.done_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Signal the thread and wait up to the join timeout for it to exit.
    pub(crate) fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        match self.done_rx.recv_timeout(self.join_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} did not stop within {} ms, detaching",
                    self.name,
                    self.join_timeout.as_millis()
                );
            }
            _ => {
                if handle.join().is_err() {
                    log::warn!("{} panicked", self.name);
                }
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Running audio source that can be torn down.
pub trait AudioSource: Send {
    fn name(&self) -> &'static str;

    /// Halt the worker and release its devices before returning.
    fn stop(&mut self);

    /// False once the worker has exited on its own (end of stream, fatal error).
    fn is_running(&self) -> bool;
}
