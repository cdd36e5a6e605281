//! Fixed-rate band sender.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::queue::TxQueue;
use crate::audio::LatestBands;
use crate::dsp::BandIntensity;
use crate::protocol::registers::BAND_COUNT;

/// Send rate for both the audio feed and the saw pattern. No slower
/// general cadence exists; every feed ticks at this rate.
pub const DEFAULT_SPECTRUM_HZ: f64 = 400.0;

/// Ramp across the bands that shifts every tick, for checking a lamp without audio.
#[derive(Debug, Default, Clone)]
pub struct SawPattern {
    phase: u8,
}

impl SawPattern {
    pub fn next(&mut self) -> BandIntensity {
        let phase = self.phase as usize;
        let bands = std::array::from_fn::<u8, BAND_COUNT, _>(|i| ((i * 20 + phase) & 0xFF) as u8);
        self.phase = self.phase.wrapping_add(10);
        BandIntensity(bands)
    }
}

/// Where each tick's bands come from.
pub enum Feed {
    Saw(SawPattern),
    Latest(LatestBands),
}

impl Feed {
    pub fn saw() -> Self {
        Feed::Saw(SawPattern::default())
    }

    fn next(&mut self) -> BandIntensity {
        match self {
            Feed::Saw(saw) => saw.next(),
            Feed::Latest(latest) => latest.load(),
        }
    }
}

/// Delay until the absolute deadline `next`; zero if already late.
pub fn next_delay(next: Instant, now: Instant) -> Duration {
    next.saturating_duration_since(now)
}

pub struct PeriodicSender {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<u64>>,
}

impl PeriodicSender {
    pub fn start(queue: TxQueue, address: u8, mut feed: Feed, rate_hz: f64) -> io::Result<Self> {
        let period = Duration::from_secs_f64(1.0 / rate_hz.max(1.0));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("band-sender".into())
            .spawn(move || {
                let mut ticks = 0u64;
                let mut next = Instant::now();
                loop {
                    let bands = feed.next();
                    queue.submit_spectrum(address, &bands);
                    ticks += 1;

                    next += period;
                    match stop_rx.recv_timeout(next_delay(next, Instant::now())) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                ticks
            })?;

        log::info!("Sender running at {:.0} Hz", rate_hz);
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop ticking; no frame is submitted after this returns.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        match handle.join() {
            Ok(ticks) => log::info!("Sender stopped after {} ticks", ticks),
            Err(_) => log::warn!("Sender thread panicked"),
        }
    }
}

impl Drop for PeriodicSender {
    fn drop(&mut self) {
        self.stop();
    }
}
