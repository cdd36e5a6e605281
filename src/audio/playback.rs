//! Real-time rendering of decoded audio to the default output device.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{HeapProducer, HeapRb};

use crate::error::AudioError;

/// Output ring capacity in seconds of audio.
const BUFFER_SECONDS: f32 = 1.0;

pub struct Playback {
    _stream: cpal::Stream,
    producer: HeapProducer<f32>,
    flush: Arc<AtomicBool>,
    underruns: Arc<AtomicU32>,
    dropped: usize,
}

impl Playback {
    /// Open the default output device with the stream's own rate and channel count.
    ///
    /// `cpal::Stream` is not `Send` on every platform, so this must run on the
    /// thread that will feed it.
    pub fn open(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no output device".into()))?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let capacity = (sample_rate as f32 * channels as f32 * BUFFER_SECONDS) as usize;
        let ring = HeapRb::<f32>::new(capacity.max(1024));
        let (producer, mut consumer) = ring.split();

        let flush = Arc::new(AtomicBool::new(false));
        let underruns = Arc::new(AtomicU32::new(0));
        let flush_cb = Arc::clone(&flush);
        let underruns_cb = Arc::clone(&underruns);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if flush_cb.swap(false, Ordering::AcqRel) {
                        while consumer.pop().is_some() {}
                    }
                    let n = consumer.pop_slice(data);
                    if n < data.len() {
                        data[n..].iter_mut().for_each(|s| *s = 0.0);
                        underruns_cb.fetch_add(1, Ordering::Relaxed);
                    }
                },
                |err| log::warn!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        log::info!("Playback opened: {} Hz, {} ch", sample_rate, channels);

        Ok(Self {
            _stream: stream,
            producer,
            flush,
            underruns,
            dropped: 0,
        })
    }

    /// Queue interleaved samples; whatever does not fit is dropped.
    pub fn write(&mut self, interleaved: &[f32]) {
        let pushed = self.producer.push_slice(interleaved);
        if pushed < interleaved.len() {
            self.dropped += interleaved.len() - pushed;
        }
    }

    /// Discard everything queued but not yet played.
    pub fn flush(&mut self) {
        self.flush.store(true, Ordering::Release);
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        log::debug!(
            "Playback closed ({} underruns, {} samples dropped)",
            self.underruns.load(Ordering::Relaxed),
            self.dropped
        );
    }
}
