use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use crossbeam_channel::{bounded, select, Receiver, Sender};

use super::{hop_size, Analyzer, AudioSource, LatestBands, Sensitivity, Worker};
use crate::dsp::SpectrumProcessor;
use crate::error::AudioError;

const JOIN_TIMEOUT: Duration = Duration::from_millis(300);
const START_TIMEOUT: Duration = Duration::from_secs(3);
/// Captured buffers waiting for analysis before the callback starts dropping.
const PCM_BACKLOG: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct MicSettings {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub target_hz: u32,
    pub f_min: f32,
    pub f_max: f32,
}

/// Microphone capture analyzed on its own thread.
pub struct MicSource {
    worker: Worker,
    sample_rate: u32,
    hop: usize,
}

impl MicSource {
    /// Open the default input device and start analyzing.
    ///
    /// Failing to open the device is reported here; the process keeps running.
    pub fn start(
        settings: MicSettings,
        sensitivity: Arc<Sensitivity>,
        latest: LatestBands,
    ) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = bounded::<Result<(u32, usize), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("mic-spectrum".into())
            .spawn(move || {
                let _done = done_tx;
                capture_loop(settings, sensitivity, latest, ready_tx, stop_rx);
            })?;

        let mut worker = Worker::new("mic-spectrum", stop_tx, done_rx, handle, JOIN_TIMEOUT);
        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok((sample_rate, hop))) => {
                log::info!(
                    "Microphone running: sr={} fft={} hop={}",
                    sample_rate,
                    settings.fft_size,
                    hop
                );
                Ok(Self {
                    worker,
                    sample_rate,
                    hop,
                })
            }
            Ok(Err(e)) => {
                worker.stop();
                Err(e)
            }
            Err(_) => {
                worker.stop();
                Err(AudioError::WorkerStart)
            }
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn hop(&self) -> usize {
        self.hop
    }
}

impl AudioSource for MicSource {
    fn name(&self) -> &'static str {
        "mic"
    }

    fn stop(&mut self) {
        self.worker.stop();
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

fn capture_loop(
    settings: MicSettings,
    sensitivity: Arc<Sensitivity>,
    latest: LatestBands,
    ready: Sender<Result<(u32, usize), AudioError>>,
    stop: Receiver<()>,
) {
    let (stream, pcm, sample_rate) = match open_capture(settings.sample_rate) {
        Ok(v) => v,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let hop = hop_size(sample_rate, settings.target_hz, settings.fft_size);
    let processor = match SpectrumProcessor::new(
        sample_rate,
        settings.fft_size,
        settings.f_min,
        settings.f_max.min(sample_rate as f32 / 2.0),
        sensitivity.floor_db(),
        sensitivity.range_db(),
    ) {
        Ok(p) => p,
        Err(e) => {
            let _ = ready.send(Err(AudioError::UnsupportedFormat(e.to_string())));
            return;
        }
    };
    let mut analyzer = Analyzer::new(processor, hop, sensitivity, latest);
    let _ = ready.send(Ok((sample_rate, hop)));

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(pcm) -> chunk => match chunk {
                Ok(samples) => {
                    if let Err(e) = analyzer.push(&samples) {
                        log::warn!("Microphone analysis failed: {}", e);
                        break;
                    }
                }
                Err(_) => {
                    log::warn!("Microphone stream closed");
                    break;
                }
            },
        }
    }

    drop(stream);
    log::info!("Microphone stopped");
}

/// Build and start an input stream, preferring mono 16-bit at `sample_rate`.
fn open_capture(sample_rate: u32) -> Result<(cpal::Stream, Receiver<Vec<f32>>, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceUnavailable("no input device".into()))?;

    let supported = pick_config(&device, sample_rate)?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let actual_rate = config.sample_rate.0;
    if actual_rate != sample_rate {
        log::warn!(
            "Input device does not support {} Hz, capturing at {} Hz",
            sample_rate,
            actual_rate
        );
    }

    let (tx, rx) = bounded::<Vec<f32>>(PCM_BACKLOG);
    let stream = match format {
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, tx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, tx)?,
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, tx)?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "input sample format {:?}",
                other
            )))
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, rx, actual_rate))
}

fn pick_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

    let mut candidates: Vec<_> = ranges
        .filter(|r| r.min_sample_rate().0 <= sample_rate && r.max_sample_rate().0 >= sample_rate)
        .collect();
    candidates.sort_by_key(|r| {
        (
            r.channels() != 1,
            r.sample_format() != cpal::SampleFormat::I16,
        )
    });

    match candidates.into_iter().next() {
        Some(range) => Ok(range.with_sample_rate(cpal::SampleRate(sample_rate))),
        None => device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string())),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks_exact(channels)
                    .map(|frame| {
                        let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                        (sum / channels as f32).clamp(-1.0, 1.0)
                    })
                    .collect();
                if tx.try_send(mono).is_err() {
                    log::trace!("Microphone backlog full, dropping buffer");
                }
            },
            |err| log::warn!("Input stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}
