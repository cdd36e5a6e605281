//! Media file decoding paced to real time.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::playback::Playback;
use super::{downmix_into, hop_size, Analyzer, AudioSource, LatestBands, Sensitivity, Worker};
use crate::dsp::SpectrumProcessor;
use crate::error::AudioError;

const JOIN_TIMEOUT: Duration = Duration::from_millis(1500);
/// Longest single pacing sleep.
const MAX_PACING_SLEEP: Duration = Duration::from_millis(20);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct FileSettings {
    pub fft_size: usize,
    pub target_hz: u32,
    pub f_min: f32,
    pub f_max: f32,
    /// Also render the decoded audio to the default output device.
    pub playback: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    /// Stream format became known or changed.
    Info { sample_rate: u32, channels: usize },
    Progress {
        position: Duration,
        duration: Option<Duration>,
    },
    /// End of stream reached.
    Finished,
    /// Decoding stopped on an unrecoverable error.
    Failed(String),
}

impl From<AudioError> for FileEvent {
    fn from(err: AudioError) -> Self {
        FileEvent::Failed(err.to_string())
    }
}

/// Seek and progress access to a running file source.
#[derive(Clone)]
pub struct FileHandle {
    seek_tx: Sender<Duration>,
    events: Receiver<FileEvent>,
    duration: Option<Duration>,
}

impl FileHandle {
    /// Request a seek; applied by the decode thread before its next packet.
    pub fn seek(&self, position: Duration) {
        let _ = self.seek_tx.send(position);
    }

    pub fn events(&self) -> &Receiver<FileEvent> {
        &self.events
    }

    /// Total length, when the container declares it.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// Decodes a media file on its own thread and analyzes it at playback speed.
pub struct FileSource {
    worker: Worker,
    handle: FileHandle,
}

impl FileSource {
    /// Probe `path` and start decoding it.
    ///
    /// Unreadable files, unknown containers and unsupported codecs fail here.
    pub fn start(
        path: &Path,
        settings: FileSettings,
        sensitivity: Arc<Sensitivity>,
        latest: LatestBands,
    ) -> Result<Self, AudioError> {
        let media = open_media(path)?;
        let duration = media.duration;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let (seek_tx, seek_rx) = unbounded::<Duration>();
        let (event_tx, events) = unbounded::<FileEvent>();

        let handle = thread::Builder::new()
            .name("file-spectrum".into())
            .spawn(move || {
                let _done = done_tx;
                let mut decode = DecodeLoop {
                    playback: None,
                    media,
                    settings,
                    sensitivity,
                    latest,
                    stop: stop_rx,
                    seek: seek_rx,
                    events: event_tx,
                };
                decode.run();
            })?;

        Ok(Self {
            worker: Worker::new("file-spectrum", stop_tx, done_rx, handle, JOIN_TIMEOUT),
            handle: FileHandle {
                seek_tx,
                events,
                duration,
            },
        })
    }

    pub fn handle(&self) -> FileHandle {
        self.handle.clone()
    }
}

impl AudioSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn stop(&mut self) {
        self.worker.stop();
    }

    fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

/// Open decoder resources. Fields drop in declaration order: decoder, then
/// demuxer.
struct Media {
    decoder: Box<dyn Decoder>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    time_base: Option<TimeBase>,
    duration: Option<Duration>,
}

fn open_media(path: &Path) -> Result<Media, AudioError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
    let format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::UnsupportedFormat("no audio track".into()))?;

    let track_id = track.id;
    let params = &track.codec_params;
    let time_base = params.time_base;
    let duration = match (params.n_frames, time_base, params.sample_rate) {
        (Some(n), Some(tb), _) => Some(time_to_duration(tb.calc_time(n))),
        (Some(n), None, Some(sr)) => Some(Duration::from_secs_f64(n as f64 / sr as f64)),
        _ => None,
    };

    let decoder = symphonia::default::get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    log::info!(
        "Opened {}: {:?} Hz, {:?} ch, duration {:?}",
        path.display(),
        params.sample_rate,
        params.channels.map(|c| c.count()),
        duration
    );

    Ok(Media {
        decoder,
        format,
        track_id,
        time_base,
        duration,
    })
}

/// `mm:ss`, minutes not wrapped at the hour.
pub fn format_mm_ss(d: Duration) -> String {
    let s = d.as_secs();
    format!("{:02}:{:02}", s / 60, s % 60)
}

fn time_to_duration(t: Time) -> Duration {
    Duration::from_secs(t.seconds) + Duration::from_secs_f64(t.frac)
}

/// Wall-clock pacing: decoded output may run at most a sleep slice ahead
/// of real time.
///
/// When decoding falls behind, no sleep happens and the backlog is kept;
/// samples are never dropped to catch up.
struct Pacer {
    origin: Instant,
    frames: u64,
}

impl Pacer {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            frames: 0,
        }
    }

    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frames = 0;
    }

    fn advance(&mut self, frames: u64) {
        self.frames += frames;
    }

    /// Next sleep slice, or `None` once wall clock has caught up.
    fn wait(&self, sample_rate: u32) -> Option<Duration> {
        let expected = Duration::from_secs_f64(self.frames as f64 / sample_rate.max(1) as f64);
        expected
            .checked_sub(self.origin.elapsed())
            .filter(|d| !d.is_zero())
            .map(|d| d.min(MAX_PACING_SLEEP))
    }
}

/// Decode thread state. The output device is opened on this thread, since
/// `cpal::Stream` cannot cross threads, and is declared before `media` so it
/// is released first.
struct DecodeLoop {
    playback: Option<Playback>,
    media: Media,
    settings: FileSettings,
    sensitivity: Arc<Sensitivity>,
    latest: LatestBands,
    stop: Receiver<()>,
    seek: Receiver<Duration>,
    events: Sender<FileEvent>,
}

enum Step {
    Continue,
    Stop,
}

impl DecodeLoop {
    fn run(&mut self) {
        let mut analyzer: Option<Analyzer> = None;
        let mut stream_rate = 0u32;
        let mut pacer = Pacer::new();
        let mut last_progress: Option<Instant> = None;
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut mono = Vec::new();

        loop {
            match self.stop.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            if let Some(target) = self.seek.try_iter().last() {
                self.seek_to(target);
                if let Some(a) = analyzer.as_mut() {
                    a.reset();
                }
                if let Some(p) = self.playback.as_mut() {
                    p.flush();
                }
                pacer.reset();
            }

            let packet = match self.media.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    log::info!("End of stream");
                    let _ = self.events.send(FileEvent::Finished);
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.media.decoder.reset();
                    continue;
                }
                Err(e) => {
                    self.fail(AudioError::Decode(format!("demux: {}", e)));
                    break;
                }
            };

            if packet.track_id() != self.media.track_id {
                continue;
            }

            let decoded = match self.media.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => {
                    self.fail(AudioError::Decode(e.to_string()));
                    break;
                }
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            let frames = decoded.frames() as u64;
            let capacity = decoded.capacity();

            if sample_buf
                .as_ref()
                .map_or(true, |b| b.capacity() < capacity * channels)
            {
                sample_buf = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            if analyzer.is_none() || spec.rate != stream_rate {
                stream_rate = spec.rate;
                match self.build_analyzer(stream_rate) {
                    Ok(a) => analyzer = Some(a),
                    Err(e) => {
                        self.fail(e);
                        break;
                    }
                }
                self.open_playback(stream_rate, channels);
                let _ = self.events.send(FileEvent::Info {
                    sample_rate: stream_rate,
                    channels,
                });
            }

            let samples = buf.samples();

            if let Some(p) = self.playback.as_mut() {
                p.write(samples);
            }

            mono.clear();
            downmix_into(samples, channels, &mut mono);
            if let Some(a) = analyzer.as_mut() {
                if let Err(e) = a.push(&mono) {
                    self.fail(AudioError::Decode(format!("analysis: {}", e)));
                    break;
                }
            }

            if last_progress.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
                last_progress = Some(Instant::now());
                let position = self.position(packet.ts(), stream_rate);
                let _ = self.events.send(FileEvent::Progress {
                    position,
                    duration: self.media.duration,
                });
            }

            pacer.advance(frames);
            if let Step::Stop = self.pace(&pacer, stream_rate) {
                break;
            }
        }

        self.release();
    }

    /// Sleep in slices until output is back in step with the clock.
    fn pace(&self, pacer: &Pacer, sample_rate: u32) -> Step {
        while let Some(wait) = pacer.wait(sample_rate) {
            match self.stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return Step::Stop,
            }
        }
        Step::Continue
    }

    fn build_analyzer(&self, sample_rate: u32) -> Result<Analyzer, AudioError> {
        let processor = SpectrumProcessor::new(
            sample_rate,
            self.settings.fft_size,
            self.settings.f_min,
            self.settings.f_max.min(sample_rate as f32 / 2.0),
            self.sensitivity.floor_db(),
            self.sensitivity.range_db(),
        )
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        let hop = hop_size(sample_rate, self.settings.target_hz, self.settings.fft_size);
        log::info!(
            "File analysis: sr={} fft={} hop={}",
            sample_rate,
            self.settings.fft_size,
            hop
        );
        Ok(Analyzer::new(
            processor,
            hop,
            Arc::clone(&self.sensitivity),
            self.latest.clone(),
        ))
    }

    fn open_playback(&mut self, sample_rate: u32, channels: usize) {
        if !self.settings.playback {
            return;
        }
        self.playback = None;
        match Playback::open(sample_rate, channels as u16) {
            Ok(p) => self.playback = Some(p),
            Err(e) => log::warn!("Playback unavailable, analyzing only: {}", e),
        }
    }

    fn seek_to(&mut self, target: Duration) {
        let time = Time::new(target.as_secs(), target.subsec_nanos() as f64 / 1e9);
        let seek = self.media.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.media.track_id),
            },
        );
        match seek {
            Ok(seeked) => log::debug!("Seeked to ts {}", seeked.actual_ts),
            Err(e) => log::warn!("Seek to {:?} failed: {}", target, e),
        }
        self.media.decoder.reset();
    }

    fn position(&self, ts: u64, sample_rate: u32) -> Duration {
        match self.media.time_base {
            Some(tb) => time_to_duration(tb.calc_time(ts)),
            None => Duration::from_secs_f64(ts as f64 / sample_rate.max(1) as f64),
        }
    }

    fn fail(&self, err: AudioError) {
        log::warn!("File decoding stopped: {}", err);
        let _ = self.events.send(err.into());
    }

    fn release(&mut self) {
        // Output device first; decoder and demuxer go when `media` drops.
        self.playback = None;
        log::info!("File source released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_never_sleeps_negative() {
        let mut pacer = Pacer::new();
        pacer.advance(48);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pacer.wait(48_000), None);
    }

    #[test]
    fn pacer_caps_sleep() {
        let mut pacer = Pacer::new();
        pacer.advance(48_000);
        let wait = pacer.wait(48_000).unwrap();
        assert_eq!(wait, MAX_PACING_SLEEP);
    }

    #[test]
    fn pacer_reset() {
        let mut pacer = Pacer::new();
        pacer.advance(96_000);
        pacer.reset();
        assert_eq!(pacer.frames, 0);
        assert_eq!(pacer.wait(48_000), None);
    }

    #[test]
    fn media_can_move_to_decode_thread() {
        fn assert_send<T: Send>() {}
        assert_send::<Media>();
    }

    #[test]
    fn failure_event_carries_error_text() {
        let event = FileEvent::from(AudioError::Decode("demux: bad header".into()));
        assert_eq!(event, FileEvent::Failed("decode failed: demux: bad header".into()));
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_mm_ss(Duration::ZERO), "00:00");
        assert_eq!(format_mm_ss(Duration::from_millis(61_999)), "01:01");
        assert_eq!(format_mm_ss(Duration::from_secs(3_725)), "62:05");
    }

    #[test]
    fn missing_file_fails_at_start() {
        let result = FileSource::start(
            Path::new("/nonexistent/audio.wav"),
            FileSettings {
                fft_size: 512,
                target_hz: 400,
                f_min: 60.0,
                f_max: 8_000.0,
                playback: false,
            },
            Sensitivity::new(10.0, 90.0),
            LatestBands::new(),
        );
        assert!(matches!(result, Err(AudioError::Io(_))));
    }
}
