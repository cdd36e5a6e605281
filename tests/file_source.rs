use std::path::Path;
use std::time::{Duration, Instant};

use nichirin::audio::file::{FileEvent, FileSettings, FileSource};
use nichirin::audio::{AudioSource, LatestBands, Sensitivity};
use nichirin::error::AudioError;
use nichirin::session::{Session, SessionState};

fn write_tone(path: &Path, sample_rate: u32, channels: u16, secs: f32, freq: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * secs) as usize;
    for t in 0..frames {
        let s = 0.5 * (2.0 * std::f32::consts::PI * freq * t as f32 / sample_rate as f32).sin();
        for _ in 0..channels {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn settings() -> FileSettings {
    FileSettings {
        fft_size: 512,
        target_hz: 400,
        f_min: 60.0,
        f_max: 8_000.0,
        playback: false,
    }
}

/// Collect events until `Finished` or `Failed`, or the timeout passes.
fn events_until_end(source: &FileSource, timeout: Duration) -> Vec<FileEvent> {
    let handle = source.handle();
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match handle.events().recv_timeout(left) {
            Ok(ev) => {
                let end = matches!(ev, FileEvent::Finished | FileEvent::Failed(_));
                out.push(ev);
                if end {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    out
}

#[test]
fn wav_is_analyzed_in_real_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 16_000, 2, 0.6, 1_000.0);

    let latest = LatestBands::new();
    let started = Instant::now();
    let mut source =
        FileSource::start(&path, settings(), Sensitivity::new(10.0, 90.0), latest.clone()).unwrap();
    let duration = source.handle().duration().unwrap().as_secs_f64();
    assert!((duration - 0.6).abs() < 0.002, "duration {}", duration);

    let handle = source.handle();
    let mut loudest = 0;
    let mut events = Vec::new();
    while Instant::now() - started < Duration::from_secs(3) {
        loudest = loudest.max(latest.load().max());
        events.extend(handle.events().try_iter());
        if events.contains(&FileEvent::Finished) {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    let elapsed = started.elapsed();

    assert!(loudest > 0, "no band ever lit");
    assert_eq!(
        events.first(),
        Some(&FileEvent::Info {
            sample_rate: 16_000,
            channels: 2
        })
    );
    assert!(events.contains(&FileEvent::Finished));
    assert!(events
        .iter()
        .any(|e| matches!(e, FileEvent::Progress { duration: Some(_), .. })));
    assert!(elapsed >= Duration::from_millis(450), "finished too fast: {:?}", elapsed);

    source.stop();
    assert!(!source.is_running());
}

#[test]
fn progress_is_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    write_tone(&path, 8_000, 1, 0.5, 440.0);

    let source =
        FileSource::start(&path, settings(), Sensitivity::new(10.0, 90.0), LatestBands::new()).unwrap();
    let events = events_until_end(&source, Duration::from_secs(3));
    let progress = events
        .iter()
        .filter(|e| matches!(e, FileEvent::Progress { .. }))
        .count();
    // Half a second of audio allows at most one report per 100 ms plus the first.
    assert!((1..=7).contains(&progress), "{} progress events", progress);
}

#[test]
fn seek_skips_ahead() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.wav");
    write_tone(&path, 8_000, 1, 2.0, 440.0);

    let started = Instant::now();
    let source =
        FileSource::start(&path, settings(), Sensitivity::new(10.0, 90.0), LatestBands::new()).unwrap();
    source.handle().seek(Duration::from_millis(1_600));
    let events = events_until_end(&source, Duration::from_secs(4));

    assert!(events.contains(&FileEvent::Finished));
    assert!(started.elapsed() < Duration::from_millis(1_400));
    assert!(events.iter().any(|e| matches!(
        e,
        FileEvent::Progress { position, .. } if *position >= Duration::from_millis(1_500)
    )));
}

#[test]
fn stop_interrupts_playback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("long.wav");
    write_tone(&path, 8_000, 1, 5.0, 440.0);

    let mut source =
        FileSource::start(&path, settings(), Sensitivity::new(10.0, 90.0), LatestBands::new()).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(source.is_running());

    let started = Instant::now();
    source.stop();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!source.is_running());
    assert!(!source.handle().events().try_iter().any(|e| e == FileEvent::Finished));
}

#[test]
fn garbage_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.bin");
    std::fs::write(&path, [0x5Au8; 4096]).unwrap();

    let result = FileSource::start(&path, settings(), Sensitivity::new(10.0, 90.0), LatestBands::new());
    assert!(matches!(result, Err(AudioError::UnsupportedFormat(_))));
}

#[test]
fn session_runs_file_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.wav");
    write_tone(&path, 8_000, 1, 0.3, 440.0);

    let latest = LatestBands::new();
    let mut session = Session::new(latest.clone());
    let handle = session
        .start_file(&path, settings(), Sensitivity::new(10.0, 90.0))
        .unwrap();
    assert_eq!(session.state(), SessionState::FileActive);

    let deadline = Instant::now() + Duration::from_secs(3);
    while session.poll() == SessionState::FileActive && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(latest.load().max(), 0);
    assert!(handle.events().try_iter().any(|e| e == FileEvent::Finished));
}
