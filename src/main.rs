mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::{Cli, Source};
use nichirin::audio::file::{format_mm_ss, FileEvent, FileHandle, FileSettings};
use nichirin::audio::mic::MicSettings;
use nichirin::audio::{clamp_sample_rate, LatestBands, Sensitivity};
use nichirin::config::{self, Config};
use nichirin::link::{Feed, HexDumpTransport, Link, LinkEvent, LinkSettings};
use nichirin::protocol::registers::LampConfig;
use nichirin::session::{Session, SessionState};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let source = cli.source();

    let mut cfg = Config::default();
    if let Some(path) = config::find_config(cli.config.clone()) {
        if let Some(loaded) = config::load_config(&path) {
            log::info!("Loaded config from {}", path.display());
            cfg = loaded;
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    // Merge: CLI values apply only when changed from their defaults
    if cli.sample_rate != 48_000 { cfg.audio.sample_rate = cli.sample_rate; }
    if cli.block_size != 512 { cfg.audio.block_size = cli.block_size; }
    if cli.mtu != 23 { cfg.link.mtu = cli.mtu; }
    if cli.address != 1 { cfg.link.address = cli.address; }
    if cli.no_playback { cfg.file.playback = false; }
    cfg.audio.sample_rate = clamp_sample_rate(cfg.audio.sample_rate);

    match (source, cli.params.as_deref()) {
        (Source::Mic, Some(p)) => cfg.audio = cfg.audio.apply_params(p)?,
        (Source::File, Some(p)) => cfg.file = cfg.file.apply_params(p)?,
        (Source::Saw, Some(_)) => log::warn!("--params has no effect with the saw source"),
        (_, None) => {}
    }
    let (floor_db, range_db) = match source {
        Source::File => (
            cli.floor_db.unwrap_or(cfg.file.floor_db),
            cli.range_db.unwrap_or(cfg.file.range_db),
        ),
        _ => (
            cli.floor_db.unwrap_or(cfg.audio.floor_db),
            cli.range_db.unwrap_or(cfg.audio.range_db),
        ),
    };
    config::validate(&cfg)?;

    log::info!("nichirin - audio spectrum lamp link");
    log::info!("Source: {:?}", source);
    log::info!(
        "Link: address {} mtu {} at {:.0} Hz",
        cfg.link.address,
        cfg.link.mtu,
        cfg.link.spectrum_hz
    );

    let transport = Arc::new(HexDumpTransport::new(std::io::stdout(), cfg.link.mtu));
    let link = Link::new(
        transport,
        LinkSettings {
            address: cfg.link.address,
            response_timeout: Duration::from_millis(cfg.link.response_timeout_ms),
        },
    );

    if cli.has_lamp_settings() {
        let defaults = LampConfig::default();
        let lamp = LampConfig {
            mode: cli.mode.unwrap_or(defaults.mode),
            hue: cli.hue.unwrap_or(defaults.hue),
            saturation: cli.saturation.unwrap_or(defaults.saturation),
            value: cli.value.unwrap_or(defaults.value),
            param: cli.param.unwrap_or(defaults.param),
        };
        link.write_config(&lamp, cli.per_register)
            .context("Failed to write lamp configuration")?;
    }
    if cli.read_config {
        link.request_config().context("Failed to request lamp configuration")?;
    }

    let latest = LatestBands::new();
    let mut session = Session::new(latest.clone());
    let fft_size = cfg.audio.fft_size();

    let file = match source {
        Source::Saw => None,
        Source::Mic => {
            let settings = MicSettings {
                sample_rate: cfg.audio.sample_rate,
                fft_size,
                target_hz: cfg.audio.target_hz,
                f_min: cfg.audio.f_min,
                f_max: cfg.audio.f_max,
            };
            session
                .start_mic(settings, Sensitivity::new(floor_db, range_db))
                .context("Failed to start microphone")?;
            None
        }
        Source::File => {
            let input = cli.input.as_ref().context("Input media file is required")?;
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
            log::info!("Input: {}", input.display());
            let settings = FileSettings {
                fft_size,
                target_hz: cfg.audio.target_hz,
                f_min: cfg.audio.f_min,
                f_max: cfg.audio.f_max,
                playback: cfg.file.playback,
            };
            let handle = session
                .start_file(input, settings, Sensitivity::new(floor_db, range_db))
                .with_context(|| format!("Failed to open {}", input.display()))?;
            if let Some(secs) = cli.seek {
                handle.seek(Duration::from_secs_f64(secs.max(0.0)));
            }
            Some(handle)
        }
    };

    let feed = match source {
        Source::Saw => Feed::saw(),
        _ => Feed::Latest(latest),
    };
    let sender = link
        .start_sender(feed, cfg.link.spectrum_hz)
        .context("Failed to start sender")?;
    session.set_sender(sender);

    let pb = file.as_ref().map(progress_bar).transpose()?;
    let deadline = cli
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));

    loop {
        for event in link.events().try_iter() {
            log_link_event(event);
        }
        if let (Some(handle), Some(pb)) = (&file, &pb) {
            for event in handle.events().try_iter() {
                show_file_event(pb, event);
            }
        }
        link.queue().poll();

        if source != Source::Saw && session.poll() == SessionState::Idle {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    session.disconnect(&link);
    for event in link.events().try_iter() {
        log_link_event(event);
    }
    Ok(())
}

fn progress_bar(handle: &FileHandle) -> Result<ProgressBar> {
    let len = handle.duration().map_or(0, |d| d.as_millis() as u64);
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn show_file_event(pb: &ProgressBar, event: FileEvent) {
    match event {
        FileEvent::Info {
            sample_rate,
            channels,
        } => log::info!("Decoding at {} Hz, {} channels", sample_rate, channels),
        FileEvent::Progress { position, duration } => {
            pb.set_position(position.as_millis() as u64);
            let total = duration.map_or_else(|| "--:--".to_string(), format_mm_ss);
            pb.set_message(format!("{} / {}", format_mm_ss(position), total));
        }
        FileEvent::Finished => log::info!("Playback finished"),
        FileEvent::Failed(reason) => log::warn!("Playback failed: {}", reason),
    }
}

fn log_link_event(event: LinkEvent) {
    match event {
        LinkEvent::Config(c) => log::info!(
            "Lamp config: mode={} hue={} sat={} value={} param={}",
            c.mode,
            c.hue,
            c.saturation,
            c.value,
            c.param
        ),
        LinkEvent::Registers(values) => log::info!("Registers: {:?}", values),
        LinkEvent::DeviceError(e) => log::warn!("Lamp error: {}", e),
        LinkEvent::Discarded(e) => log::debug!("Dropped reply: {}", e),
        LinkEvent::TransportFailed(e) => log::warn!("Transport: {}", e),
    }
}
