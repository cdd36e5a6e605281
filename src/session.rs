//! Which audio source is live, and the teardown rules between them.

use std::path::Path;
use std::sync::Arc;

use crate::audio::file::{FileHandle, FileSettings, FileSource};
use crate::audio::mic::{MicSettings, MicSource};
use crate::audio::{AudioSource, LatestBands, Sensitivity};
use crate::error::AudioError;
use crate::link::{Link, PeriodicSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    MicActive,
    FileActive,
}

/// Owns at most one audio source and the band sender.
///
/// Entering an active state always tears the current source down first.
pub struct Session {
    state: SessionState,
    source: Option<Box<dyn AudioSource>>,
    sender: Option<PeriodicSender>,
    latest: LatestBands,
}

impl Session {
    pub fn new(latest: LatestBands) -> Self {
        Self {
            state: SessionState::Idle,
            source: None,
            sender: None,
            latest,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn latest(&self) -> &LatestBands {
        &self.latest
    }

    /// Stop the current source, then start a new one with `start`.
    ///
    /// On failure the session is left idle.
    pub fn activate<F>(&mut self, state: SessionState, start: F) -> Result<(), AudioError>
    where
        F: FnOnce() -> Result<Box<dyn AudioSource>, AudioError>,
    {
        self.stop();
        if state == SessionState::Idle {
            return Ok(());
        }
        let source = start()?;
        log::info!("{} source active", source.name());
        self.source = Some(source);
        self.state = state;
        Ok(())
    }

    pub fn start_mic(&mut self, settings: MicSettings, sensitivity: Arc<Sensitivity>) -> Result<(), AudioError> {
        let latest = self.latest.clone();
        self.activate(SessionState::MicActive, move || {
            MicSource::start(settings, sensitivity, latest).map(|s| Box::new(s) as Box<dyn AudioSource>)
        })
    }

    /// Start a file source. The returned handle keeps its seek and event
    /// channels usable while the session owns the source.
    pub fn start_file(
        &mut self,
        path: &Path,
        settings: FileSettings,
        sensitivity: Arc<Sensitivity>,
    ) -> Result<FileHandle, AudioError> {
        let latest = self.latest.clone();
        let mut handle = None;
        self.activate(SessionState::FileActive, || {
            let source = FileSource::start(path, settings, sensitivity, latest)?;
            handle = Some(source.handle());
            Ok(Box::new(source) as Box<dyn AudioSource>)
        })?;
        handle.ok_or(AudioError::WorkerStart)
    }

    /// Tear down the active source and zero the shared bands.
    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
            log::info!("{} source stopped", source.name());
        }
        self.latest.reset();
        self.state = SessionState::Idle;
    }

    /// Fall back to idle if the source ended on its own.
    pub fn poll(&mut self) -> SessionState {
        if self.source.as_ref().is_some_and(|s| !s.is_running()) {
            self.stop();
        }
        self.state
    }

    /// Install the band sender, stopping any previous one.
    pub fn set_sender(&mut self, sender: PeriodicSender) {
        self.stop_sender();
        self.sender = Some(sender);
    }

    pub fn stop_sender(&mut self) {
        if let Some(mut sender) = self.sender.take() {
            sender.stop();
        }
    }

    pub fn sending(&self) -> bool {
        self.sender.is_some()
    }

    /// Connection lost: stop sending, stop audio, drop queued writes.
    pub fn disconnect(&mut self, link: &Link) {
        self.stop_sender();
        self.stop();
        link.reset();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_sender();
        self.stop();
    }
}
