// src/engine.rs
use log::{info, warn};
use ndarray::Array2;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SessionConfig, TrialConfig};
use crate::drivers::{
    impedances_from_window, AcquisitionBridge, BridgeStats, LiveQueue, PersistenceQueue, Result,
    SampleSource, StreamError, TriggerController,
};
use crate::recorder::{DataRecorder, PersistenceWriter};
use crate::trial::{Actuator, TrialController};
use crate::types::{StreamMode, TrialResult};

const IMPEDANCE_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_IMPEDANCE_SECONDS: f64 = 60.0;

/// One acquisition session over a single source. Everything the source
/// callback needs is captured in its handler, so several sessions can run
/// side by side.
pub struct Streamer {
    config: SessionConfig,
    trial: TrialConfig,
    source: Box<dyn SampleSource>,
    trigger: TriggerController,
    live: LiveQueue,
    persist: Option<PersistenceQueue>,
    bridge: Arc<AcquisitionBridge>,
    writer: Option<PersistenceWriter>,
    recording: bool,
}

impl Streamer {
    /// Validates the configuration against the source and wires the bridge
    /// into it. Nothing starts running here.
    pub fn new(config: SessionConfig, mut source: Box<dyn SampleSource>) -> Result<Self> {
        config.validate()?;
        if (source.sample_rate_hz() - config.sample_rate_hz).abs() > 1e-9 {
            return Err(StreamError::SampleRateMismatch {
                expected: config.sample_rate_hz,
                actual: source.sample_rate_hz(),
            });
        }
        if source.channel_count() != config.channel_count() {
            return Err(StreamError::ChannelMismatch {
                expected: config.channel_count(),
                actual: source.channel_count(),
            });
        }
        let trigger = TriggerController::new();
        let live = LiveQueue::with_capacity(config.live_capacity)?;
        let persist = config.save_data.then(PersistenceQueue::new);
        let bridge = Arc::new(AcquisitionBridge::new(
            config.channel_count(),
            config.sample_rate_hz,
            config.trigger_enabled.then(|| trigger.clone()),
            live.clone(),
            persist.clone(),
        )?);
        source.register(Arc::clone(&bridge).into_handler());
        source.set_impedance_mode(config.mode == StreamMode::Impedance)?;
        Ok(Self {
            config,
            trial: TrialConfig::default(),
            source,
            trigger,
            live,
            persist,
            bridge,
            writer: None,
            recording: false,
        })
    }

    pub fn with_trial_config(mut self, trial: TrialConfig) -> Result<Self> {
        self.set_trial_config(trial)?;
        Ok(self)
    }

    pub fn set_trial_config(&mut self, trial: TrialConfig) -> Result<()> {
        trial.validate(self.config.sample_rate_hz, self.config.channel_count())?;
        self.trial = trial;
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_saving(&self) -> bool {
        self.writer.is_some()
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    /// Handle for the experiment-control context.
    pub fn trigger(&self) -> TriggerController {
        self.trigger.clone()
    }

    pub fn trigger_pulse(&self) {
        self.trigger.pulse();
    }

    pub fn trigger_hold(&self) {
        self.trigger.hold();
    }

    pub fn trigger_release(&self) {
        self.trigger.release();
    }

    pub fn start_recording(&mut self) -> Result<()> {
        if self.recording {
            warn!("recording already started");
            return Ok(());
        }
        self.source.start()?;
        self.recording = true;
        info!(
            "recording started: {} channels at {} Hz ({:?} mode)",
            self.config.channel_count(),
            self.config.sample_rate_hz,
            self.config.mode
        );
        Ok(())
    }

    /// Stops the source, then lets the writer drain and release its file.
    /// A source error does not prevent the writer from being stopped.
    pub fn stop_recording(&mut self) -> Result<()> {
        let stopped = if self.recording {
            self.recording = false;
            self.source.stop()
        } else {
            Ok(())
        };
        let saved = match self.writer.take() {
            Some(writer) => writer.stop().map(|_| ()),
            None => Ok(()),
        };
        let stats = self.bridge.stats();
        info!(
            "recording stopped: {} delivered, {} malformed, {} missed, {} evicted from live queue",
            stats.delivered, stats.malformed, stats.missed_packets, stats.live_evicted
        );
        stopped.and(saved)
    }

    /// Opens `path`, writes the header and persists every sample delivered
    /// from now until [`Streamer::stop_saving`].
    pub fn start_saving(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.check_can_save()?;
        let recorder = DataRecorder::create(path, &self.config)?;
        self.start_saving_with(recorder)
    }

    /// Same as [`Streamer::start_saving`] over a recorder the caller opened.
    pub fn start_saving_with<W>(&mut self, recorder: DataRecorder<W>) -> Result<()>
    where
        W: Write + Send + 'static,
    {
        let persist = self.check_can_save()?.clone();
        self.writer = Some(PersistenceWriter::spawn(recorder, persist));
        Ok(())
    }

    fn check_can_save(&self) -> Result<&PersistenceQueue> {
        let persist = self
            .persist
            .as_ref()
            .ok_or(StreamError::InvalidState("session was created without save_data"))?;
        if self.writer.is_some() {
            return Err(StreamError::InvalidState("already saving"));
        }
        Ok(persist)
    }

    /// Samples queued for the writer and not yet written.
    pub fn persistence_backlog(&self) -> usize {
        self.persist.as_ref().map_or(0, PersistenceQueue::len)
    }

    /// Drains and closes the current file; returns the number of samples written.
    pub fn stop_saving(&mut self) -> Result<u64> {
        self.writer
            .take()
            .ok_or(StreamError::InvalidState("not saving"))?
            .stop()
    }

    /// Surfaces a writer that already stopped on its own, e.g. after a failed
    /// write.
    pub fn check_persistence(&mut self) -> Result<()> {
        if self.writer.as_ref().is_some_and(PersistenceWriter::is_finished) {
            if let Some(writer) = self.writer.take() {
                writer.stop()?;
            }
        }
        Ok(())
    }

    /// Runs one online trial. Side A is left, side B is right.
    pub fn run_trial(
        &mut self,
        actuator: &mut dyn Actuator,
        freq_a: f64,
        freq_b: f64,
        prompt: &str,
    ) -> Result<TrialResult> {
        if self.config.mode != StreamMode::Signal {
            return Err(StreamError::InvalidState("trials need signal mode"));
        }
        if !self.recording {
            return Err(StreamError::InvalidState("recording is not started"));
        }
        let mut controller = TrialController::new(
            self.trial.clone(),
            self.config.sample_rate_hz,
            self.config.channel_count(),
        )?;
        let reader = self.live.lease()?;
        controller.run(&reader, &self.trigger, actuator, freq_a, freq_b, prompt)
    }

    /// Per-channel electrode impedance (ohms) over the next `seconds` of data.
    pub fn measure_impedance(&mut self, seconds: f64) -> Result<Vec<f64>> {
        if self.config.mode != StreamMode::Impedance {
            return Err(StreamError::InvalidState("impedance needs impedance mode"));
        }
        if !self.recording {
            return Err(StreamError::InvalidState("recording is not started"));
        }
        if !(seconds > 0.0 && seconds <= MAX_IMPEDANCE_SECONDS) {
            return Err(StreamError::Config(format!(
                "impedance window of {seconds} s is outside (0, {MAX_IMPEDANCE_SECONDS}] s"
            )));
        }
        let samples = ((seconds * self.config.sample_rate_hz).round() as usize).max(2);
        let channels = self.config.channel_count();
        let reader = self.live.lease()?;
        reader.flush();
        let mut window = Array2::zeros((samples, channels));
        for mut row in window.rows_mut() {
            let sample = reader.recv_timeout(IMPEDANCE_TIMEOUT)?;
            for (dst, src) in row.iter_mut().zip(&sample.channels) {
                *dst = *src;
            }
        }
        Ok(impedances_from_window(window.view()))
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if self.recording || self.writer.is_some() {
            if let Err(err) = self.stop_recording() {
                warn!("error while closing session: {err}");
            }
        }
    }
}
