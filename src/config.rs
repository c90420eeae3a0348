// src/config.rs
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::drivers::{FilterKind, Result, StreamError};
use crate::types::StreamMode;

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Per-session acquisition settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub sample_rate_hz: f64,
    pub channel_names: Vec<String>,
    pub mode: StreamMode,
    pub trigger_enabled: bool,
    /// Keep a persistence queue for this session.
    pub save_data: bool,
    pub live_capacity: usize,
    /// Reference montage, written to the file header.
    pub reference: String,
    pub subject: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 300.0,
            channel_names: vec!["O1".into(), "Oz".into(), "O2".into()],
            mode: StreamMode::Signal,
            trigger_enabled: true,
            save_data: true,
            live_capacity: 4096,
            reference: "linked ears".into(),
            subject: "default".into(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_names.len()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate_hz > 0.0) {
            return Err(StreamError::InvalidSampleRate);
        }
        if self.channel_names.is_empty() {
            return Err(StreamError::Config("at least one channel is required".into()));
        }
        if self.live_capacity == 0 {
            return Err(StreamError::Config(
                "live queue capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Online classification settings for one trial.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    pub window_seconds: f64,
    pub trial_seconds: f64,
    pub band_low_hz: f64,
    pub band_high_hz: f64,
    /// Mains notch applied before the band-pass.
    pub notch_hz: Option<f64>,
    /// Welch segment length; one second of samples when unset.
    pub fft_size: Option<usize>,
    pub fft_overlap: f64,
    /// Channels whose power is summed for the decision.
    pub channels: Vec<usize>,
    pub stall_timeout_ms: u64,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            window_seconds: 2.0,
            trial_seconds: 20.0,
            band_low_hz: 5.0,
            band_high_hz: 30.0,
            notch_hz: None,
            fft_size: None,
            fft_overlap: 0.5,
            channels: vec![0],
            stall_timeout_ms: 3000,
        }
    }
}

impl TrialConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        load_json(path.as_ref())
    }

    pub fn window_samples(&self, sample_rate_hz: f64) -> usize {
        ((self.window_seconds * sample_rate_hz).round() as usize).max(1)
    }

    pub fn trial_samples(&self, sample_rate_hz: f64) -> usize {
        (self.trial_seconds * sample_rate_hz).round() as usize
    }

    /// Upper bound on windows evaluated when no boundary is reached.
    pub fn max_windows(&self, sample_rate_hz: f64) -> usize {
        self.trial_samples(sample_rate_hz) / self.window_samples(sample_rate_hz)
    }

    pub fn fft_size(&self, sample_rate_hz: f64) -> usize {
        self.fft_size
            .unwrap_or_else(|| sample_rate_hz.round() as usize)
            .min(self.window_samples(sample_rate_hz))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn filters(&self) -> Vec<FilterKind> {
        let mut kinds = Vec::new();
        if let Some(freq_hz) = self.notch_hz {
            kinds.push(FilterKind::Notch { freq_hz, q: 30.0 });
        }
        kinds.push(FilterKind::Bandpass {
            low_hz: self.band_low_hz,
            high_hz: self.band_high_hz,
        });
        kinds
    }

    pub fn validate(&self, sample_rate_hz: f64, channel_count: usize) -> Result<()> {
        if !(self.window_seconds > 0.0) || !(self.trial_seconds > 0.0) {
            return Err(StreamError::Config(
                "window and trial durations must be positive".into(),
            ));
        }
        if self.max_windows(sample_rate_hz) == 0 {
            return Err(StreamError::Config(
                "trial is shorter than a single window".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.fft_overlap) {
            return Err(StreamError::Config("fft overlap must be in [0, 1)".into()));
        }
        if self.band_low_hz >= self.band_high_hz || self.band_high_hz >= sample_rate_hz / 2.0 {
            return Err(StreamError::Config(format!(
                "band {}-{} Hz is invalid at {sample_rate_hz} Hz",
                self.band_low_hz, self.band_high_hz
            )));
        }
        if self.channels.is_empty() {
            return Err(StreamError::Config("no decision channels selected".into()));
        }
        if let Some(&bad) = self.channels.iter().find(|&&c| c >= channel_count) {
            return Err(StreamError::ChannelMismatch {
                expected: channel_count,
                actual: bad + 1,
            });
        }
        if self.stall_timeout_ms == 0 {
            return Err(StreamError::Config("stall timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Geometry of the headless cursor track, in display units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Distance from the start position to either boundary.
    pub margin: i64,
    pub step: i64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            margin: 200,
            step: 10,
        }
    }
}
