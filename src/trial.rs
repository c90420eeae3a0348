// src/trial.rs
use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use std::time::SystemTime;

use crate::config::TrialConfig;
use crate::drivers::{
    FilterChain, LiveReader, Result, SpectrumBuilder, StreamError, TriggerController,
};
use crate::types::{Boundary, Sample, Side, TrialEnd, TrialResult};

/// Display or actuator driven by the decision loop.
pub trait Actuator {
    fn show_prompt(&mut self, text: &str);
    fn reset_position(&mut self);
    fn step(&mut self, direction: Side);
    fn boundary_reached(&self) -> Boundary;
    fn closest_side(&self) -> Side;
    /// Cosmetic; nothing is read back.
    fn collide(&mut self, side: Side);
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TrialPhase {
    Idle,
    Armed,
    Accumulating,
    Deciding,
    Terminal,
}

/// Fixed-length run of consecutive samples, samples x channels.
pub struct Window {
    data: Array2<f64>,
    filled: usize,
}

impl Window {
    pub fn new(samples: usize, channels: usize) -> Self {
        Self {
            data: Array2::zeros((samples, channels)),
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.nrows()
    }

    pub fn push(&mut self, sample: &Sample) {
        if self.is_full() {
            return;
        }
        let mut row = self.data.row_mut(self.filled);
        for (dst, src) in row.iter_mut().zip(&sample.channels) {
            *dst = *src;
        }
        self.filled += 1;
    }

    pub fn clear(&mut self) {
        self.filled = 0;
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }
}

/// Powers read at the two stimulus bins and the step they produced.
#[derive(Clone, Copy, Debug)]
pub struct WindowDecision {
    pub power_a: f64,
    pub power_b: f64,
    pub step: Side,
}

/// Online SSVEP classifier: integrates one step per window until the
/// actuator reports a boundary or the trial duration runs out.
pub struct TrialController {
    config: TrialConfig,
    sample_rate_hz: f64,
    channel_count: usize,
    filters: FilterChain,
    spectrum: SpectrumBuilder,
    phase: TrialPhase,
}

impl TrialController {
    pub fn new(config: TrialConfig, sample_rate_hz: f64, channel_count: usize) -> Result<Self> {
        if !(sample_rate_hz > 0.0) {
            return Err(StreamError::InvalidSampleRate);
        }
        config.validate(sample_rate_hz, channel_count)?;
        let filters = FilterChain::from_kinds(sample_rate_hz, &config.filters());
        let spectrum =
            SpectrumBuilder::with_size(config.fft_size(sample_rate_hz)).overlap(config.fft_overlap);
        Ok(Self {
            config,
            sample_rate_hz,
            channel_count,
            filters,
            spectrum,
            phase: TrialPhase::Idle,
        })
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    /// Band-pass each channel, estimate its PSD and compare the two bins.
    /// Ties step toward side A.
    pub fn evaluate(&mut self, window: &Window, freq_a: f64, freq_b: f64) -> WindowDecision {
        let mut data = window.data().clone();
        for mut column in data.axis_iter_mut(Axis(1)) {
            let mut channel = column.to_vec();
            self.filters.filter_block(&mut channel);
            for (dst, src) in column.iter_mut().zip(channel) {
                *dst = src;
            }
        }
        let spectrum = self.spectrum.compute(data.view(), self.sample_rate_hz);
        let power_a = spectrum.power_at(freq_a, &self.config.channels);
        let power_b = spectrum.power_at(freq_b, &self.config.channels);
        let step = if power_b <= power_a {
            Side::Left
        } else {
            Side::Right
        };
        debug!("window: P({freq_a} Hz)={power_a:.4e} P({freq_b} Hz)={power_b:.4e} -> {step:?}");
        WindowDecision {
            power_a,
            power_b,
            step,
        }
    }

    /// Runs one trial on the leased live queue. The trigger is held for the
    /// duration and released on every exit path.
    pub fn run<A: Actuator + ?Sized>(
        &mut self,
        reader: &LiveReader,
        trigger: &TriggerController,
        actuator: &mut A,
        freq_a: f64,
        freq_b: f64,
        prompt: &str,
    ) -> Result<TrialResult> {
        self.check_frequency(freq_a)?;
        self.check_frequency(freq_b)?;
        let start_time = SystemTime::now();
        self.phase = TrialPhase::Armed;
        let stale = reader.flush();
        let _hold = trigger.hold_scoped();
        actuator.reset_position();
        actuator.show_prompt(prompt);
        info!("trial '{prompt}' started: A={freq_a} Hz, B={freq_b} Hz, {stale} stale samples dropped");

        let outcome = self.decide(reader, actuator, freq_a, freq_b);
        self.phase = match &outcome {
            Ok(_) => TrialPhase::Terminal,
            Err(_) => TrialPhase::Idle,
        };
        let (decision, ended_by, windows_evaluated, gaps) = outcome?;
        let result = TrialResult {
            decision,
            start_time,
            end_time: SystemTime::now(),
            ended_by,
            windows_evaluated,
            gaps,
        };
        info!(
            "trial '{prompt}' decided {:?} by {:?} after {} windows",
            result.decision, result.ended_by, result.windows_evaluated
        );
        Ok(result)
    }

    fn decide<A: Actuator + ?Sized>(
        &mut self,
        reader: &LiveReader,
        actuator: &mut A,
        freq_a: f64,
        freq_b: f64,
    ) -> Result<(Side, TrialEnd, usize, u64)> {
        let timeout = self.config.stall_timeout();
        let max_windows = self.config.max_windows(self.sample_rate_hz);
        let mut window = Window::new(
            self.config.window_samples(self.sample_rate_hz),
            self.channel_count,
        );
        let mut last_index: Option<u64> = None;
        let mut gaps = 0u64;
        for evaluated in 1..=max_windows {
            self.phase = TrialPhase::Accumulating;
            window.clear();
            while !window.is_full() {
                let sample = reader.recv_timeout(timeout)?;
                if let Some(previous) = last_index {
                    debug_assert!(sample.index > previous);
                    let missing = sample.index.saturating_sub(previous + 1);
                    if missing > 0 {
                        gaps += missing;
                        warn!("{missing} live samples lost before index {}", sample.index);
                    }
                }
                last_index = Some(sample.index);
                window.push(&sample);
            }

            self.phase = TrialPhase::Deciding;
            let decision = self.evaluate(&window, freq_a, freq_b);
            actuator.step(decision.step);
            if let Boundary::Reached(side) = actuator.boundary_reached() {
                actuator.collide(side);
                return Ok((side, TrialEnd::Boundary, evaluated, gaps));
            }
        }
        let side = actuator.closest_side();
        actuator.collide(side);
        Ok((side, TrialEnd::Timeout, max_windows, gaps))
    }

    fn check_frequency(&self, freq_hz: f64) -> Result<()> {
        if freq_hz > 0.0 && freq_hz < self.sample_rate_hz / 2.0 {
            Ok(())
        } else {
            Err(StreamError::Config(format!(
                "stimulus frequency {freq_hz} Hz is outside (0, {}) Hz",
                self.sample_rate_hz / 2.0
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CursorConfig;
    use crate::cursor::CursorTrack;
    use crate::drivers::{AcquisitionBridge, LiveQueue, TriggerState};
    use std::f64::consts::PI;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const FS: f64 = 300.0;

    struct Outcome {
        result: Result<TrialResult>,
        trigger_after: TriggerState,
        track: CursorTrack,
        controller_phase: TrialPhase,
    }

    /// Streams `samples` readings of a tone on channel 0 once the trial arms.
    fn run_with_tone(tone_hz: f64, trial: TrialConfig, samples: usize) -> Outcome {
        let live = LiveQueue::with_capacity(samples + 1).unwrap();
        let trigger = TriggerController::new();
        let bridge = AcquisitionBridge::new(2, FS, Some(trigger.clone()), live.clone(), None);
        let bridge = Arc::new(bridge.unwrap());
        let watched = trigger.clone();
        let producer = thread::spawn(move || {
            let armed_by = Instant::now() + Duration::from_secs(5);
            while watched.state() != TriggerState::Hold && Instant::now() < armed_by {
                thread::sleep(Duration::from_millis(1));
            }
            for i in 0..samples {
                let t = i as f64 / FS;
                let value = 10.0 * (2.0 * PI * tone_hz * t).sin();
                bridge.on_sample(&[value, 0.5], t).unwrap();
            }
        });
        let reader = live.lease().unwrap();
        let mut controller = TrialController::new(trial, FS, 2).unwrap();
        let mut track = CursorTrack::new(CursorConfig::default());
        let result = controller.run(&reader, &trigger, &mut track, 15.0, 17.0, "YES");
        producer.join().unwrap();
        Outcome {
            result,
            trigger_after: trigger.state(),
            track,
            controller_phase: controller.phase(),
        }
    }

    #[test]
    fn tone_at_a_decides_a_before_timeout() {
        let outcome = run_with_tone(15.0, TrialConfig::default(), 6000);
        let result = outcome.result.unwrap();
        assert_eq!(result.decision, Side::Left);
        assert_eq!(result.ended_by, TrialEnd::Timeout);
        assert_eq!(result.windows_evaluated, 10);
        assert_eq!(result.gaps, 0);
        assert_eq!(outcome.track.position(), -100);
        assert_eq!(outcome.track.steps(), 10);
        assert_eq!(outcome.track.collisions(), &[Side::Left]);
        assert_eq!(outcome.track.prompt(), "YES");
        assert_eq!(outcome.trigger_after, TriggerState::Off);
        assert_eq!(outcome.controller_phase, TrialPhase::Terminal);
    }

    #[test]
    fn tone_at_b_steps_toward_b() {
        let outcome = run_with_tone(17.0, TrialConfig::default(), 6000);
        assert_eq!(outcome.result.unwrap().decision, Side::Right);
        assert_eq!(outcome.track.position(), 100);
    }

    #[test]
    fn one_sided_signal_reaches_boundary_within_twenty_windows() {
        let trial = TrialConfig {
            trial_seconds: 60.0,
            ..TrialConfig::default()
        };
        let outcome = run_with_tone(15.0, trial, 18000);
        let result = outcome.result.unwrap();
        assert_eq!(result.ended_by, TrialEnd::Boundary);
        assert_eq!(result.decision, Side::Left);
        assert_eq!(result.windows_evaluated, 20);
    }

    #[test]
    fn stalled_stream_aborts_and_releases_trigger() {
        let trial = TrialConfig {
            stall_timeout_ms: 200,
            ..TrialConfig::default()
        };
        let outcome = run_with_tone(15.0, trial, 100);
        assert!(matches!(outcome.result, Err(StreamError::Stall { .. })));
        assert_eq!(outcome.trigger_after, TriggerState::Off);
        assert_eq!(outcome.controller_phase, TrialPhase::Idle);
    }

    #[test]
    fn equal_power_ties_toward_a() {
        let mut controller = TrialController::new(TrialConfig::default(), FS, 1).unwrap();
        let window = {
            let mut w = Window::new(600, 1);
            for i in 0..600 {
                w.push(&Sample {
                    index: i,
                    timestamp: 0.0,
                    channels: vec![0.0],
                    trigger: false,
                });
            }
            w
        };
        let decision = controller.evaluate(&window, 15.0, 17.0);
        assert_eq!(decision.power_a, decision.power_b);
        assert_eq!(decision.step, Side::Left);
    }

    #[test]
    fn out_of_range_frequency_is_rejected() {
        let live = LiveQueue::with_capacity(4).unwrap();
        let reader = live.lease().unwrap();
        let trigger = TriggerController::new();
        let mut controller = TrialController::new(TrialConfig::default(), FS, 1).unwrap();
        let mut track = CursorTrack::default();
        let err = controller
            .run(&reader, &trigger, &mut track, 15.0, 200.0, "NO")
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(trigger.state(), TriggerState::Off);
    }
}
