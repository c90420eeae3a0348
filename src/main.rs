// src/main.rs
use anyhow::{Context, Result};
use log::info;
use neurostream::drivers::{SineComponent, SyntheticSource};
use neurostream::{CursorConfig, CursorTrack, SessionConfig, Streamer, TrialConfig};

const FREQ_A_HZ: f64 = 15.0;
const FREQ_B_HZ: f64 = 17.0;

// 入口函数: synthetic headset, a short block of YES/NO trials.
fn main() -> Result<()> {
    env_logger::init();
    let config = SessionConfig::default();
    let source = SyntheticSource::new(config.sample_rate_hz, config.channel_count())
        .with_noise(2.0)
        .with_component(SineComponent {
            channel: 1,
            frequency_hz: FREQ_A_HZ,
            amplitude: 5.0,
        });
    let stimulus = source.components();
    let trial = TrialConfig {
        trial_seconds: 10.0,
        channels: vec![1],
        ..TrialConfig::default()
    };
    let mut streamer = Streamer::new(config, Box::new(source))
        .and_then(|s| s.with_trial_config(trial))
        .context("failed to set up session")?;

    let path = std::env::temp_dir().join("neurostream_demo.csv");
    streamer.start_recording()?;
    streamer
        .start_saving(&path)
        .with_context(|| format!("cannot save to {}", path.display()))?;

    let mut track = CursorTrack::new(CursorConfig::default());
    for (prompt, attended) in [("YES", FREQ_A_HZ), ("NO", FREQ_B_HZ), ("YES", FREQ_A_HZ)] {
        stimulus.lock()[0].frequency_hz = attended;
        let result = streamer.run_trial(&mut track, FREQ_A_HZ, FREQ_B_HZ, prompt)?;
        // Marks the first sample after the trial.
        streamer.trigger_pulse();
        info!(
            "{prompt}: attended {attended} Hz, decided {:?} ({:?}, {} windows)",
            result.decision, result.ended_by, result.windows_evaluated
        );
    }

    streamer.stop_recording()?;
    info!("recording at {}: {:?}", path.display(), streamer.stats());
    Ok(())
}
