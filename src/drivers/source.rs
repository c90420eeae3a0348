use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::drivers::{Result, StreamError};

/// Callback invoked once per reading with the raw channel vector and the
/// source timestamp in seconds. Whatever the handler needs travels in its
/// captured environment.
pub type SampleHandler = Box<dyn FnMut(&[f64], f64) + Send + 'static>;

/// Hardware driver seen from the core: it owns its own execution context
/// and calls the registered handler for every reading.
pub trait SampleSource: Send {
    fn sample_rate_hz(&self) -> f64;
    fn channel_count(&self) -> usize;
    fn register(&mut self, handler: SampleHandler);
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Switches the device between signal and impedance drive.
    fn set_impedance_mode(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }
}

/// Source driven by hand through a [`ManualFeed`]; useful for tests and
/// deterministic playback.
pub struct ManualSource {
    sample_rate_hz: f64,
    channel_count: usize,
    handler: Arc<Mutex<Option<SampleHandler>>>,
    running: Arc<AtomicBool>,
}

impl ManualSource {
    pub fn new(sample_rate_hz: f64, channel_count: usize) -> Self {
        Self {
            sample_rate_hz,
            channel_count,
            handler: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn feed(&self) -> ManualFeed {
        ManualFeed {
            handler: Arc::clone(&self.handler),
            running: Arc::clone(&self.running),
        }
    }
}

impl SampleSource for ManualSource {
    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    fn channel_count(&self) -> usize {
        self.channel_count
    }
    fn register(&mut self, handler: SampleHandler) {
        *self.handler.lock() = Some(handler);
    }
    fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct ManualFeed {
    handler: Arc<Mutex<Option<SampleHandler>>>,
    running: Arc<AtomicBool>,
}

impl ManualFeed {
    /// Delivers one reading. Returns false when the source is stopped or no
    /// handler has been registered.
    pub fn deliver(&self, channels: &[f64], timestamp: f64) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match self.handler.lock().as_mut() {
            Some(handler) => {
                handler(channels, timestamp);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A sine component injected into one channel of the synthetic stream.
#[derive(Clone, Copy, Debug)]
pub struct SineComponent {
    pub channel: usize,
    pub frequency_hz: f64,
    pub amplitude: f64,
}

/// Generates readings on its own thread at the nominal rate: injected sine
/// components plus uniform noise.
pub struct SyntheticSource {
    sample_rate_hz: f64,
    channel_count: usize,
    noise_amplitude: f64,
    paced: bool,
    components: Arc<Mutex<Vec<SineComponent>>>,
    impedance: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handler: Option<SampleHandler>,
    worker: Option<JoinHandle<SampleHandler>>,
}

/// Lead-off drive tone used while in impedance mode.
const IMPEDANCE_DRIVE_HZ: f64 = 31.25;
const IMPEDANCE_DRIVE_UV: f64 = 10.0;

impl SyntheticSource {
    pub fn new(sample_rate_hz: f64, channel_count: usize) -> Self {
        Self {
            sample_rate_hz,
            channel_count,
            noise_amplitude: 1.0,
            paced: true,
            components: Arc::new(Mutex::new(Vec::new())),
            impedance: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            handler: None,
            worker: None,
        }
    }

    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude.max(0.0);
        self
    }

    /// Unpaced sources emit as fast as the handler accepts readings.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn with_component(self, component: SineComponent) -> Self {
        self.components.lock().push(component);
        self
    }

    /// Shared handle for swapping the injected components while streaming.
    pub fn components(&self) -> Arc<Mutex<Vec<SineComponent>>> {
        Arc::clone(&self.components)
    }
}

impl SampleSource for SyntheticSource {
    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
    fn channel_count(&self) -> usize {
        self.channel_count
    }
    fn register(&mut self, handler: SampleHandler) {
        self.handler = Some(handler);
    }

    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.sample_rate_hz <= 0.0 {
            return Err(StreamError::InvalidSampleRate);
        }
        let mut handler = self
            .handler
            .take()
            .ok_or(StreamError::InvalidState("no sample handler registered"))?;
        let fs = self.sample_rate_hz;
        let channel_count = self.channel_count;
        let noise = self.noise_amplitude;
        let paced = self.paced;
        let components = Arc::clone(&self.components);
        let impedance = Arc::clone(&self.impedance);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        self.worker = Some(thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut channels = vec![0.0f64; channel_count];
            let started = Instant::now();
            let mut n: u64 = 0;
            while running.load(Ordering::SeqCst) {
                let t = n as f64 / fs;
                for value in channels.iter_mut() {
                    *value = if noise > 0.0 {
                        rng.gen_range(-noise..noise)
                    } else {
                        0.0
                    };
                }
                if impedance.load(Ordering::Relaxed) {
                    for value in channels.iter_mut() {
                        *value += IMPEDANCE_DRIVE_UV * (2.0 * PI * IMPEDANCE_DRIVE_HZ * t).sin();
                    }
                } else {
                    for c in components.lock().iter() {
                        if let Some(value) = channels.get_mut(c.channel) {
                            *value += c.amplitude * (2.0 * PI * c.frequency_hz * t).sin();
                        }
                    }
                }
                handler(&channels, t);
                n += 1;
                if paced {
                    let due = started + Duration::from_secs_f64(n as f64 / fs);
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                }
            }
            handler
        }));
        info!("synthetic source started at {fs} Hz, {channel_count} channels");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(handler) => self.handler = Some(handler),
                Err(_) => warn!("synthetic source thread panicked"),
            }
            info!("synthetic source stopped");
        }
        Ok(())
    }

    fn set_impedance_mode(&mut self, enabled: bool) -> Result<()> {
        self.impedance.store(enabled, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn manual_feed_only_delivers_while_running() {
        let mut source = ManualSource::new(250.0, 2);
        let feed = source.feed();
        let (tx, rx) = channel::unbounded();
        source.register(Box::new(move |channels: &[f64], ts: f64| {
            tx.send((channels.to_vec(), ts)).unwrap();
        }));
        assert!(!feed.deliver(&[1.0, 2.0], 0.0));
        source.start().unwrap();
        assert!(feed.deliver(&[1.0, 2.0], 0.004));
        source.stop().unwrap();
        assert!(!feed.deliver(&[3.0, 4.0], 0.008));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![(vec![1.0, 2.0], 0.004)]);
    }

    #[test]
    fn synthetic_source_emits_fixed_width_readings() {
        let mut source = SyntheticSource::new(1000.0, 3).paced(false);
        let (tx, rx) = channel::bounded(64);
        source.register(Box::new(move |channels: &[f64], ts: f64| {
            let _ = tx.try_send((channels.len(), ts));
        }));
        source.start().unwrap();
        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        source.stop().unwrap();
        assert_eq!(first.0, 3);
        assert!((second.1 - first.1 - 0.001).abs() < 1e-9);
    }

    #[test]
    fn synthetic_source_can_restart_after_stop() {
        let mut source = SyntheticSource::new(500.0, 1).paced(false);
        source.register(Box::new(|_: &[f64], _: f64| {}));
        source.start().unwrap();
        source.stop().unwrap();
        assert!(source.start().is_ok());
        source.stop().unwrap();
    }
}
