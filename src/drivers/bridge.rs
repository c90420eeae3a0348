use log::warn;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::drivers::{
    LiveQueue, PersistenceQueue, Result, SampleHandler, StreamError, TriggerController,
};
use crate::types::Sample;

/// Counters kept by the bridge; all monotonic for the life of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub delivered: u64,
    pub malformed: u64,
    pub missed_packets: u64,
    pub live_evicted: u64,
}

/// Runs on the source's callback context: turns raw channel vectors into
/// indexed, trigger-marked samples and fans them out without blocking.
pub struct AcquisitionBridge {
    channel_count: usize,
    sample_period: f64,
    trigger: Option<TriggerController>,
    live: LiveQueue,
    persist: Option<PersistenceQueue>,
    next_index: AtomicU64,
    last_timestamp: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    missed_packets: AtomicU64,
}

impl AcquisitionBridge {
    pub fn new(
        channel_count: usize,
        sample_rate_hz: f64,
        trigger: Option<TriggerController>,
        live: LiveQueue,
        persist: Option<PersistenceQueue>,
    ) -> Result<Self> {
        if sample_rate_hz <= 0.0 {
            return Err(StreamError::InvalidSampleRate);
        }
        if channel_count == 0 {
            return Err(StreamError::Config("channel count must be non-zero".into()));
        }
        Ok(Self {
            channel_count,
            sample_period: 1.0 / sample_rate_hz,
            trigger,
            live,
            persist,
            next_index: AtomicU64::new(0),
            last_timestamp: AtomicU64::new(f64::NAN.to_bits()),
            delivered: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            missed_packets: AtomicU64::new(0),
        })
    }

    /// Handles one reading. A wrong-width vector is counted and dropped;
    /// the returned error is informational only.
    pub fn on_sample(&self, channels: &[f64], timestamp: f64) -> Result<u64> {
        if channels.len() != self.channel_count {
            let count = self.malformed.fetch_add(1, Ordering::Relaxed) + 1;
            if count == 1 || count % 1000 == 0 {
                warn!(
                    "dropped malformed sample ({} of {} channels), {count} so far",
                    channels.len(),
                    self.channel_count
                );
            }
            return Err(StreamError::Data {
                expected: self.channel_count,
                actual: channels.len(),
            });
        }
        self.track_gap(timestamp);
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let trigger = match &self.trigger {
            Some(controller) => controller.consume(),
            None => false,
        };
        let sample = Sample {
            index,
            timestamp,
            channels: channels.to_vec(),
            trigger,
        };
        if let Some(persist) = self.persist.as_ref().filter(|p| p.is_accepting()) {
            persist.push(sample.clone());
        }
        if self.live.push(sample) {
            let evicted = self.live.evicted();
            if evicted == 1 || evicted % 1000 == 0 {
                warn!("live queue full, oldest sample evicted, {evicted} so far");
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(index)
    }

    fn track_gap(&self, timestamp: f64) {
        let previous = f64::from_bits(
            self.last_timestamp
                .swap(timestamp.to_bits(), Ordering::Relaxed),
        );
        if previous.is_nan() || !timestamp.is_finite() {
            return;
        }
        let dt = timestamp - previous;
        if dt > 1.5 * self.sample_period {
            let missed = ((dt / self.sample_period).round() as u64).saturating_sub(1);
            let total = self.missed_packets.fetch_add(missed, Ordering::Relaxed) + missed;
            warn!("timestamp gap of {dt:.4}s: {missed} packets missed, {total} so far");
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            missed_packets: self.missed_packets.load(Ordering::Relaxed),
            live_evicted: self.live.evicted(),
        }
    }

    /// Wraps the bridge into the handler registered with the source.
    pub fn into_handler(self: Arc<Self>) -> SampleHandler {
        Box::new(move |channels: &[f64], timestamp: f64| {
            let _ = self.on_sample(channels, timestamp);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bridge(
        capacity: usize,
    ) -> (AcquisitionBridge, LiveQueue, PersistenceQueue, TriggerController) {
        let live = LiveQueue::with_capacity(capacity).unwrap();
        let persist = PersistenceQueue::new();
        persist.set_accepting(true);
        let trigger = TriggerController::new();
        let bridge = AcquisitionBridge::new(
            2,
            100.0,
            Some(trigger.clone()),
            live.clone(),
            Some(persist.clone()),
        )
        .unwrap();
        (bridge, live, persist, trigger)
    }

    #[test]
    fn assigns_sequential_indices_and_fans_out() {
        let (bridge, live, persist, _) = bridge(16);
        for i in 0..5 {
            assert_eq!(bridge.on_sample(&[1.0, 2.0], i as f64 * 0.01).unwrap(), i);
        }
        assert_eq!(live.len(), 5);
        assert_eq!(persist.len(), 5);
        let reader = live.lease().unwrap();
        let indices: Vec<u64> = (0..5)
            .map(|_| reader.recv_timeout(Duration::from_millis(10)).unwrap().index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn malformed_sample_is_counted_and_does_not_consume_an_index() {
        let (bridge, live, _, _) = bridge(16);
        bridge.on_sample(&[1.0, 2.0], 0.0).unwrap();
        let err = bridge.on_sample(&[1.0], 0.01).unwrap_err();
        assert!(matches!(err, StreamError::Data { expected: 2, actual: 1 }));
        assert_eq!(bridge.on_sample(&[1.0, 2.0], 0.02).unwrap(), 1);
        let stats = bridge.stats();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn trigger_marks_follow_controller_state() {
        let (bridge, live, _, trigger) = bridge(16);
        bridge.on_sample(&[0.0, 0.0], 0.00).unwrap();
        trigger.pulse();
        bridge.on_sample(&[0.0, 0.0], 0.01).unwrap();
        bridge.on_sample(&[0.0, 0.0], 0.02).unwrap();
        let reader = live.lease().unwrap();
        let marks: Vec<bool> = (0..3)
            .map(|_| reader.recv_timeout(Duration::from_millis(10)).unwrap().trigger)
            .collect();
        assert_eq!(marks, vec![false, true, false]);
    }

    #[test]
    fn disabled_trigger_never_marks() {
        let live = LiveQueue::with_capacity(4).unwrap();
        let bridge = AcquisitionBridge::new(1, 100.0, None, live.clone(), None).unwrap();
        bridge.on_sample(&[0.0], 0.0).unwrap();
        let reader = live.lease().unwrap();
        assert!(!reader.recv_timeout(Duration::from_millis(10)).unwrap().trigger);
    }

    #[test]
    fn timestamp_gaps_count_missed_packets() {
        let (bridge, _, _, _) = bridge(16);
        bridge.on_sample(&[0.0, 0.0], 0.00).unwrap();
        bridge.on_sample(&[0.0, 0.0], 0.01).unwrap();
        bridge.on_sample(&[0.0, 0.0], 0.05).unwrap();
        assert_eq!(bridge.stats().missed_packets, 3);
    }

    #[test]
    fn live_overflow_is_reported_in_stats() {
        let (bridge, _, persist, _) = bridge(2);
        for i in 0..5 {
            bridge.on_sample(&[0.0, 0.0], i as f64 * 0.01).unwrap();
        }
        assert_eq!(bridge.stats().live_evicted, 3);
        assert_eq!(persist.len(), 5);
    }

    #[test]
    fn closed_persistence_queue_does_not_accumulate() {
        let (bridge, live, persist, _) = bridge(4);
        persist.set_accepting(false);
        for i in 0..50 {
            bridge.on_sample(&[0.0, 0.0], i as f64 * 0.01).unwrap();
        }
        assert!(persist.is_empty());
        assert_eq!(live.len(), 4);
        assert_eq!(bridge.stats().delivered, 50);
    }
}
