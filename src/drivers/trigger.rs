use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum TriggerState {
    #[default]
    Off,
    Once,
    Hold,
}

/// Shared trigger mark state. Written by experiment control, consumed once
/// per sample by the acquisition bridge.
#[derive(Clone, Debug, Default)]
pub struct TriggerController {
    state: Arc<Mutex<TriggerState>>,
}

impl TriggerController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks exactly the next consumed sample.
    pub fn pulse(&self) {
        *self.state.lock() = TriggerState::Once;
    }

    /// Marks every consumed sample until `release`.
    pub fn hold(&self) {
        *self.state.lock() = TriggerState::Hold;
    }

    pub fn release(&self) {
        *self.state.lock() = TriggerState::Off;
    }

    pub fn state(&self) -> TriggerState {
        *self.state.lock()
    }

    /// Returns the mark for the current sample. `Once` reverts to `Off`
    /// under the same lock that read it.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            TriggerState::Off => false,
            TriggerState::Hold => true,
            TriggerState::Once => {
                *state = TriggerState::Off;
                true
            }
        }
    }

    /// Holds the trigger until the returned guard is dropped.
    pub fn hold_scoped(&self) -> TriggerHold {
        self.hold();
        debug!("trigger held");
        TriggerHold {
            controller: self.clone(),
        }
    }
}

/// Releases the trigger back to `Off` on drop, on every exit path.
pub struct TriggerHold {
    controller: TriggerController,
}

impl Drop for TriggerHold {
    fn drop(&mut self) {
        self.controller.release();
        debug!("trigger released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pulse_marks_exactly_one_sample() {
        let trigger = TriggerController::new();
        trigger.pulse();
        assert!(trigger.consume());
        assert_eq!(trigger.state(), TriggerState::Off);
        assert!(!trigger.consume());
    }

    #[test]
    fn hold_marks_until_release() {
        let trigger = TriggerController::new();
        trigger.hold();
        for _ in 0..50 {
            assert!(trigger.consume());
        }
        assert_eq!(trigger.state(), TriggerState::Hold);
        trigger.release();
        assert!(!trigger.consume());
        assert_eq!(trigger.state(), TriggerState::Off);
    }

    #[test]
    fn scoped_hold_releases_on_panic_unwind() {
        let trigger = TriggerController::new();
        let cloned = trigger.clone();
        let outcome = thread::spawn(move || {
            let _hold = cloned.hold_scoped();
            panic!("trial blew up");
        })
        .join();
        assert!(outcome.is_err());
        assert_eq!(trigger.state(), TriggerState::Off);
    }

    #[test]
    fn concurrent_pulses_are_never_double_counted() {
        let trigger = TriggerController::new();
        let writer = trigger.clone();
        let pulses = 200;
        let handle = thread::spawn(move || {
            for _ in 0..pulses {
                writer.pulse();
                while writer.state() == TriggerState::Once {
                    thread::yield_now();
                }
            }
        });
        let mut marked = 0;
        while !handle.is_finished() || trigger.state() == TriggerState::Once {
            if trigger.consume() {
                marked += 1;
            }
        }
        handle.join().unwrap();
        assert_eq!(marked, pulses);
    }
}
