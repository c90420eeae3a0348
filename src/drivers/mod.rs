// src/drivers/mod.rs
pub mod bridge;
pub mod buffer;
pub mod error;
pub mod fft;
pub mod filter;
pub mod resistance_detection;
pub mod source;
pub mod trigger;
pub use bridge::{AcquisitionBridge, BridgeStats};
pub use buffer::{LiveQueue, LiveReader, PersistenceQueue};
pub use error::{Result, StreamError};
pub use fft::{PowerSpectrum, SpectrumBuilder};
pub use filter::{FilterChain, FilterKind};
pub use resistance_detection::{impedance_from_std, impedances_from_window};
pub use source::{
    ManualFeed, ManualSource, SampleHandler, SampleSource, SineComponent, SyntheticSource,
};
pub use trigger::{TriggerController, TriggerHold, TriggerState};
