//! Multi-channel biosignal acquisition with durable recording and an online
//! SSVEP decision loop.
pub mod config;
pub mod cursor;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod trial;
pub mod types;

pub use config::{CursorConfig, SessionConfig, TrialConfig};
pub use cursor::CursorTrack;
pub use drivers::{Result, StreamError};
pub use engine::Streamer;
pub use trial::{Actuator, TrialController, TrialPhase};
pub use types::{Boundary, Sample, Side, StreamMode, TrialEnd, TrialResult};
