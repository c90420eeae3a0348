// src/types.rs
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One multi-channel reading as delivered by the acquisition bridge.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub index: u64,
    pub timestamp: f64,
    pub channels: Vec<f64>,
    pub trigger: bool,
}

// 采集模式
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Signal,
    Impedance,
}

/// Side of the decision axis. `Left` is side A, `Right` is side B.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Boundary state reported by the actuator after each step.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Boundary {
    None,
    Reached(Side),
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum TrialEnd {
    Boundary,
    Timeout,
}

/// Outcome of a single online trial. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct TrialResult {
    pub decision: Side,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub ended_by: TrialEnd,
    pub windows_evaluated: usize,
    /// Index gaps seen while reading the live queue.
    pub gaps: u64,
}
