//! Electrode impedance from the lead-off drive response.
//!
//! While the device drives a known lead-off current, each channel's
//! standard deviation (µV) over a recent window maps to impedance as
//! `sqrt(2) * std_uV * 1e-6 / LEAD_OFF_DRIVE_AMPS - SERIES_RESISTOR_OHMS`,
//! clamped at zero.
use ndarray::{ArrayView2, Axis};

/// Series resistor on the amplifier input (ohms).
pub const SERIES_RESISTOR_OHMS: f64 = 2200.0;
/// Lead-off drive current (amps).
pub const LEAD_OFF_DRIVE_AMPS: f64 = 6.0e-9;

pub fn impedance_from_std(std_microvolts: f64) -> f64 {
    let impedance_ohms =
        (2.0_f64.sqrt() * std_microvolts * 1.0e-6) / LEAD_OFF_DRIVE_AMPS - SERIES_RESISTOR_OHMS;
    if impedance_ohms.is_nan() || impedance_ohms < 0.0 {
        0.0
    } else {
        impedance_ohms
    }
}

/// Impedance (ohms) per channel of a samples x channels window in µV.
pub fn impedances_from_window(window: ArrayView2<f64>) -> Vec<f64> {
    window
        .axis_iter(Axis(1))
        .map(|channel| impedance_from_std(channel.std(0.0)))
        .collect()
}
