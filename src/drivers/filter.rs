use std::f64::consts::{FRAC_1_SQRT_2, PI};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterKind {
    /// Mains notch.
    Notch { freq_hz: f64, q: f64 },
    /// Second-order Butterworth high-pass followed by low-pass.
    Bandpass { low_hz: f64, high_hz: f64 },
}

#[derive(Clone, Copy, Debug)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

#[derive(Clone, Copy, Debug)]
struct BiquadFilter {
    coeffs: BiquadCoeffs,
    state: BiquadState,
}

impl BiquadFilter {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }
    fn process(&mut self, input: f64) -> f64 {
        // Transposed direct form II
        let y = self.coeffs.b0 * input + self.state.z1;
        self.state.z1 = self.coeffs.b1 * input - self.coeffs.a1 * y + self.state.z2;
        self.state.z2 = self.coeffs.b2 * input - self.coeffs.a2 * y;
        y
    }
    fn reset(&mut self) {
        self.state = BiquadState::default();
    }
}

/// Cascade of biquad sections applied in order.
#[derive(Clone, Default, Debug)]
pub struct FilterChain {
    sections: Vec<BiquadFilter>,
}

impl FilterChain {
    pub fn from_kinds(sample_rate_hz: f64, kinds: &[FilterKind]) -> Self {
        let mut sections = Vec::new();
        for kind in kinds {
            sections.extend(design_sections(sample_rate_hz, *kind));
        }
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn process_sample(&mut self, mut value: f64) -> f64 {
        for section in &mut self.sections {
            value = section.process(value);
        }
        value
    }

    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
    }

    /// Filters one isolated block: the mean is removed first and the
    /// section state starts from zero.
    pub fn filter_block(&mut self, data: &mut [f64]) {
        if data.is_empty() {
            return;
        }
        self.reset();
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        for value in data.iter_mut() {
            *value = self.process_sample(*value - mean);
        }
    }
}

fn design_sections(sample_rate_hz: f64, kind: FilterKind) -> Vec<BiquadFilter> {
    let nyquist = sample_rate_hz * 0.5;
    match kind {
        FilterKind::Notch { freq_hz, q } => {
            let coeffs = notch(nyquist_clamp(freq_hz, nyquist), sample_rate_hz, q.max(0.1));
            vec![BiquadFilter::new(coeffs)]
        }
        FilterKind::Bandpass { low_hz, high_hz } => {
            let (low, high) = band_edges(low_hz, high_hz, nyquist);
            vec![
                BiquadFilter::new(highpass(low, sample_rate_hz, FRAC_1_SQRT_2)),
                BiquadFilter::new(lowpass(high, sample_rate_hz, FRAC_1_SQRT_2)),
            ]
        }
    }
}

fn nyquist_clamp(freq_hz: f64, nyquist: f64) -> f64 {
    freq_hz.clamp(0.01, nyquist - 0.01)
}

fn band_edges(low_hz: f64, high_hz: f64, nyquist: f64) -> (f64, f64) {
    let low = nyquist_clamp(low_hz.min(high_hz), nyquist);
    let high = nyquist_clamp(low_hz.max(high_hz), nyquist);
    (low, high)
}

fn lowpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 - cos_w0) * 0.5;
    let b1 = 1.0 - cos_w0;
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn highpass(freq_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * freq_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = (1.0 + cos_w0) * 0.5;
    let b1 = -(1.0 + cos_w0);
    let b2 = b0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn notch(center_hz: f64, sample_rate_hz: f64, q: f64) -> BiquadCoeffs {
    let w0 = 2.0 * PI * center_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * q);
    let cos_w0 = w0.cos();
    let b0 = 1.0;
    let b1 = -2.0 * cos_w0;
    let b2 = 1.0;
    let a0 = 1.0 + alpha;
    let a1 = -2.0 * cos_w0;
    let a2 = 1.0 - alpha;
    normalize(b0, b1, b2, a0, a1, a2)
}

fn normalize(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> BiquadCoeffs {
    let a0_inv = 1.0 / a0;
    BiquadCoeffs {
        b0: b0 * a0_inv,
        b1: b1 * a0_inv,
        b2: b2 * a0_inv,
        a1: a1 * a0_inv,
        a2: a2 * a0_inv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq_hz * i as f64 / fs).sin())
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
    }

    #[test]
    fn bandpass_removes_dc_offset() {
        let mut chain = FilterChain::from_kinds(
            300.0,
            &[FilterKind::Bandpass {
                low_hz: 5.0,
                high_hz: 30.0,
            }],
        );
        let mut data = vec![500.0; 600];
        chain.filter_block(&mut data);
        assert!(data.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn bandpass_keeps_in_band_and_attenuates_out_of_band() {
        let kinds = [FilterKind::Bandpass {
            low_hz: 5.0,
            high_hz: 30.0,
        }];
        let mut chain = FilterChain::from_kinds(300.0, &kinds);
        let mut pass = sine(15.0, 300.0, 1200);
        chain.filter_block(&mut pass);
        let mut stop = sine(100.0, 300.0, 1200);
        chain.filter_block(&mut stop);
        // Ignore the start-up transient.
        assert!(rms(&pass[300..]) > 0.6);
        assert!(rms(&stop[300..]) < 0.1);
    }

    #[test]
    fn notch_suppresses_mains() {
        let mut chain = FilterChain::from_kinds(
            250.0,
            &[FilterKind::Notch {
                freq_hz: 50.0,
                q: 30.0,
            }],
        );
        let mut data = sine(50.0, 250.0, 2500);
        chain.filter_block(&mut data);
        assert!(rms(&data[1500..]) < 0.05);
    }
}
