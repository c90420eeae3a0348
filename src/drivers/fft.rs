use ndarray::{ArrayView1, ArrayView2, Axis};
use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// One-sided power spectral density for each channel.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub sample_rate_hz: f64,
    pub frequencies_hz: Vec<f64>,
    pub power: Vec<Vec<f64>>, // channel -> bins
}

impl PowerSpectrum {
    pub fn resolution_hz(&self) -> f64 {
        self.frequencies_hz.get(1).copied().unwrap_or(self.sample_rate_hz)
    }

    /// Index of the bin nearest to `freq_hz`, clamped to the spectrum.
    pub fn bin_for(&self, freq_hz: f64) -> usize {
        let bin = (freq_hz / self.resolution_hz()).round().max(0.0) as usize;
        bin.min(self.frequencies_hz.len().saturating_sub(1))
    }

    /// Power at `freq_hz` summed over the given channels.
    pub fn power_at(&self, freq_hz: f64, channels: &[usize]) -> f64 {
        let bin = self.bin_for(freq_hz);
        channels
            .iter()
            .filter_map(|&c| self.power.get(c))
            .filter_map(|bins| bins.get(bin))
            .sum()
    }
}

/// Welch estimator with a Hann taper and a fixed segment length.
pub struct SpectrumBuilder {
    fft_size: usize,
    overlap: usize,
    taper: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

impl SpectrumBuilder {
    pub fn with_size(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let taper = (0..fft_size)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / fft_size as f64).cos())
            .collect();
        Self {
            fft_size,
            overlap: fft_size / 2,
            taper,
            fft,
        }
    }

    /// Overlap between consecutive segments as a fraction of the segment.
    pub fn overlap(mut self, fraction: f64) -> Self {
        let samples = (self.fft_size as f64 * fraction.clamp(0.0, 0.95)).round() as usize;
        self.overlap = samples.min(self.fft_size - 1);
        self
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// `data` is samples x channels.
    pub fn compute(&self, data: ArrayView2<f64>, sample_rate_hz: f64) -> PowerSpectrum {
        let bins = self.fft_size / 2 + 1;
        let frequencies_hz = (0..bins)
            .map(|k| k as f64 * sample_rate_hz / self.fft_size as f64)
            .collect();
        let power = data
            .axis_iter(Axis(1))
            .map(|channel| self.welch(channel, sample_rate_hz))
            .collect();
        PowerSpectrum {
            sample_rate_hz,
            frequencies_hz,
            power,
        }
    }

    fn welch(&self, channel: ArrayView1<f64>, sample_rate_hz: f64) -> Vec<f64> {
        let bins = self.fft_size / 2 + 1;
        let step = self.fft_size - self.overlap;
        let len = channel.len();
        let mut starts: Vec<usize> = if len >= self.fft_size {
            (0..=len - self.fft_size).step_by(step).collect()
        } else {
            vec![0]
        };
        if starts.is_empty() {
            starts.push(0);
        }
        let taper_energy: f64 = self.taper.iter().map(|w| w * w).sum();
        let scale = 1.0 / (sample_rate_hz * taper_energy);
        let mut acc = vec![0.0f64; bins];
        let mut buffer = vec![Complex64::new(0.0, 0.0); self.fft_size];
        for &start in &starts {
            let segment = channel.slice(ndarray::s![start..(start + self.fft_size).min(len)]);
            let mean = segment.mean().unwrap_or(0.0);
            for (i, slot) in buffer.iter_mut().enumerate() {
                let value = segment.get(i).map(|v| v - mean).unwrap_or(0.0);
                *slot = Complex64::new(value * self.taper[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (k, slot) in acc.iter_mut().enumerate() {
                let mut p = buffer[k].norm_sqr() * scale;
                if k != 0 && !(self.fft_size % 2 == 0 && k == bins - 1) {
                    p *= 2.0;
                }
                *slot += p;
            }
        }
        let segments = starts.len() as f64;
        acc.iter_mut().for_each(|p| *p /= segments);
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn tone(freq_hz: f64, fs: f64, n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, 2), |(i, c)| {
            if c == 0 {
                (2.0 * PI * freq_hz * i as f64 / fs).sin()
            } else {
                0.0
            }
        })
    }

    #[test]
    fn resolution_follows_segment_length() {
        let builder = SpectrumBuilder::with_size(300);
        let spectrum = builder.compute(tone(15.0, 300.0, 600).view(), 300.0);
        assert_eq!(spectrum.frequencies_hz.len(), 151);
        assert!((spectrum.resolution_hz() - 1.0).abs() < 1e-12);
        assert_eq!(spectrum.bin_for(17.0), 17);
        assert_eq!(spectrum.power.len(), 2);
    }

    #[test]
    fn tone_power_peaks_at_its_bin() {
        let builder = SpectrumBuilder::with_size(300).overlap(0.5);
        let spectrum = builder.compute(tone(15.0, 300.0, 600).view(), 300.0);
        let peak = spectrum.power[0]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 15);
        assert!(spectrum.power_at(15.0, &[0]) > 100.0 * spectrum.power_at(17.0, &[0]));
        assert_eq!(spectrum.power_at(15.0, &[1]), 0.0);
    }

    #[test]
    fn short_input_is_zero_padded() {
        let builder = SpectrumBuilder::with_size(64);
        let spectrum = builder.compute(tone(10.0, 128.0, 40).view(), 128.0);
        assert_eq!(spectrum.power[0].len(), 33);
    }
}
