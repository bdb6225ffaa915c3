use num_complex::Complex64;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps a forward/inverse `rustfft` plan pair of one size.
///
/// Plans are immutable, so one helper can be shared between threads.
pub struct FftHelper {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    size: usize,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        Self {
            forward,
            inverse,
            size,
        }
    }

    /// Smallest power-of-two size able to hold a linear convolution.
    pub fn linear_convolution_size(signal_len: usize, kernel_len: usize) -> usize {
        let full = (signal_len + kernel_len).saturating_sub(1).max(1);
        full.next_power_of_two()
    }

    pub fn for_linear_convolution(signal_len: usize, kernel_len: usize) -> Self {
        Self::new(Self::linear_convolution_size(signal_len, kernel_len))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Forward transform of `input`, zero-padded or truncated to the plan size.
    pub fn forward(&self, input: &[f64]) -> Vec<Complex64> {
        let mut buffer: Vec<Complex64> = input
            .iter()
            .take(self.size)
            .map(|&value| Complex64::new(value, 0.0))
            .collect();
        buffer.resize(self.size, Complex64::zero());
        self.forward.process(&mut buffer);
        buffer
    }

    /// Normalized inverse transform, real part only.
    pub fn inverse(&self, mut spectrum: Vec<Complex64>) -> Vec<f64> {
        spectrum.resize(self.size, Complex64::zero());
        self.inverse.process(&mut spectrum);
        let scale = 1.0 / self.size as f64;
        spectrum.iter().map(|c| c.re * scale).collect()
    }

    /// Full linear convolution of `signal` with `kernel`.
    ///
    /// The plan must be at least `signal.len() + kernel.len() - 1` long or the
    /// result wraps around.
    pub fn convolve(&self, signal: &[f64], kernel: &[f64]) -> Vec<f64> {
        let signal_spectrum = self.forward(signal);
        let kernel_spectrum = self.forward(kernel);
        let product = signal_spectrum
            .iter()
            .zip(kernel_spectrum.iter())
            .map(|(a, b)| a * b)
            .collect();
        let mut full = self.inverse(product);
        full.truncate((signal.len() + kernel.len()).saturating_sub(1));
        full
    }
}
