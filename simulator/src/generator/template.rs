use rawsignalcore::processing::PulseParameters;

/// Baseline-free AGET pulse sampled at integer bins.
pub fn aget_pulse(amplitude: f64, shaping_time: f64, start_time: f64, length: usize) -> Vec<f64> {
    let parameters = PulseParameters {
        baseline: 0.0,
        amplitude,
        shaping_time,
        start_time,
    };
    (0..length).map(|i| parameters.evaluate(i as f64)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_is_zero_before_start_and_peaks_at_amplitude() {
        let pulse = aget_pulse(500.0, 10.0, 100.0, 300);
        assert!(pulse[..=100].iter().all(|&v| v == 0.0));
        let max = pulse.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!((max - 500.0).abs() < 2.0);
    }
}
