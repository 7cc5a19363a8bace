use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Second-order IIR section, normalized so that `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Butterworth (Q = 1/√2) low-pass.
    pub fn lowpass(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = prewarp(cutoff_hz, sample_rate_hz);
        let b1 = 1.0 - cos_w0;
        Self::normalized(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Butterworth (Q = 1/√2) high-pass.
    pub fn highpass(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = prewarp(cutoff_hz, sample_rate_hz);
        let b1 = -(1.0 + cos_w0);
        Self::normalized(-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Run the section over `input` from rest (transposed direct form II).
    pub fn apply(&self, input: &[f64]) -> Vec<f64> {
        let mut z1 = 0.0;
        let mut z2 = 0.0;
        input
            .iter()
            .map(|&x| {
                let y = self.b0 * x + z1;
                z1 = self.b1 * x - self.a1 * y + z2;
                z2 = self.b2 * x - self.a2 * y;
                y
            })
            .collect()
    }
}

fn prewarp(cutoff_hz: f64, sample_rate_hz: f64) -> (f64, f64) {
    let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
    let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
    (w0.cos(), alpha)
}

/// Butterworth bandpass built as a high-pass section followed by a low-pass section.
#[derive(Debug, Clone, PartialEq)]
pub struct Bandpass {
    highpass: Biquad,
    lowpass: Biquad,
    /// Reflection padding used by `filtfilt`, about three periods of the low edge.
    pad_len: usize,
}

impl Bandpass {
    /// Returns `None` when the band cannot be realized at this sample rate.
    ///
    /// An upper edge at or beyond Nyquist is pulled down to 90% of Nyquist.
    pub fn butterworth(low_hz: f64, high_hz: f64, sample_rate_hz: f64) -> Option<Self> {
        if !(sample_rate_hz > 0.0) || !(low_hz > 0.0) {
            return None;
        }
        let nyquist = sample_rate_hz / 2.0;
        let high_hz = high_hz.min(0.9 * nyquist);
        if low_hz >= high_hz {
            return None;
        }
        Some(Self {
            highpass: Biquad::highpass(low_hz, sample_rate_hz),
            lowpass: Biquad::lowpass(high_hz, sample_rate_hz),
            pad_len: (3.0 * sample_rate_hz / low_hz).ceil() as usize,
        })
    }

    /// Single causal pass.
    pub fn filter(&self, input: &[f64]) -> Vec<f64> {
        self.lowpass.apply(&self.highpass.apply(input))
    }

    /// Zero-phase forward-backward filtering with odd-reflection padding at both ends.
    pub fn filtfilt(&self, input: &[f64]) -> Vec<f64> {
        let n = input.len();
        if n < 2 {
            return input.to_vec();
        }
        let pad = self.pad_len.min(n - 1);
        let first = input[0];
        let last = input[n - 1];

        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - input[i]));
        extended.extend_from_slice(input);
        extended.extend((1..=pad).map(|i| 2.0 * last - input[n - 1 - i]));

        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();
        backward[pad..pad + n].to_vec()
    }
}
