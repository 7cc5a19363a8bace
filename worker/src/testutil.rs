use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vitals_common::sample::Sample;

const START_MS: u64 = 1_708_300_000_000;
const NOISE_SEED: u64 = 0x2545_f491_4f6c_dd1d;

/// Pure pulse tone on the green channel, with steady red and blue.
pub fn tone(bpm: f64, secs: f64, fs: f64, amplitude: f64) -> Vec<Sample> {
    noisy_tone(bpm, secs, fs, amplitude, 0.0)
}

/// Pulse tone plus seeded uniform noise of the given peak amplitude.
pub fn noisy_tone(bpm: f64, secs: f64, fs: f64, amplitude: f64, noise: f64) -> Vec<Sample> {
    let n = (secs * fs).round() as usize;
    let freq = bpm / 60.0;
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            let jitter = if noise > 0.0 {
                noise * rng.gen_range(-1.0..1.0)
            } else {
                0.0
            };
            let g = 120.0 + amplitude * (2.0 * PI * freq * t).sin() + jitter;
            Sample::new(150.0, g, 100.0, START_MS + (i as f64 * 1000.0 / fs).round() as u64)
        })
        .collect()
}
