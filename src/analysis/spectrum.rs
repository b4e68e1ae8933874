//! Smoothed magnitude spectrum over an analyser window

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Floor and ceiling of the normalized decibel range
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Per-tap FFT state; all buffers are sized once up front
pub(crate) struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    output: Vec<f32>,
    smoothing: f32,
}

impl Spectrum {
    pub(crate) fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            fft,
            window: blackman(fft_size),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            smoothed: vec![0.0; fft_size / 2],
            output: vec![0.0; fft_size / 2],
            smoothing,
        }
    }

    /// Update the smoothed spectrum from a time-domain window
    ///
    /// Returns one value per bin in [0, 1].
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn process(&mut self, waveform: &[f32]) -> &[f32] {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(waveform).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let size = self.buffer.len() as f32;
        let tau = self.smoothing;
        for (bin, (smoothed, out)) in self
            .smoothed
            .iter_mut()
            .zip(self.output.iter_mut())
            .enumerate()
        {
            let magnitude = self.buffer[bin].norm() / size;
            *smoothed = tau.mul_add(*smoothed, (1.0 - tau) * magnitude);

            let db = 20.0 * smoothed.max(f32::MIN_POSITIVE).log10();
            *out = ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0);
        }

        &self.output
    }
}

#[allow(clippy::cast_precision_loss)]
fn blackman(size: usize) -> Vec<f32> {
    let alpha = 0.16_f32;
    let a0 = 0.5 * (1.0 - alpha);
    let a1 = 0.5_f32;
    let a2 = 0.5 * alpha;
    let n = size as f32;

    (0..size)
        .map(|i| {
            let x = i as f32 / n;
            let tau = std::f32::consts::TAU;
            a2.mul_add((2.0 * tau * x).cos(), a1.mul_add(-(tau * x).cos(), a0))
        })
        .collect()
}
