//! Single-channel spectral noise gate for the 8 kHz caller path.
//!
//! Keeps a running estimate of the noise floor per frequency bin (updated
//! during quiet frames) and attenuates bins that do not rise above it. This
//! is a gate, not a full suppressor: speech-level bins pass through intact
//! so ASR accuracy is never traded for comfort noise removal.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

const FFT_SIZE: usize = 256;
/// Bins must exceed noise floor by this factor to pass unattenuated.
const GATE_FACTOR: f32 = 2.0;
/// Residual gain for gated bins.
const GATE_FLOOR: f32 = 0.15;
/// Noise floor EMA coefficient (applied on quiet frames).
const FLOOR_ALPHA: f32 = 0.1;
/// Frame RMS below this is treated as noise-only for floor adaptation.
const QUIET_RMS: f32 = 0.004;

pub struct SpectralNoiseGate {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    noise_floor: Vec<f32>,
    floor_ready: bool,
    buf: Vec<Complex<f32>>,
}

impl Default for SpectralNoiseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralNoiseGate {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(FFT_SIZE),
            inverse: planner.plan_fft_inverse(FFT_SIZE),
            noise_floor: vec![0.0; FFT_SIZE],
            floor_ready: false,
            buf: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Processes one PCM16 frame in place. Frames longer than the FFT size
    /// are processed in FFT-size blocks; a short tail passes through.
    pub fn process_frame(&mut self, samples: &mut [i16]) {
        let mut offset = 0;
        while offset + FFT_SIZE <= samples.len() {
            self.process_block(&mut samples[offset..offset + FFT_SIZE]);
            offset += FFT_SIZE;
        }
        // 160-sample telephony frames are shorter than one block; batch them
        // through a padded block instead.
        if offset == 0 && !samples.is_empty() {
            let mut padded = [0i16; FFT_SIZE];
            padded[..samples.len()].copy_from_slice(samples);
            self.process_block(&mut padded);
            samples.copy_from_slice(&padded[..samples.len()]);
        }
    }

    fn process_block(&mut self, block: &mut [i16]) {
        let rms = crate::ulaw::rms_normalized(block);

        for (dst, src) in self.buf.iter_mut().zip(block.iter()) {
            *dst = Complex::new(*src as f32 / 32768.0, 0.0);
        }
        self.forward.process(&mut self.buf);

        if rms < QUIET_RMS {
            for (floor, bin) in self.noise_floor.iter_mut().zip(self.buf.iter()) {
                *floor = (1.0 - FLOOR_ALPHA) * *floor + FLOOR_ALPHA * bin.norm();
            }
            self.floor_ready = true;
        }

        if self.floor_ready {
            for (bin, floor) in self.buf.iter_mut().zip(self.noise_floor.iter()) {
                if bin.norm() < *floor * GATE_FACTOR {
                    *bin *= GATE_FLOOR;
                }
            }
        }

        self.inverse.process(&mut self.buf);
        let scale = 1.0 / FFT_SIZE as f32;
        for (dst, src) in block.iter_mut().zip(self.buf.iter()) {
            *dst = ((src.re * scale).clamp(-1.0, 1.0) * 32767.0) as i16;
        }
    }
}
