//! Streaming 8 kHz → 16 kHz upsampling for the ASR feed.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async as AsyncResampler, FixedAsync, Resampler as RubatoResampler,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::MediaError;

/// One 20 ms telephony frame at 8 kHz.
pub const FRAME_SAMPLES_8K: usize = 160;

/// Persistent ×2 upsampler fed one 160-sample frame at a time. The sinc
/// filter keeps state between frames so chunk boundaries stay continuous.
pub struct Upsampler8kTo16k {
    resampler: AsyncResampler<f32>,
    scratch: Vec<f32>,
}

impl Upsampler8kTo16k {
    pub fn new() -> Result<Self, MediaError> {
        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = AsyncResampler::<f32>::new_sinc(
            2.0,
            2.0,
            &params,
            FRAME_SAMPLES_8K,
            1, // mono
            FixedAsync::Input,
        )
        .map_err(|e| MediaError::Resample(e.to_string()))?;
        Ok(Self {
            resampler,
            scratch: Vec::with_capacity(FRAME_SAMPLES_8K),
        })
    }

    /// Upsamples one frame of PCM16 at 8 kHz to PCM16 at 16 kHz.
    /// Short trailing frames are zero-padded to the fixed input size.
    pub fn process_frame(&mut self, pcm_8k: &[i16]) -> Result<Vec<i16>, MediaError> {
        self.scratch.clear();
        self.scratch
            .extend(pcm_8k.iter().map(|s| *s as f32 / 32768.0));
        self.scratch.resize(FRAME_SAMPLES_8K, 0.0);

        let input = InterleavedSlice::new(&self.scratch, 1, FRAME_SAMPLES_8K)
            .map_err(|e| MediaError::Resample(e.to_string()))?;
        let result = self
            .resampler
            .process(&input, 0, None)
            .map_err(|e| MediaError::Resample(e.to_string()))?;

        Ok(result
            .take_data()
            .into_iter()
            .map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_sample_count_in_steady_state() {
        let mut up = Upsampler8kTo16k::new().unwrap();
        let frame: Vec<i16> = (0..FRAME_SAMPLES_8K)
            .map(|i| ((i as f32 * 0.2).sin() * 8000.0) as i16)
            .collect();
        let mut total_out = 0usize;
        for _ in 0..50 {
            total_out += up.process_frame(&frame).unwrap().len();
        }
        // filter delay trims the first frames; within 5% of 2x overall
        let expected = FRAME_SAMPLES_8K * 2 * 50;
        assert!(
            total_out as f64 > expected as f64 * 0.95,
            "only {total_out} of {expected} samples out"
        );
    }

    #[test]
    fn silence_stays_silent() {
        let mut up = Upsampler8kTo16k::new().unwrap();
        for _ in 0..10 {
            let out = up.process_frame(&[0i16; FRAME_SAMPLES_8K]).unwrap();
            assert!(out.iter().all(|s| s.unsigned_abs() < 64));
        }
    }

    #[test]
    fn preserves_energy_roughly() {
        let mut up = Upsampler8kTo16k::new().unwrap();
        let frame: Vec<i16> = (0..FRAME_SAMPLES_8K)
            .map(|i| ((i as f32 * 0.3).sin() * 12000.0) as i16)
            .collect();
        // skip filter warmup, then compare RMS
        for _ in 0..10 {
            up.process_frame(&frame).unwrap();
        }
        let out = up.process_frame(&frame).unwrap();
        let in_rms = crate::ulaw::rms_normalized(&frame);
        let out_rms = crate::ulaw::rms_normalized(&out);
        assert!((in_rms - out_rms).abs() < in_rms * 0.5);
    }
}
