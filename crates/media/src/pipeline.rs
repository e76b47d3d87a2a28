//! Per-call audio pipeline: μ-law frame in, 16 kHz ASR chunk out, plus the
//! frame-level signals the session acts on (barge-in, voice activity, the
//! long-silence backchannel cue).

use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::denoise::SpectralNoiseGate;
use crate::resampler::Upsampler8kTo16k;
use crate::ulaw::{rms_normalized, ulaw_decode};
use crate::wav::WavDumpWriter;
use crate::MediaError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Caller RMS above this interrupts active playback.
    pub barge_in_threshold: f32,
    /// Frames below this count as silent.
    pub silence_threshold: f32,
    pub noise_suppression: bool,
    /// Quiet time before a single backchannel cue per silence episode.
    pub backchannel_silence_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            barge_in_threshold: 0.005,
            silence_threshold: 0.005,
            noise_suppression: true,
            backchannel_silence_secs: 2.0,
        }
    }
}

/// What one 20 ms frame produced.
#[derive(Debug)]
pub struct FrameOutcome {
    /// Resampled PCM16 at 16 kHz, ready for the ASR queue.
    pub pcm_16k: Vec<i16>,
    pub rms: f32,
    pub is_voice: bool,
    /// Caller spoke over active playback; break it.
    pub barge_in: bool,
    /// Silence has lasted long enough to warrant one "はい" nudge.
    pub backchannel_due: bool,
}

pub struct AudioPipeline {
    config: PipelineConfig,
    upsampler: Upsampler8kTo16k,
    gate: Option<SpectralNoiseGate>,
    recorder: Option<WavDumpWriter>,
    last_voice_at: Option<Instant>,
    first_silence_at: Option<Instant>,
    backchannel_sent: bool,
}

impl AudioPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, MediaError> {
        let gate = config.noise_suppression.then(SpectralNoiseGate::new);
        Ok(Self {
            config,
            upsampler: Upsampler8kTo16k::new()?,
            gate,
            recorder: None,
            last_voice_at: None,
            first_silence_at: None,
            backchannel_sent: false,
        })
    }

    /// Starts dumping the raw 8 kHz path to a WAV (debug / recording
    /// fallback).
    pub fn arm_recording(&mut self, path: &Path) -> Result<(), MediaError> {
        self.recorder = Some(WavDumpWriter::create(path, 8000)?);
        Ok(())
    }

    pub fn recording_armed(&self) -> bool {
        self.recorder.is_some()
    }

    /// Seconds since the last voiced frame, if any voice was ever seen.
    pub fn seconds_since_voice(&self) -> Option<f64> {
        self.last_voice_at.map(|t| t.elapsed().as_secs_f64())
    }

    /// Processes one μ-law frame.
    ///
    /// `playback_active` and `in_initial_greeting` come from the playback
    /// coordinator: barge-in only applies while a reply is playing and never
    /// during the protected greeting sequence.
    pub fn process_ulaw_frame(
        &mut self,
        payload: &[u8],
        playback_active: bool,
        in_initial_greeting: bool,
    ) -> Result<FrameOutcome, MediaError> {
        let mut pcm_8k = ulaw_decode(payload);
        let rms = rms_normalized(&pcm_8k);
        let is_voice = rms >= self.config.silence_threshold;
        let now = Instant::now();

        let mut barge_in = false;
        let mut backchannel_due = false;

        if is_voice {
            self.last_voice_at = Some(now);
            self.first_silence_at = None;
            self.backchannel_sent = false;
            if rms > self.config.barge_in_threshold && playback_active && !in_initial_greeting {
                barge_in = true;
            }
        } else {
            if self.first_silence_at.is_none() {
                self.first_silence_at = Some(now);
                debug!(rms, "first silent frame of episode");
            }
            if self.last_voice_at.is_none() {
                // silent stream from the start still counts as alive
                self.last_voice_at = Some(now);
            }
            if let Some(last_voice) = self.last_voice_at
                && last_voice.elapsed().as_secs_f64() >= self.config.backchannel_silence_secs
                && !self.backchannel_sent
            {
                self.backchannel_sent = true;
                backchannel_due = true;
            }
        }

        if let Some(gate) = self.gate.as_mut() {
            gate.process_frame(&mut pcm_8k);
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.append(&pcm_8k)?;
        }

        let pcm_16k = self.upsampler.process_frame(&pcm_8k)?;

        Ok(FrameOutcome {
            pcm_16k,
            rms,
            is_voice,
            barge_in,
            backchannel_due,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ulaw::ulaw_encode;

    fn voice_frame() -> Vec<u8> {
        let pcm: Vec<i16> = (0..160)
            .map(|i| ((i as f32 * 0.4).sin() * 12000.0) as i16)
            .collect();
        ulaw_encode(&pcm)
    }

    fn silent_frame() -> Vec<u8> {
        ulaw_encode(&[0i16; 160])
    }

    fn pipeline() -> AudioPipeline {
        AudioPipeline::new(PipelineConfig {
            noise_suppression: false,
            ..PipelineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn voice_frame_is_detected() {
        let mut p = pipeline();
        let out = p.process_ulaw_frame(&voice_frame(), false, false).unwrap();
        assert!(out.is_voice);
        assert!(out.rms > 0.005);
        assert!(!out.barge_in);
    }

    #[test]
    fn barge_in_requires_playback_outside_greeting() {
        let mut p = pipeline();
        let out = p.process_ulaw_frame(&voice_frame(), true, false).unwrap();
        assert!(out.barge_in);

        let mut p = pipeline();
        let out = p.process_ulaw_frame(&voice_frame(), true, true).unwrap();
        assert!(!out.barge_in, "greeting window must suppress barge-in");

        let mut p = pipeline();
        let out = p.process_ulaw_frame(&silent_frame(), true, false).unwrap();
        assert!(!out.barge_in, "silence never barges in");
    }

    #[test]
    fn backchannel_fires_once_per_episode() {
        let mut p = AudioPipeline::new(PipelineConfig {
            noise_suppression: false,
            backchannel_silence_secs: 0.0,
            ..PipelineConfig::default()
        })
        .unwrap();
        // voice first so the silence episode has a reference point
        p.process_ulaw_frame(&voice_frame(), false, false).unwrap();
        let first = p.process_ulaw_frame(&silent_frame(), false, false).unwrap();
        assert!(first.backchannel_due);
        let second = p.process_ulaw_frame(&silent_frame(), false, false).unwrap();
        assert!(!second.backchannel_due, "debounced within the episode");
        // new voice resets the episode
        p.process_ulaw_frame(&voice_frame(), false, false).unwrap();
        let third = p.process_ulaw_frame(&silent_frame(), false, false).unwrap();
        assert!(third.backchannel_due);
    }

    #[test]
    fn produces_16k_audio() {
        let mut p = pipeline();
        let mut total = 0usize;
        for _ in 0..25 {
            total += p
                .process_ulaw_frame(&voice_frame(), false, false)
                .unwrap()
                .pcm_16k
                .len();
        }
        assert!(total > 160 * 2 * 20, "expected roughly 2x upsampling");
    }

    #[test]
    fn recording_captures_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.wav");
        let mut p = pipeline();
        p.arm_recording(&path).unwrap();
        for _ in 0..10 {
            p.process_ulaw_frame(&voice_frame(), false, false).unwrap();
        }
        drop(p);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 1600);
    }
}
