pub mod denoise;
pub mod pipeline;
pub mod resampler;
pub mod rtp;
pub mod ulaw;
pub mod wav;

pub use denoise::SpectralNoiseGate;
pub use pipeline::{AudioPipeline, FrameOutcome, PipelineConfig};
pub use resampler::Upsampler8kTo16k;
pub use rtp::{RtpHeader, RtpPacket};
pub use ulaw::{linear_to_ulaw, rms_normalized, ulaw_decode, ulaw_encode, ulaw_to_linear};
pub use wav::{WavDumpWriter, estimate_playback_secs, write_silence_wav};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("resampler error: {0}")]
    Resample(String),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
