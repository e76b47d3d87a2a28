//! WAV helpers: playback duration estimation, silence pad generation, and
//! debug dump writing.

use std::path::{Path, PathBuf};

use crate::MediaError;

/// Estimates how long a telephony WAV will play, from its file size.
/// 8 kHz 16-bit mono is 16000 bytes/s after the 44-byte header; anything
/// unreadable gets a 2 s fallback so the queue always advances.
pub fn estimate_playback_secs(path: &Path) -> f64 {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let payload = meta.len().saturating_sub(44) as f64;
            (payload / 16000.0).max(0.5)
        }
        Err(_) => 2.0,
    }
}

/// Writes a silent 8 kHz PCM16 mono WAV of the given duration. Used for the
/// pad broadcast ahead of the greeting sequence.
pub fn write_silence_wav(path: &Path, duration_secs: f64) -> Result<(), MediaError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    let samples = (8000.0 * duration_secs).max(1.0) as usize;
    for _ in 0..samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Append-style WAV writer for per-call debug dumps and the software
/// recording fallback. Finalized on drop or by an explicit `finish`.
pub struct WavDumpWriter {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
    path: PathBuf,
    samples_written: u64,
    sample_rate: u32,
}

impl WavDumpWriter {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self, MediaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)?;
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            samples_written: 0,
            sample_rate,
        })
    }

    pub fn append(&mut self, samples: &[i16]) -> Result<(), MediaError> {
        if let Some(writer) = self.writer.as_mut() {
            for s in samples {
                writer.write_sample(*s)?;
            }
            self.samples_written += samples.len() as u64;
        }
        Ok(())
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples_written as f64 / self.sample_rate as f64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> Result<(), MediaError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavDumpWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take()
            && let Err(e) = writer.finalize()
        {
            tracing::warn!(path = %self.path.display(), error = %e, "wav finalize failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_from_size_with_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.wav");
        std::fs::write(&short, vec![0u8; 44 + 1600]).unwrap(); // 0.1 s payload
        assert!((estimate_playback_secs(&short) - 0.5).abs() < 1e-9);

        let two_sec = dir.path().join("two.wav");
        std::fs::write(&two_sec, vec![0u8; 44 + 32000]).unwrap();
        assert!((estimate_playback_secs(&two_sec) - 2.0).abs() < 1e-9);

        // unreadable file falls back
        assert!((estimate_playback_secs(&dir.path().join("missing.wav")) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn silence_wav_has_expected_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pad.wav");
        write_silence_wav(&path, 0.5).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 4000);
    }

    #[test]
    fn dump_writer_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.wav");
        let mut w = WavDumpWriter::create(&path, 8000).unwrap();
        w.append(&[1i16, -1, 100, -100]).unwrap();
        assert!(w.duration_secs() > 0.0);
        w.finish().unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.into_samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, -1, 100, -100]);
    }
}
