use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Audio producer that renders interleaved `f32` frames on demand.
pub trait Synthesizer: Send + 'static {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn total_frames(&self) -> u64;
    /// Fills `out` with the next frames and returns how many were written.
    /// Zero means the track is exhausted.
    fn render(&mut self, out: &mut [f32]) -> usize;
}

/// Streams a pre-rendered WAV track as if it were being synthesized.
pub struct WavSynthesizer {
    reader: hound::WavReader<BufReader<File>>,
    spec: hound::WavSpec,
    total_frames: u64,
    failed: bool,
}

impl WavSynthesizer {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path).context("failed to parse WAV header")?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(anyhow!("WAV track has no channels"));
        }
        if spec.sample_format == hound::SampleFormat::Int && spec.bits_per_sample > 32 {
            return Err(anyhow!(
                "unsupported WAV sample width {}",
                spec.bits_per_sample
            ));
        }
        let total_frames = u64::from(reader.duration());
        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            total_frames,
            "opened audio track"
        );
        Ok(Self {
            reader,
            spec,
            total_frames,
            failed: false,
        })
    }

    fn next_sample(&mut self) -> Option<f32> {
        let sample = match self.spec.sample_format {
            hound::SampleFormat::Float => self.reader.samples::<f32>().next()?,
            hound::SampleFormat::Int => {
                let max = (1u64 << (self.spec.bits_per_sample - 1)) as f32;
                self.reader
                    .samples::<i32>()
                    .next()?
                    .map(|value| value as f32 / max)
            }
        };
        match sample {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(error = %err, "audio track ended early");
                self.failed = true;
                None
            }
        }
    }
}

impl Synthesizer for WavSynthesizer {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channels(&self) -> u16 {
        self.spec.channels
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn render(&mut self, out: &mut [f32]) -> usize {
        if self.failed {
            return 0;
        }
        let channels = usize::from(self.spec.channels);
        let mut frames = 0;
        for frame in out.chunks_exact_mut(channels) {
            for slot in frame.iter_mut() {
                match self.next_sample() {
                    Some(value) => *slot = value,
                    None => return frames,
                }
            }
            frames += 1;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_track(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i as i16).unwrap();
            writer.write_sample(-(i as i16)).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn wav_track_renders_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        write_track(&path, 1000);

        let mut synth = WavSynthesizer::open(&path).unwrap();
        assert_eq!(synth.sample_rate(), 8000);
        assert_eq!(synth.total_frames(), 1000);

        let mut block = vec![0.0f32; 2 * 300];
        let mut rendered = 0;
        loop {
            let frames = synth.render(&mut block);
            if frames == 0 {
                break;
            }
            if rendered == 0 {
                assert_eq!(block[2], 1.0 / 32768.0);
                assert_eq!(block[3], -1.0 / 32768.0);
            }
            rendered += frames;
        }
        assert_eq!(rendered, 1000);
    }

    #[test]
    fn missing_track_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WavSynthesizer::open(&dir.path().join("absent.wav")).is_err());
    }
}
