use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::framer::SAMPLE_RATE;
use crate::{Error, Result};

/// Interleaved capture audio decoded from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureAudio {
    /// Interleaved samples normalized to `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl CaptureAudio {
    /// Number of samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Load capture audio from a reader.
///
/// Accepts mono or stereo at 16 kHz, as 16-bit PCM or 32-bit float. Anything else is
/// rejected here so the framer only ever sees the capture format it expects.
pub fn read_capture<R>(reader: R) -> Result<CaptureAudio>
where
    R: Read + Seek,
{
    let mut reader = WavReader::new(reader)?;
    let spec = reader.spec();

    if !(1..=2).contains(&spec.channels) {
        return Err(Error::msg(format!(
            "expected mono or stereo WAV, got {} channels",
            spec.channels
        )));
    }

    if spec.sample_rate != SAMPLE_RATE {
        return Err(Error::msg(format!(
            "expected {SAMPLE_RATE} Hz sample rate, got {} Hz",
            spec.sample_rate
        )));
    }

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|pcm| pcm as f32 / i16::MAX as f32))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(Error::msg(format!(
                "unsupported WAV sample format {format:?} at {bits} bits"
            )));
        }
    };

    Ok(CaptureAudio {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Load capture audio from a WAV file on disk.
pub fn read_capture_file(path: impl AsRef<Path>) -> Result<CaptureAudio> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|err| Error::msg(format!("failed to open '{}': {err}", path.display())))?;
    read_capture(BufReader::new(file))
}
