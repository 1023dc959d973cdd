use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use anyhow::{Context, bail};
use hound::{SampleFormat, WavReader, WavSpec};

use crate::Result;

/// Sample rate the transcriber expects; the codec extracts audio at this rate.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Load clip audio from a reader as mono samples normalized to `[-1.0, 1.0]`.
///
/// We only accept what the codec's audio extraction produces: mono 16-bit PCM at
/// [`TARGET_SAMPLE_RATE`]. Anything else means the extraction step was skipped or misconfigured,
/// and resampling here would hide that.
pub fn samples_from_reader<R>(reader: R) -> Result<(Vec<f32>, WavSpec)>
where
    R: Read + Seek,
{
    Ok(read_samples(reader)?)
}

fn read_samples<R>(reader: R) -> anyhow::Result<(Vec<f32>, WavSpec)>
where
    R: Read + Seek,
{
    let mut reader = WavReader::new(reader).context("failed to read WAV data")?;
    let spec = reader.spec();

    if spec.channels != 1 {
        bail!("expected mono WAV (1 channel), got {} channels", spec.channels);
    }
    if spec.sample_rate != TARGET_SAMPLE_RATE {
        bail!(
            "expected {TARGET_SAMPLE_RATE} Hz sample rate, got {} Hz",
            spec.sample_rate
        );
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "expected 16-bit integer PCM, got {} bits ({:?})",
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let samples = reader
        .samples::<i16>()
        .map(|sample| sample.map(|pcm| f32::from(pcm) / f32::from(i16::MAX)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to decode WAV samples")?;

    Ok((samples, spec))
}

/// [`samples_from_reader`] for a file on disk.
pub fn samples_from_path(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let (samples, _) = samples_from_reader(BufReader::new(file))?;
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use hound::WavWriter;

    use super::*;

    fn wav_bytes(spec: WavSpec, samples: &[i16]) -> anyhow::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec)?;
            for s in samples {
                writer.write_sample(*s)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    fn spec(channels: u16, sample_rate: u32) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn normalizes_mono_16k_pcm() -> anyhow::Result<()> {
        let bytes = wav_bytes(spec(1, TARGET_SAMPLE_RATE), &[0, i16::MAX, -i16::MAX])?;
        let (samples, spec) = samples_from_reader(Cursor::new(bytes))?;
        assert_eq!(spec.channels, 1);
        assert_eq!(samples, vec![0.0, 1.0, -1.0]);
        Ok(())
    }

    #[test]
    fn rejects_stereo_and_other_rates() -> anyhow::Result<()> {
        let stereo = wav_bytes(spec(2, TARGET_SAMPLE_RATE), &[0, 0])?;
        let err = samples_from_reader(Cursor::new(stereo)).unwrap_err();
        assert!(err.to_string().contains("mono"));

        let fast = wav_bytes(spec(1, 44_100), &[0])?;
        let err = samples_from_reader(Cursor::new(fast)).unwrap_err();
        assert!(err.to_string().contains("44100 Hz"));
        Ok(())
    }

    #[test]
    fn missing_files_name_the_path() {
        let err = samples_from_path(Path::new("/nonexistent/podclip/audio.wav")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/podclip/audio.wav"));
    }
}
