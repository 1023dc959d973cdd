use std::io::Write;

use crate::Result;
use crate::captions::CaptionCue;
use crate::cue_encoder::{CueEncoder, DocState};

/// A `CueEncoder` that streams WebVTT.
///
/// Cues are numbered from 1 so players and editors can refer to them. The `WEBVTT` header is
/// only written once a cue arrives; closing an encoder that saw no cues writes nothing.
pub struct VttEncoder<W: Write> {
    w: W,
    state: DocState,
    cues_written: usize,
}

impl<W: Write> VttEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            state: DocState::default(),
            cues_written: 0,
        }
    }
}

impl<W: Write> CueEncoder for VttEncoder<W> {
    fn write_cue(&mut self, cue: &CaptionCue) -> Result<()> {
        if self.state.open()? {
            self.w.write_all(b"WEBVTT\n\n")?;
        }

        self.cues_written += 1;
        write!(
            &mut self.w,
            "{}\n{} --> {}\n{}\n\n",
            self.cues_written,
            vtt_timestamp(cue.start_seconds),
            vtt_timestamp(cue.end_seconds),
            escape_cue_text(&cue.text),
        )?;
        self.w.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.state.close().is_some() {
            self.w.flush()?;
        }
        Ok(())
    }
}

/// `HH:MM:SS.mmm`, nearest millisecond, negatives clamped to zero.
fn vtt_timestamp(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (secs, ms) = (millis / 1000, millis % 1000);
    format!(
        "{:02}:{:02}:{:02}.{ms:03}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60
    )
}

/// Cue payloads may not contain blank lines or raw markup characters.
fn escape_cue_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_encoder::write_all_cues;

    #[test]
    fn silent_clips_produce_no_document() -> anyhow::Result<()> {
        let mut out = Vec::new();
        write_all_cues(&mut VttEncoder::new(&mut out), &[])?;
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn cues_are_numbered_under_a_single_header() -> anyhow::Result<()> {
        let mut out = Vec::new();
        write_all_cues(
            &mut VttEncoder::new(&mut out),
            &[
                CaptionCue::new(0.0, 1.2346, "so the thing is"),
                CaptionCue::new(61.25, 62.0, "we shipped it"),
            ],
        )?;

        let s = std::str::from_utf8(&out)?;
        assert_eq!(
            s,
            "WEBVTT\n\n\
             1\n00:00:00.000 --> 00:00:01.235\nso the thing is\n\n\
             2\n00:01:01.250 --> 00:01:02.000\nwe shipped it\n\n"
        );
        Ok(())
    }

    #[test]
    fn markup_and_blank_lines_are_neutralized() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = VttEncoder::new(&mut out);
        enc.write_cue(&CaptionCue::new(0.0, 1.0, "a <b> & c\n\n d"))?;
        enc.close()?;

        assert!(std::str::from_utf8(&out)?.contains("a &lt;b&gt; &amp; c\nd\n\n"));
        Ok(())
    }

    #[test]
    fn timestamps_round_and_clamp() {
        assert_eq!(vtt_timestamp(0.0004), "00:00:00.000");
        assert_eq!(vtt_timestamp(3725.5), "01:02:05.500");
        assert_eq!(vtt_timestamp(-2.0), "00:00:00.000");
    }

    #[test]
    fn writes_after_close_are_rejected() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = VttEncoder::new(&mut out);
        enc.close()?;
        let err = enc.write_cue(&CaptionCue::new(0.0, 1.0, "late")).unwrap_err();
        assert!(err.to_string().contains("already closed"));
        Ok(())
    }
}
