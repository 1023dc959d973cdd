use std::io::Write;

use crate::Result;
use crate::ass_encoder::AssEncoder;
use crate::captions::{CaptionCue, CaptionStyle};
use crate::cue_encoder::write_all_cues;
use crate::json_array_encoder::JsonArrayEncoder;
use crate::vtt_encoder::VttEncoder;

/// The supported serializations for caption cues.
///
/// Each variant maps to a concrete `CueEncoder` implementation; with the `cli` feature the
/// enum doubles as a `clap` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputType {
    /// Cues as a JSON array.
    Json,

    /// WebVTT subtitles.
    Vtt,

    /// Styled Advanced SubStation Alpha script (what gets burned into the video).
    Ass,
}

impl OutputType {
    /// Conventional file extension for this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Vtt => "vtt",
            Self::Ass => "ass",
        }
    }

    /// Encode `cues` to `w` in this format. `style` only applies to `Ass`.
    pub fn write_cues<W: Write>(self, w: W, cues: &[CaptionCue], style: &CaptionStyle) -> Result<()> {
        match self {
            Self::Json => write_all_cues(&mut JsonArrayEncoder::new(w), cues),
            Self::Vtt => write_all_cues(&mut VttEncoder::new(w), cues),
            Self::Ass => write_all_cues(&mut AssEncoder::new(w, style.clone()), cues),
        }
    }
}
