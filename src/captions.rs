//! Caption cues for one clip window.
//!
//! Words are grouped into short bursts of at most `max_words_per_cue` words, with times shifted
//! so `0.0` is the start of the clip. Only words fully inside the window are used; a word that
//! straddles a window edge would otherwise flash on screen for a fraction of a second.

use serde::Serialize;

use crate::moments::ClipWindow;
use crate::transcript::TranscriptToken;

/// One on-screen subtitle event, in seconds relative to the clip start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionCue {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl CaptionCue {
    pub fn new(start_seconds: f64, end_seconds: f64, text: impl Into<String>) -> Self {
        Self {
            start_seconds,
            end_seconds,
            text: text.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Group the words inside `window` into clip-relative caption cues.
///
/// Cues come out start-ordered and non-overlapping: a cue never starts before the previous
/// cue ended, even if the aligner produced overlapping word timings.
pub fn segment_captions(
    tokens: &[TranscriptToken],
    window: ClipWindow,
    max_words_per_cue: usize,
) -> Vec<CaptionCue> {
    let max_words = max_words_per_cue.max(1);

    let mut inside: Vec<&TranscriptToken> = tokens
        .iter()
        .filter(|token| token.is_within(window.start, window.end))
        .collect();
    inside.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut cues = Vec::new();
    let mut open: Option<OpenCue> = None;
    let mut last_end = 0.0_f64;

    for token in inside {
        let text = token.text.trim();
        if text.is_empty() {
            continue;
        }

        let rel_start = (token.start - window.start).max(0.0);
        let rel_end = token.end - window.start;
        if rel_end <= 0.0 {
            continue;
        }

        if let Some(cue) = open.as_mut() {
            if cue.words.len() < max_words {
                cue.words.push(text);
                cue.end = cue.end.max(rel_end);
                continue;
            }
        }

        if let Some(done) = open.take() {
            last_end = done.end;
            cues.push(done.finish());
        }
        let start = rel_start.max(last_end);
        open = Some(OpenCue {
            start,
            end: rel_end.max(start),
            words: vec![text],
        });
    }

    if let Some(done) = open {
        cues.push(done.finish());
    }

    cues
}

/// The clip's spoken text, used for metadata generation.
pub fn script_text(cues: &[CaptionCue]) -> String {
    cues.iter()
        .map(|cue| cue.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

struct OpenCue<'a> {
    start: f64,
    end: f64,
    words: Vec<&'a str>,
}

impl OpenCue<'_> {
    fn finish(self) -> CaptionCue {
        CaptionCue::new(self.start, self.end, self.words.join(" "))
    }
}

/// An RGBA colour; alpha `0` is opaque, matching subtitle renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl CueColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Bottom-centre in numpad notation.
pub const ALIGN_BOTTOM_CENTER: u8 = 2;

/// Cosmetic styling for burned-in captions.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    pub font_name: String,
    pub font_size: u32,
    pub primary_color: CueColor,
    pub secondary_color: CueColor,
    pub outline_color: CueColor,
    pub shadow_color: CueColor,
    pub bold: bool,
    pub border_style: u8,
    pub outline: f32,
    pub shadow: f32,
    pub alignment: u8,
    pub margin_left: u32,
    pub margin_right: u32,
    pub margin_vertical: u32,
    pub spacing: f32,
    pub play_res_x: u32,
    pub play_res_y: u32,
}

impl CaptionStyle {
    /// Default style scaled to a canvas size.
    pub fn for_canvas(width: u32, height: u32) -> Self {
        Self {
            play_res_x: width,
            play_res_y: height,
            ..Self::default()
        }
    }
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_name: "Anton".to_owned(),
            font_size: 140,
            primary_color: CueColor::rgb(255, 255, 255),
            secondary_color: CueColor::rgb(255, 0, 0),
            outline_color: CueColor::rgb(0, 0, 0),
            shadow_color: CueColor::rgba(0, 0, 0, 128),
            bold: false,
            border_style: 1,
            outline: 2.0,
            shadow: 2.0,
            alignment: ALIGN_BOTTOM_CENTER,
            margin_left: 50,
            margin_right: 50,
            margin_vertical: 50,
            spacing: 0.0,
            play_res_x: 1080,
            play_res_y: 1920,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(start: f64, end: f64, text: &str) -> TranscriptToken {
        TranscriptToken::new(start, end, text)
    }

    fn window(start: f64, end: f64) -> ClipWindow {
        ClipWindow { start, end }
    }

    #[test]
    fn groups_words_into_bursts_relative_to_the_window() {
        let tokens: Vec<TranscriptToken> = (0..7)
            .map(|i| word(10.0 + i as f64, 10.5 + i as f64, &format!("w{i}")))
            .collect();

        let cues = segment_captions(&tokens, window(10.0, 60.0), 3);
        assert_eq!(
            cues,
            vec![
                CaptionCue::new(0.0, 2.5, "w0 w1 w2"),
                CaptionCue::new(3.0, 5.5, "w3 w4 w5"),
                CaptionCue::new(6.0, 6.5, "w6"),
            ]
        );
    }

    #[test]
    fn only_fully_contained_words_are_captioned() {
        let tokens = vec![
            word(9.5, 10.2, "straddles-start"),
            word(10.0, 10.4, "first"),
            word(19.0, 19.9, "last"),
            word(19.8, 20.3, "straddles-end"),
        ];

        let cues = segment_captions(&tokens, window(10.0, 20.0), 5);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "first last");
    }

    #[test]
    fn zero_length_word_at_window_start_is_skipped() {
        let tokens = vec![word(10.0, 10.0, "blip"), word(10.25, 10.5, "kept")];
        let cues = segment_captions(&tokens, window(10.0, 20.0), 5);
        assert_eq!(cues, vec![CaptionCue::new(0.25, 0.5, "kept")]);
    }

    #[test]
    fn window_outside_transcript_yields_no_cues() {
        let tokens = vec![word(0.0, 1.0, "a"), word(1.0, 2.0, "b")];
        assert!(segment_captions(&tokens, window(100.0, 140.0), 5).is_empty());
    }

    #[test]
    fn overlapping_word_timings_never_produce_overlapping_cues() {
        let tokens = vec![
            word(0.0, 3.0, "a"),
            word(0.5, 1.0, "b"),
            word(1.0, 1.5, "c"),
            word(1.2, 1.4, "d"),
        ];

        let cues = segment_captions(&tokens, window(0.0, 10.0), 2);
        assert_eq!(cues.len(), 2);
        for pair in cues.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds);
        }
        assert!(cues.iter().all(|cue| cue.word_count() <= 2));
    }

    #[test]
    fn zero_max_words_behaves_like_one() {
        let tokens = vec![word(0.0, 1.0, "a"), word(1.0, 2.0, "b")];
        let cues = segment_captions(&tokens, window(0.0, 10.0), 0);
        assert_eq!(cues.len(), 2);
    }

    #[test]
    fn script_text_joins_cues() {
        let cues = vec![CaptionCue::new(0.0, 1.0, "hello there"), CaptionCue::new(1.0, 2.0, "friend")];
        assert_eq!(script_text(&cues), "hello there friend");
        assert_eq!(script_text(&[]), "");
    }
}
