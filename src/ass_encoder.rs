use std::io::Write;

use crate::captions::{CaptionCue, CaptionStyle, CueColor};
use crate::Result;
use crate::cue_encoder::{CueEncoder, DocState};

/// Name of the single style every dialogue line refers to.
const STYLE_NAME: &str = "Default";

/// A `CueEncoder` that writes an Advanced SubStation Alpha (`.ass`) script.
///
/// This is the format the codec burns into the vertical video, so unlike the VTT encoder the
/// header (script info + style) is always written, even when there are no cues: an empty but
/// valid script lets the burn step run unchanged for silent clips.
pub struct AssEncoder<W: Write> {
    w: W,
    style: CaptionStyle,
    state: DocState,
}

impl<W: Write> AssEncoder<W> {
    pub fn new(w: W, style: CaptionStyle) -> Self {
        Self {
            w,
            style,
            state: DocState::default(),
        }
    }

    fn write_header(&mut self) -> Result<()> {
        let st = &self.style;
        write!(
            &mut self.w,
            "[Script Info]\n\
             ScriptType: v4.00+\n\
             PlayResX: {}\n\
             PlayResY: {}\n\
             WrapStyle: 0\n\
             ScaledBorderAndShadow: yes\n\n",
            st.play_res_x, st.play_res_y
        )?;

        writeln!(&mut self.w, "[V4+ Styles]")?;
        writeln!(
            &mut self.w,
            "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
             BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
             BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding"
        )?;
        writeln!(
            &mut self.w,
            "Style: {STYLE_NAME},{},{},{},{},{},{},{},0,0,0,100,100,{},0,{},{},{},{},{},{},{},1\n",
            st.font_name,
            st.font_size,
            ass_color(st.primary_color),
            ass_color(st.secondary_color),
            ass_color(st.outline_color),
            ass_color(st.shadow_color),
            if st.bold { -1 } else { 0 },
            st.spacing,
            st.border_style,
            st.outline,
            st.shadow,
            st.alignment,
            st.margin_left,
            st.margin_right,
            st.margin_vertical,
        )?;

        writeln!(&mut self.w, "[Events]")?;
        writeln!(
            &mut self.w,
            "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text"
        )?;

        Ok(())
    }
}

impl<W: Write> CueEncoder for AssEncoder<W> {
    fn write_cue(&mut self, cue: &CaptionCue) -> Result<()> {
        if self.state.open()? {
            self.write_header()?;
        }

        writeln!(
            &mut self.w,
            "Dialogue: 0,{},{},{STYLE_NAME},,0,0,0,,{}",
            format_timestamp_ass(cue.start_seconds),
            format_timestamp_ass(cue.end_seconds),
            escape_dialogue_text(&cue.text),
        )?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.state.close() {
            None => return Ok(()),
            Some(DocState::Fresh) => self.write_header()?,
            Some(_) => {}
        }
        self.w.flush()?;
        Ok(())
    }
}

/// `&HAABBGGRR`, alpha first and channels reversed.
fn ass_color(color: CueColor) -> String {
    format!(
        "&H{:02X}{:02X}{:02X}{:02X}",
        color.a, color.b, color.g, color.r
    )
}

/// `H:MM:SS.cc`; ASS only carries centiseconds.
fn format_timestamp_ass(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;

    let cs = total_cs % 100;
    let total_s = total_cs / 100;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;

    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// Braces open override blocks and raw newlines end the event line.
fn escape_dialogue_text(text: &str) -> String {
    text.replace('{', "(")
        .replace('}', ")")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\\N")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_still_has_header_and_style() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = AssEncoder::new(&mut out, CaptionStyle::default());
        enc.close()?;

        let s = std::str::from_utf8(&out)?;
        assert!(s.starts_with("[Script Info]\n"));
        assert!(s.contains("PlayResX: 1080\nPlayResY: 1920\n"));
        assert!(s.contains(
            "Style: Default,Anton,140,&H00FFFFFF,&H000000FF,&H00000000,&H80000000,0,0,0,0,100,100,0,0,1,2,2,2,50,50,50,1"
        ));
        assert!(s.contains("[Events]\n"));
        assert!(!s.contains("Dialogue:"));
        Ok(())
    }

    #[test]
    fn writes_dialogue_lines_with_centisecond_times() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = AssEncoder::new(&mut out, CaptionStyle::for_canvas(720, 1280));
        enc.write_cue(&CaptionCue::new(1.5, 3.25, "so what {happened}"))?;
        enc.write_cue(&CaptionCue::new(62.0, 63.5, "next"))?;
        enc.close()?;
        enc.close()?;

        let s = std::str::from_utf8(&out)?;
        assert!(s.contains("PlayResX: 720\n"));
        assert!(s.contains("Dialogue: 0,0:00:01.50,0:00:03.25,Default,,0,0,0,,so what (happened)\n"));
        assert!(s.contains("Dialogue: 0,0:01:02.00,0:01:03.50,Default,,0,0,0,,next\n"));
        assert_eq!(s.matches("[Script Info]").count(), 1);
        Ok(())
    }

    #[test]
    fn multi_line_text_uses_hard_breaks() {
        assert_eq!(escape_dialogue_text("one\ntwo\n\n"), "one\\Ntwo");
    }

    #[test]
    fn timestamps_roll_over_hours() {
        assert_eq!(format_timestamp_ass(3661.237), "1:01:01.24");
        assert_eq!(format_timestamp_ass(-1.0), "0:00:00.00");
    }
}
