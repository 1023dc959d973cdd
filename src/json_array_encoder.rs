use std::io::Write;

use crate::Result;
use crate::captions::CaptionCue;
use crate::cue_encoder::{CueEncoder, DocState};

/// A `CueEncoder` that streams cues as one JSON array, e.g.
/// `[{"start_seconds":0.0,"end_seconds":1.2,"text":"hello there"}]`.
///
/// Closing without cues still yields valid JSON (`[]`).
pub struct JsonArrayEncoder<W: Write> {
    w: W,
    state: DocState,
}

impl<W: Write> JsonArrayEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            state: DocState::default(),
        }
    }
}

impl<W: Write> CueEncoder for JsonArrayEncoder<W> {
    fn write_cue(&mut self, cue: &CaptionCue) -> Result<()> {
        let separator: &[u8] = if self.state.open()? { b"[" } else { b"," };
        self.w.write_all(separator)?;
        serde_json::to_writer(&mut self.w, cue)?;
        self.w.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let closing: &[u8] = match self.state.close() {
            None => return Ok(()),
            Some(DocState::Fresh) => b"[]",
            Some(_) => b"]",
        };
        self.w.write_all(closing)?;
        self.w.flush()?;
        Ok(())
    }
}
