use crate::captions::CaptionCue;
use crate::{Error, Result};

/// Streaming sink for caption cues.
///
/// Encoders write each cue as it arrives; `close` finalizes the document and is idempotent.
pub trait CueEncoder {
    fn write_cue(&mut self, cue: &CaptionCue) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// Write every cue and close the encoder.
///
/// The encoder is closed even when a write fails so partially written documents are still
/// flushed; the write error wins over a close error.
pub fn write_all_cues(encoder: &mut dyn CueEncoder, cues: &[CaptionCue]) -> Result<()> {
    let run_res = cues.iter().try_for_each(|cue| encoder.write_cue(cue));
    let close_res = encoder.close();
    run_res.and(close_res)
}

/// Lifecycle of a streamed subtitle document.
///
/// Every encoder owes a header (or opening bracket) before its first cue and refuses writes
/// after `close`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum DocState {
    #[default]
    Fresh,
    Open,
    Closed,
}

impl DocState {
    /// Enter `Open` for a cue write. `Ok(true)` means this is the first write, so the caller
    /// still has to emit the document header.
    pub(crate) fn open(&mut self) -> Result<bool> {
        match self {
            Self::Closed => Err(Error::msg("cannot write cue: encoder is already closed")),
            Self::Open => Ok(false),
            Self::Fresh => {
                *self = Self::Open;
                Ok(true)
            }
        }
    }

    /// Enter `Closed`, returning the state we left; `None` if we were already closed.
    pub(crate) fn close(&mut self) -> Option<DocState> {
        match std::mem::replace(self, Self::Closed) {
            Self::Closed => None,
            prev => Some(prev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_owed_once_and_writes_stop_after_close() {
        let mut state = DocState::default();
        assert!(matches!(state.open(), Ok(true)));
        assert!(matches!(state.open(), Ok(false)));
        assert_eq!(state.close(), Some(DocState::Open));
        assert_eq!(state.close(), None);
        assert!(state.open().is_err());
    }
}
