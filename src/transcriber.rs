use std::path::Path;

use crate::Result;
use crate::transcript::Transcript;

/// Speech-to-text with word timing.
///
/// Implementations are loaded once and shared read-only across runs, so they must be safe to
/// call from several workers at once.
pub trait Transcriber: Send + Sync {
    /// Transcribe a mono 16 kHz PCM WAV file.
    fn transcribe(&self, audio_wav: &Path) -> Result<Transcript>;
}

#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;

#[cfg(feature = "whisper")]
mod whisper {
    use std::os::raw::{c_char, c_void};
    use std::path::Path;
    use std::sync::Once;
    use std::time::Instant;

    use anyhow::Context;
    use tracing::{debug, info};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use super::Transcriber;
    use crate::{Error, Result};
    use crate::transcript::{TokenPiece, Transcript};
    use crate::wav::samples_from_path;

    /// [`super::Transcriber`] backed by `whisper-rs` with token-level timestamps.
    pub struct WhisperTranscriber {
        ctx: WhisperContext,
        language: Option<String>,
    }

    impl WhisperTranscriber {
        /// Load a whisper.cpp model from disk.
        pub fn new(model_path: &str) -> Result<Self> {
            if model_path.trim().is_empty() {
                return Err(Error::msg("model path must be provided"));
            }
            if !Path::new(model_path).is_file() {
                return Err(Error::msg(format!("whisper model not found at '{model_path}'")));
            }

            silence_whisper_logging();

            let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .with_context(|| format!("failed to load model from path: {model_path}"))?;

            Ok(Self {
                ctx,
                language: None,
            })
        }

        /// Force the spoken language instead of auto-detecting it.
        pub fn with_language(mut self, language: Option<String>) -> Self {
            self.language = language.filter(|lang| !lang.trim().is_empty());
            self
        }

        fn full_params(&self) -> FullParams<'_, '_> {
            let mut params = FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: 5,
                patience: 1.0,
            });

            params.set_n_threads(num_cpus::get() as i32);
            params.set_translate(false);
            params.set_language(Some(self.language.as_deref().unwrap_or("auto")));
            params.set_no_context(true);

            params.set_print_progress(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            params.set_token_timestamps(true);
            params
        }
    }

    impl Transcriber for WhisperTranscriber {
        fn transcribe(&self, audio_wav: &Path) -> Result<Transcript> {
            let samples = samples_from_path(audio_wav)?;
            if samples.is_empty() {
                return Ok(Transcript::default());
            }

            let started = Instant::now();
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            state
                .full(self.full_params(), &samples)
                .context("failed to run whisper full()")?;

            let mut pieces = Vec::new();
            for segment in state.as_iter() {
                let token_count = usize::try_from(segment.n_tokens()).unwrap_or(0);
                for idx in 0..token_count {
                    let Ok(token) = segment.get_token(idx as i32).context("missing token") else {
                        continue;
                    };
                    // Multi-byte characters can be split across tokens; those halves are skipped.
                    let Ok(text) = token.to_str() else {
                        debug!(token = idx, "skipping token with partial UTF-8");
                        continue;
                    };
                    let data = token.token_data();
                    pieces.push(TokenPiece {
                        text: text.to_owned(),
                        start: centiseconds_to_seconds(data.t0),
                        end: centiseconds_to_seconds(data.t1),
                    });
                }
            }

            let transcript = Transcript::from_token_pieces(pieces);
            info!(
                words = transcript.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "transcription finished"
            );
            Ok(transcript)
        }
    }

    /// Whisper reports `-1` for unknown times.
    fn centiseconds_to_seconds(value: i64) -> f64 {
        if value < 0 { 0.0 } else { value as f64 / 100.0 }
    }

    unsafe extern "C" fn discard_whisper_log(
        _level: u32,
        _c_msg: *const c_char,
        _user_data: *mut c_void,
    ) {
    }

    /// whisper.cpp logs straight to stderr; route it nowhere, once per process.
    fn silence_whisper_logging() {
        static INIT: Once = Once::new();

        INIT.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(discard_whisper_log), std::ptr::null_mut());
        });
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn unknown_token_times_clamp_to_zero() {
            assert_eq!(centiseconds_to_seconds(-1), 0.0);
            assert_eq!(centiseconds_to_seconds(250), 2.5);
        }

        #[test]
        fn missing_models_are_rejected_before_loading() {
            assert!(WhisperTranscriber::new("").is_err());
            assert!(WhisperTranscriber::new("/nonexistent/ggml-base.bin").is_err());
        }
    }
}
