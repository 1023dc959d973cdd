//! Word-level transcript tokens.
//!
//! Every downstream stage (moment selection, caption cues, prompts) works on one normalized shape:
//! an ordered list of `(start, end, text)` words in absolute seconds. This module owns the
//! conversions from the raw shapes our collaborators hand back:
//! - aligned transcription JSON (`word_segments`, or words nested under `segments`)
//! - Whisper sub-word tokens with per-token timestamps

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// One timed word.
///
/// Serialized as `{ "start", "end", "word" }`, which is also the shape the moment-suggestion
/// prompt sends to the LLM. `text` is accepted on input for aligners that use that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptToken {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "word", alias = "text")]
    pub text: String,
}

impl TranscriptToken {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Whether the token lies entirely inside `[start, end]`.
    pub fn is_within(&self, start: f64, end: f64) -> bool {
        self.start >= start && self.end <= end
    }
}

/// A raw ASR token before it is merged into words.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPiece {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A normalized, start-ordered word sequence for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    tokens: Vec<TranscriptToken>,
}

impl Transcript {
    /// Normalize tokens into a transcript.
    ///
    /// We drop tokens with blank text or non-finite / inverted timing, trim whitespace, and
    /// stable-sort by start time. Producers don't guarantee ordering, so we never assume it.
    pub fn new(tokens: impl IntoIterator<Item = TranscriptToken>) -> Self {
        let mut tokens: Vec<TranscriptToken> = tokens
            .into_iter()
            .filter_map(|token| {
                let text = token.text.trim();
                let timed = token.start.is_finite() && token.end.is_finite();
                if text.is_empty() || !timed || token.end < token.start {
                    return None;
                }
                Some(TranscriptToken::new(token.start, token.end, text))
            })
            .collect();

        tokens.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { tokens }
    }

    /// Flatten aligned transcription output into a transcript.
    ///
    /// We prefer a non-empty top-level `word_segments` list and otherwise walk
    /// `segments[].words`. Records missing a start, end or text are skipped.
    pub fn from_alignment_json(value: &Value) -> Self {
        let flat = value
            .get("word_segments")
            .and_then(Value::as_array)
            .filter(|words| !words.is_empty());

        let records: Vec<&Value> = match flat {
            Some(words) => words.iter().collect(),
            None => value
                .get("segments")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|segment| segment.get("words").and_then(Value::as_array))
                .flatten()
                .collect(),
        };

        Self::new(records.into_iter().filter_map(token_from_record))
    }

    /// Parse aligned transcription output from a JSON string.
    pub fn from_alignment_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_alignment_json(&value))
    }

    /// Merge sub-word ASR tokens into words.
    ///
    /// A piece that begins with whitespace starts a new word; anything else (word
    /// continuations, trailing punctuation) is glued onto the word being built. Control tokens
    /// such as `[_BEG_]` or `<|endoftext|>` are dropped.
    pub fn from_token_pieces(pieces: impl IntoIterator<Item = TokenPiece>) -> Self {
        let mut words = Vec::new();
        let mut current: Option<TranscriptToken> = None;

        for piece in pieces {
            if is_control_token(&piece.text) || piece.text.trim().is_empty() {
                continue;
            }

            let starts_word = piece.text.starts_with(char::is_whitespace);
            if !starts_word {
                if let Some(word) = current.as_mut() {
                    word.text.push_str(&piece.text);
                    word.end = word.end.max(piece.end);
                    continue;
                }
            }

            if let Some(done) = current.take() {
                words.push(done);
            }
            current = Some(TranscriptToken::new(
                piece.start,
                piece.end,
                piece.text.trim_start(),
            ));
        }

        if let Some(done) = current {
            words.push(done);
        }

        Self::new(words)
    }

    pub fn tokens(&self) -> &[TranscriptToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Earliest start and latest end, or `None` for an empty transcript.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let first = self.tokens.first()?.start;
        let last = self
            .tokens
            .iter()
            .map(|token| token.end)
            .fold(f64::NEG_INFINITY, f64::max);
        Some((first, last))
    }

    /// Total span covered by the transcript in seconds.
    pub fn span_seconds(&self) -> f64 {
        self.bounds().map_or(0.0, |(start, end)| end - start)
    }

    /// Serialize the word list as the JSON array we hand to prompts.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.tokens)?)
    }
}

fn token_from_record(record: &Value) -> Option<TranscriptToken> {
    let start = record.get("start").and_then(Value::as_f64)?;
    let end = record.get("end").and_then(Value::as_f64)?;
    let text = ["word", "text"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .find(|text| !text.trim().is_empty())?;
    Some(TranscriptToken::new(start, end, text))
}

fn is_control_token(text: &str) -> bool {
    let text = text.trim();
    (text.starts_with("[_") && text.ends_with("_]")) || (text.starts_with("<|") && text.ends_with("|>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn piece(text: &str, start: f64, end: f64) -> TokenPiece {
        TokenPiece {
            text: text.to_owned(),
            start,
            end,
        }
    }

    #[test]
    fn new_sorts_trims_and_drops_unusable_tokens() {
        let transcript = Transcript::new(vec![
            TranscriptToken::new(2.0, 2.5, " world "),
            TranscriptToken::new(0.0, 0.5, "hello"),
            TranscriptToken::new(1.0, 1.2, "   "),
            TranscriptToken::new(3.0, 2.0, "inverted"),
            TranscriptToken::new(f64::NAN, 4.0, "nan"),
        ]);

        let texts: Vec<&str> = transcript.tokens().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world"]);
        assert_eq!(transcript.bounds(), Some((0.0, 2.5)));
    }

    #[test]
    fn alignment_json_prefers_word_segments() {
        let value = json!({
            "word_segments": [
                { "start": 0.0, "end": 0.4, "word": "Hi" },
                { "start": 0.5, "end": 0.9, "text": "there" },
                { "start": 1.0, "word": "dropped" }
            ],
            "segments": [
                { "words": [{ "start": 9.0, "end": 9.5, "word": "ignored" }] }
            ]
        });

        let transcript = Transcript::from_alignment_json(&value);
        let texts: Vec<&str> = transcript.tokens().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Hi", "there"]);
    }

    #[test]
    fn alignment_json_falls_back_to_nested_segment_words() {
        let value = json!({
            "word_segments": [],
            "segments": [
                { "words": [{ "start": 1.0, "end": 1.5, "word": "second" }] },
                { "words": [{ "start": 0.0, "end": 0.5, "word": "first" }] },
                { "text": "no words here" }
            ]
        });

        let transcript = Transcript::from_alignment_json(&value);
        let texts: Vec<&str> = transcript.tokens().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn token_pieces_merge_into_words() {
        let transcript = Transcript::from_token_pieces(vec![
            piece("[_BEG_]", 0.0, 0.0),
            piece(" Treat", 0.0, 0.3),
            piece(".", 0.3, 0.35),
            piece(" Yo", 0.5, 0.7),
            piece(" Sel", 0.9, 1.0),
            piece("f", 1.0, 1.2),
            piece(".", 1.2, 1.25),
            piece("<|endoftext|>", 1.3, 1.3),
        ]);

        let words: Vec<(&str, f64, f64)> = transcript
            .tokens()
            .iter()
            .map(|t| (t.text.as_str(), t.start, t.end))
            .collect();
        assert_eq!(
            words,
            vec![("Treat.", 0.0, 0.35), ("Yo", 0.5, 0.7), ("Self.", 0.9, 1.25)]
        );
    }

    #[test]
    fn prompt_json_uses_word_key() -> anyhow::Result<()> {
        let transcript = Transcript::new(vec![TranscriptToken::new(0.0, 1.0, "hey")]);
        let value: Value = serde_json::from_str(&transcript.to_json()?)?;
        assert_eq!(value, json!([{ "start": 0.0, "end": 1.0, "word": "hey" }]));
        Ok(())
    }

    #[test]
    fn empty_transcript_has_no_bounds() {
        let transcript = Transcript::default();
        assert!(transcript.bounds().is_none());
        assert_eq!(transcript.span_seconds(), 0.0);
    }
}
