//! Clip window selection.
//!
//! The moment-suggestion model hands us free text that is *supposed* to be a JSON array of
//! `{ "start": .., "end": .. }` objects. In practice it may be fenced in markdown, wrapped in
//! prose, or not JSON at all. We treat it as untrusted:
//! - parsing never fails; an unusable payload becomes [`MomentPayload::Malformed`]
//! - each candidate only contributes its start; the end is re-derived from word boundaries
//! - when nothing survives we synthesize windows straight from the transcript
//!
//! Guarantee: returned windows are start-ordered, non-overlapping, and each lasts between the
//! configured minimum and maximum duration, ending exactly on some word's end time.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::opts::ClipOpts;
use crate::transcript::Transcript;

/// A validated time range selected for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub start: f64,
    pub end: f64,
}

impl ClipWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A candidate window as suggested by the model, after field validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawWindow {
    pub start: f64,
    pub end: f64,
}

/// Outcome of parsing a moment-suggestion response.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentPayload {
    /// The payload was a list; these entries had numeric `start` and `end`.
    Candidates(Vec<RawWindow>),
    /// The payload was not a list, or not parseable at all.
    Malformed,
}

impl MomentPayload {
    pub fn candidates(&self) -> &[RawWindow] {
        match self {
            Self::Candidates(windows) => windows,
            Self::Malformed => &[],
        }
    }
}

/// Bounds used by the selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionOpts {
    pub max_clips: usize,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

impl From<&ClipOpts> for SelectionOpts {
    fn from(opts: &ClipOpts) -> Self {
        let (min_seconds, max_seconds) = opts.duration_bounds();
        Self {
            max_clips: opts.max_clips,
            min_seconds,
            max_seconds,
        }
    }
}

impl Default for SelectionOpts {
    fn default() -> Self {
        Self::from(&ClipOpts::default())
    }
}

/// Parse a raw model response into candidate windows.
///
/// We strip a surrounding code fence (optionally tagged `json`), try the body as JSON, and
/// then retry on the outermost `[ ... ]` span in case the model wrapped the array in prose.
pub fn parse_moments(raw: &str) -> MomentPayload {
    let body = strip_code_fence(raw);

    let value = serde_json::from_str::<Value>(body).ok().or_else(|| {
        let open = body.find('[')?;
        let close = body.rfind(']')?;
        if close <= open {
            return None;
        }
        serde_json::from_str::<Value>(&body[open..=close]).ok()
    });

    match value {
        Some(Value::Array(items)) => {
            let total = items.len();
            let windows: Vec<RawWindow> = items.iter().filter_map(raw_window).collect();
            if windows.len() < total {
                debug!(
                    total,
                    kept = windows.len(),
                    "dropped moment candidates missing start/end"
                );
            }
            MomentPayload::Candidates(windows)
        }
        Some(_) => {
            warn!("moment suggestion payload is not a list");
            MomentPayload::Malformed
        }
        None => {
            warn!("moment suggestion payload is not valid JSON");
            MomentPayload::Malformed
        }
    }
}

/// Choose clip windows for a run.
///
/// Candidates are honoured first (greedy, start-ordered). If none of them yields a valid
/// window we fall back to consecutive windows carved from the start of the transcript.
pub fn select_windows(
    payload: &MomentPayload,
    transcript: &Transcript,
    opts: &SelectionOpts,
) -> Vec<ClipWindow> {
    if opts.max_clips == 0 || opts.max_seconds < opts.min_seconds {
        return Vec::new();
    }

    let boundaries = WordBoundaries::new(transcript);
    let selected = select_from_candidates(payload.candidates(), &boundaries, opts);
    if !selected.is_empty() {
        info!(count = selected.len(), "selected suggested clip windows");
        return selected;
    }

    let fallback = fallback_windows(transcript, &boundaries, opts);
    info!(count = fallback.len(), "using transcript fallback clip windows");
    fallback
}

/// Greedy pass over start-sorted candidates.
///
/// A candidate starts no earlier than `0.0` or the end of the previously accepted window.
pub fn select_from_candidates(
    candidates: &[RawWindow],
    boundaries: &WordBoundaries,
    opts: &SelectionOpts,
) -> Vec<ClipWindow> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut selected = Vec::new();
    // Media time starts at zero; earlier starts are pulled up to it.
    let mut last_end = 0.0_f64;

    for candidate in sorted {
        if selected.len() >= opts.max_clips {
            break;
        }

        let start = candidate.start.max(last_end);
        let Some(end) = boundaries.end_for(start, opts.min_seconds, opts.max_seconds) else {
            debug!(
                start,
                suggested_end = candidate.end,
                "no word boundary inside the duration window; skipping candidate"
            );
            continue;
        };

        selected.push(ClipWindow { start, end });
        last_end = end;
    }

    selected
}

/// Consecutive windows from the first word onward.
pub fn fallback_windows(
    transcript: &Transcript,
    boundaries: &WordBoundaries,
    opts: &SelectionOpts,
) -> Vec<ClipWindow> {
    let Some((first_start, last_end)) = transcript.bounds() else {
        return Vec::new();
    };
    if last_end - first_start < opts.min_seconds {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut current = first_start;
    while windows.len() < opts.max_clips {
        let Some(end) = boundaries.end_for(current, opts.min_seconds, opts.max_seconds) else {
            break;
        };
        windows.push(ClipWindow {
            start: current,
            end,
        });
        current = end;
        if last_end - current < opts.min_seconds {
            break;
        }
    }

    windows
}

/// Sorted word end times, used to snap window ends onto word boundaries.
#[derive(Debug, Clone, Default)]
pub struct WordBoundaries {
    ends: Vec<f64>,
}

impl WordBoundaries {
    pub fn new(transcript: &Transcript) -> Self {
        let mut ends: Vec<f64> = transcript.tokens().iter().map(|t| t.end).collect();
        ends.sort_by(f64::total_cmp);
        Self { ends }
    }

    /// The first word end in `[start + min_seconds, start + max_seconds]`.
    ///
    /// Bounds are checked on `end - start`, the same way [`ClipWindow::duration`] measures.
    pub fn end_for(&self, start: f64, min_seconds: f64, max_seconds: f64) -> Option<f64> {
        let idx = self.ends.partition_point(|end| end - start < min_seconds);
        self.ends
            .get(idx)
            .copied()
            .filter(|end| end - start <= max_seconds)
    }
}

fn raw_window(item: &Value) -> Option<RawWindow> {
    let start = number_field(item, "start")?;
    let end = number_field(item, "end")?;
    Some(RawWindow { start, end })
}

fn number_field(item: &Value, key: &str) -> Option<f64> {
    let number = match item.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

pub(crate) fn strip_code_fence(raw: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("fence pattern must compile")
    });

    let trimmed = raw.trim();
    fence
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |body| body.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::TranscriptToken;

    /// One word per second: word `i` spans `[i, i + 1)`.
    fn steady_transcript(seconds: usize) -> Transcript {
        Transcript::new(
            (0..seconds).map(|i| TranscriptToken::new(i as f64, i as f64 + 1.0, format!("w{i}"))),
        )
    }

    fn opts(max_clips: usize) -> SelectionOpts {
        SelectionOpts {
            max_clips,
            min_seconds: 40.0,
            max_seconds: 60.0,
        }
    }

    #[test]
    fn parses_plain_json_array() {
        let payload = parse_moments(r#"[{"start": 1.5, "end": 50}, {"start": 70, "end": 120}]"#);
        assert_eq!(
            payload,
            MomentPayload::Candidates(vec![
                RawWindow { start: 1.5, end: 50.0 },
                RawWindow { start: 70.0, end: 120.0 },
            ])
        );
    }

    #[test]
    fn parses_fenced_json_with_language_tag() {
        let payload = parse_moments("```json\n[{\"start\": 3, \"end\": 45}]\n```");
        assert_eq!(payload.candidates(), &[RawWindow { start: 3.0, end: 45.0 }]);
    }

    #[test]
    fn parses_array_wrapped_in_prose() {
        let payload = parse_moments("Here you go: [{\"start\": 3, \"end\": 45}] hope it helps");
        assert_eq!(payload.candidates().len(), 1);
    }

    #[test]
    fn accepts_numeric_strings_and_drops_incomplete_entries() {
        let payload = parse_moments(
            r#"[{"start": "10.5", "end": "55"}, {"start": 1}, {"end": 2}, {"start": "x", "end": 3}, 7]"#,
        );
        assert_eq!(payload.candidates(), &[RawWindow { start: 10.5, end: 55.0 }]);
    }

    #[test]
    fn non_list_payloads_are_malformed() {
        assert_eq!(parse_moments(r#""just a string""#), MomentPayload::Malformed);
        assert_eq!(parse_moments(r#"{"start": 1, "end": 2}"#), MomentPayload::Malformed);
        assert_eq!(parse_moments("I could not find any clips."), MomentPayload::Malformed);
        assert_eq!(parse_moments(""), MomentPayload::Malformed);
    }

    #[test]
    fn malformed_payload_with_short_transcript_selects_nothing() {
        let transcript = steady_transcript(10);
        assert!(select_windows(&MomentPayload::Malformed, &transcript, &opts(3)).is_empty());

        let missing_end = parse_moments(r#"[{"start": 0}, {"start": 5}]"#);
        assert!(select_windows(&missing_end, &transcript, &opts(3)).is_empty());
    }

    #[test]
    fn candidate_end_snaps_to_first_boundary_after_min_duration() {
        let transcript = steady_transcript(200);
        let payload = MomentPayload::Candidates(vec![RawWindow { start: 10.0, end: 200.0 }]);

        let windows = select_windows(&payload, &transcript, &opts(3));
        assert_eq!(windows, vec![ClipWindow { start: 10.0, end: 50.0 }]);
    }

    #[test]
    fn overlapping_candidates_are_pushed_past_the_previous_end() {
        let transcript = steady_transcript(300);
        let payload = MomentPayload::Candidates(vec![
            RawWindow { start: 30.0, end: 80.0 },
            RawWindow { start: 0.0, end: 50.0 },
            RawWindow { start: 20.0, end: 70.0 },
        ]);

        let windows = select_windows(&payload, &transcript, &opts(3));
        assert_eq!(
            windows,
            vec![
                ClipWindow { start: 0.0, end: 40.0 },
                ClipWindow { start: 40.0, end: 80.0 },
                ClipWindow { start: 80.0, end: 120.0 },
            ]
        );
    }

    #[test]
    fn selection_stops_at_max_clips() {
        let transcript = steady_transcript(600);
        let payload = MomentPayload::Candidates(
            (0..6)
                .map(|i| RawWindow {
                    start: i as f64 * 90.0,
                    end: i as f64 * 90.0 + 45.0,
                })
                .collect(),
        );

        assert_eq!(select_windows(&payload, &transcript, &opts(2)).len(), 2);
        assert!(select_windows(&payload, &transcript, &opts(0)).is_empty());
    }

    #[test]
    fn candidates_without_a_reachable_boundary_are_rejected() {
        // A long pause: no word ends between 40s and 60s after the candidate start.
        let transcript = Transcript::new(vec![
            TranscriptToken::new(0.0, 1.0, "before"),
            TranscriptToken::new(70.0, 71.0, "after"),
            TranscriptToken::new(150.0, 151.0, "later"),
        ]);
        let payload = MomentPayload::Candidates(vec![
            RawWindow { start: 0.0, end: 60.0 },
            RawWindow { start: 100.0, end: 150.0 },
        ]);

        let windows = select_windows(&payload, &transcript, &opts(3));
        assert_eq!(windows, vec![ClipWindow { start: 100.0, end: 151.0 }]);
    }

    #[test]
    fn fallback_carves_consecutive_windows() {
        let transcript = steady_transcript(130);
        let windows = select_windows(&MomentPayload::Malformed, &transcript, &opts(3));
        assert_eq!(
            windows,
            vec![
                ClipWindow { start: 0.0, end: 40.0 },
                ClipWindow { start: 40.0, end: 80.0 },
                ClipWindow { start: 80.0, end: 120.0 },
            ]
        );
    }

    #[test]
    fn fallback_stops_when_remaining_span_is_too_short() {
        let transcript = steady_transcript(100);
        let windows = select_windows(&MomentPayload::Candidates(Vec::new()), &transcript, &opts(3));
        assert_eq!(
            windows,
            vec![
                ClipWindow { start: 0.0, end: 40.0 },
                ClipWindow { start: 40.0, end: 80.0 },
            ]
        );
    }

    #[test]
    fn boundaries_pick_the_earliest_end_in_range() {
        let transcript = Transcript::new(vec![
            TranscriptToken::new(0.0, 61.0, "long"),
            TranscriptToken::new(40.0, 45.0, "a"),
            TranscriptToken::new(41.0, 42.0, "b"),
        ]);
        let boundaries = WordBoundaries::new(&transcript);
        assert_eq!(boundaries.end_for(0.0, 40.0, 60.0), Some(42.0));
        assert_eq!(boundaries.end_for(5.0, 40.0, 60.0), Some(45.0));
        assert_eq!(boundaries.end_for(30.0, 40.0, 60.0), None);
    }
}
