use podclip::moments::{MomentPayload, SelectionOpts, parse_moments, select_windows};
use podclip::{ClipWindow, Transcript, TranscriptToken};

fn transcript(words: &[(f64, f64, &str)]) -> Transcript {
    Transcript::new(
        words
            .iter()
            .map(|&(start, end, text)| TranscriptToken::new(start, end, text)),
    )
}

fn opts(max_clips: usize) -> SelectionOpts {
    SelectionOpts {
        max_clips,
        min_seconds: 40.0,
        max_seconds: 60.0,
    }
}

/// Tiny deterministic generator so the property checks are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn random_transcript(rng: &mut Lcg, seconds: f64) -> Transcript {
    let mut words = Vec::new();
    let mut t = 0.0;
    while t < seconds {
        let len = 0.1 + rng.next_f64() * 0.6;
        words.push(TranscriptToken::new(t, t + len, "word"));
        t += len + rng.next_f64() * 1.5;
    }
    Transcript::new(words)
}

fn assert_well_formed(windows: &[ClipWindow], opts: &SelectionOpts) {
    assert!(windows.len() <= opts.max_clips);
    for w in windows {
        let duration = w.end - w.start;
        assert!(
            (opts.min_seconds..=opts.max_seconds).contains(&duration),
            "duration {duration} out of bounds for {w:?}"
        );
    }
    assert!(windows.iter().all(|w| w.start >= 0.0), "negative start: {windows:?}");
    for pair in windows.windows(2) {
        assert!(pair[0].end <= pair[1].start, "overlap: {pair:?}");
    }
}

#[test]
fn fallback_finds_nothing_when_no_word_ends_inside_the_duration_range() {
    let t = transcript(&[(0.0, 0.5, "so"), (37.5, 38.0, "and"), (60.5, 61.0, "done")]);
    let windows = select_windows(&MomentPayload::Candidates(Vec::new()), &t, &opts(3));
    assert!(windows.is_empty());
}

#[test]
fn fallback_snaps_to_the_first_word_end_after_the_minimum() {
    let t = transcript(&[(0.0, 0.5, "so"), (44.5, 45.0, "right"), (49.0, 50.0, "ok")]);
    let windows = select_windows(&MomentPayload::Candidates(Vec::new()), &t, &opts(3));
    assert_eq!(windows, vec![ClipWindow { start: 0.0, end: 45.0 }]);
}

#[test]
fn malformed_payloads_yield_no_candidates() {
    for raw in [
        "sorry, I can't help with that",
        r#""just a string""#,
        r#"{"start": 1, "end": 50}"#,
        "",
    ] {
        assert_eq!(parse_moments(raw), MomentPayload::Malformed, "payload: {raw:?}");
    }

    let missing_end = parse_moments(r#"[{"start": 3.0}, {"begin": 1, "end": 2}]"#);
    assert!(missing_end.candidates().is_empty());

    // Too short for the fallback, so nothing at all comes back.
    let t = transcript(&[(0.0, 1.0, "hi"), (20.0, 21.0, "bye")]);
    assert!(select_windows(&missing_end, &t, &opts(3)).is_empty());
    assert!(select_windows(&MomentPayload::Malformed, &t, &opts(3)).is_empty());
}

#[test]
fn fenced_candidates_are_selected_in_start_order() {
    let mut words = Vec::new();
    for i in 0..300 {
        let start = f64::from(i);
        words.push(TranscriptToken::new(start, start + 0.5, "w"));
    }
    let t = Transcript::new(words);

    let raw = "```json\n[{\"start\": 120, \"end\": 170}, {\"start\": \"10\", \"end\": \"55\"}]\n```";
    let windows = select_windows(&parse_moments(raw), &t, &opts(3));

    assert_eq!(
        windows,
        vec![
            ClipWindow { start: 10.0, end: 50.5 },
            ClipWindow { start: 120.0, end: 160.5 },
        ]
    );
}

#[test]
fn overlapping_candidates_are_pushed_past_the_previous_window() {
    let mut words = Vec::new();
    for i in 0..200 {
        let start = f64::from(i);
        words.push(TranscriptToken::new(start, start + 0.5, "w"));
    }
    let t = Transcript::new(words);

    let payload = parse_moments(r#"[{"start": 0, "end": 45}, {"start": 20, "end": 70}]"#);
    let windows = select_windows(&payload, &t, &opts(3));

    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0], ClipWindow { start: 0.0, end: 40.5 });
    assert_eq!(windows[1].start, 40.5);
    assert_well_formed(&windows, &opts(3));
}

#[test]
fn candidates_before_zero_start_at_zero() {
    let mut words = Vec::new();
    for i in 0..120 {
        let start = f64::from(i);
        words.push(TranscriptToken::new(start, start + 0.5, "w"));
    }
    let t = Transcript::new(words);

    let payload = parse_moments(r#"[{"start": -30, "end": 20}]"#);
    let windows = select_windows(&payload, &t, &opts(3));

    assert_eq!(windows, vec![ClipWindow { start: 0.0, end: 40.5 }]);
}

#[test]
fn windows_are_always_bounded_and_disjoint() {
    let mut rng = Lcg(7);
    for round in 0..200 {
        let seconds = 30.0 + rng.next_f64() * 400.0;
        let t = random_transcript(&mut rng, seconds);

        let candidates = (0..(round % 6))
            .map(|_| {
                let start = rng.next_f64() * seconds;
                format!(r#"{{"start": {start}, "end": {}}}"#, start + 50.0)
            })
            .collect::<Vec<_>>()
            .join(",");
        let payload = parse_moments(&format!("[{candidates}]"));

        let opts = opts(1 + round % 4);
        let windows = select_windows(&payload, &t, &opts);
        assert_well_formed(&windows, &opts);
    }
}
