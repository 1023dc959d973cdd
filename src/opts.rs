use std::time::Duration;

/// Options that control how clips are chosen and rendered.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// Binaries map their flags and environment into this type so that:
/// - the library remains reusable outside of a server context
/// - tests and batch jobs can construct options programmatically
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOpts {
    /// Shortest clip we will emit, in seconds.
    pub min_clip_seconds: f64,

    /// Longest clip we will emit, in seconds. Never above [`MAX_CLIP_SECONDS_CEILING`].
    pub max_clip_seconds: f64,

    /// Upper bound on clips produced per run.
    pub max_clips: usize,

    /// Caption cues hold at most this many words.
    pub max_words_per_cue: usize,

    /// Output canvas width in pixels.
    pub target_width: u32,

    /// Output canvas height in pixels.
    pub target_height: u32,

    /// Frame rate of the rendered vertical video.
    pub framerate: u32,

    /// Half-width (in frames) of the window used to smooth speaker confidence.
    pub smoothing_radius: usize,

    /// How many clip windows may be processed at once.
    pub clip_workers: usize,

    /// Deadline applied to each external model call (suggestion, translation, metadata).
    pub call_timeout: Duration,
}

/// Hard ceiling on clip duration regardless of configuration.
pub const MAX_CLIP_SECONDS_CEILING: f64 = 60.0;

impl Default for ClipOpts {
    fn default() -> Self {
        Self {
            min_clip_seconds: 40.0,
            max_clip_seconds: MAX_CLIP_SECONDS_CEILING,
            max_clips: 3,
            max_words_per_cue: 5,
            target_width: 1080,
            target_height: 1920,
            framerate: 25,
            smoothing_radius: 30,
            clip_workers: 2,
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl ClipOpts {
    /// Selection bounds with the duration ceiling applied.
    pub fn duration_bounds(&self) -> (f64, f64) {
        let max = self.max_clip_seconds.min(MAX_CLIP_SECONDS_CEILING);
        (self.min_clip_seconds.min(max), max)
    }
}
