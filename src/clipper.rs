//! End-to-end clipping of one source video.
//!
//! A run owns a temporary workspace for its whole lifetime; it is removed when the run
//! returns, whether it succeeded or not. Clip windows are rendered on a small worker pool and
//! each window only touches its own files. A window whose tracker output is missing is dropped;
//! a failing codec step fails the whole run.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::captions::{CaptionStyle, script_text, segment_captions};
use crate::codec::CodecTool;
use crate::llm::{ClipMetadata, MetadataGenerator, MomentSuggester, clip_metadata};
use crate::moments::{ClipWindow, MomentPayload, SelectionOpts, parse_moments, select_windows};
use crate::opts::ClipOpts;
use crate::output_type::OutputType;
use crate::reframe::render_vertical;
use crate::storage::{ObjectStorage, clip_key, key_prefix};
use crate::tracker::SpeakerTracker;
use crate::transcriber::Transcriber;
use crate::transcript::Transcript;
use crate::translate::{Translator, translate_cues};
use crate::{Error, Result};

/// What the caller asks for: one source video, optionally captioned in another language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub s3_key: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl ProcessRequest {
    /// The caption language, if one was asked for.
    pub fn caption_language(&self) -> Option<&str> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
    }
}

/// `ok` when every planned clip was produced, `partial` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessReport {
    pub status: RunStatus,
    pub clips_planned: usize,
    pub s3_prefix: String,
    pub language: Option<String>,
    pub clips: Vec<ClipReport>,
}

/// One uploaded clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipReport {
    pub index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub s3_key: String,
    pub script_text: String,
    pub language: Option<String>,
    pub youtube_title: String,
    pub youtube_description: String,
    pub youtube_hashtags: Vec<String>,
}

/// The external services a run depends on.
///
/// Each is loaded once and shared read-only by every run and every worker.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ObjectStorage>,
    pub codec: Arc<dyn CodecTool>,
    pub transcriber: Arc<dyn Transcriber>,
    pub suggester: Arc<dyn MomentSuggester>,
    pub tracker: Arc<dyn SpeakerTracker>,
    pub translator: Arc<dyn Translator>,
    pub metadata: Arc<dyn MetadataGenerator>,
}

/// Runs the clipping pipeline.
pub struct Clipper {
    collab: Collaborators,
    opts: ClipOpts,
    style: CaptionStyle,
    work_root: Option<PathBuf>,
}

#[derive(Default)]
struct WorkerOutcome {
    done: Vec<ClipReport>,
    fatal: Option<(usize, Error)>,
}

/// Read-only inputs shared by the windows of one run.
struct RunContext<'a> {
    run_id: &'a str,
    base_dir: &'a Path,
    input: &'a Path,
    transcript: &'a Transcript,
    request: &'a ProcessRequest,
}

impl Clipper {
    pub fn new(collab: Collaborators, opts: ClipOpts) -> Self {
        let style = CaptionStyle::for_canvas(opts.target_width, opts.target_height);
        Self {
            collab,
            opts,
            style,
            work_root: None,
        }
    }

    pub fn with_caption_style(mut self, style: CaptionStyle) -> Self {
        self.style = style;
        self
    }

    /// Create run workspaces under `dir` instead of the system temp directory.
    pub fn with_work_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_root = Some(dir.into());
        self
    }

    pub fn opts(&self) -> &ClipOpts {
        &self.opts
    }

    /// Process one source video end to end.
    ///
    /// Errors are run-level failures: download, audio extraction, transcription, or a codec step
    /// failing inside any window. Window-scoped failures (see [`Error::is_window_scoped`]) are
    /// logged and leave those clips out of the report.
    pub fn process(&self, request: &ProcessRequest) -> Result<ProcessReport> {
        let key = request.s3_key.trim();
        if key.is_empty() {
            return Err(Error::msg("s3_key must not be empty"));
        }

        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let workspace = self.workspace(&run_id)?;
        let base_dir = workspace.path();
        info!(run_id = %run_id, s3_key = key, "run started");

        let input = base_dir.join("input.mp4");
        self.collab.storage.fetch(key, &input)?;

        let audio = base_dir.join("audio.wav");
        self.collab.codec.extract_audio(&input, &audio)?;
        let transcript = self.collab.transcriber.transcribe(&audio)?;
        info!(run_id = %run_id, words = transcript.len(), "transcript ready");

        let windows = self.plan_windows(&run_id, &transcript);
        let ctx = RunContext {
            run_id: &run_id,
            base_dir,
            input: &input,
            transcript: &transcript,
            request,
        };
        let clips = self.render_windows(&ctx, &windows)?;

        let status = if clips.len() == windows.len() {
            RunStatus::Ok
        } else {
            RunStatus::Partial
        };
        info!(
            run_id = %run_id,
            planned = windows.len(),
            produced = clips.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );

        Ok(ProcessReport {
            status,
            clips_planned: windows.len(),
            s3_prefix: key_prefix(key).to_owned(),
            language: request.caption_language().map(str::to_owned),
            clips,
        })
    }

    fn workspace(&self, run_id: &str) -> Result<tempfile::TempDir> {
        let prefix = format!("podclip-{run_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.work_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Ask for candidates and validate them; a failed call counts as no candidates.
    fn plan_windows(&self, run_id: &str, transcript: &Transcript) -> Vec<ClipWindow> {
        let payload = match self.collab.suggester.suggest_moments(transcript) {
            Ok(raw) => parse_moments(&raw),
            Err(err) => {
                warn!(run_id = %run_id, error = %err, "moment suggestion failed");
                MomentPayload::Malformed
            }
        };

        let windows = select_windows(&payload, transcript, &SelectionOpts::from(&self.opts));
        info!(
            run_id = %run_id,
            candidates = payload.candidates().len(),
            windows = windows.len(),
            "clip windows selected"
        );
        windows
    }

    /// Render every window on the worker pool.
    ///
    /// Window-scoped failures leave that clip out. Any other failure stops workers from picking
    /// up new windows and is returned once they have all finished.
    fn render_windows(&self, ctx: &RunContext<'_>, windows: &[ClipWindow]) -> Result<Vec<ClipReport>> {
        let workers = self.opts.clip_workers.clamp(1, windows.len().max(1));
        let next = &AtomicUsize::new(0);
        let aborted = &AtomicBool::new(false);

        let outcomes: Vec<WorkerOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut outcome = WorkerOutcome::default();
                        while !aborted.load(Ordering::Relaxed) {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(&window) = windows.get(index) else {
                                break;
                            };
                            let err = match self.render_window(ctx, index, window) {
                                Ok(clip) => {
                                    outcome.done.push(clip);
                                    continue;
                                }
                                Err(err) => err,
                            };
                            error!(
                                run_id = %ctx.run_id,
                                clip = index,
                                start = window.start,
                                end = window.end,
                                window_scoped = err.is_window_scoped(),
                                error = %err,
                                "clip failed"
                            );
                            if !err.is_window_scoped() {
                                aborted.store(true, Ordering::Relaxed);
                                outcome.fatal = Some((index, err));
                                break;
                            }
                        }
                        outcome
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        error!(run_id = %ctx.run_id, "clip worker panicked");
                        WorkerOutcome::default()
                    })
                })
                .collect()
        });

        let mut clips = Vec::new();
        let mut fatal: Option<(usize, Error)> = None;
        for outcome in outcomes {
            clips.extend(outcome.done);
            if let Some((index, err)) = outcome.fatal {
                if fatal.as_ref().is_none_or(|(first, _)| index < *first) {
                    fatal = Some((index, err));
                }
            }
        }
        if let Some((_, err)) = fatal {
            return Err(err);
        }

        clips.sort_by_key(|clip| clip.index);
        Ok(clips)
    }

    fn render_window(&self, ctx: &RunContext<'_>, index: usize, window: ClipWindow) -> Result<ClipReport> {
        let started = Instant::now();
        let codec = self.collab.codec.as_ref();
        let name = format!("clip_{index}");
        debug!(run_id = %ctx.run_id, clip = index, start = window.start, end = window.end, "rendering clip");

        // The tracker owns `<base>/<name>/`, so our own files go next to it.
        let segment = ctx.base_dir.join(format!("{name}.mp4"));
        let render_dir = ctx.base_dir.join(format!("{name}_render"));
        fs::create_dir_all(&render_dir)?;

        codec.cut_segment(ctx.input, window, &segment)?;
        let tracked = self.collab.tracker.track(ctx.base_dir, &name)?;

        let frames_dir = match tracked.frames_dir {
            Some(dir) => dir,
            None => {
                let dir = render_dir.join("source_frames");
                codec.extract_frames(&segment, self.opts.framerate, &dir)?;
                dir
            }
        };
        let audio = match tracked.audio {
            Some(path) => path,
            None => {
                let path = render_dir.join("audio.wav");
                codec.extract_audio(&segment, &path)?;
                path
            }
        };

        let vertical_frames = render_dir.join("vertical_frames");
        let stats = render_vertical(
            &frames_dir,
            &tracked.tracks,
            &tracked.scores,
            &vertical_frames,
            self.opts.target_width,
            self.opts.target_height,
            self.opts.smoothing_radius,
        )?;
        if stats.frames_written == 0 {
            return Err(Error::MissingArtifact { path: frames_dir });
        }

        let vertical = render_dir.join("vertical.mp4");
        codec.mux_frames(&vertical_frames, self.opts.framerate, &audio, &vertical)?;

        let language = ctx.request.caption_language();
        let cues = segment_captions(ctx.transcript.tokens(), window, self.opts.max_words_per_cue);
        let cues = match language {
            Some(lang) => translate_cues(&cues, lang, self.collab.translator.as_ref()),
            None => cues,
        };

        let subtitles = render_dir.join("subtitles.ass");
        OutputType::Ass.write_cues(BufWriter::new(File::create(&subtitles)?), &cues, &self.style)?;

        let captioned = render_dir.join("captioned.mp4");
        codec.burn_subtitles(&vertical, &subtitles, &captioned)?;

        let s3_key = clip_key(&ctx.request.s3_key, index, language, "mp4");
        self.collab.storage.store(&captioned, &s3_key)?;

        let script = script_text(&cues);
        let ClipMetadata {
            title,
            description,
            hashtags,
        } = clip_metadata(&script, language, self.collab.metadata.as_ref());

        info!(
            run_id = %ctx.run_id,
            clip = index,
            s3_key = %s3_key,
            cues = cues.len(),
            crop_frames = stats.crop_frames,
            letterbox_frames = stats.letterbox_frames,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clip uploaded"
        );

        Ok(ClipReport {
            index,
            start_seconds: window.start,
            end_seconds: window.end,
            s3_key,
            script_text: script,
            language: language.map(str::to_owned),
            youtube_title: title,
            youtube_description: description,
            youtube_hashtags: hashtags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_with_wire_field_names() -> anyhow::Result<()> {
        let report = ProcessReport {
            status: RunStatus::Partial,
            clips_planned: 2,
            s3_prefix: "uploads/abc".into(),
            language: Some("ko".into()),
            clips: vec![ClipReport {
                index: 0,
                start_seconds: 1.0,
                end_seconds: 45.0,
                s3_key: "uploads/abc/clip_0_ko.mp4".into(),
                script_text: "hello there".into(),
                language: Some("ko".into()),
                youtube_title: "t".into(),
                youtube_description: "d".into(),
                youtube_hashtags: vec!["h".into()],
            }],
        };

        let value = serde_json::to_value(&report)?;
        assert_eq!(value["status"], "partial");
        assert_eq!(value["clips_planned"], 2);
        assert_eq!(value["s3_prefix"], "uploads/abc");
        let clip = &value["clips"][0];
        assert_eq!(clip["startSeconds"], 1.0);
        assert_eq!(clip["s3Key"], "uploads/abc/clip_0_ko.mp4");
        assert_eq!(clip["scriptText"], "hello there");
        assert_eq!(clip["youtubeHashtags"][0], "h");
        Ok(())
    }

    #[test]
    fn blank_languages_mean_no_translation() -> anyhow::Result<()> {
        let req: ProcessRequest = serde_json::from_str(r#"{"s3_key":"a/b.mp4","language":"  "}"#)?;
        assert_eq!(req.caption_language(), None);

        let req: ProcessRequest = serde_json::from_str(r#"{"s3_key":"a/b.mp4"}"#)?;
        assert_eq!(req.language, None);

        let req: ProcessRequest = serde_json::from_str(r#"{"s3_key":"a/b.mp4","language":"ko"}"#)?;
        assert_eq!(req.caption_language(), Some("ko"));
        Ok(())
    }
}
