use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::reframe::{FaceTrack, ScoreSeries};
use crate::{Error, Result};

pub const TRACKS_FILE: &str = "tracks.json";
pub const SCORES_FILE: &str = "scores.json";

/// Where a tracked clip's files live, relative to `<video_folder>/<video_name>`.
pub const WORK_SUBDIR: &str = "pywork";
pub const FRAMES_SUBDIR: &str = "pyframes";
pub const AUDIO_SUBDIR: &str = "pyavi";
pub const AUDIO_FILE: &str = "audio.wav";

/// What the active-speaker tracker leaves behind for one clip.
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    pub tracks: Vec<FaceTrack>,
    pub scores: Vec<ScoreSeries>,
    /// Decoded frames the tracks refer to, if the tracker wrote them.
    pub frames_dir: Option<PathBuf>,
    /// The clip audio, if the tracker extracted it.
    pub audio: Option<PathBuf>,
}

impl TrackerOutput {
    /// Load the two blobs from `<clip_dir>/pywork`. A missing blob is a
    /// [`Error::MissingArtifact`].
    pub fn load(clip_dir: &Path) -> Result<Self> {
        let work = clip_dir.join(WORK_SUBDIR);
        let records: Vec<TrackRecord> = read_blob(&work.join(TRACKS_FILE))?;
        let scores: Vec<ScoreSeries> = read_blob(&work.join(SCORES_FILE))?;

        let frames_dir = Some(clip_dir.join(FRAMES_SUBDIR)).filter(|dir| dir.is_dir());
        let audio = Some(clip_dir.join(AUDIO_SUBDIR).join(AUDIO_FILE)).filter(|path| path.is_file());

        Ok(Self {
            tracks: records.into_iter().map(FaceTrack::from).collect(),
            scores,
            frames_dir,
            audio,
        })
    }
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(Error::MissingArtifact {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Tracks come either flat (`{frame, x, y, s}`) or in the tracker's nested layout
/// (`{track: {frame}, proc_track: {x, y, s}}`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TrackRecord {
    Nested {
        track: NestedFrames,
        proc_track: NestedBoxes,
    },
    Flat(FaceTrack),
}

#[derive(Debug, Deserialize)]
struct NestedFrames {
    frame: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct NestedBoxes {
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    s: Vec<f64>,
}

impl From<TrackRecord> for FaceTrack {
    fn from(record: TrackRecord) -> Self {
        match record {
            TrackRecord::Flat(track) => track,
            TrackRecord::Nested { track, proc_track } => FaceTrack {
                frame: track.frame,
                x: proc_track.x,
                y: proc_track.y,
                s: proc_track.s,
            },
        }
    }
}

/// Produces face tracks and speaking scores for one extracted clip.
pub trait SpeakerTracker: Send + Sync {
    /// Track `<video_folder>/<video_name>.mp4`; results land under
    /// `<video_folder>/<video_name>/`.
    fn track(&self, video_folder: &Path, video_name: &str) -> Result<TrackerOutput>;
}

/// Runs an external tracker command and loads what it wrote.
///
/// The command line is `<program> <args..> --videoName <name> --videoFolder <folder>`.
/// The exit status is only logged: whether the clip can continue depends on the blobs.
/// A run that outlives its timeout is killed and fails the clip.
#[derive(Debug, Clone)]
pub struct CommandTracker {
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandTracker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    /// Parse a whitespace-separated command line such as
    /// `python Columbia_test.py --pretrainModel weight/finetuning_TalkSet.model`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::msg("tracker command must not be empty"))?;
        Ok(Self::new(program).with_args(parts.map(str::to_owned)))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl SpeakerTracker for CommandTracker {
    fn track(&self, video_folder: &Path, video_name: &str) -> Result<TrackerOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--videoName")
            .arg(video_name)
            .arg("--videoFolder")
            .arg(video_folder)
            .stdin(Stdio::null());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let (status, stderr) = run_with_deadline(&mut cmd, self.timeout)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if status.success() {
            info!(clip = video_name, elapsed_ms, "speaker tracking finished");
        } else {
            warn!(
                clip = video_name,
                elapsed_ms,
                status = %status,
                stderr = %stderr.trim(),
                "speaker tracker exited unsuccessfully"
            );
        }

        TrackerOutput::load(&video_folder.join(video_name))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run `cmd` to completion and return its status and stderr. Past `timeout` the child is
/// killed and the call fails with [`Error::External`].
fn run_with_deadline(cmd: &mut Command, timeout: Option<Duration>) -> Result<(ExitStatus, String)> {
    // Not a pipe: nothing drains it while we poll.
    let mut stderr = tempfile::tempfile()?;
    let mut child = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr.try_clone()?))
        .spawn()?;

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(limit) = timeout.filter(|limit| started.elapsed() >= *limit) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::external(
                "speaker tracker",
                format!("timed out after {}s", limit.as_secs_f64()),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut raw = Vec::new();
    stderr.seek(SeekFrom::Start(0))?;
    stderr.read_to_end(&mut raw)?;
    Ok((status, String::from_utf8_lossy(&raw).into_owned()))
}
