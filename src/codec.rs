use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::moments::ClipWindow;
use crate::{Error, Result};

/// File-name pattern of numbered frame images, matching `reframe::write_frames`.
pub const FRAME_PATTERN: &str = "%06d.jpg";

/// Keep this much of a failing tool's stderr in the error.
const STDERR_TAIL_BYTES: usize = 2048;

/// Video/audio operations the pipeline delegates to an external tool.
pub trait CodecTool: Send + Sync {
    /// Cut `window` out of `input` into a standalone video.
    fn cut_segment(&self, input: &Path, window: ClipWindow, output: &Path) -> Result<()>;

    /// Extract mono 16 kHz 16-bit PCM WAV audio.
    fn extract_audio(&self, input: &Path, output: &Path) -> Result<()>;

    /// Decode `input` into numbered JPEG frames at `framerate`.
    fn extract_frames(&self, input: &Path, framerate: u32, out_dir: &Path) -> Result<()>;

    /// Encode the numbered frames in `frames_dir` with `audio` as the soundtrack.
    fn mux_frames(&self, frames_dir: &Path, framerate: u32, audio: &Path, output: &Path) -> Result<()>;

    /// Render the subtitle script onto `video`.
    fn burn_subtitles(&self, video: &Path, subtitles: &Path, output: &Path) -> Result<()>;
}

/// [`CodecTool`] backed by the `ffmpeg` command line.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::with_program("ffmpeg")
    }
}

impl Ffmpeg {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: Vec<String>) -> Result<()> {
        let program = self.program.display().to_string();
        debug!(program = %program, args = ?args, "running codec");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()?;

        if output.status.success() {
            return Ok(());
        }

        Err(Error::Process {
            program,
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        })
    }
}

impl CodecTool for Ffmpeg {
    fn cut_segment(&self, input: &Path, window: ClipWindow, output: &Path) -> Result<()> {
        self.run(cut_args(input, window, output))
    }

    fn extract_audio(&self, input: &Path, output: &Path) -> Result<()> {
        self.run(extract_audio_args(input, output))
    }

    fn extract_frames(&self, input: &Path, framerate: u32, out_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(out_dir)?;
        self.run(extract_frames_args(input, framerate, out_dir))
    }

    fn mux_frames(&self, frames_dir: &Path, framerate: u32, audio: &Path, output: &Path) -> Result<()> {
        self.run(mux_args(frames_dir, framerate, audio, output))
    }

    fn burn_subtitles(&self, video: &Path, subtitles: &Path, output: &Path) -> Result<()> {
        self.run(burn_args(video, subtitles, output))
    }
}

fn lossy(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn owned(flags: &[&str]) -> Vec<String> {
    flags.iter().map(|flag| (*flag).to_owned()).collect()
}

const H264: [&str; 6] = ["-c:v", "libx264", "-preset", "fast", "-crf", "23"];

fn cut_args(input: &Path, window: ClipWindow, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_owned(),
        "-ss".to_owned(),
        format!("{:.3}", window.start),
        "-i".to_owned(),
        lossy(input),
        "-t".to_owned(),
        format!("{:.3}", window.duration()),
    ];
    args.extend(owned(&H264));
    args.extend(owned(&["-c:a", "aac"]));
    args.push(lossy(output));
    args
}

fn extract_audio_args(input: &Path, output: &Path) -> Vec<String> {
    let mut args = owned(&["-y", "-i"]);
    args.push(lossy(input));
    args.extend(owned(&["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"]));
    args.push(lossy(output));
    args
}

fn extract_frames_args(input: &Path, framerate: u32, out_dir: &Path) -> Vec<String> {
    let mut args = owned(&["-y", "-i"]);
    args.push(lossy(input));
    args.extend(["-vf".to_owned(), format!("fps={framerate}")]);
    args.extend(owned(&["-q:v", "2"]));
    args.push(lossy(&out_dir.join(FRAME_PATTERN)));
    args
}

fn mux_args(frames_dir: &Path, framerate: u32, audio: &Path, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_owned(),
        "-framerate".to_owned(),
        framerate.to_string(),
        "-i".to_owned(),
        lossy(&frames_dir.join(FRAME_PATTERN)),
        "-i".to_owned(),
        lossy(audio),
    ];
    args.extend(owned(&H264));
    args.extend(owned(&["-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a", "128k", "-shortest"]));
    args.push(lossy(output));
    args
}

fn burn_args(video: &Path, subtitles: &Path, output: &Path) -> Vec<String> {
    let mut args = owned(&["-y", "-i"]);
    args.push(lossy(video));
    args.extend(["-vf".to_owned(), subtitle_filter(subtitles)]);
    args.extend(owned(&H264));
    args.extend(owned(&["-c:a", "copy"]));
    args.push(lossy(output));
    args
}

/// `ass=filename='<path>'`, quoted so colons and commas in the path survive filter parsing.
fn subtitle_filter(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\'', r"'\''");
    format!("ass=filename='{path}'")
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_seeks_then_limits_duration() {
        let window = ClipWindow {
            start: 12.5,
            end: 55.0,
        };
        let args = cut_args(Path::new("in.mp4"), window, Path::new("out.mp4"));
        assert_eq!(&args[..7], ["-y", "-ss", "12.500", "-i", "in.mp4", "-t", "42.500"]);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn audio_is_mono_16k_pcm() {
        let args = extract_audio_args(Path::new("a.mp4"), Path::new("a.wav"));
        let joined = args.join(" ");
        assert!(joined.contains("-acodec pcm_s16le -ar 16000 -ac 1 a.wav"));
    }

    #[test]
    fn mux_reads_numbered_frames_at_the_framerate() {
        let args = mux_args(
            Path::new("/run/frames"),
            25,
            Path::new("/run/audio.wav"),
            Path::new("/run/v.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-y -framerate 25 -i /run/frames/%06d.jpg -i /run/audio.wav"));
        assert!(joined.ends_with("-shortest /run/v.mp4"));
    }

    #[test]
    fn subtitle_paths_are_quoted_for_the_filter() {
        assert_eq!(
            subtitle_filter(Path::new("/tmp/a:b/it's.ass")),
            r"ass=filename='/tmp/a:b/it'\''s.ass'"
        );
        let args = burn_args(
            Path::new("v.mp4"),
            Path::new("s.ass"),
            Path::new("o.mp4"),
        );
        assert_eq!(args[4], "ass=filename='s.ass'");
    }

    #[test]
    fn stderr_keeps_the_tail() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 10) + "boom";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("boom"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_process_error() {
        let err = Ffmpeg::with_program("false")
            .extract_audio(Path::new("in.mp4"), Path::new("out.wav"))
            .unwrap_err();
        assert!(matches!(err, Error::Process { .. }), "got {err:?}");
        assert!(!err.is_window_scoped());
    }

    #[test]
    fn missing_program_is_an_error() {
        let res = Ffmpeg::with_program("podclip-definitely-not-installed")
            .extract_audio(Path::new("in.mp4"), Path::new("out.wav"));
        assert!(res.is_err());
    }
}
