use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use tracing::info;

use podclip::captions::{CaptionStyle, segment_captions};
use podclip::logging::{init_with_default, level_for_verbosity};
use podclip::moments::{MomentPayload, SelectionOpts, parse_moments, select_windows};
use podclip::output_type::OutputType;
use podclip::reframe::render_vertical;
use podclip::tracker::TrackerOutput;
use podclip::{ClipOpts, ClipWindow, Transcript};

fn main() -> Result<()> {
    let params = Params::parse();
    init_with_default(level_for_verbosity(params.verbose));

    match params.command {
        Command::Select(args) => select(&args),
        Command::Captions(args) => captions(&args),
        Command::Reframe(args) => reframe(&args),
    }
}

#[derive(Parser, Debug)]
#[command(name = "podclip")]
#[command(about = "Run the clipping steps by hand on local files")]
struct Params {
    /// Raise log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pick clip windows from a transcript and a moment-suggestion response.
    Select(SelectArgs),

    /// Print the caption cues for one clip window.
    Captions(CaptionsArgs),

    /// Reframe a directory of landscape frames into vertical ones.
    Reframe(ReframeArgs),
}

#[derive(clap::Args, Debug)]
struct SelectArgs {
    /// Word alignment JSON (`word_segments` or `segments[].words`).
    #[arg(short = 't', long = "transcript")]
    transcript: PathBuf,

    /// Raw moment-suggestion response. Without it, windows come from the transcript alone.
    #[arg(short = 'c', long = "candidates")]
    candidates: Option<PathBuf>,

    #[arg(long = "max-clips", default_value_t = 3)]
    max_clips: usize,

    #[arg(long = "min-seconds", default_value_t = 40.0)]
    min_seconds: f64,

    #[arg(long = "max-seconds", default_value_t = 60.0)]
    max_seconds: f64,
}

#[derive(clap::Args, Debug)]
struct CaptionsArgs {
    #[arg(short = 't', long = "transcript")]
    transcript: PathBuf,

    /// Window start, in seconds of the source.
    #[arg(long = "start")]
    start: f64,

    /// Window end, in seconds of the source.
    #[arg(long = "end")]
    end: f64,

    #[arg(long = "max-words", default_value_t = 5)]
    max_words: usize,

    #[arg(
        short = 'o',
        long = "output-type",
        value_enum,
        default_value_t = OutputType::Vtt
    )]
    output_type: OutputType,
}

#[derive(clap::Args, Debug)]
struct ReframeArgs {
    /// Directory of numbered source frames (`*.jpg`).
    #[arg(short = 'f', long = "frames")]
    frames: PathBuf,

    /// Tracker output directory (holds `pywork/tracks.json` and `pywork/scores.json`).
    #[arg(short = 'k', long = "tracker-dir")]
    tracker_dir: PathBuf,

    /// Where rendered frames are written.
    #[arg(short = 'o', long = "out")]
    out: PathBuf,

    #[arg(long = "width", default_value_t = 1080)]
    width: u32,

    #[arg(long = "height", default_value_t = 1920)]
    height: u32,

    #[arg(long = "smoothing-radius", default_value_t = 30)]
    smoothing_radius: usize,
}

fn load_transcript(path: &Path) -> Result<Transcript> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript: {}", path.display()))?;
    let transcript = Transcript::from_alignment_str(&raw)
        .with_context(|| format!("failed to parse transcript: {}", path.display()))?;
    info!(words = transcript.len(), "transcript loaded");
    Ok(transcript)
}

fn select(args: &SelectArgs) -> Result<()> {
    let transcript = load_transcript(&args.transcript)?;
    let payload = match &args.candidates {
        Some(path) => parse_moments(
            &fs::read_to_string(path)
                .with_context(|| format!("failed to read candidates: {}", path.display()))?,
        ),
        None => MomentPayload::Malformed,
    };

    let clip_opts = ClipOpts {
        max_clips: args.max_clips,
        min_clip_seconds: args.min_seconds,
        max_clip_seconds: args.max_seconds,
        ..ClipOpts::default()
    };
    let windows = select_windows(&payload, &transcript, &SelectionOpts::from(&clip_opts));

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    serde_json::to_writer_pretty(&mut writer, &windows)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

fn captions(args: &CaptionsArgs) -> Result<()> {
    ensure!(
        args.end > args.start,
        "window end ({}) must be after its start ({})",
        args.end,
        args.start
    );

    let transcript = load_transcript(&args.transcript)?;
    let window = ClipWindow {
        start: args.start,
        end: args.end,
    };
    let cues = segment_captions(transcript.tokens(), window, args.max_words);

    let stdout = io::stdout();
    let writer = BufWriter::new(stdout.lock());
    args.output_type
        .write_cues(writer, &cues, &CaptionStyle::default())?;
    Ok(())
}

fn reframe(args: &ReframeArgs) -> Result<()> {
    let tracked = TrackerOutput::load(&args.tracker_dir)?;
    let stats = render_vertical(
        &args.frames,
        &tracked.tracks,
        &tracked.scores,
        &args.out,
        args.width,
        args.height,
        args.smoothing_radius,
    )?;

    info!(out = %args.out.display(), frames = stats.frames_written, "reframe finished");
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}
