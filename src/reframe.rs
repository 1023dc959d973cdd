use std::fs::{self, File};
use std::io::BufWriter;
use std::iter::Enumerate;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

/// Sigma roughly equivalent to a 121px Gaussian kernel.
const BACKGROUND_BLUR_SIGMA: f32 = 18.5;

/// Filter for resizing `source` to `width x height`: area-like when shrinking, bilinear otherwise.
fn resize_filter(source: &DynamicImage, width: u32, height: u32) -> FilterType {
    if u64::from(width) * u64::from(height) < u64::from(source.width()) * u64::from(source.height()) {
        FilterType::CatmullRom
    } else {
        FilterType::Triangle
    }
}

const JPEG_QUALITY: u8 = 92;

/// One face track as written by the active-speaker tracker.
///
/// The arrays are parallel: entry `i` describes the face on absolute frame `frame[i]`,
/// with center `(x[i], y[i])` and box scale `s[i]` in source-frame pixels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaceTrack {
    pub frame: Vec<usize>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    #[serde(default)]
    pub s: Vec<f64>,
}

/// Raw per-entry speaking confidence for one track, parallel to the track's arrays.
pub type ScoreSeries = Vec<f64>;

/// One detected face on one frame, with its smoothed confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceObservation {
    pub track_id: usize,
    pub frame_index: usize,
    pub confidence_score: f64,
    pub scale: f64,
    pub center_x: f64,
    pub center_y: f64,
}

/// Faces grouped by frame index, built once per clip window.
#[derive(Debug, Clone, Default)]
pub struct FrameFaces {
    frames: Vec<Vec<FaceObservation>>,
}

impl FrameFaces {
    /// Group every track entry onto its frame.
    ///
    /// Entry `i` of a track gets the mean of its score series over `[i - radius, i + radius]`,
    /// clipped to the series. Tracks without a score series and entries pointing past
    /// `frame_count` are dropped.
    pub fn build(
        tracks: &[FaceTrack],
        scores: &[ScoreSeries],
        frame_count: usize,
        radius: usize,
    ) -> Self {
        let mut frames = vec![Vec::new(); frame_count];
        let mut dropped = 0usize;

        for (track_id, track) in tracks.iter().enumerate() {
            let Some(series) = scores.get(track_id) else {
                dropped += track.frame.len();
                continue;
            };

            let entries = track.frame.iter().zip(&track.x).zip(&track.y).enumerate();
            for (i, ((&frame_index, &center_x), &center_y)) in entries {
                let Some(slot) = frames.get_mut(frame_index) else {
                    dropped += 1;
                    continue;
                };

                slot.push(FaceObservation {
                    track_id,
                    frame_index,
                    confidence_score: smoothed_score(series, i, radius),
                    scale: track.s.get(i).copied().unwrap_or(0.0),
                    center_x,
                    center_y,
                });
            }
        }

        if dropped > 0 {
            debug!(dropped, frame_count, "ignored face entries without a frame or score");
        }

        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn faces(&self, frame_index: usize) -> &[FaceObservation] {
        self.frames.get(frame_index).map(Vec::as_slice).unwrap_or_default()
    }

    /// The face most likely speaking on this frame, if any face scores non-negative.
    pub fn active_speaker(&self, frame_index: usize) -> Option<&FaceObservation> {
        self.faces(frame_index)
            .iter()
            .max_by(|a, b| a.confidence_score.total_cmp(&b.confidence_score))
            .filter(|face| face.confidence_score >= 0.0)
    }
}

/// Arithmetic mean of `series[index - radius ..= index + radius]`, clipped; `0.0` when empty.
pub fn smoothed_score(series: &[f64], index: usize, radius: usize) -> f64 {
    let lo = index.saturating_sub(radius).min(series.len());
    let hi = index.saturating_add(radius).saturating_add(1).min(series.len());
    let window = &series[lo..hi];
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReframeMode {
    Crop,
    Letterbox,
}

/// The geometry used to turn one source frame into one target-sized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTransform {
    /// Scale the source to `scaled_height` (the target height) and cut a target-width
    /// window starting at `offset_x`.
    Crop {
        scaled_width: u32,
        scaled_height: u32,
        offset_x: u32,
    },

    /// Scale the source to the target width and paste it at `fg_y` over a blurred background
    /// that was scaled to `bg_width x bg_height` and cropped at `(bg_x, bg_y)`.
    Letterbox {
        fg_width: u32,
        fg_height: u32,
        fg_y: i64,
        bg_width: u32,
        bg_height: u32,
        bg_x: u32,
        bg_y: u32,
    },
}

impl FrameTransform {
    pub fn mode(&self) -> ReframeMode {
        match self {
            Self::Crop { .. } => ReframeMode::Crop,
            Self::Letterbox { .. } => ReframeMode::Letterbox,
        }
    }
}

/// Decide how a `width x height` source frame maps onto the target canvas.
///
/// A speaker means crop-follow; no speaker (or a source too narrow to crop) means letterbox.
/// All geometry is integer so that offsets are exact.
pub fn plan_frame(
    width: u32,
    height: u32,
    speaker: Option<&FaceObservation>,
    target_width: u32,
    target_height: u32,
) -> FrameTransform {
    let (w, h) = (u64::from(width.max(1)), u64::from(height.max(1)));
    let (tw, th) = (u64::from(target_width.max(1)), u64::from(target_height.max(1)));

    if let Some(face) = speaker {
        let scaled_width = (w * th * 2 + h) / (h * 2);
        if scaled_width >= tw {
            let max_offset = scaled_width - tw;
            let speaker_x = if face.center_x.is_finite() {
                (face.center_x * th as f64 / h as f64).trunc() as i64
            } else {
                (scaled_width / 2) as i64
            };
            let offset_x = (speaker_x - (tw / 2) as i64).clamp(0, max_offset as i64);

            return FrameTransform::Crop {
                scaled_width: to_u32(scaled_width),
                scaled_height: to_u32(th),
                offset_x: to_u32(offset_x as u64),
            };
        }
    }

    let fg_height = (h * tw / w).max(1);
    let fg_y = (th as i64 - fg_height as i64) / 2;

    // Uniform scale by the larger axis ratio, so both sides cover the canvas.
    let (bg_width, bg_height) = if tw * h >= th * w {
        (tw, (h * tw / w).max(th))
    } else {
        ((w * th / h).max(tw), th)
    };

    FrameTransform::Letterbox {
        fg_width: to_u32(tw),
        fg_height: to_u32(fg_height),
        fg_y,
        bg_width: to_u32(bg_width),
        bg_height: to_u32(bg_height),
        bg_x: to_u32((bg_width - tw) / 2),
        bg_y: to_u32((bg_height - th) / 2),
    }
}

fn to_u32(v: u64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Render one frame through `transform` onto a `target_width x target_height` canvas.
pub fn apply_transform(
    source: &DynamicImage,
    transform: &FrameTransform,
    target_width: u32,
    target_height: u32,
) -> RgbImage {
    match *transform {
        FrameTransform::Crop {
            scaled_width,
            scaled_height,
            offset_x,
        } => source
            .resize_exact(scaled_width, scaled_height, resize_filter(source, scaled_width, scaled_height))
            .crop_imm(offset_x, 0, target_width, target_height)
            .to_rgb8(),

        FrameTransform::Letterbox {
            fg_width,
            fg_height,
            fg_y,
            bg_width,
            bg_height,
            bg_x,
            bg_y,
        } => {
            let mut canvas = source
                .resize_exact(bg_width, bg_height, resize_filter(source, bg_width, bg_height))
                .blur(BACKGROUND_BLUR_SIGMA)
                .crop_imm(bg_x, bg_y, target_width, target_height)
                .to_rgb8();
            let foreground = source
                .resize_exact(fg_width, fg_height, resize_filter(source, fg_width, fg_height))
                .to_rgb8();
            imageops::overlay(&mut canvas, &foreground, 0, fg_y);
            canvas
        }
    }
}

/// One output frame and where it came from.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub source_index: usize,
    pub transform: FrameTransform,
    pub image: RgbImage,
}

/// Lazily reframes a sequence of decoded frames.
///
/// Faces are looked up by the frame's position in the input sequence. Frames that failed to
/// decode are logged and skipped, so output order follows input order without substitutes.
pub struct Reframer<'a, I> {
    frames: Enumerate<I>,
    faces: &'a FrameFaces,
    target_width: u32,
    target_height: u32,
}

impl<I> Iterator for Reframer<'_, I>
where
    I: Iterator<Item = Result<DynamicImage>>,
{
    type Item = RenderedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (source_index, frame) = self.frames.next()?;
            let source = match frame {
                Ok(img) => img,
                Err(err) => {
                    warn!(frame = source_index, error = %err, "skipping undecodable frame");
                    continue;
                }
            };

            let transform = plan_frame(
                source.width(),
                source.height(),
                self.faces.active_speaker(source_index),
                self.target_width,
                self.target_height,
            );
            let image = apply_transform(&source, &transform, self.target_width, self.target_height);

            return Some(RenderedFrame {
                source_index,
                transform,
                image,
            });
        }
    }
}

/// Reframe `frames` onto a `target_width x target_height` canvas.
pub fn reframe<I>(
    frames: I,
    faces: &FrameFaces,
    target_width: u32,
    target_height: u32,
) -> Reframer<'_, I::IntoIter>
where
    I: IntoIterator<Item = Result<DynamicImage>>,
{
    Reframer {
        frames: frames.into_iter().enumerate(),
        faces,
        target_width,
        target_height,
    }
}

/// A directory of decoded frames, read one file at a time in file-name order.
#[derive(Debug, Clone)]
pub struct FrameDir {
    paths: Vec<PathBuf>,
}

impl FrameDir {
    /// List the `.jpg`/`.jpeg` files in `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_jpeg = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
            if is_jpeg {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self { paths })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = Result<DynamicImage>> + '_ {
        self.paths
            .iter()
            .map(|path| image::open(path).map_err(Into::into))
    }
}

/// Per-window reframing summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReframeStats {
    pub frames_written: usize,
    pub crop_frames: usize,
    pub letterbox_frames: usize,
}

/// Write rendered frames as `000000.jpg`, `000001.jpg`, ... into `out_dir`.
///
/// Output numbering is dense even when source frames were skipped, so the directory can be
/// fed to the codec as an image sequence.
pub fn write_frames(
    rendered: impl Iterator<Item = RenderedFrame>,
    out_dir: &Path,
) -> Result<ReframeStats> {
    fs::create_dir_all(out_dir)?;

    let mut stats = ReframeStats::default();
    for frame in rendered {
        let path = out_dir.join(format!("{:06}.jpg", stats.frames_written));
        let file = BufWriter::new(File::create(&path)?);
        JpegEncoder::new_with_quality(file, JPEG_QUALITY).encode_image(&frame.image)?;

        stats.frames_written += 1;
        match frame.transform.mode() {
            ReframeMode::Crop => stats.crop_frames += 1,
            ReframeMode::Letterbox => stats.letterbox_frames += 1,
        }
    }

    Ok(stats)
}

/// Reframe every frame in `frames_dir` into `out_dir`.
pub fn render_vertical(
    frames_dir: &Path,
    tracks: &[FaceTrack],
    scores: &[ScoreSeries],
    out_dir: &Path,
    target_width: u32,
    target_height: u32,
    smoothing_radius: usize,
) -> Result<ReframeStats> {
    let frames = FrameDir::open(frames_dir)?;
    let faces = FrameFaces::build(tracks, scores, frames.len(), smoothing_radius);

    let stats = write_frames(
        reframe(frames.frames(), &faces, target_width, target_height),
        out_dir,
    )?;

    debug!(
        frames = stats.frames_written,
        crop = stats.crop_frames,
        letterbox = stats.letterbox_frames,
        "rendered vertical frames"
    );
    Ok(stats)
}
