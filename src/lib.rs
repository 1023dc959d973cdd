//! `podclip` — turn long-form recorded conversations into short vertical clips.
//!
//! This crate provides:
//! - Transcript normalization and clip window selection
//! - Speaker-following reframing from landscape to a 9:16 canvas
//! - Caption cue segmentation, batch translation and subtitle encoders (ASS, VTT, JSON)
//! - A pipeline that drives the external collaborators (speech-to-text, LLM, tracker, codec,
//!   object storage) behind narrow traits
//!
//! The pure parts (`moments`, `captions`, `reframe`, `translate`) have no I/O of their own and
//! are usable on their own; `clipper` wires everything together for the server binary.

// High-level API (most consumers should start here).
pub mod clipper;
pub mod opts;

// Core transforms.
pub mod captions;
pub mod moments;
pub mod reframe;
pub mod transcript;
pub mod translate;

// Output selection and encoder interfaces.
pub mod cue_encoder;
pub mod output_type;

// Encoders that serialize caption cues.
pub mod ass_encoder;
pub mod json_array_encoder;
pub mod vtt_encoder;

// External collaborators.
pub mod codec;
pub mod llm;
pub mod storage;
pub mod tracker;
pub mod transcriber;
pub mod wav;

#[cfg(feature = "gemini")]
pub mod gemini;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use error::{Error, Result};

pub use captions::{CaptionCue, CaptionStyle};
pub use clipper::{Clipper, Collaborators, ProcessReport, ProcessRequest};
pub use moments::{ClipWindow, MomentPayload};
pub use opts::ClipOpts;
pub use reframe::{FaceObservation, FrameTransform, ReframeMode};
pub use transcript::{Transcript, TranscriptToken};
pub use translate::TranslationItem;
