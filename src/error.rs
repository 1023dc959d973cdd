use std::error::Error as StdError;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Podclip's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Podclip's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
///
/// The variants follow how a run reacts to a failure:
/// - `MissingArtifact` fails one clip window (the tracker did not produce its output).
/// - `Process` fails the step that spawned an external tool.
/// - `External` is a collaborator call that failed or timed out; callers usually recover
///   with a documented fallback instead of propagating it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("required artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("`{program}` exited with {status}: {stderr}")]
    Process {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{service} call failed: {message}")]
    External { service: String, message: String },

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub(crate) fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::External {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error should fail only the current clip window rather than the whole run.
    pub fn is_window_scoped(&self) -> bool {
        matches!(self, Self::MissingArtifact { .. } | Self::External { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Message(format!("{err:#}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::Other(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_names_the_path() {
        let err = Error::MissingArtifact {
            path: PathBuf::from("/tmp/run/clip_0/pywork/tracks.json"),
        };
        assert!(err.to_string().contains("tracks.json"));
        assert!(err.is_window_scoped());
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let err: Error = anyhow::anyhow!("inner").context("outer").into();
        assert_eq!(err.to_string(), "outer: inner");
        assert!(!err.is_window_scoped());
    }
}
