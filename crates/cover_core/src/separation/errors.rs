//! Error types for the separation chain.
//!
//! Errors carry the stage name and, for missing files, a snapshot of the
//! working directory at the moment of failure.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::naming::OutputRole;

/// Filename derivation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    #[error("Unknown separation model '{0}'")]
    UnknownModel(String),

    #[error("Stage '{stage}' has no {role} output")]
    RoleMissing { stage: String, role: OutputRole },
}

/// Failure of a stage or of the separation pipeline around it.
#[derive(Error, Debug)]
pub enum SeparationError {
    /// The file a stage should consume does not exist.
    #[error("{stage}: input {} not found (directory: [{}])", .path.display(), .listing.join(", "))]
    InputMissing {
        stage: String,
        path: PathBuf,
        listing: Vec<String>,
    },

    /// The tool reported success but an expected output never appeared.
    #[error("{stage}: {role} output {file} not produced (directory: [{}])", .listing.join(", "))]
    OutputMissing {
        stage: String,
        role: OutputRole,
        file: String,
        listing: Vec<String>,
    },

    /// The separator itself failed.
    #[error("{stage} failed{}{}: {diagnostic}", exit_suffix(.exit_code), retry_suffix(.retried))]
    StageFailed {
        stage: String,
        exit_code: Option<i32>,
        diagnostic: String,
        retried: bool,
    },

    #[error("Cancelled before {stage}")]
    Cancelled { stage: String },

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl SeparationError {
    /// Create an input missing error with a directory snapshot.
    pub fn input_missing(stage: impl Into<String>, path: &Path, working_dir: &Path) -> Self {
        Self::InputMissing {
            stage: stage.into(),
            path: path.to_path_buf(),
            listing: directory_listing(working_dir),
        }
    }

    /// Create an output missing error with a directory snapshot.
    pub fn output_missing(
        stage: impl Into<String>,
        role: OutputRole,
        file: impl Into<String>,
        working_dir: &Path,
    ) -> Self {
        Self::OutputMissing {
            stage: stage.into(),
            role,
            file: file.into(),
            listing: directory_listing(working_dir),
        }
    }

    pub fn stage_failed(
        stage: impl Into<String>,
        exit_code: Option<i32>,
        diagnostic: impl Into<String>,
        retried: bool,
    ) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            exit_code,
            diagnostic: diagnostic.into(),
            retried,
        }
    }

    pub fn io_error(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Name of the stage the error belongs to, when there is one.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::InputMissing { stage, .. }
            | Self::OutputMissing { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::Cancelled { stage } => Some(stage),
            Self::Naming(NamingError::RoleMissing { stage, .. }) => Some(stage),
            Self::Naming(_) | Self::Io { .. } => None,
        }
    }
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|code| format!(" with exit code {}", code))
        .unwrap_or_default()
}

fn retry_suffix(retried: &bool) -> &'static str {
    if *retried {
        " after retry"
    } else {
        ""
    }
}

/// Sorted file names in a directory. Unreadable directories list as empty.
pub(crate) fn directory_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
