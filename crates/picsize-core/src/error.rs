use std::io;

use thiserror::Error;

/// Why a single file could not be harvested. Flattened into
/// `ImageRecord::Failed` and never propagated past the extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read file: {0}")]
    Io(#[from] io::Error),
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decoder panicked")]
    Panicked,
}

/// Session state that makes a command unavailable. These are shown to the
/// user as information, not as failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no folder selected; choose a folder containing images first")]
    NoFolder,
    #[error("no image information loaded for the current folder")]
    NoBatch,
    #[error("another operation is still running")]
    Busy,
}
