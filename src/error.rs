//! Error type shared by the dataset, model and training code.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown task '{name}', expected one of: {expected}")]
    UnknownTask { name: String, expected: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("directory does not exist: {path}")]
    MissingDirectory { path: PathBuf },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("annotation error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("crown segment of '{filename}' has zero length, I3M index is undefined")]
    DegenerateCrown { filename: String },

    #[error("non-finite coordinate in annotation '{filename}'")]
    NonFiniteCoordinate { filename: String },

    #[error("expected exactly 2 class directories in {path}, found {found:?}")]
    ClassCount { path: PathBuf, found: Vec<String> },

    #[error("{split} split is empty")]
    EmptySplit { split: &'static str },

    #[error("input of {height}x{width} is too small for the convolution stack")]
    ResolutionTooSmall { height: usize, width: usize },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
