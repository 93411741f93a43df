use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DemuxError>;

/// Problems detected while setting up a demultiplexer. None of these are
/// recoverable: the run must not start streaming.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("replacement tag '{tag}' is too long ({len} bytes, at most {max})")]
    TagTooLong { tag: String, len: usize, max: usize },

    #[error("maximum read length {value} is out of range (1..={max})")]
    InvalidMaxLength { value: usize, max: usize },

    #[error("orphan file already exists: {}", path.display())]
    SinkExists { path: PathBuf },

    #[error("cannot create orphan file {}: {source}", path.display())]
    CreateSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open alignment input {input}: {source}")]
    OpenInput {
        input: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot read alignment header from {input}: {source}")]
    ReadHeader {
        input: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported alignment format: {0}")]
    UnknownFormat(String),
}

/// Errors returned by the demultiplexer. Locally recovered problems
/// (rejected records, malformed names, orphans) are not errors; they are
/// routed to the orphan reporter instead.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read alignment record: {0}")]
    Transport(#[source] io::Error),

    #[error("failed to write orphan record: {0}")]
    OrphanSink(#[source] io::Error),
}

impl DemuxError {
    /// Whether the error aborted the stream part way through, as opposed to
    /// a failure before any record was read.
    pub fn is_aborted_stream(&self) -> bool {
        matches!(self, DemuxError::Transport(_) | DemuxError::OrphanSink(_))
    }
}
