use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for payload decoding and extraction.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop an extraction. None of these are retryable: the
/// input is a single static file, so the run aborts at the first one.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported file: magic is {magic:02x?}, expected \"CrAU\"")]
    UnsupportedFormat { magic: [u8; 4] },

    #[error("Payload is truncated: unexpected end of input while reading {what}")]
    TruncatedInput { what: &'static str },

    #[error(
        "Input looks like an incremental OTA (minor version {minor_version}); only full OTAs are supported"
    )]
    IncrementalPayloadUnsupported { minor_version: u32 },

    #[error("Output already exists: {}", .0.display())]
    OutputAlreadyExists(PathBuf),

    #[error("Operation #{index} of partition '{partition}' has unsupported type {kind}")]
    UnsupportedOperationType {
        partition: String,
        index: usize,
        kind: String,
    },

    #[error("Malformed {codec} stream: {message}")]
    CodecError { codec: &'static str, message: String },

    #[error("Failed to decode payload manifest")]
    ManifestDecode(#[source] prost::DecodeError),

    #[error("{0:?} field is missing")]
    MissingField(&'static str),

    #[error("{what} overflows a 64-bit offset")]
    OffsetOverflow { what: &'static str },

    #[error("Partition name {0:?} cannot be used as a file name")]
    InvalidPartitionName(String),

    #[error("Failed to read {what}")]
    Read {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while {context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Classify a failed read: a short read is a truncated payload, anything
    /// else is reported as a plain I/O error.
    pub(crate) fn read(what: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedInput { what }
        } else {
            Error::Read { what, source }
        }
    }

    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Io { context, source }
    }
}
