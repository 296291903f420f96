//! Core types, constants and the error enum for denis.

use std::fmt;

use thiserror::Error;

use crate::device::DeviceError;

/// Side length of the square generation grid, in cells.
pub const SIDE: usize = 256;

/// Number of cells in one generation.
pub const GRID_CELLS: usize = SIDE * SIDE;

/// Bytes of input consumed per chunk (one bit per cell).
pub const CHUNK_SIZE: usize = GRID_CELLS / 8;

/// Bytes of payload produced per chunk: the `(previous, current)` pair.
pub const PAIR_SIZE: usize = CHUNK_SIZE * 2;

/// Content tag stored in the container header (3 ASCII bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentTag {
    /// "No content". Never valid inside a container.
    None,
    /// Plain text.
    Text,
    /// Image data.
    Image,
    /// Arbitrary bytes. Default for the orchestrator.
    #[default]
    Any,
}

impl ContentTag {
    /// The 3-byte on-disk code.
    pub fn code(self) -> [u8; 3] {
        match self {
            ContentTag::None => *b"NUL",
            ContentTag::Text => *b"TXT",
            ContentTag::Image => *b"IMG",
            ContentTag::Any => *b"ANY",
        }
    }

    /// Map an on-disk code back to a tag. Unknown codes yield `None`.
    pub fn from_code(code: [u8; 3]) -> Option<Self> {
        match &code {
            b"NUL" => Some(ContentTag::None),
            b"TXT" => Some(ContentTag::Text),
            b"IMG" => Some(ContentTag::Image),
            b"ANY" => Some(ContentTag::Any),
            _ => None,
        }
    }
}

impl fmt::Display for ContentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.code()))
    }
}

/// Options for encoding.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Tag written into the container header.
    pub content_tag: ContentTag,
    /// When `true`, allow overwriting existing output file paths.
    pub force: bool,
}

impl EncodeOptions {
    /// Set the content tag in a builder-friendly way.
    pub fn with_content_tag(mut self, tag: ContentTag) -> Self {
        self.content_tag = tag;
        self
    }
}

/// Options for decoding.
#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    /// When `true`, allow overwriting existing output file paths.
    pub force: bool,
}

/// Coarse classification of a [`DenisError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad key, bad argument, unsupported version. Caught before any engine work.
    Configuration,
    /// Unreadable source or unwritable destination.
    Io,
    /// The container is corrupt or inconsistent.
    Integrity,
    /// A kernel failed to compile or link. The engine cannot run at all.
    Platform,
    /// The device rejected an operation after bring-up (bad handle, aliased
    /// bindings, missing barrier). Points at a bug in the caller or backend.
    Device,
    /// An observer asked the run to stop.
    Cancelled,
}

/// Library error type (no panics for expected failures).
#[derive(Error, Debug)]
pub enum DenisError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown content tag {0:?}")]
    UnknownContentTag(String),
    #[error("container too short: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },
    #[error("magic mismatch: expected {expected:?}, found {found:?}")]
    MagicMismatch { expected: String, found: String },
    #[error("payload size mismatch: header declares {declared} bytes, container holds {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("terminator mismatch: expected {expected}, found {found}")]
    TerminatorMismatch { expected: String, found: String },
    #[error("payload of {len} bytes is not a whole number of {pair}-byte generation pairs")]
    MisalignedPayload { len: usize, pair: usize },
    #[error("padding of {padding} bytes is out of range for a {payload_len}-byte payload")]
    PaddingOutOfRange { padding: u16, payload_len: usize },
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: u64, written: u64 },
    #[error("compute device failure")]
    Device(#[from] DeviceError),
    #[error("run cancelled by observer")]
    Cancelled,
}

impl DenisError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DenisError::Io(_) => ErrorKind::Io,
            DenisError::InvalidKey(_)
            | DenisError::Invalid(_)
            | DenisError::UnsupportedVersion(_) => ErrorKind::Configuration,
            DenisError::UnknownContentTag(_)
            | DenisError::Truncated { .. }
            | DenisError::MagicMismatch { .. }
            | DenisError::SizeMismatch { .. }
            | DenisError::TerminatorMismatch { .. }
            | DenisError::MisalignedPayload { .. }
            | DenisError::PaddingOutOfRange { .. }
            | DenisError::ShortWrite { .. } => ErrorKind::Integrity,
            DenisError::Device(DeviceError::Compile { .. } | DeviceError::Link { .. }) => {
                ErrorKind::Platform
            }
            DenisError::Device(_) => ErrorKind::Device,
            DenisError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
