use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("Cannot open input {path:?}: {source}")]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid variant symbol '{symbol}' in {path:?} at band {band}, position {pos}")]
    InvalidSymbol {
        path: PathBuf,
        band: u32,
        pos: u32,
        symbol: char,
    },

    #[error("Invalid band index token '{token}' in {path:?}")]
    InvalidBand { path: PathBuf, token: String },

    #[error("Rule not found for {band}.{pos}.{variant} while decoding {path:?}")]
    MissingRule {
        path: PathBuf,
        band: u32,
        pos: u32,
        variant: u8,
    },

    #[error("Malformed catalog line {line} in {path:?}: {reason}")]
    MalformedLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Malformed palette line {line}: {reason}")]
    MalformedPalette { line: usize, reason: String },

    #[error("Variant {0} has no symbol in the alphabet")]
    VariantOutOfRange(u32),

    #[error("Unrecognised color in {path:?} at band {band}, position {pos}")]
    UnknownColor { path: PathBuf, band: u32, pos: u32 },

    #[error("Failed to write image {path:?}: {source}")]
    RenderIo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Cannot create output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read image {path:?}: {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image {path:?} is {found:?} pixels, expected {expected:?}")]
    ImageSize {
        path: PathBuf,
        found: (u32, u32),
        expected: (u32, u32),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TileError>;
