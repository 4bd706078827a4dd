// Error types shared across the pack, media and gateway layers.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from sticker-pack operations.
///
/// Gateway failures are deliberately coarse: the server reports everything as
/// a status plus a raw message, so `Remote` carries both and nothing tries to
/// interpret the body further. Not-found and forbidden are the only statuses
/// the protocol layer distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote resource is absent (pack state or media).
    #[error("not found: {0}")]
    NotFound(String),

    /// A gateway call failed; carries the server's status and raw body.
    #[error("remote error: {0}")]
    Remote(String),

    /// The shortcode is already a key in the pack's image mapping.
    #[error("shortcode already exists in pack: {0}")]
    AlreadyExists(String),

    /// Local file is missing or not a regular file.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Local file exceeds the server's advertised upload limit.
    #[error("file too large: {} is {size} bytes, server limit is {limit}", .path.display())]
    FileTooLarge {
        /// Offending file.
        path: PathBuf,
        /// Size on disk in bytes.
        size: u64,
        /// Server-side `m.upload.size` limit in bytes.
        limit: u64,
    },

    /// Content sniffing could not recognize the file's media type.
    #[error("could not detect media type of {}", .0.display())]
    UnknownType(PathBuf),

    /// Detected media type is outside the caller's allow-list.
    #[error("media type {mime} of {} is not allowed", .path.display())]
    DisallowedType {
        /// Offending file.
        path: PathBuf,
        /// Sniffed MIME type.
        mime: String,
    },

    /// Content reference does not parse as `mxc://authority/id`.
    #[error("malformed content reference: {0}")]
    MalformedContentRef(String),

    /// Caller is not a server admin but the operation needs one.
    #[error("server admin rights required to {0}")]
    AdminRequired(&'static str),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
