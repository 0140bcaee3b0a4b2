//! Envelope-layer errors.

use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// The declared header size does not match the size its version
    /// implies, or the version is outside the supported set.
    BadHeader { header_size: u32, version: u32 },
    /// Version 2 headers are recognized but not supported.
    UnsupportedVersion(u32),
    /// The payload codec failed.
    Codec(axopack::Error),
}

impl From<axopack::Error> for Error {
    fn from(err: axopack::Error) -> Self {
        Error::Codec(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader {
                header_size,
                version,
            } => write!(
                f,
                "invalid message header (size {}, version {})",
                header_size, version
            ),
            Self::UnsupportedVersion(version) => {
                write!(f, "message header version {} not supported", version)
            }
            Self::Codec(err) => write!(f, "payload codec error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
