//! # Error
//!
//! Errors raised while packaging fragments, writing blobs and reading back captured memory

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fragment::PatchKind;

/// Flat classification of [`Error`], used by callers that only care about the failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input directory could not be listed
    DirectoryUnavailable,
    /// A selected section file could not be read
    SectionUnreadable,
    /// Payload length does not fit the patch kind
    SizeMismatch,
    /// Nothing was selected for the target. Reported as a warning, never fatal
    NoMatchingFragments,
    /// Output sink could not accept bytes
    WriteFailure,
    /// Fragment extends past the end of the 32-bit address space
    AddressOverflow,
    /// A command stream could not be decoded
    MalformedRecord,
    /// No capture profile is registered under the requested family name
    UnknownFamily,
    /// A memory backend could not serve a read
    MemoryUnreadable,
    /// A memory backend could not accept a write
    MemoryUnwritable,
    /// A chip or firmware version string could not be parsed
    InvalidVersion,
}

/// Errors that can occur anywhere in the crate
#[derive(Debug, Error)]
pub enum Error {
    /// Error while listing the section directory
    #[error("unable to list section directory {}", path.display())]
    DirectoryUnavailable {
        /// Directory that was listed
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: io::Error,
    },
    /// Error while reading a section file
    #[error("unable to read section {}", path.display())]
    SectionUnreadable {
        /// Section file that failed
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: io::Error,
    },
    /// Payload size is invalid for its kind
    #[error("{kind:?} patch at {address:#010x} cannot carry {len} bytes")]
    SizeMismatch {
        /// Target address of the offending fragment
        address: u32,
        /// Declared kind of the offending fragment
        kind: PatchKind,
        /// Actual payload length
        len: usize,
    },
    /// Selection produced no fragments
    #[error("no fragments match chip {chip} firmware {firmware}")]
    NoMatchingFragments {
        /// Chip the run was targeting
        chip: String,
        /// Firmware the run was targeting
        firmware: String,
    },
    /// Error while writing the output blob
    #[error("unable to write {}", path.display())]
    WriteFailure {
        /// Destination of the blob
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: io::Error,
    },
    /// Fragment wraps around the address space
    #[error("{len} bytes at {address:#010x} overflow the address space")]
    AddressOverflow {
        /// Start address
        address: u32,
        /// Length in bytes
        len: usize,
    },
    /// Command stream is truncated or carries an unknown opcode
    #[error("malformed record at offset {offset}: {reason}")]
    MalformedRecord {
        /// Byte offset of the record in the stream
        offset: usize,
        /// What was wrong
        reason: &'static str,
    },
    /// Unknown capture profile
    #[error("no capture profile for firmware family {0:?}")]
    UnknownFamily(String),
    /// Memory backend could not read the range
    #[error("cannot read {len} bytes at {address:#010x}")]
    MemoryUnreadable {
        /// Start address
        address: u32,
        /// Length in bytes
        len: usize,
    },
    /// Memory backend could not write the range
    #[error("cannot write {len} bytes at {address:#010x}")]
    MemoryUnwritable {
        /// Start address
        address: u32,
        /// Length in bytes
        len: usize,
    },
    /// Error when setting memory protections
    #[error("unable to change protection at {address:#010x}")]
    ProtectionError {
        /// Start address of the write
        address: u32,
        /// Underlying region error
        #[source]
        source: region::Error,
    },
    /// Version string was empty or malformed
    #[error("invalid version {0:?}")]
    InvalidVersion(String),
}

impl Error {
    /// Returns the flat kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DirectoryUnavailable { .. } => ErrorKind::DirectoryUnavailable,
            Error::SectionUnreadable { .. } => ErrorKind::SectionUnreadable,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::NoMatchingFragments { .. } => ErrorKind::NoMatchingFragments,
            Error::WriteFailure { .. } => ErrorKind::WriteFailure,
            Error::AddressOverflow { .. } => ErrorKind::AddressOverflow,
            Error::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            Error::UnknownFamily(_) => ErrorKind::UnknownFamily,
            Error::MemoryUnreadable { .. } => ErrorKind::MemoryUnreadable,
            Error::MemoryUnwritable { .. } | Error::ProtectionError { .. } => {
                ErrorKind::MemoryUnwritable
            }
            Error::InvalidVersion(_) => ErrorKind::InvalidVersion,
        }
    }

    /// Whether this error is reported without aborting the run
    pub fn is_warning(&self) -> bool {
        self.kind() == ErrorKind::NoMatchingFragments
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
