#![forbid(unsafe_code)]
//! Error types for emberfs.
//!
//! Defines `EfsError` and a `Result<T>` alias used throughout the
//! workspace. Includes errno mappings for POSIX-facing callers.

use thiserror::Error;

/// Unified error type for all emberfs operations.
#[derive(Debug, Error)]
pub enum EfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    #[error("invalid on-disk format: {0}")]
    Format(String),

    #[error("bad inode number {0}")]
    BadInodeNum(u32),

    #[error("inode does not use extents")]
    InodeNotExtent,

    #[error("corrupt extent header")]
    ExtentHeaderBad,

    #[error("no current node")]
    NoCurrentNode,

    #[error("no next extent")]
    ExtentNoNext,

    #[error("no previous extent")]
    ExtentNoPrev,

    #[error("no up extent")]
    ExtentNoUp,

    #[error("no down extent")]
    ExtentNoDown,

    #[error("extent not found for block")]
    ExtentNotFound,

    #[error("extent node is full")]
    CantInsertExtent,

    #[error("filesystem opened read-only")]
    ReadOnlyFilesystem,

    #[error("operation not supported")]
    OpNotSupported,
}

impl EfsError {
    /// Convert this error into a POSIX errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } | Self::ExtentHeaderBad => libc::EIO,
            Self::Format(_) | Self::BadInodeNum(_) | Self::InodeNotExtent => libc::EINVAL,
            Self::NoCurrentNode
            | Self::ExtentNoNext
            | Self::ExtentNoPrev
            | Self::ExtentNoUp
            | Self::ExtentNoDown
            | Self::ExtentNotFound => libc::ENOENT,
            Self::CantInsertExtent => libc::ENOSPC,
            Self::ReadOnlyFilesystem => libc::EROFS,
            Self::OpNotSupported => libc::ENOTSUP,
        }
    }
}

/// Result alias using `EfsError`.
pub type Result<T> = std::result::Result<T, EfsError>;
