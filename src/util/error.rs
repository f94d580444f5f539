use std::fmt;
use std::os::raw::c_int;

use thiserror::Error;

type ErrorNum = c_int;

/// The two things a bitmap hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Inodes,
    DataBlocks,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Inodes => write!(f, "inodes"),
            Resource::DataBlocks => write!(f, "data blocks"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,

    #[error("entry already exists")]
    AlreadyExists,

    #[error("no free {0} left")]
    ResourceExhausted(Resource),

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("file name too long")]
    NameTooLong,

    #[error("file would exceed the addressable block range")]
    FileTooLarge,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// On-disk structures that fail to decode or do not describe a tinyfs image.
    #[error("corrupted image: {0}")]
    Corrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Error {
        Error::InvalidArgument(message.into())
    }

    pub fn corrupted(message: impl Into<String>) -> Error {
        Error::Corrupted(message.into())
    }

    /// Maps onto the errno handed back to the kernel. No wildcard arm, so a new
    /// variant does not compile until it has a code.
    pub fn errno(&self) -> ErrorNum {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::ResourceExhausted(_) => libc::ENOSPC,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::NotEmpty => libc::ENOTEMPTY,
            Error::NameTooLong => libc::ENAMETOOLONG,
            Error::FileTooLarge => libc::EFBIG,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::Corrupted(_) => libc::EIO,
            Error::Io(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
