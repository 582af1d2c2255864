//! The compact error enum used everywhere above the OS boundary.
//!
//! System error numbers are translated exactly once, in [`Error::from_errno`]
//! and the `From<std::io::Error>` impl below; everything else in this crate
//! speaks this enum.

use hidp_proto::CodecError;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("unknown error")]
    Unknown,
    #[error("invalid bluetooth address")]
    InvalidBluetoothAddress,
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation not permitted")]
    OperationNotPermitted,
    #[error("no such device")]
    NoSuchDevice,
    #[error("not connected")]
    NotConnected,
    #[error("no such entry")]
    NoSuchEntry,
    #[error("address in use")]
    AddressInUse,
    #[error("host down")]
    HostDown,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("timed out")]
    TimedOut,
    #[error("already in progress")]
    AlreadyInProgress,
    #[error("invalid exchange")]
    InvalidExchange,
    #[error("connection reset")]
    ConnectionReset,
}

impl ErrorCode {
    /// Maps an errno value the way the original `hidc_convert_errno` does.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EACCES => Self::PermissionDenied,
            libc::EPERM => Self::OperationNotPermitted,
            libc::ENODEV => Self::NoSuchDevice,
            libc::ENOTCONN => Self::NotConnected,
            libc::ENOENT => Self::NoSuchEntry,
            libc::EADDRINUSE => Self::AddressInUse,
            libc::EHOSTDOWN => Self::HostDown,
            libc::ECONNREFUSED => Self::ConnectionRefused,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::EALREADY => Self::AlreadyInProgress,
            libc::EBADE => Self::InvalidExchange,
            libc::ECONNRESET => Self::ConnectionReset,
            _ => Self::Unknown,
        }
    }

    /// The 4-byte code sent over the local command channel's callbacks.
    pub fn as_wire_code(self) -> i32 {
        match self {
            Self::Unknown => -10,
            Self::InvalidBluetoothAddress => -20,
            Self::PermissionDenied => -51,
            Self::OperationNotPermitted => -52,
            Self::NoSuchDevice => -53,
            Self::NotConnected => -54,
            Self::NoSuchEntry => -55,
            Self::AddressInUse => -56,
            Self::HostDown => -57,
            Self::ConnectionRefused => -58,
            Self::TimedOut => -59,
            Self::AlreadyInProgress => -60,
            Self::InvalidExchange => -61,
            Self::ConnectionReset => -62,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Code(#[from] ErrorCode),

    #[error("io error: {0}")]
    Io(#[source] std::io::Error),

    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Code(c) => *c,
            Self::Io(e) => ErrorCode::from_errno(e.raw_os_error().unwrap_or(0)),
            Self::Codec(_) => ErrorCode::Unknown,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Self::Code(ErrorCode::from_errno(e as i32))
    }
}
