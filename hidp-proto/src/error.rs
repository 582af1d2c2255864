//! Frame-level codec errors.
//!
//! These never represent a fatal condition for the daemon: a malformed
//! transaction is answered with a HANDSHAKE error code and the connection
//! stays up.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty transaction frame")]
    EmptyFrame,

    #[error("unknown transaction type 0x{0:x}")]
    UnknownTransactionType(u8),

    #[error("invalid parameter 0x{param:x} for transaction type 0x{ttype:x}")]
    InvalidParameter { ttype: u8, param: u8 },

    #[error("report {0:#04x} is syntactically valid but not implemented")]
    Unsupported(u8),

    #[error("report {report_id:#04x} expected {expected} bytes, got {actual}")]
    WrongLength {
        report_id: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown report id {0:#04x}")]
    UnknownReportId(u8),
}
