//! Daemon-level error handling: aggregates the first fatal error seen
//! during startup/teardown so `main` can turn it into an exit code.

use bt_hid::ErrorCode;

/// Whether an error should bring the daemon down or just get logged and
/// shrugged off. Transient peer/codec trouble is never fatal; adapter and
/// local-socket setup failures are.
pub fn is_fatal(err: &bt_hid::Error) -> bool {
    !matches!(
        err.code(),
        ErrorCode::NotConnected | ErrorCode::ConnectionReset | ErrorCode::TimedOut
    )
}

/// Tracks the first fatal error encountered across a teardown sequence,
/// mirroring a C `goto done` handler's `if (!ret) ret = rc;` idiom.
#[derive(Default)]
pub struct FirstError {
    first: Option<bt_hid::Error>,
}

impl FirstError {
    pub fn record(&mut self, err: bt_hid::Error) {
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    pub fn into_exit_code(self) -> i32 {
        match self.first {
            Some(err) => -err.code().as_wire_code(),
            None => 0,
        }
    }
}
