//! Wire codec for the Bluetooth HID device-role protocol.
//!
//! This crate is pure byte ↔ structured-view conversion: transaction
//! headers on the control channel ([`transaction`]), HID reports
//! ([`report`]), and the fixed report descriptor they both answer to
//! ([`descriptor`]). It performs no I/O and knows nothing about sockets,
//! sessions, or SDP.

pub mod descriptor;
pub mod error;
pub mod report;
pub mod transaction;

pub use descriptor::{report_id, DESCRIPTOR_TYPE_REPORT, HID_DESCRIPTOR};
pub use error::CodecError;
pub use report::{
    clamp_mouse_absolute, clamp_mouse_relative, clamp_wheel, BitmapReport, KeyboardReport,
    MouseAbsoluteReport, MouseFeature, MouseReport,
};
pub use transaction::{
    data_frame, decode_header, handshake, hid_control, protocol_mode, report_type, ttype, Header,
};
