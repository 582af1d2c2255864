//! Bluetooth BR/EDR HID device-role engine.
//!
//! Three pieces sit behind this crate's surface: the [`adapter`] (identity,
//! discoverability, Class-of-Device), the [`l2cap`] endpoint (control and
//! interrupt channel sockets), the [`sdp`] publisher (service record
//! registration and peer-service deactivation), and the [`session`] state
//! machine that ties a connected peer's control/interrupt pair to the wire
//! codec in `hidp-proto`.

pub mod adapter;
pub mod error;
pub mod l2cap;
pub mod sdp;
pub mod session;
pub mod sys;

pub use adapter::{Adapter, DeviceClass, COMBO_KEYBOARD_POINTER_CLASS};
pub use error::{Error, ErrorCode};
pub use l2cap::{connect_hid, L2capListener, L2capSocket};
pub use sdp::{build_hid_record, SdpPublisher, ServiceRecord};
pub use session::{HidSession, SessionEvent, SessionState};
pub use sys::bdaddr_t;
