//! The Local Command Channel: a single local client (the session/UI layer
//! driving this daemon) talks to it over an abstract-namespace Unix socket,
//! one command per 4-byte big-endian opcode frame. Everything on this
//! channel is big-endian; everything on the Bluetooth side is little-endian
//! — the two protocols never share a byte order.

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::time::Duration;

use tracing::{debug, warn};

use bt_hid::bdaddr_t;

/// Matches the name the original assigns its abstract socket.
pub const SOCKET_NAME: &str = "org.ronsdev.bluectrld";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests a local client can send. Numbering is the original protocol's,
/// not a reconstruction — see `hidipc.h` in the retrieval pack.
pub mod opcode {
    pub const SHUTDOWN: u32 = 10;
    pub const DISCOVERABLE_ON: u32 = 20;
    pub const DISCOVERABLE_OFF: u32 = 25;
    pub const SET_HID_DEVICE_CLASS: u32 = 30;
    pub const RESET_DEVICE_CLASS: u32 = 35;
    pub const DEACTIVATE_OTHER_SERVICES: u32 = 40;
    pub const REACTIVATE_OTHER_SERVICES: u32 = 45;
    pub const HID_CONNECT: u32 = 90;
    pub const HID_DISCONNECT: u32 = 95;
    pub const HID_SEND_KEYS: u32 = 110;
    pub const HID_SEND_MOUSE: u32 = 120;
    pub const HID_SEND_SYSTEM_KEYS: u32 = 125;
    pub const HID_SEND_HW_KEYS: u32 = 130;
    pub const HID_SEND_MEDIA_KEYS: u32 = 140;
    pub const HID_SEND_AC_KEYS: u32 = 145;
    pub const HID_CHANGE_MOUSE_FEATURE: u32 = 150;
    pub const HID_SEND_MOUSE_ABSOLUTE: u32 = 160;
}

/// Asynchronous notifications the daemon pushes to the connected client.
pub mod callback {
    pub const CONNECTED: u32 = 1010;
    pub const DISCONNECTED: u32 = 1020;
    pub const INFO_NO_SERVER: u32 = 1030;
    pub const MOUSE_FEATURE: u32 = 1050;
}

/// Error callbacks mirror their triggering request opcode, offset by 2000.
pub fn error_callback_for(request_opcode: u32) -> u32 {
    request_opcode + 2000
}

#[derive(Debug)]
pub enum Request {
    Shutdown,
    SetDiscoverable(bool),
    SetHidDeviceClass,
    ResetDeviceClass,
    DeactivateOtherServices,
    ReactivateOtherServices,
    Connect(bdaddr_t),
    Disconnect,
    SendKeyboardReport { modifier: u8, keys: [u8; 6] },
    SendMouseReport { buttons: u8, x: i16, y: i16, wheel_y: i8, wheel_x: i8 },
    SendSystemKeys(u8),
    SendHwKeys(u8),
    SendMediaKeys(u8),
    SendAcKeys(u8),
    SetMouseFeature { smooth_y: bool, smooth_x: bool },
    SendMouseAbsoluteReport { buttons: u8, x: u16, y: u16 },
}

#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("connection closed")]
    Closed,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
    #[error("truncated frame for opcode {0}")]
    Truncated(u32),
    #[error("malformed Bluetooth address in CONNECT payload")]
    BadAddress,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The listening endpoint. Backlog of 1: only one local client is ever
/// meaningful, and a second connection attempt while one is active is
/// dropped at accept time rather than queued.
pub struct IpcListener {
    inner: UnixListener,
}

impl IpcListener {
    pub fn bind() -> std::io::Result<Self> {
        let addr = SocketAddr::from_abstract_name(SOCKET_NAME)?;
        let inner = UnixListener::bind_addr(&addr)?;
        inner.set_nonblocking(true)?;
        debug!(name = SOCKET_NAME, "local command channel listening");
        Ok(Self { inner })
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.inner.as_raw_fd()
    }

    /// Accepts at most one connection; a second pending connection while a
    /// client is already active is accepted and immediately closed so the
    /// peer gets a clean EOF rather than hanging.
    pub fn accept(&self, client_already_active: bool) -> std::io::Result<Option<IpcConnection>> {
        match self.inner.accept() {
            Ok((stream, _)) if client_already_active => {
                warn!("second local client while one is active, dropping");
                drop(stream);
                Ok(None)
            }
            Ok((stream, _)) => {
                stream.set_read_timeout(Some(RECV_TIMEOUT))?;
                stream.set_nonblocking(false)?;
                Ok(Some(IpcConnection { stream }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub struct IpcConnection {
    stream: UnixStream,
}

impl IpcConnection {
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.stream.as_raw_fd()
    }

    /// Reads one opcode-framed request. A partial read at the 5-second
    /// timeout, or a clean EOF, both close the client the same way.
    pub fn read_request(&mut self) -> Result<Request, IpcError> {
        let opcode = self.read_u32()?;
        let req = match opcode {
            opcode::SHUTDOWN => Request::Shutdown,
            opcode::DISCOVERABLE_ON => Request::SetDiscoverable(true),
            opcode::DISCOVERABLE_OFF => Request::SetDiscoverable(false),
            opcode::SET_HID_DEVICE_CLASS => Request::SetHidDeviceClass,
            opcode::RESET_DEVICE_CLASS => Request::ResetDeviceClass,
            opcode::DEACTIVATE_OTHER_SERVICES => Request::DeactivateOtherServices,
            opcode::REACTIVATE_OTHER_SERVICES => Request::ReactivateOtherServices,
            opcode::HID_CONNECT => Request::Connect(self.read_bdaddr()?),
            opcode::HID_DISCONNECT => Request::Disconnect,
            opcode::HID_SEND_KEYS => {
                let modifier = self.read_u8()?;
                let mut keys = [0u8; 6];
                self.read_exact(&mut keys, opcode)?;
                Request::SendKeyboardReport { modifier, keys }
            }
            opcode::HID_SEND_MOUSE => {
                let buttons = self.read_u8()?;
                let x = self.read_i16()?;
                let y = self.read_i16()?;
                let wheel_y = self.read_u8()? as i8;
                let wheel_x = self.read_u8()? as i8;
                Request::SendMouseReport { buttons, x, y, wheel_y, wheel_x }
            }
            opcode::HID_SEND_SYSTEM_KEYS => Request::SendSystemKeys(self.read_u8()?),
            opcode::HID_SEND_HW_KEYS => Request::SendHwKeys(self.read_u8()?),
            opcode::HID_SEND_MEDIA_KEYS => Request::SendMediaKeys(self.read_u8()?),
            opcode::HID_SEND_AC_KEYS => Request::SendAcKeys(self.read_u8()?),
            opcode::HID_CHANGE_MOUSE_FEATURE => {
                let smooth_y = self.read_u8()? != 0;
                let smooth_x = self.read_u8()? != 0;
                Request::SetMouseFeature { smooth_y, smooth_x }
            }
            opcode::HID_SEND_MOUSE_ABSOLUTE => {
                let buttons = self.read_u8()?;
                let x = self.read_u16()?;
                let y = self.read_u16()?;
                Request::SendMouseAbsoluteReport { buttons, x, y }
            }
            other => return Err(IpcError::UnknownOpcode(other)),
        };
        Ok(req)
    }

    pub fn write_callback(&mut self, opcode: u32, payload: &[u8]) -> std::io::Result<()> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&opcode.to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame)
    }

    pub fn write_error(&mut self, request_opcode: u32, code: i32) -> std::io::Result<()> {
        self.write_callback(error_callback_for(request_opcode), &code.to_be_bytes())
    }

    fn read_exact(&mut self, buf: &mut [u8], opcode: u32) -> Result<(), IpcError> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(IpcError::Truncated(opcode)),
            Err(e) => Err(e.into()),
        }
    }

    fn read_u32(&mut self) -> Result<u32, IpcError> {
        let mut buf = [0u8; 4];
        match self.stream.read_exact(&mut buf) {
            Ok(()) => Ok(u32::from_be_bytes(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(IpcError::Closed),
            Err(e) => Err(e.into()),
        }
    }

    fn read_u16(&mut self) -> Result<u16, IpcError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf, 0)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_i16(&mut self) -> Result<i16, IpcError> {
        Ok(self.read_u16()? as i16)
    }

    fn read_u8(&mut self) -> Result<u8, IpcError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf, 0)?;
        Ok(buf[0])
    }

    /// The Bluetooth address on `HID_CONNECT` is 17 ASCII bytes
    /// (`"XX:XX:XX:XX:XX:XX"`), not a raw 6-byte address.
    fn read_bdaddr(&mut self) -> Result<bdaddr_t, IpcError> {
        let mut buf = [0u8; 17];
        self.read_exact(&mut buf, opcode::HID_CONNECT)?;
        let s = std::str::from_utf8(&buf).map_err(|_| IpcError::BadAddress)?;
        bt_hid::sys::bdaddr_from_string(s).ok_or(IpcError::BadAddress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pair() -> (IpcConnection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
        (IpcConnection { stream: a }, b)
    }

    #[test]
    fn discoverable_on_off_carry_no_payload() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::DISCOVERABLE_ON.to_be_bytes()).unwrap();
        match conn.read_request().unwrap() {
            Request::SetDiscoverable(on) => assert!(on),
            other => panic!("unexpected request: {other:?}"),
        }

        let (mut conn, mut client) = pair();
        client.write_all(&opcode::DISCOVERABLE_OFF.to_be_bytes()).unwrap();
        match conn.read_request().unwrap() {
            Request::SetDiscoverable(on) => assert!(!on),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn connect_decodes_ansi_address_string() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::HID_CONNECT.to_be_bytes()).unwrap();
        client.write_all(b"00:11:22:33:44:55").unwrap();
        match conn.read_request().unwrap() {
            Request::Connect(addr) => {
                assert_eq!(bt_hid::sys::bdaddr_to_string(&addr), "00:11:22:33:44:55");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn connect_rejects_malformed_address() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::HID_CONNECT.to_be_bytes()).unwrap();
        client.write_all(b"not-an-address!!!").unwrap();
        assert!(matches!(conn.read_request(), Err(IpcError::BadAddress)));
    }

    #[test]
    fn send_mouse_report_decodes_signed_fields() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::HID_SEND_MOUSE.to_be_bytes()).unwrap();
        client.write_all(&[0x01]).unwrap(); // buttons
        client.write_all(&(-5i16).to_be_bytes()).unwrap(); // x
        client.write_all(&(10i16).to_be_bytes()).unwrap(); // y
        client.write_all(&[(-1i8) as u8]).unwrap(); // wheel_y
        client.write_all(&[0]).unwrap(); // wheel_x
        match conn.read_request().unwrap() {
            Request::SendMouseReport { buttons, x, y, wheel_y, wheel_x } => {
                assert_eq!((buttons, x, y, wheel_y, wheel_x), (0x01, -5, 10, -1, 0));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn change_mouse_feature_decodes_two_independent_booleans() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::HID_CHANGE_MOUSE_FEATURE.to_be_bytes()).unwrap();
        client.write_all(&[1, 0]).unwrap();
        match conn.read_request().unwrap() {
            Request::SetMouseFeature { smooth_y, smooth_x } => {
                assert!(smooth_y);
                assert!(!smooth_x);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let (mut conn, mut client) = pair();
        client.write_all(&999u32.to_be_bytes()).unwrap();
        match conn.read_request() {
            Err(IpcError::UnknownOpcode(999)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn truncated_keyboard_report_is_reported() {
        let (mut conn, mut client) = pair();
        client.write_all(&opcode::HID_SEND_KEYS.to_be_bytes()).unwrap();
        client.write_all(&[0, 1, 2]).unwrap(); // modifier + 2 of 6 key bytes
        drop(client);
        match conn.read_request() {
            Err(IpcError::Truncated(op)) => assert_eq!(op, opcode::HID_SEND_KEYS),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn clean_eof_before_any_opcode_is_closed() {
        let (mut conn, client) = pair();
        drop(client);
        assert!(matches!(conn.read_request(), Err(IpcError::Closed)));
    }

    #[test]
    fn write_callback_frames_big_endian_opcode_and_payload() {
        let (mut conn, mut client) = pair();
        conn.write_callback(callback::CONNECTED, &[0xAA, 0xBB]).unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..4], &callback::CONNECTED.to_be_bytes());
        assert_eq!(&buf[4..], &[0xAA, 0xBB]);
    }

    #[test]
    fn write_error_uses_request_opcode_plus_2000() {
        let (mut conn, mut client) = pair();
        conn.write_error(opcode::HID_CONNECT, -111).unwrap();
        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).unwrap();
        let opcode = u32::from_be_bytes(buf[..4].try_into().unwrap());
        let code = i32::from_be_bytes(buf[4..].try_into().unwrap());
        assert_eq!(opcode, opcode::HID_CONNECT + 2000);
        assert_eq!(code, -111);
    }
}
