//! Narrow interface onto the Bluetooth adapter: identity resolution,
//! discoverability, and Class-of-Device control, via a raw `AF_BLUETOOTH`
//! HCI socket. The engine only ever reaches the adapter through this module.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, ErrorCode};
use crate::sys;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_CMD_COMPLETE: u8 = 0x0E;
const EVT_CMD_STATUS: u8 = 0x0F;

/// `OGF_HOST_CTL` (0x03) opcodes this daemon needs.
mod opcode {
    pub const WRITE_SCAN_ENABLE: u16 = ogf_ocf(0x03, 0x1A);
    pub const READ_CLASS_OF_DEV: u16 = ogf_ocf(0x03, 0x23);
    pub const WRITE_CLASS_OF_DEV: u16 = ogf_ocf(0x03, 0x24);

    const fn ogf_ocf(ogf: u16, ocf: u16) -> u16 {
        (ogf << 10) | ocf
    }
}

const SCAN_DISABLED: u8 = 0x00;
const SCAN_PAGE: u8 = 0x02;
const SCAN_INQUIRY_AND_PAGE: u8 = 0x03;

/// A 24-bit Class-of-Device value. Bits 12-23 are the "service class" bits
/// whose clearing the peer-service deactivation polls for.
pub type DeviceClass = [u8; 3];

const SERVICE_CLASS_MASK: u32 = 0xFF_F000;

pub fn class_to_u32(c: DeviceClass) -> u32 {
    u32::from(c[0]) | (u32::from(c[1]) << 8) | (u32::from(c[2]) << 16)
}

pub const fn class_from_u32(v: u32) -> DeviceClass {
    [(v & 0xFF) as u8, ((v >> 8) & 0xFF) as u8, ((v >> 16) & 0xFF) as u8]
}

/// Class-of-Device "Peripheral, Combo Keyboard/Pointing device" major/minor,
/// with the HID service bit set. The original sets "Peripheral, Keyboard"
/// instead because at the time iOS required it; this engine is not
/// iOS-constrained, so it advertises the more accurate combo class.
pub const COMBO_KEYBOARD_POINTER_CLASS: DeviceClass = class_from_u32(0x0005_0540);

pub struct Adapter {
    dev_id: u16,
    hci: OwnedFd,
}

impl Adapter {
    /// Opens a raw HCI socket against `dev_id` and resolves its address.
    pub fn open(dev_id: u16) -> Result<(Self, sys::bdaddr_t), Error> {
        let hci = raw_hci_socket()?;
        let bdaddr = device_bdaddr(hci.as_raw_fd(), dev_id)?;
        Ok((Self { dev_id, hci }, bdaddr))
    }

    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Sets scan mode to PAGE | INQUIRY (discoverable and connectable).
    pub fn set_discoverable(&self, on: bool) -> Result<(), Error> {
        let scan = if on { SCAN_INQUIRY_AND_PAGE } else { SCAN_PAGE };
        self.send_command(opcode::WRITE_SCAN_ENABLE, &[scan])?;
        Ok(())
    }

    /// Restores scan mode to PAGE-only (connectable, not discoverable).
    pub fn reset_discoverable(&self) -> Result<(), Error> {
        self.send_command(opcode::WRITE_SCAN_ENABLE, &[SCAN_PAGE])?;
        Ok(())
    }

    pub fn get_device_class(&self) -> Result<DeviceClass, Error> {
        let reply = self.send_command(opcode::READ_CLASS_OF_DEV, &[])?;
        // Command Complete params: status(1) + class(3).
        if reply.len() < 4 {
            return Err(Error::Code(ErrorCode::Unknown));
        }
        Ok([reply[1], reply[2], reply[3]])
    }

    pub fn set_device_class(&self, class: DeviceClass) -> Result<(), Error> {
        self.send_command(opcode::WRITE_CLASS_OF_DEV, &class)?;
        Ok(())
    }

    /// Polls the adapter's Class-of-Device until its service bits (12-23)
    /// are clear, capped at one second. Proceeds regardless on timeout —
    /// the original's behavior is "best-effort", kept unchanged here.
    pub fn wait_for_empty_service_class(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let class = class_to_u32(self.get_device_class()?);
            if class & SERVICE_CLASS_MASK == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("service class bits still set after {:?}, proceeding anyway", timeout);
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn send_command(&self, opcode: u16, params: &[u8]) -> Result<Vec<u8>, Error> {
        let mut pkt = Vec::with_capacity(4 + params.len());
        pkt.push(HCI_COMMAND_PKT);
        pkt.extend_from_slice(&opcode.to_le_bytes());
        pkt.push(params.len() as u8);
        pkt.extend_from_slice(params);

        write_all(self.hci.as_raw_fd(), &pkt)?;
        debug!(opcode = format!("{opcode:#06x}"), "sent HCI command");
        read_command_complete(self.hci.as_raw_fd(), opcode)
    }
}

fn raw_hci_socket() -> Result<OwnedFd, Error> {
    // SAFETY: libc::socket with a valid domain/type/protocol triple; the fd
    // is immediately wrapped so it is never leaked.
    let fd = unsafe { libc::socket(sys::AF_BLUETOOTH, libc::SOCK_RAW, sys::BTPROTO_HCI) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut addr: sys::sockaddr_hci = unsafe { mem::zeroed() };
    addr.hci_family = libc::AF_BLUETOOTH as _;
    addr.hci_dev = sys::HCI_DEV_NONE;
    addr.hci_channel = sys::HCI_CHANNEL_RAW;
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<sys::sockaddr_hci>() as u32,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(fd)
}

fn device_bdaddr(hci_fd: RawFd, dev_id: u16) -> Result<sys::bdaddr_t, Error> {
    let mut info = sys::hci_dev_info {
        dev_id,
        ..Default::default()
    };
    let rc = unsafe { libc::ioctl(hci_fd, sys::HCIGETDEVINFO as _, &mut info) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        return Err(if err.raw_os_error() == Some(libc::ENODEV) {
            Error::Code(ErrorCode::NoSuchDevice)
        } else {
            err.into()
        });
    }
    Ok(info.bdaddr)
}

fn write_all(fd: RawFd, buf: &[u8]) -> Result<(), Error> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
    if n as usize != buf.len() {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Reads HCI events from the raw socket until the Command Complete (or
/// Command Status, on error) for `opcode` arrives, and returns its
/// parameter bytes.
fn read_command_complete(fd: RawFd, opcode: u16) -> Result<Vec<u8>, Error> {
    let mut buf = [0u8; 260];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let n = n as usize;
        if n < 3 || buf[0] != HCI_EVENT_PKT {
            continue;
        }
        let evt_code = buf[1];
        let plen = buf[2] as usize;
        if n < 3 + plen {
            continue;
        }
        let params = &buf[3..3 + plen];
        match evt_code {
            EVT_CMD_COMPLETE if params.len() >= 3 => {
                let got_opcode = u16::from_le_bytes([params[1], params[2]]);
                if got_opcode == opcode {
                    return Ok(params[3..].to_vec());
                }
            }
            EVT_CMD_STATUS if params.len() >= 4 => {
                let got_opcode = u16::from_le_bytes([params[2], params[3]]);
                if got_opcode == opcode {
                    let status = params[0];
                    if status != 0 {
                        return Err(Error::Code(ErrorCode::Unknown));
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_round_trips() {
        let c: DeviceClass = [0x40, 0x05, 0x00];
        assert_eq!(class_from_u32(class_to_u32(c)), c);
    }

    #[test]
    fn combo_class_has_hid_service_bit() {
        let v = class_to_u32(COMBO_KEYBOARD_POINTER_CLASS);
        assert_ne!(v & SERVICE_CLASS_MASK, 0);
    }
}
