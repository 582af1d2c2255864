//! The L2CAP Endpoint: listens on PSM 0x11 (control) and 0x13 (interrupt),
//! dials both outbound, and exposes plain sockets plus raw descriptors for
//! the supervisor's poll loop.

use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::Error;
use crate::sys::{self, bdaddr_t};

/// A connected or listening L2CAP socket.
pub struct L2capSocket {
    fd: OwnedFd,
}

impl L2capSocket {
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let n = unsafe { libc::read(self.raw_fd(), buf.as_mut_ptr() as *mut _, buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(n as usize)
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        let n = unsafe { libc::write(self.raw_fd(), buf.as_ptr() as *const _, buf.len()) };
        if n < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(n as usize)
    }

    fn set_security_medium(&self) -> Result<(), Error> {
        let sec = sys::bt_security {
            level: sys::BT_SECURITY_MEDIUM,
            key_size: 0,
        };
        setsockopt(self.raw_fd(), sys::SOL_BLUETOOTH, sys::BT_SECURITY, &sec)
    }

    /// HID traffic is small; both directions only need to clear 64 bytes.
    fn set_mtu(&self, mtu: u16) -> Result<(), Error> {
        let mut opts = sys::l2cap_options {
            omtu: mtu,
            imtu: mtu,
            ..Default::default()
        };
        setsockopt(self.raw_fd(), sys::SOL_L2CAP, sys::L2CAP_OPTIONS, &mut opts)
    }
}

fn raw_l2cap_socket() -> Result<OwnedFd, Error> {
    let fd = unsafe {
        libc::socket(
            sys::AF_BLUETOOTH,
            libc::SOCK_SEQPACKET,
            sys::BTPROTO_L2CAP,
        )
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn sockaddr_l2(addr: bdaddr_t, psm: u16) -> sys::sockaddr_l2 {
    sys::sockaddr_l2 {
        l2_family: libc::AF_BLUETOOTH as _,
        l2_psm: psm.to_le(),
        l2_bdaddr: addr,
        l2_cid: 0,
        l2_bdaddr_type: sys::BDADDR_BREDR,
    }
}

fn setsockopt<T>(fd: RawFd, level: i32, name: i32, val: &T) -> Result<(), Error> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            val as *const T as *const libc::c_void,
            mem::size_of::<T>() as u32,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// A listening PSM (control or interrupt), non-blocking so the supervisor's
/// poll loop owns waiting.
pub struct L2capListener {
    fd: OwnedFd,
    psm: u16,
}

impl L2capListener {
    pub fn bind(adapter: bdaddr_t, psm: u16) -> Result<Self, Error> {
        let fd = raw_l2cap_socket()?;
        let addr = sockaddr_l2(adapter, psm);
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<sys::sockaddr_l2>() as u32,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let rc = unsafe { libc::listen(fd.as_raw_fd(), 5) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        set_nonblocking(fd.as_raw_fd())?;
        debug!(psm = format!("{psm:#06x}"), "L2CAP listener up");
        Ok(Self { fd, psm })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn psm(&self) -> u16 {
        self.psm
    }

    /// Non-blocking accept; `Ok(None)` means nothing pending.
    pub fn accept(&self) -> Result<Option<(L2capSocket, bdaddr_t)>, Error> {
        let mut addr: sys::sockaddr_l2 = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sys::sockaddr_l2>() as u32;
        let fd = unsafe {
            libc::accept(
                self.fd.as_raw_fd(),
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            if matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK)) {
                return Ok(None);
            }
            return Err(err.into());
        }
        let sock = L2capSocket {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };
        sock.set_security_medium()?;
        sock.set_mtu(MIN_MTU)?;
        Ok(Some((sock, addr.l2_bdaddr)))
    }
}

/// HID payloads are small; both MTUs only need to clear this floor.
const MIN_MTU: u16 = 64;

/// Dials `peer`'s control PSM then interrupt PSM. On any failure both
/// sockets are dropped and the error is reported — partial connections are
/// never left open.
pub fn connect_hid(adapter: bdaddr_t, peer: bdaddr_t) -> Result<(L2capSocket, L2capSocket), Error> {
    let ctrl = dial(adapter, peer, sys::L2CAP_PSM_HIDP_CTRL)?;
    let intr = match dial(adapter, peer, sys::L2CAP_PSM_HIDP_INTR) {
        Ok(s) => s,
        Err(e) => {
            drop(ctrl);
            return Err(e);
        }
    };
    Ok((ctrl, intr))
}

/// Connects to the adapter's own SDP server (legacy BlueZ served it as an
/// ordinary L2CAP listener on PSM 1 of the local address), for service
/// record registration.
pub fn dial_local_sdp(adapter: bdaddr_t) -> Result<L2capSocket, Error> {
    dial(adapter, adapter, sys::L2CAP_PSM_SDP)
}

/// Test-only helpers: a connected Unix socketpair stands in for an L2CAP
/// connection so the session state machine can be exercised without a real
/// adapter. `L2capSocket` only ever does plain `read`/`write` on its fd once
/// constructed, so a socketpair fd behaves identically for that purpose.
#[cfg(test)]
pub(crate) mod test_support {
    use super::L2capSocket;
    use std::os::fd::{FromRawFd, OwnedFd};

    pub fn loopback_pair() -> (L2capSocket, L2capSocket) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "socketpair() failed in test support");
        let a = L2capSocket {
            fd: unsafe { OwnedFd::from_raw_fd(fds[0]) },
        };
        let b = L2capSocket {
            fd: unsafe { OwnedFd::from_raw_fd(fds[1]) },
        };
        (a, b)
    }
}

fn dial(adapter: bdaddr_t, peer: bdaddr_t, psm: u16) -> Result<L2capSocket, Error> {
    let fd = raw_l2cap_socket()?;
    let local = sockaddr_l2(adapter, 0);
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &local as *const _ as *const libc::sockaddr,
            mem::size_of::<sys::sockaddr_l2>() as u32,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let remote = sockaddr_l2(peer, psm);
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &remote as *const _ as *const libc::sockaddr,
            mem::size_of::<sys::sockaddr_l2>() as u32,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let sock = L2capSocket { fd };
    sock.set_security_medium()?;
    sock.set_mtu(MIN_MTU)?;
    set_nonblocking(sock.raw_fd())?;
    Ok(sock)
}
