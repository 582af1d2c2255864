//! The supervisor: owns every long-lived resource and drives the single
//! cooperative, `poll(2)`-based readiness loop. Nothing here blocks except
//! the two calls the design explicitly allows to (outbound L2CAP connect,
//! and the Class-of-Device drain poll, both inside `bt_hid`).

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::{debug, error, info, warn};

use bt_hid::{
    Adapter, COMBO_KEYBOARD_POINTER_CLASS, Error as BtError, HidSession, L2capListener,
    SdpPublisher, SessionEvent,
};
use hidp_proto::{MouseAbsoluteReport, MouseReport};

use crate::cli::Cli;
use crate::error::{is_fatal, FirstError};
use crate::ipc::{self, callback, opcode, IpcConnection, IpcListener, Request};

/// How long a `poll` iteration waits with no client connected before this
/// daemon considers there's nothing to do this tick. Reusing the IPC idle
/// timer keeps there being exactly one "how long until we check in again"
/// knob instead of two barely-different ones.
const TICK: Duration = Duration::from_secs(10);

pub struct Core {
    adapter: Adapter,
    bdaddr: bt_hid::bdaddr_t,
    original_class: bt_hid::DeviceClass,
    hid_class: bt_hid::DeviceClass,
    /// Both L2CAP listeners, or neither: a control-only or interrupt-only
    /// listener can't pair anyone, so a failure to bind either at startup is
    /// non-fatal but takes both down together (outbound-only mode).
    l2cap: Option<(L2capListener, L2capListener)>,
    sdp: SdpPublisher,
    session: HidSession,
    ipc_listener: IpcListener,
    ipc_client: Option<IpcConnection>,
    discoverable: bool,
    signal_fd: SignalFd,
}

impl Core {
    pub fn new(cli: &Cli) -> Result<Self, BtError> {
        let (adapter, bdaddr) = Adapter::open(cli.devid)?;
        let original_class = adapter.get_device_class()?;
        let hid_class = cli
            .hid_device_class
            .map(bt_hid::adapter::class_from_u32)
            .unwrap_or(COMBO_KEYBOARD_POINTER_CLASS);
        adapter.set_device_class(hid_class)?;

        let l2cap = match L2capListener::bind(bdaddr, bt_hid::sys::L2CAP_PSM_HIDP_CTRL) {
            Ok(ctrl) => match L2capListener::bind(bdaddr, bt_hid::sys::L2CAP_PSM_HIDP_INTR) {
                Ok(intr) => Some((ctrl, intr)),
                Err(e) => {
                    warn!(error = %e, "interrupt PSM listener failed to start, running outbound-only");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "control PSM listener failed to start, running outbound-only");
                None
            }
        };

        let mut sdp = SdpPublisher::connect_local(bdaddr)?;
        sdp.deactivate_other_services(&adapter)?;
        let record = bt_hid::build_hid_record(
            bt_hid::sys::L2CAP_PSM_HIDP_CTRL,
            bt_hid::sys::L2CAP_PSM_HIDP_INTR,
            true,
        );
        sdp.register_hid(&record)?;

        let ipc_listener = ipc::IpcListener::bind().map_err(BtError::from)?;

        // SIGPIPE from a peer hanging up mid-write would otherwise kill the
        // daemon; every write already surfaces EPIPE through `Error::Io`.
        unsafe { signal::signal(Signal::SIGPIPE, signal::SigHandler::SigIgn) }.map_err(BtError::from)?;

        let mut blocked = SigSet::empty();
        blocked.add(Signal::SIGTERM);
        blocked.add(Signal::SIGINT);
        blocked.add(Signal::SIGHUP);
        blocked.add(Signal::SIGCHLD);
        blocked.thread_block().map_err(BtError::from)?;
        let signal_fd = SignalFd::with_flags(&blocked, SfdFlags::SFD_NONBLOCK).map_err(BtError::from)?;

        Ok(Self {
            adapter,
            bdaddr,
            original_class,
            hid_class,
            l2cap,
            sdp,
            session: HidSession::new(),
            ipc_listener,
            ipc_client: None,
            discoverable: false,
            signal_fd,
        })
    }

    /// Runs until a fatal error or a `SHUTDOWN` request, then tears
    /// everything down, recording only the first fatal error seen.
    pub fn run(mut self) -> i32 {
        let mut errors = FirstError::default();
        loop {
            match self.tick() {
                Ok(should_stop) if should_stop => break,
                Ok(_) => {}
                Err(e) if is_fatal(&e) => {
                    error!(error = %e, "fatal error, shutting down");
                    errors.record(e);
                    break;
                }
                Err(e) => warn!(error = %e, "non-fatal error, continuing"),
            }
        }
        self.teardown(&mut errors);
        errors.into_exit_code()
    }

    fn teardown(&mut self, errors: &mut FirstError) {
        if let Err(e) = self.sdp.unregister_hid() {
            warn!(error = %e, "failed to unregister HID service record");
            errors.record(e);
        }
        if let Err(e) = self.sdp.reactivate_other_services() {
            warn!(error = %e, "failed to restore deactivated service records");
            errors.record(e);
        }
        if let Err(e) = self.adapter.reset_discoverable() {
            warn!(error = %e, "failed to reset discoverable state");
            errors.record(e);
        }
    }

    fn tick(&mut self) -> Result<bool, BtError> {
        let mut fds = Vec::with_capacity(6);
        fds.push(borrow(self.signal_fd.as_raw_fd()));
        if let Some((ctrl, intr)) = &self.l2cap {
            fds.push(borrow(ctrl.raw_fd()));
            fds.push(borrow(intr.raw_fd()));
        }
        fds.push(borrow(self.ipc_listener.raw_fd()));
        if let Some(fd) = self.session.ctrl_fd() {
            fds.push(borrow(fd));
        }
        if let Some(client) = &self.ipc_client {
            fds.push(borrow(client.raw_fd()));
        }

        let timeout = PollTimeout::from(TICK.as_millis() as u16);
        let n = nix::poll::poll(&mut fds, timeout).map_err(BtError::from)?;
        if n == 0 {
            debug!("tick: nothing ready within {:?}", TICK);
            return Ok(false);
        }

        if let Some(siginfo) = self.signal_fd.read_signal().map_err(BtError::from)? {
            let signo = siginfo.ssi_signo as i32;
            if signo == Signal::SIGCHLD as i32 {
                debug!("SIGCHLD received, no children to reap");
            } else {
                info!(signal = signo, "shutdown signal received");
                return Ok(true);
            }
        }

        if let Some((ctrl_listener, intr_listener)) = &self.l2cap {
            if let Some((sock, peer)) = ctrl_listener.accept()? {
                self.session.on_control_accept(sock, peer);
            }
            if let Some((sock, peer)) = intr_listener.accept()? {
                match self.session.on_interrupt_accept(sock, peer) {
                    SessionEvent::Ready { peer } => {
                        info!(peer = %bt_hid::sys::bdaddr_to_string(&peer), "peer paired");
                        self.send_connected(peer);
                    }
                    SessionEvent::Closed => debug!("interrupt accept did not complete pairing"),
                    SessionEvent::AwaitingInterrupt { .. } => unreachable!(),
                }
            }
        }
        self.session.expire_pending();
        let was_up = matches!(self.session.state(), bt_hid::SessionState::Up { .. });
        self.session.service_control()?;
        if was_up && matches!(self.session.state(), bt_hid::SessionState::Idle) {
            self.send_disconnected(0);
        }
        if let Some((smooth_y, smooth_x)) = self.session.take_feature_change() {
            self.push_callback(callback::MOUSE_FEATURE, &[smooth_y as u8, smooth_x as u8]);
        }

        if let Some(conn) = self.ipc_listener.accept(self.ipc_client.is_some()).map_err(BtError::from)? {
            self.ipc_client = Some(conn);
            if let bt_hid::SessionState::Up { peer } = self.session.state() {
                self.send_connected(peer);
            }
            if self.l2cap.is_none() {
                self.push_callback(callback::INFO_NO_SERVER, &[]);
            }
        }
        if self.ipc_client.is_some() {
            return self.service_ipc();
        }

        Ok(false)
    }

    fn service_ipc(&mut self) -> Result<bool, BtError> {
        let Some(conn) = &mut self.ipc_client else { return Ok(false) };
        let req = match conn.read_request() {
            Ok(r) => r,
            Err(ipc::IpcError::Closed) => {
                self.ipc_client = None;
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "local command channel error");
                self.ipc_client = None;
                return Ok(false);
            }
        };
        let req_opcode = request_opcode(&req);
        match self.handle_request(req) {
            Ok(stop) => Ok(stop),
            Err(e) if is_fatal(&e) => Err(e),
            Err(e) => {
                warn!(error = %e, opcode = req_opcode, "request failed");
                if let Some(conn) = &mut self.ipc_client {
                    let _ = conn.write_error(req_opcode, e.code().as_wire_code());
                }
                Ok(false)
            }
        }
    }

    /// Returns `true` if the request was `SHUTDOWN`.
    fn handle_request(&mut self, req: Request) -> Result<bool, BtError> {
        match req {
            Request::SetDiscoverable(on) => {
                self.adapter.set_discoverable(on)?;
                self.discoverable = on;
            }
            Request::SetHidDeviceClass => {
                self.adapter.set_device_class(self.hid_class)?;
            }
            Request::ResetDeviceClass => {
                self.adapter.set_device_class(self.original_class)?;
            }
            Request::DeactivateOtherServices => {
                self.sdp.deactivate_other_services(&self.adapter)?;
            }
            Request::ReactivateOtherServices => {
                self.sdp.reactivate_other_services()?;
            }
            Request::Connect(peer) => {
                let (ctrl, intr) = bt_hid::connect_hid(self.bdaddr, peer)?;
                self.session.adopt(ctrl, intr, peer);
                self.send_connected(peer);
            }
            Request::Disconnect => {
                self.session.close();
                self.send_disconnected(0);
            }
            Request::SendKeyboardReport { modifier, keys } => {
                self.session
                    .send_keyboard(hidp_proto::KeyboardReport { modifier, keys })?;
            }
            Request::SendMouseReport { buttons, x, y, wheel_y, wheel_x } => {
                self.session.send_mouse(MouseReport {
                    buttons,
                    x,
                    y,
                    wheel_y,
                    wheel_x,
                })?;
            }
            Request::SendMouseAbsoluteReport { buttons, x, y } => {
                self.session
                    .send_mouse_absolute(MouseAbsoluteReport { buttons, x, y })?;
            }
            Request::SendSystemKeys(bitmap) => self.session.send_system_keys(bitmap)?,
            Request::SendHwKeys(bitmap) => self.session.send_hw_keys(bitmap)?,
            Request::SendMediaKeys(bitmap) => self.session.send_media_keys(bitmap)?,
            Request::SendAcKeys(bitmap) => self.session.send_ac_keys(bitmap)?,
            Request::SetMouseFeature { smooth_y, smooth_x } => {
                self.session.set_mouse_feature(smooth_y, smooth_x)
            }
            Request::Shutdown => return Ok(true),
        }
        Ok(false)
    }

    fn push_callback(&mut self, op: u32, payload: &[u8]) {
        if let Some(conn) = &mut self.ipc_client {
            if let Err(e) = conn.write_callback(op, payload) {
                warn!(error = %e, "failed to push local callback, dropping client");
                self.ipc_client = None;
            }
        }
    }

    fn send_connected(&mut self, peer: bt_hid::bdaddr_t) {
        let addr = bt_hid::sys::bdaddr_to_string(&peer).into_bytes();
        self.push_callback(callback::CONNECTED, &addr);
    }

    fn send_disconnected(&mut self, error_code: i32) {
        self.push_callback(callback::DISCONNECTED, &error_code.to_be_bytes());
    }
}

/// Maps a request back to its opcode for `error_callback_for`, since the
/// request value itself is consumed by `handle_request` before a failure
/// is known.
fn request_opcode(req: &Request) -> u32 {
    match req {
        Request::Shutdown => opcode::SHUTDOWN,
        Request::SetDiscoverable(true) => opcode::DISCOVERABLE_ON,
        Request::SetDiscoverable(false) => opcode::DISCOVERABLE_OFF,
        Request::SetHidDeviceClass => opcode::SET_HID_DEVICE_CLASS,
        Request::ResetDeviceClass => opcode::RESET_DEVICE_CLASS,
        Request::DeactivateOtherServices => opcode::DEACTIVATE_OTHER_SERVICES,
        Request::ReactivateOtherServices => opcode::REACTIVATE_OTHER_SERVICES,
        Request::Connect(_) => opcode::HID_CONNECT,
        Request::Disconnect => opcode::HID_DISCONNECT,
        Request::SendKeyboardReport { .. } => opcode::HID_SEND_KEYS,
        Request::SendMouseReport { .. } => opcode::HID_SEND_MOUSE,
        Request::SendMouseAbsoluteReport { .. } => opcode::HID_SEND_MOUSE_ABSOLUTE,
        Request::SendSystemKeys(_) => opcode::HID_SEND_SYSTEM_KEYS,
        Request::SendHwKeys(_) => opcode::HID_SEND_HW_KEYS,
        Request::SendMediaKeys(_) => opcode::HID_SEND_MEDIA_KEYS,
        Request::SendAcKeys(_) => opcode::HID_SEND_AC_KEYS,
        Request::SetMouseFeature { .. } => opcode::HID_CHANGE_MOUSE_FEATURE,
    }
}

fn borrow(fd: RawFd) -> PollFd<'static> {
    use std::os::fd::BorrowedFd;
    // SAFETY: the fd is owned by a struct that outlives this poll call;
    // `poll` never retains the descriptor past its own return.
    PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, PollFlags::POLLIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_opcode_matches_the_opcode_a_client_would_have_sent() {
        assert_eq!(request_opcode(&Request::Shutdown), opcode::SHUTDOWN);
        assert_eq!(
            request_opcode(&Request::SetDiscoverable(true)),
            opcode::DISCOVERABLE_ON
        );
        assert_eq!(
            request_opcode(&Request::SetDiscoverable(false)),
            opcode::DISCOVERABLE_OFF
        );
        assert_eq!(
            request_opcode(&Request::SendSystemKeys(0)),
            opcode::HID_SEND_SYSTEM_KEYS
        );
        assert_eq!(
            request_opcode(&Request::DeactivateOtherServices),
            opcode::DEACTIVATE_OTHER_SERVICES
        );
        assert_eq!(
            request_opcode(&Request::ReactivateOtherServices),
            opcode::REACTIVATE_OTHER_SERVICES
        );
        assert_eq!(
            request_opcode(&Request::ResetDeviceClass),
            opcode::RESET_DEVICE_CLASS
        );
    }

    #[test]
    fn error_callback_offsets_the_request_opcode_by_2000() {
        assert_eq!(
            ipc::error_callback_for(opcode::HID_CONNECT),
            opcode::HID_CONNECT + 2000
        );
    }
}

