//! The HID Session: tracks one peer's control/interrupt channel pair,
//! answers control-channel transactions against the device's shadow state,
//! and carries outbound reports out over the interrupt channel.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use hidp_proto::{
    data_frame, decode_header, handshake, hid_control, report_type, ttype, BitmapReport,
    KeyboardReport, MouseAbsoluteReport, MouseFeature, MouseReport,
};

use crate::error::Error;
use crate::l2cap::L2capSocket;
use crate::sys::bdaddr_t;

/// How long an accepted control channel waits for its matching interrupt
/// channel from the same peer before it's dropped.
const PAIRED_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CtrlOnly { peer: bdaddr_t },
    Up { peer: bdaddr_t },
    Closing,
}

#[derive(Debug)]
pub enum SessionEvent {
    /// A peer's control channel connected; now waiting for its interrupt
    /// channel within [`PAIRED_ACCEPT_TIMEOUT`].
    AwaitingInterrupt { peer: bdaddr_t },
    /// Both channels are up; the session is ready to exchange reports.
    Ready { peer: bdaddr_t },
    /// The unmatched control channel timed out, or the peer disconnected.
    Closed,
}

/// The device's latest view of every report, rebuilt from `SET_REPORT` and
/// `DATA|Output` traffic from the host and handed back verbatim on
/// `GET_REPORT`.
#[derive(Debug, Clone, Copy, Default)]
struct ShadowState {
    keyboard: KeyboardReport,
    mouse: MouseReport,
    mouse_absolute: MouseAbsoluteReport,
    system_keys: u8,
    hw_keys: u8,
    media_keys: u8,
    ac_keys: u8,
    feature: MouseFeature,
    protocol_mode: u8,
    idle_rate: u8,
}

pub struct HidSession {
    state: SessionState,
    shadow: ShadowState,
    ctrl: Option<L2capSocket>,
    intr: Option<L2capSocket>,
    pending_ctrl: Option<(L2capSocket, bdaddr_t, Instant)>,
    /// Set by `handle_set_report` when the host changes the Mouse Feature
    /// report; drained by the supervisor so it can forward a MOUSE_FEATURE
    /// notification to the Local Command Channel.
    pending_feature_change: Option<(bool, bool)>,
}

impl Default for HidSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HidSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            shadow: ShadowState::default(),
            ctrl: None,
            intr: None,
            pending_ctrl: None,
            pending_feature_change: None,
        }
    }

    /// Takes the pending Mouse Feature change, if `handle_set_report`
    /// recorded one since the last call. Call this once per tick after
    /// [`Self::service_control`].
    pub fn take_feature_change(&mut self) -> Option<(bool, bool)> {
        self.pending_feature_change.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ctrl_fd(&self) -> Option<std::os::fd::RawFd> {
        self.ctrl.as_ref().map(|s| s.raw_fd())
    }

    pub fn intr_fd(&self) -> Option<std::os::fd::RawFd> {
        self.intr.as_ref().map(|s| s.raw_fd())
    }

    /// A peer dialed (or was accepted on) the control PSM. Only one pending
    /// peer is tracked at a time, matching the single-client nature of the
    /// device role; a second control accept while one is already pending
    /// replaces it.
    pub fn on_control_accept(&mut self, sock: L2capSocket, peer: bdaddr_t) -> SessionEvent {
        self.pending_ctrl = Some((sock, peer, Instant::now()));
        self.state = SessionState::CtrlOnly { peer };
        debug!(peer = %crate::sys::bdaddr_to_string(&peer), "control channel accepted, awaiting interrupt");
        SessionEvent::AwaitingInterrupt { peer }
    }

    /// A peer dialed (or was accepted on) the interrupt PSM. Promotes the
    /// session to `Up` only if it matches the pending control channel's
    /// peer and the pairing window hasn't expired.
    pub fn on_interrupt_accept(&mut self, sock: L2capSocket, peer: bdaddr_t) -> SessionEvent {
        match self.pending_ctrl.take() {
            Some((ctrl, ctrl_peer, accepted_at))
                if ctrl_peer == peer && accepted_at.elapsed() <= PAIRED_ACCEPT_TIMEOUT =>
            {
                self.ctrl = Some(ctrl);
                self.intr = Some(sock);
                self.state = SessionState::Up { peer };
                self.shadow = ShadowState::default();
                info!(peer = %crate::sys::bdaddr_to_string(&peer), "HID session up");
                SessionEvent::Ready { peer }
            }
            Some((_, ctrl_peer, _)) => {
                warn!(
                    ctrl_peer = %crate::sys::bdaddr_to_string(&ctrl_peer),
                    intr_peer = %crate::sys::bdaddr_to_string(&peer),
                    "interrupt channel from unmatched peer, dropping both"
                );
                self.state = SessionState::Idle;
                SessionEvent::Closed
            }
            None => {
                warn!("interrupt channel accepted with no pending control channel, dropping");
                self.state = SessionState::Idle;
                SessionEvent::Closed
            }
        }
    }

    /// Adopts an outbound-dialed pair as the active session. Unlike the
    /// accept path, both channels reach the peer atomically through
    /// [`crate::connect_hid`], so there's no pending/paired-timeout window.
    pub fn adopt(&mut self, ctrl: L2capSocket, intr: L2capSocket, peer: bdaddr_t) {
        self.ctrl = Some(ctrl);
        self.intr = Some(intr);
        self.pending_ctrl = None;
        self.state = SessionState::Up { peer };
        self.shadow = ShadowState::default();
        info!(peer = %crate::sys::bdaddr_to_string(&peer), "HID session up (outbound)");
    }

    /// Drops a pending control channel once [`PAIRED_ACCEPT_TIMEOUT`] has
    /// elapsed with no matching interrupt channel.
    pub fn expire_pending(&mut self) -> bool {
        let expired = matches!(&self.pending_ctrl, Some((_, _, at)) if at.elapsed() > PAIRED_ACCEPT_TIMEOUT);
        if expired {
            self.pending_ctrl = None;
            self.state = SessionState::Idle;
        }
        expired
    }

    /// Tears the session down, clearing shadow state so the next peer
    /// starts from a clean slate.
    pub fn close(&mut self) {
        self.state = SessionState::Closing;
        self.ctrl = None;
        self.intr = None;
        self.pending_ctrl = None;
        self.pending_feature_change = None;
        self.shadow = ShadowState::default();
        self.state = SessionState::Idle;
    }

    pub fn peer(&self) -> Option<bdaddr_t> {
        match self.state {
            SessionState::CtrlOnly { peer } | SessionState::Up { peer } => Some(peer),
            _ => None,
        }
    }

    /// Handles one control-channel frame, returning the response frame to
    /// write back (if any). `HID_CONTROL` transactions and malformed
    /// output-report `SET_REPORT`s never produce a response of their own
    /// kind beyond the table below; callers write whatever is returned
    /// verbatim to the control socket.
    pub fn handle_control_frame(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let header = decode_header(frame)?;
        let payload = &frame[1..];
        match header.ttype {
            ttype::HID_CONTROL => {
                self.handle_hid_control(header.param);
                Ok(None)
            }
            ttype::GET_REPORT => Ok(Some(self.handle_get_report(header.param, payload))),
            ttype::SET_REPORT => Ok(Some(self.handle_set_report(header.param, payload))),
            ttype::GET_PROTOCOL => {
                Ok(Some(data_frame(report_type::OTHER, &[self.shadow.protocol_mode])))
            }
            ttype::SET_PROTOCOL => {
                self.shadow.protocol_mode = header.param & 0x1;
                Ok(Some(handshake(hidp_proto::transaction::handshake::SUCCESS).to_vec()))
            }
            ttype::GET_IDLE => Ok(Some(data_frame(report_type::OTHER, &[self.shadow.idle_rate]))),
            ttype::SET_IDLE => {
                self.shadow.idle_rate = payload.first().copied().unwrap_or(0);
                Ok(Some(handshake(hidp_proto::transaction::handshake::SUCCESS).to_vec()))
            }
            ttype::DATA => self.handle_data(header.param, payload).map(|_| None),
            _ => Ok(Some(
                handshake(hidp_proto::transaction::handshake::ERR_UNKNOWN).to_vec(),
            )),
        }
    }

    fn handle_hid_control(&mut self, param: u8) {
        match param {
            hid_control::NOP => debug!("HID_CONTROL NOP"),
            hid_control::SUSPEND => debug!("host suspended the link"),
            hid_control::EXIT_SUSPEND => debug!("host resumed the link"),
            hid_control::VIRTUAL_CABLE_UNPLUG => {
                info!("virtual cable unplug requested by host");
                self.close();
            }
            hid_control::HARD_RESET | hid_control::SOFT_RESET => {
                warn!(param, "host requested a reset, resetting shadow state");
                self.shadow = ShadowState::default();
            }
            other => warn!(param = other, "unrecognized HID_CONTROL parameter"),
        }
    }

    fn handle_get_report(&self, param: u8, payload: &[u8]) -> Vec<u8> {
        use hidp_proto::report_id;
        let report_id = payload.first().copied();
        match (param, report_id) {
            (report_type::INPUT, Some(report_id::KEYBOARD)) => {
                data_frame(report_type::INPUT, &self.shadow.keyboard.encode())
            }
            (report_type::INPUT, Some(report_id::MOUSE)) => {
                data_frame(report_type::INPUT, &self.shadow.mouse.encode())
            }
            (report_type::INPUT, Some(report_id::MOUSE_ABSOLUTE)) => {
                data_frame(report_type::INPUT, &self.shadow.mouse_absolute.encode())
            }
            (report_type::INPUT, Some(report_id::SYSTEM_KEYS)) => data_frame(
                report_type::INPUT,
                &BitmapReport::system_keys(self.shadow.system_keys).encode(),
            ),
            (report_type::INPUT, Some(report_id::HW_KEYS)) => data_frame(
                report_type::INPUT,
                &BitmapReport::hw_keys(self.shadow.hw_keys).encode(),
            ),
            (report_type::INPUT, Some(report_id::MEDIA_KEYS)) => data_frame(
                report_type::INPUT,
                &BitmapReport::media_keys(self.shadow.media_keys).encode(),
            ),
            (report_type::INPUT, Some(report_id::AC_KEYS)) => data_frame(
                report_type::INPUT,
                &BitmapReport::ac_keys(self.shadow.ac_keys).encode(),
            ),
            (report_type::FEATURE, Some(report_id::MOUSE_FEATURE)) => {
                data_frame(report_type::FEATURE, &self.shadow.feature.encode())
            }
            _ => handshake(hidp_proto::transaction::handshake::ERR_INVALID_REPORT_ID).to_vec(),
        }
    }

    fn handle_set_report(&mut self, param: u8, payload: &[u8]) -> Vec<u8> {
        let ok = handshake(hidp_proto::transaction::handshake::SUCCESS).to_vec();
        let unsupported = handshake(hidp_proto::transaction::handshake::ERR_UNSUPPORTED).to_vec();
        match param {
            report_type::FEATURE => match payload.first() {
                Some(&hidp_proto::report_id::MOUSE_FEATURE) if payload.len() == 2 => {
                    self.shadow.feature = MouseFeature::decode_byte(payload[1]);
                    self.pending_feature_change = Some((
                        self.shadow.feature.smooth_scroll_y,
                        self.shadow.feature.smooth_scroll_x,
                    ));
                    ok
                }
                _ => unsupported,
            },
            report_type::OUTPUT => match payload.first() {
                Some(&hidp_proto::report_id::KEYBOARD) if payload.len() == 2 => {
                    // LED-state output report: [report_id, led_bitmap].
                    debug!(leds = payload[1], "host set keyboard LED state");
                    ok
                }
                _ => unsupported,
            },
            _ => unsupported,
        }
    }

    fn handle_data(&mut self, param: u8, payload: &[u8]) -> Result<(), Error> {
        if param == report_type::OUTPUT {
            if let Some(&hidp_proto::report_id::KEYBOARD) = payload.first() {
                debug!(leds = payload.get(1).copied().unwrap_or(0), "host LED update via DATA");
            }
        }
        Ok(())
    }

    /// Reads and answers one pending control-channel frame, if the control
    /// socket has one ready. Returns `true` if the peer disconnected
    /// (control channel read zero bytes), which the caller should treat as
    /// session teardown.
    pub fn service_control(&mut self) -> Result<bool, Error> {
        let Some(ctrl) = &self.ctrl else { return Ok(false) };
        let mut buf = [0u8; 64];
        let n = ctrl.read(&mut buf)?;
        if n == 0 {
            self.close();
            return Ok(true);
        }
        if let Some(resp) = self.handle_control_frame(&buf[..n])? {
            if let Some(ctrl) = &self.ctrl {
                ctrl.write(&resp)?;
            }
        }
        Ok(false)
    }

    fn send(&self, frame: &[u8]) -> Result<(), Error> {
        match &self.intr {
            Some(sock) => {
                sock.write(frame)?;
                Ok(())
            }
            None => Err(Error::Code(crate::error::ErrorCode::NotConnected)),
        }
    }

    /// Updates the keyboard shadow report and sends it as a single
    /// `DATA|Input` frame. No coalescing: one call, one frame.
    pub fn send_keyboard(&mut self, report: KeyboardReport) -> Result<(), Error> {
        self.shadow.keyboard = report;
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_system_keys(&mut self, bitmap: u8) -> Result<(), Error> {
        self.shadow.system_keys = bitmap;
        let report = BitmapReport::system_keys(bitmap);
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_hw_keys(&mut self, bitmap: u8) -> Result<(), Error> {
        self.shadow.hw_keys = bitmap;
        let report = BitmapReport::hw_keys(bitmap);
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_media_keys(&mut self, bitmap: u8) -> Result<(), Error> {
        self.shadow.media_keys = bitmap;
        let report = BitmapReport::media_keys(bitmap);
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_ac_keys(&mut self, bitmap: u8) -> Result<(), Error> {
        self.shadow.ac_keys = bitmap;
        let report = BitmapReport::ac_keys(bitmap);
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_mouse(&mut self, report: MouseReport) -> Result<(), Error> {
        self.shadow.mouse = report;
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn send_mouse_absolute(&mut self, report: MouseAbsoluteReport) -> Result<(), Error> {
        self.shadow.mouse_absolute = report;
        self.send(&data_frame(report_type::INPUT, &report.encode()))
    }

    pub fn protocol_mode(&self) -> u8 {
        self.shadow.protocol_mode
    }

    /// Updates the mouse feature shadow directly, outside a host-initiated
    /// `SET_REPORT`; the next `GET_REPORT|Feature` reflects it immediately.
    /// Unlike the wire-level feature byte (which packs two 2-bit resolution
    /// multipliers), the Local Command Channel's `HID_CHANGE_MOUSE_FEATURE`
    /// carries two independent booleans.
    pub fn set_mouse_feature(&mut self, smooth_y: bool, smooth_x: bool) {
        self.shadow.feature = MouseFeature {
            smooth_scroll_y: smooth_y,
            smooth_scroll_x: smooth_x,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidp_proto::transaction::handshake as hs;

    fn addr(b: u8) -> bdaddr_t {
        bdaddr_t { b: [b; 6] }
    }

    #[test]
    fn unmatched_interrupt_peer_is_dropped() {
        let mut session = HidSession::new();
        let (ctrl, _) = crate::l2cap::test_support::loopback_pair();
        session.on_control_accept(ctrl, addr(1));
        let (intr, _) = crate::l2cap::test_support::loopback_pair();
        let ev = session.on_interrupt_accept(intr, addr(2));
        assert!(matches!(ev, SessionEvent::Closed));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn matched_pair_brings_session_up() {
        let mut session = HidSession::new();
        let (ctrl, _) = crate::l2cap::test_support::loopback_pair();
        session.on_control_accept(ctrl, addr(9));
        let (intr, _) = crate::l2cap::test_support::loopback_pair();
        let ev = session.on_interrupt_accept(intr, addr(9));
        assert!(matches!(ev, SessionEvent::Ready { .. }));
        assert_eq!(session.state(), SessionState::Up { peer: addr(9) });
    }

    #[test]
    fn get_report_keyboard_scenario_3() {
        let session = HidSession::new();
        let resp = session.handle_get_report(report_type::INPUT, &[0x01]);
        assert_eq!(resp, vec![0xA1, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn set_report_feature_scenario_4() {
        let mut session = HidSession::new();
        let resp = session.handle_set_report(report_type::FEATURE, &[0x22, 0x09]);
        assert_eq!(resp, vec![Header_byte(hs::SUCCESS)]);
        assert!(session.shadow.feature.smooth_scroll_y);
        assert!(session.shadow.feature.smooth_scroll_x);
    }

    #[test]
    fn unknown_report_id_is_rejected() {
        let session = HidSession::new();
        let resp = session.handle_get_report(report_type::INPUT, &[0xFF]);
        assert_eq!(resp, vec![Header_byte(hs::ERR_INVALID_REPORT_ID)]);
    }

    #[test]
    fn get_report_covers_every_declared_input_id() {
        let session = HidSession::new();
        for id in [
            hidp_proto::report_id::MOUSE,
            hidp_proto::report_id::MOUSE_ABSOLUTE,
            hidp_proto::report_id::SYSTEM_KEYS,
            hidp_proto::report_id::HW_KEYS,
            hidp_proto::report_id::MEDIA_KEYS,
            hidp_proto::report_id::AC_KEYS,
        ] {
            let resp = session.handle_get_report(report_type::INPUT, &[id]);
            assert_eq!(resp[0], 0xA1, "report id {id:#04x} did not answer DATA|Input");
            assert_eq!(resp[1], id, "report id {id:#04x} echoed the wrong id byte");
        }
    }

    #[test]
    fn set_report_anything_else_is_unsupported() {
        let mut session = HidSession::new();
        let resp = session.handle_set_report(report_type::FEATURE, &[0xFF, 0x00]);
        assert_eq!(resp, vec![Header_byte(hs::ERR_UNSUPPORTED)]);
        let resp = session.handle_set_report(0x7, &[]);
        assert_eq!(resp, vec![Header_byte(hs::ERR_UNSUPPORTED)]);
    }

    #[test]
    fn set_report_feature_queues_a_feature_change_notification() {
        let mut session = HidSession::new();
        assert_eq!(session.take_feature_change(), None);
        session.handle_set_report(report_type::FEATURE, &[0x22, 0x09]);
        assert_eq!(session.take_feature_change(), Some((true, true)));
        // Drained, so a second take sees nothing new.
        assert_eq!(session.take_feature_change(), None);
    }

    #[test]
    fn set_mouse_feature_takes_two_independent_booleans() {
        let mut session = HidSession::new();
        session.set_mouse_feature(true, false);
        assert!(session.shadow.feature.smooth_scroll_y);
        assert!(!session.shadow.feature.smooth_scroll_x);
    }

    #[allow(non_snake_case)]
    fn Header_byte(param: u8) -> u8 {
        hidp_proto::transaction::Header::new(ttype::HANDSHAKE, param).to_byte()
    }
}
