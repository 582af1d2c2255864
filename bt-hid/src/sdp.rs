//! The SDP Publisher: builds the HID service record, registers it with the
//! adapter's SDP server, and can snapshot/unregister/restore every other
//! record so the HID record is the only thing remote hosts discover.
//!
//! Registration goes over a local L2CAP connection to the SDP server's
//! well-known PSM (1), using the same vendor-extension PDUs BlueZ's legacy
//! `sdp_lib` exposed (`SDP_SVC_REGISTER_REQ` and friends) alongside the
//! standard search/attribute PDUs for reading back other adapters' records.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, warn};

use hidp_proto::{DESCRIPTOR_TYPE_REPORT, HID_DESCRIPTOR};

use crate::adapter::Adapter;
use crate::error::{Error, ErrorCode};
use crate::l2cap::{L2capSocket, L2capListener};
use crate::sys::{self, bdaddr_t};

/// SDP data element type tags (Bluetooth SDP spec, header byte is
/// `(type << 3) | size_index`).
mod elem_type {
    pub const NIL: u8 = 0;
    pub const UINT: u8 = 1;
    pub const INT: u8 = 2;
    pub const UUID: u8 = 3;
    pub const TEXT: u8 = 4;
    pub const BOOL: u8 = 5;
    pub const SEQUENCE: u8 = 6;
    pub const URL: u8 = 8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataElement {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    Int8(i8),
    Uuid16(u16),
    Uuid32(u32),
    Text(Vec<u8>),
    Bool(bool),
    Sequence(Vec<DataElement>),
}

impl DataElement {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DataElement::UInt8(v) => vec![header(elem_type::UINT, 0), *v],
            DataElement::UInt16(v) => {
                let mut out = vec![header(elem_type::UINT, 1)];
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            DataElement::UInt32(v) => {
                let mut out = vec![header(elem_type::UINT, 2)];
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            DataElement::Int8(v) => vec![header(elem_type::INT, 0), *v as u8],
            DataElement::Uuid16(v) => {
                let mut out = vec![header(elem_type::UUID, 1)];
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            DataElement::Uuid32(v) => {
                let mut out = vec![header(elem_type::UUID, 2)];
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            DataElement::Bool(v) => vec![header(elem_type::BOOL, 0), *v as u8],
            DataElement::Text(bytes) => encode_variable(elem_type::TEXT, bytes),
            DataElement::Sequence(items) => {
                let mut body = Vec::new();
                for item in items {
                    body.extend(item.encode());
                }
                encode_variable(elem_type::SEQUENCE, &body)
            }
        }
    }
}

fn header(ty: u8, size_index: u8) -> u8 {
    (ty << 3) | size_index
}

/// Encodes a TEXT/SEQUENCE/URL element, choosing the narrowest length-prefix
/// width that fits (size index 5/6/7 = 1/2/4-byte length), mirroring
/// `get_sdp_text_dtds`.
fn encode_variable(ty: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    if body.len() <= u8::MAX as usize {
        out.push(header(ty, 5));
        out.push(body.len() as u8);
    } else if body.len() <= u16::MAX as usize {
        out.push(header(ty, 6));
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    } else {
        out.push(header(ty, 7));
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Well-known SDP attribute IDs used by the HID profile and the SDP base.
pub mod attr {
    pub const SERVICE_CLASS_ID_LIST: u16 = 0x0001;
    pub const PROTOCOL_DESCRIPTOR_LIST: u16 = 0x0004;
    pub const BROWSE_GROUP_LIST: u16 = 0x0005;
    pub const LANGUAGE_BASE_ATTR_ID_LIST: u16 = 0x0006;
    pub const BT_PROFILE_DESCRIPTOR_LIST: u16 = 0x0009;
    pub const ADDITIONAL_PROTOCOL_DESCRIPTOR_LISTS: u16 = 0x000D;
    pub const SERVICE_NAME: u16 = 0x0100;
    pub const SERVICE_DESCRIPTION: u16 = 0x0101;
    pub const PROVIDER_NAME: u16 = 0x0102;
    pub const HID_PARSER_VERSION: u16 = 0x0201;
    pub const HID_DEVICE_SUBCLASS: u16 = 0x0202;
    pub const HID_COUNTRY_CODE: u16 = 0x0203;
    pub const HID_VIRTUAL_CABLE: u16 = 0x0204;
    pub const HID_RECONNECT_INITIATE: u16 = 0x0205;
    pub const HID_DESCRIPTOR_LIST: u16 = 0x0206;
    pub const HID_LANGID_BASE_LIST: u16 = 0x0207;
    pub const HID_BATTERY_POWER: u16 = 0x0209;
    pub const HID_REMOTE_WAKE: u16 = 0x020A;
    pub const HID_SUPERVISION_TIMEOUT: u16 = 0x020C;
    pub const HID_NORMALLY_CONNECTABLE: u16 = 0x020D;
    pub const HID_BOOT_DEVICE: u16 = 0x020E;
}

const UUID_L2CAP: u16 = 0x0100;
const UUID_HIDP: u16 = 0x0011;
const UUID_HID_PROFILE: u16 = 0x1124;
const UUID_PUBLIC_BROWSE_GROUP: u16 = 0x1002;

const HID_PROFILE_VERSION: u16 = 0x0100;
const HID_PARSER_VERSION: u16 = 0x0111;
const HID_DEVICE_SUBCLASS: u8 = 0xC0; // combo keyboard/pointing device
const HID_COUNTRY_CODE: u8 = 13; // ISO
const HID_SUPERVISION_TIMEOUT_SLOTS: u16 = 8000;
const HID_LANGID_ENGLISH_US: u16 = 0x0409;

const SERVICE_NAME: &str = "bluectrld";
const SERVICE_DESCRIPTION: &str = "Virtual HID";
const PROVIDER_NAME: &str = "bluectrld";

/// Ordered attribute set for one SDP record. Order doesn't matter on the
/// wire (attribute IDs disambiguate), `BTreeMap` just keeps encoding
/// deterministic for tests.
#[derive(Debug, Clone, Default)]
pub struct ServiceRecord {
    pub attrs: BTreeMap<u16, DataElement>,
}

impl ServiceRecord {
    /// Encodes the record as the attribute-id/value sequence the
    /// registration PDU carries.
    pub fn encode(&self) -> Vec<u8> {
        let mut items = Vec::with_capacity(self.attrs.len() * 2);
        for (id, value) in &self.attrs {
            items.push(DataElement::UInt16(*id));
            items.push(value.clone());
        }
        DataElement::Sequence(items).encode()
    }
}

fn access_protocol(psm: u16) -> DataElement {
    DataElement::Sequence(vec![
        DataElement::Sequence(vec![DataElement::Uuid16(UUID_L2CAP), DataElement::UInt16(psm)]),
        DataElement::Sequence(vec![DataElement::Uuid16(UUID_HIDP)]),
    ])
}

/// Builds the HID service record per the HID over L2CAP profile, with
/// `psm_ctrl`/`psm_intr` as the primary and additional access protocols and
/// `normally_connectable` mirroring whether the L2CAP listener is up.
pub fn build_hid_record(psm_ctrl: u16, psm_intr: u16, normally_connectable: bool) -> ServiceRecord {
    let mut r = ServiceRecord::default();
    r.attrs.insert(
        attr::SERVICE_CLASS_ID_LIST,
        DataElement::Sequence(vec![DataElement::Uuid16(UUID_HID_PROFILE)]),
    );
    r.attrs
        .insert(attr::PROTOCOL_DESCRIPTOR_LIST, access_protocol(psm_ctrl));
    r.attrs.insert(
        attr::ADDITIONAL_PROTOCOL_DESCRIPTOR_LISTS,
        DataElement::Sequence(vec![access_protocol(psm_intr)]),
    );
    r.attrs.insert(
        attr::BROWSE_GROUP_LIST,
        DataElement::Sequence(vec![DataElement::Uuid16(UUID_PUBLIC_BROWSE_GROUP)]),
    );
    // English (en), UTF-8 (MIBenum 106), base attribute id 0x0100.
    r.attrs.insert(
        attr::LANGUAGE_BASE_ATTR_ID_LIST,
        DataElement::Sequence(vec![
            DataElement::UInt16((0x65u16 << 8) | 0x6e),
            DataElement::UInt16(106),
            DataElement::UInt16(0x0100),
        ]),
    );
    r.attrs.insert(
        attr::SERVICE_NAME,
        DataElement::Text(SERVICE_NAME.as_bytes().to_vec()),
    );
    r.attrs.insert(
        attr::SERVICE_DESCRIPTION,
        DataElement::Text(SERVICE_DESCRIPTION.as_bytes().to_vec()),
    );
    r.attrs.insert(
        attr::PROVIDER_NAME,
        DataElement::Text(PROVIDER_NAME.as_bytes().to_vec()),
    );
    r.attrs.insert(
        attr::BT_PROFILE_DESCRIPTOR_LIST,
        DataElement::Sequence(vec![DataElement::Sequence(vec![
            DataElement::Uuid16(UUID_HID_PROFILE),
            DataElement::UInt16(HID_PROFILE_VERSION),
        ])]),
    );
    r.attrs
        .insert(attr::HID_PARSER_VERSION, DataElement::UInt16(HID_PARSER_VERSION));
    r.attrs
        .insert(attr::HID_DEVICE_SUBCLASS, DataElement::UInt8(HID_DEVICE_SUBCLASS));
    r.attrs
        .insert(attr::HID_COUNTRY_CODE, DataElement::UInt8(HID_COUNTRY_CODE));
    r.attrs
        .insert(attr::HID_VIRTUAL_CABLE, DataElement::Bool(false));
    r.attrs
        .insert(attr::HID_RECONNECT_INITIATE, DataElement::Bool(true));
    r.attrs.insert(
        attr::HID_DESCRIPTOR_LIST,
        DataElement::Sequence(vec![DataElement::Sequence(vec![
            DataElement::UInt8(DESCRIPTOR_TYPE_REPORT),
            DataElement::Text(HID_DESCRIPTOR.to_vec()),
        ])]),
    );
    r.attrs.insert(
        attr::HID_LANGID_BASE_LIST,
        DataElement::Sequence(vec![DataElement::Sequence(vec![
            DataElement::UInt16(HID_LANGID_ENGLISH_US),
            DataElement::UInt16(0x0100),
        ])]),
    );
    r.attrs.insert(attr::HID_BATTERY_POWER, DataElement::Bool(true));
    r.attrs.insert(attr::HID_REMOTE_WAKE, DataElement::Bool(true));
    r.attrs.insert(
        attr::HID_SUPERVISION_TIMEOUT,
        DataElement::UInt16(HID_SUPERVISION_TIMEOUT_SLOTS),
    );
    r.attrs.insert(
        attr::HID_NORMALLY_CONNECTABLE,
        DataElement::Bool(normally_connectable),
    );
    r.attrs.insert(attr::HID_BOOT_DEVICE, DataElement::Bool(true));
    r
}

/// Legacy BlueZ vendor-extension PDU IDs plus the standard search/attribute
/// PDUs used to enumerate other services before deactivating them.
mod pdu {
    pub const SVC_SEARCH_REQ: u8 = 0x02;
    pub const SVC_SEARCH_RSP: u8 = 0x03;
    pub const SVC_ATTR_REQ: u8 = 0x04;
    pub const SVC_ATTR_RSP: u8 = 0x05;
    pub const ERROR_RSP: u8 = 0x01;
    pub const SVC_REGISTER_REQ: u8 = 0x75;
    pub const SVC_REGISTER_RSP: u8 = 0x76;
    pub const SVC_UPDATE_REQ: u8 = 0x77;
    pub const SVC_UPDATE_RSP: u8 = 0x78;
    pub const SVC_REMOVE_REQ: u8 = 0x79;
    pub const SVC_REMOVE_RSP: u8 = 0x7A;
}

fn pdu_header(pdu_id: u8, tid: u16, param_len: u16) -> [u8; 5] {
    let mut h = [0u8; 5];
    h[0] = pdu_id;
    h[1..3].copy_from_slice(&tid.to_be_bytes());
    h[3..5].copy_from_slice(&param_len.to_be_bytes());
    h
}

/// Owns the local connection to the adapter's SDP server and the HID
/// record's handle once registered, plus any snapshot taken for restore.
pub struct SdpPublisher {
    conn: L2capSocket,
    next_tid: u16,
    hid_handle: Option<u32>,
    deactivated: Vec<(u32, Vec<u8>)>,
}

impl SdpPublisher {
    /// Connects to the local SDP server at PSM 1 on `adapter`.
    pub fn connect_local(adapter: bdaddr_t) -> Result<Self, Error> {
        let conn = crate::l2cap::dial_local_sdp(adapter)?;
        Ok(Self {
            conn,
            next_tid: 1,
            hid_handle: None,
            deactivated: Vec::new(),
        })
    }

    fn tid(&mut self) -> u16 {
        let t = self.next_tid;
        self.next_tid = self.next_tid.wrapping_add(1);
        t
    }

    fn send_pdu(&mut self, pdu_id: u8, params: &[u8]) -> Result<(u8, Vec<u8>), Error> {
        let tid = self.tid();
        let header = pdu_header(pdu_id, tid, params.len() as u16);
        let mut frame = Vec::with_capacity(header.len() + params.len());
        frame.extend_from_slice(&header);
        frame.extend_from_slice(params);
        self.conn.write(&frame)?;

        let mut buf = [0u8; 4096];
        let n = self.conn.read(&mut buf)?;
        if n < 5 {
            return Err(Error::Code(ErrorCode::Unknown));
        }
        let rsp_pdu = buf[0];
        let rsp_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        Ok((rsp_pdu, buf[5..5 + rsp_len.min(n - 5)].to_vec()))
    }

    /// Registers `record`, returning the handle the adapter assigned it.
    pub fn register(&mut self, record: &ServiceRecord) -> Result<u32, Error> {
        let (rsp_pdu, body) = self.send_pdu(pdu::SVC_REGISTER_REQ, &record.encode())?;
        if rsp_pdu == pdu::ERROR_RSP || body.len() < 4 {
            return Err(Error::Code(ErrorCode::Unknown));
        }
        Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
    }

    pub fn unregister(&mut self, handle: u32) -> Result<(), Error> {
        let (rsp_pdu, _) = self.send_pdu(pdu::SVC_REMOVE_REQ, &handle.to_be_bytes())?;
        if rsp_pdu == pdu::ERROR_RSP {
            return Err(Error::Code(ErrorCode::Unknown));
        }
        Ok(())
    }

    /// Publishes the HID record. Call once at startup.
    pub fn register_hid(&mut self, record: &ServiceRecord) -> Result<u32, Error> {
        let handle = self.register(record)?;
        self.hid_handle = Some(handle);
        debug!(handle, "registered HID service record");
        Ok(handle)
    }

    pub fn unregister_hid(&mut self) -> Result<(), Error> {
        if let Some(handle) = self.hid_handle.take() {
            self.unregister(handle)?;
        }
        Ok(())
    }

    /// Rewrites the `normally-connectable` flag to track the L2CAP
    /// listener's up/down state.
    pub fn set_normally_connectable(&mut self, up: bool, psm_ctrl: u16, psm_intr: u16) -> Result<(), Error> {
        if let Some(handle) = self.hid_handle {
            let record = build_hid_record(psm_ctrl, psm_intr, up);
            let mut params = handle.to_be_bytes().to_vec();
            params.extend(record.encode());
            let (rsp_pdu, _) = self.send_pdu(pdu::SVC_UPDATE_REQ, &params)?;
            if rsp_pdu == pdu::ERROR_RSP {
                return Err(Error::Code(ErrorCode::Unknown));
            }
        }
        Ok(())
    }

    /// Queries every record in the public browse group, retains every one
    /// whose handle differs from the HID record's (with its full attribute
    /// set), then unregisters each, and polls the adapter's Class-of-Device
    /// until its service bits clear (capped at one second).
    pub fn deactivate_other_services(&mut self, adapter: &Adapter) -> Result<(), Error> {
        let handles = self.search_public_browse_group()?;
        let mut first_err = None;
        for handle in handles {
            if Some(handle) == self.hid_handle {
                continue;
            }
            match self.fetch_full_record(handle) {
                Ok(bytes) => self.deactivated.push((handle, bytes)),
                Err(e) => {
                    warn!(handle, error = %e, "failed to snapshot service record before deactivation");
                    first_err.get_or_insert(e);
                    continue;
                }
            }
            if let Err(e) = self.unregister(handle) {
                warn!(handle, error = %e, "failed to unregister service record");
                first_err.get_or_insert(e);
            }
        }
        adapter.wait_for_empty_service_class(Duration::from_secs(1))?;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-registers every snapshot taken by `deactivate_other_services`.
    /// A failure on one record is logged and does not stop the rest; the
    /// first error encountered is returned after the snapshot is cleared.
    pub fn reactivate_other_services(&mut self) -> Result<(), Error> {
        let snapshot = std::mem::take(&mut self.deactivated);
        let mut first_err = None;
        for (handle, raw) in snapshot {
            if let Err(e) = self.send_pdu(pdu::SVC_REGISTER_REQ, &raw) {
                warn!(handle, error = %e, "failed to reactivate service record");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn search_public_browse_group(&mut self) -> Result<Vec<u32>, Error> {
        let pattern = DataElement::Sequence(vec![DataElement::Uuid16(UUID_PUBLIC_BROWSE_GROUP)]).encode();
        let mut params = pattern;
        params.extend_from_slice(&0xFFFFu16.to_be_bytes()); // max handle count
        params.push(0x00); // no continuation state
        let (rsp_pdu, body) = self.send_pdu(pdu::SVC_SEARCH_REQ, &params)?;
        if rsp_pdu == pdu::ERROR_RSP || body.len() < 4 {
            return Ok(Vec::new());
        }
        let count = u16::from_be_bytes([body[2], body[3]]) as usize;
        let mut handles = Vec::with_capacity(count);
        for chunk in body[4..].chunks_exact(4).take(count) {
            handles.push(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(handles)
    }

    fn fetch_full_record(&mut self, handle: u32) -> Result<Vec<u8>, Error> {
        let mut params = handle.to_be_bytes().to_vec();
        params.extend_from_slice(&0xFFFFu16.to_be_bytes()); // max attribute bytes
        params.extend(DataElement::Sequence(vec![DataElement::UInt32(0x0000_FFFF)]).encode());
        params.push(0x00);
        let (rsp_pdu, body) = self.send_pdu(pdu::SVC_ATTR_REQ, &params)?;
        if rsp_pdu == pdu::ERROR_RSP {
            return Err(Error::Code(ErrorCode::Unknown));
        }
        Ok(body)
    }
}

/// Resolves the local adapter's SDP listener so `SdpPublisher` has
/// something to dial; kept separate from [`L2capListener`] because PSM 1 is
/// owned by the system's SDP daemon, not this process.
pub fn local_sdp_listener_exists(adapter: bdaddr_t) -> bool {
    L2capListener::bind(adapter, sys::L2CAP_PSM_SDP).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint16_encodes_big_endian_with_size_index_one() {
        let e = DataElement::UInt16(0x1124);
        assert_eq!(e.encode(), vec![0x09, 0x11, 0x24]);
    }

    #[test]
    fn text_uses_8bit_length_prefix_for_short_strings() {
        let e = DataElement::Text(b"BlueCtrl".to_vec());
        let bytes = e.encode();
        assert_eq!(bytes[0], (elem_type::TEXT << 3) | 5);
        assert_eq!(bytes[1], 8);
    }

    #[test]
    fn hid_record_carries_service_class_and_both_psms() {
        let record = build_hid_record(0x11, 0x13, true);
        assert!(record.attrs.contains_key(&attr::SERVICE_CLASS_ID_LIST));
        let proto = record.attrs.get(&attr::PROTOCOL_DESCRIPTOR_LIST).unwrap().encode();
        assert!(proto.windows(2).any(|w| w == [0x00, 0x11]));
        let addl = record
            .attrs
            .get(&attr::ADDITIONAL_PROTOCOL_DESCRIPTOR_LISTS)
            .unwrap()
            .encode();
        assert!(addl.windows(2).any(|w| w == [0x00, 0x13]));
    }

    #[test]
    fn hid_record_embeds_the_full_descriptor() {
        let record = build_hid_record(0x11, 0x13, true);
        let bytes = record.attrs.get(&attr::HID_DESCRIPTOR_LIST).unwrap().encode();
        assert!(bytes.windows(HID_DESCRIPTOR.len()).any(|w| w == HID_DESCRIPTOR));
    }
}
