//! The HID report descriptor: a fixed byte string compiled once, declaring
//! the shape of every report this device will ever exchange with a host.
//!
//! Any change here must be mirrored in [`crate::report`]'s encoders — the
//! host parses this once and trusts the shape forever.

/// Report IDs, one per top-level application declared below.
pub mod report_id {
    pub const KEYBOARD: u8 = 0x01;
    pub const SYSTEM_KEYS: u8 = 0x10;
    pub const HW_KEYS: u8 = 0x11;
    pub const MEDIA_KEYS: u8 = 0x12;
    pub const AC_KEYS: u8 = 0x13;
    pub const MOUSE: u8 = 0x02;
    pub const MOUSE_FEATURE: u8 = 0x22;
    pub const MOUSE_ABSOLUTE: u8 = 0x23;
}

/// SDP descriptor attribute type: Report descriptor (vs. Physical).
pub const DESCRIPTOR_TYPE_REPORT: u8 = 0x22;

#[rustfmt::skip]
pub const HID_DESCRIPTOR: &[u8] = &[
    // --- Keyboard (report id 0x01) ---
    0x05, 0x01,             // USAGE_PAGE (Generic Desktop)
    0x09, 0x06,             // USAGE (Keyboard)
    0xa1, 0x01,             // COLLECTION (Application)
        0x85, 0x01,             //   REPORT_ID (1)
        0x05, 0x07,             //   USAGE_PAGE (Keyboard)
        0x19, 0xe0,             //   USAGE_MIN (0xe0)
        0x29, 0xe7,             //   USAGE_MAX (0xe7)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x25, 0x01,             //   LOGICAL_MAX (1)
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x08,             //   REPORT_COUNT (8)
        0x81, 0x02,             //   INPUT (Var,Abs) -- modifier byte
        0x75, 0x08,             //   REPORT_SIZE (8)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x81, 0x01,             //   INPUT (Const) -- reserved byte
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x05,             //   REPORT_COUNT (5)
        0x05, 0x08,             //   USAGE_PAGE (LED)
        0x19, 0x01,             //   USAGE_MIN (1)
        0x29, 0x05,             //   USAGE_MAX (5)
        0x91, 0x02,             //   OUTPUT (Var,Abs) -- LED bits
        0x75, 0x03,             //   REPORT_SIZE (3)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x91, 0x01,             //   OUTPUT (Const) -- LED padding
        0x75, 0x08,             //   REPORT_SIZE (8)
        0x95, 0x06,             //   REPORT_COUNT (6)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x26, 0xff, 0x00,       //   LOGICAL_MAX (255)
        0x05, 0x07,             //   USAGE_PAGE (Keyboard)
        0x19, 0x00,             //   USAGE_MIN (0)
        0x2a, 0xff, 0x00,       //   USAGE_MAX (255)
        0x81, 0x00,             //   INPUT (Array) -- 6 key codes
    0xc0,                   // END_COLLECTION

    // --- System control (report id 0x10) ---
    0x05, 0x01,             // USAGE_PAGE (Generic Desktop)
    0x09, 0x80,             // USAGE (System Control)
    0xa1, 0x01,             // COLLECTION (Application)
        0x85, 0x10,             //   REPORT_ID (0x10)
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x25, 0x01,             //   LOGICAL_MAX (1)
        0x09, 0x81,             //   USAGE (System Power Down)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0x82,             //   USAGE (System Sleep)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x95, 0x06,             //   REPORT_COUNT (6)
        0x81, 0x01,             //   INPUT (Const)
    0xc0,                   // END_COLLECTION

    // --- Consumer control: HW keys (0x11), media keys (0x12), AC keys (0x13) ---
    0x05, 0x0c,             // USAGE_PAGE (Consumer)
    0x09, 0x01,             // USAGE (Consumer Control)
    0xa1, 0x01,             // COLLECTION (Application)
        0x85, 0x11,             //   REPORT_ID (0x11) -- HW keys
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x03,             //   REPORT_COUNT (3)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x25, 0x01,             //   LOGICAL_MAX (1)
        0x81, 0x01,             //   INPUT (Const)
        0x05, 0x0c,             //   USAGE_PAGE (Consumer)
        0x09, 0xb8,             //   USAGE (Eject)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x95, 0x04,             //   REPORT_COUNT (4)
        0x81, 0x01,             //   INPUT (Const)

        0x85, 0x12,             //   REPORT_ID (0x12) -- media keys
        0x05, 0x0c,             //   USAGE_PAGE (Consumer)
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x25, 0x01,             //   LOGICAL_MAX (1)
        0x09, 0xcd,             //   USAGE (Play/Pause)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xb3,             //   USAGE (Fast Forward)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xb4,             //   USAGE (Rewind)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xb5,             //   USAGE (Scan Next Track)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xb6,             //   USAGE (Scan Previous Track)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xe2,             //   USAGE (Mute)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xe9,             //   USAGE (Volume Increment)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x09, 0xea,             //   USAGE (Volume Decrement)
        0x81, 0x02,             //   INPUT (Var,Abs)

        0x85, 0x13,             //   REPORT_ID (0x13) -- AC keys
        0x05, 0x0c,             //   USAGE_PAGE (Consumer)
        0x75, 0x01,             //   REPORT_SIZE (1)
        0x95, 0x01,             //   REPORT_COUNT (1)
        0x15, 0x00,             //   LOGICAL_MIN (0)
        0x25, 0x01,             //   LOGICAL_MAX (1)
        0x0a, 0x23, 0x02,       //   USAGE (AC Home)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x0a, 0x24, 0x02,       //   USAGE (AC Back)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x0a, 0x25, 0x02,       //   USAGE (AC Forward)
        0x81, 0x02,             //   INPUT (Var,Abs)
        0x95, 0x05,             //   REPORT_COUNT (5)
        0x81, 0x01,             //   INPUT (Const)
    0xc0,                   // END_COLLECTION

    // --- Mouse, relative (report id 0x02), feature (report id 0x22) ---
    0x05, 0x01,             // USAGE_PAGE (Generic Desktop)
    0x09, 0x02,             // USAGE (Mouse)
    0xa1, 0x01,             // COLLECTION (Application)
        0xa1, 0x02,             //   COLLECTION (Logical)
            0x85, 0x02,             //     REPORT_ID (0x02)
            0x09, 0x01,             //     USAGE (Pointer)
            0xa1, 0x00,             //     COLLECTION (Physical)
                0x05, 0x09,             //       USAGE_PAGE (Button)
                0x19, 0x01,             //       USAGE_MIN (1)
                0x29, 0x05,             //       USAGE_MAX (5)
                0x15, 0x00,             //       LOGICAL_MIN (0)
                0x25, 0x01,             //       LOGICAL_MAX (1)
                0x75, 0x01,             //       REPORT_SIZE (1)
                0x95, 0x05,             //       REPORT_COUNT (5)
                0x81, 0x02,             //       INPUT (Var,Abs) -- buttons
                0x75, 0x03,             //       REPORT_SIZE (3)
                0x95, 0x01,             //       REPORT_COUNT (1)
                0x81, 0x01,             //       INPUT (Const) -- button padding
                0x05, 0x01,             //       USAGE_PAGE (Generic Desktop)
                0x09, 0x30,             //       USAGE (X)
                0x09, 0x31,             //       USAGE (Y)
                0x16, 0x01, 0xf8,       //       LOGICAL_MIN (-2047)
                0x26, 0xff, 0x07,       //       LOGICAL_MAX (2047)
                0x75, 0x10,             //       REPORT_SIZE (16)
                0x95, 0x02,             //       REPORT_COUNT (2)
                0x81, 0x06,             //       INPUT (Var,Rel) -- X, Y
                0xa1, 0x02,             //       COLLECTION (Logical)
                    0x85, 0x22,             //         REPORT_ID (0x22, mouse feature)
                    0x09, 0x48,             //         USAGE (Resolution Multiplier)
                    0x75, 0x02,             //         REPORT_SIZE (2)
                    0x95, 0x01,             //         REPORT_COUNT (1)
                    0x15, 0x00,             //         LOGICAL_MIN (0)
                    0x25, 0x01,             //         LOGICAL_MAX (1)
                    0x35, 0x01,             //         PHYSICAL_MIN (1)
                    0x45, 0x10,             //         PHYSICAL_MAX (16)
                    0xb1, 0x02,             //         FEATURE (Var,Abs) -- vertical resolution multiplier
                    0x35, 0x00,             //         PHYSICAL_MIN (0)
                    0x45, 0x00,             //         PHYSICAL_MAX (0)
                    0x85, 0x02,             //         REPORT_ID (0x02, mouse)
                    0x09, 0x38,             //         USAGE (Wheel)
                    0x15, 0x81,             //         LOGICAL_MIN (-127)
                    0x25, 0x7f,             //         LOGICAL_MAX (127)
                    0x75, 0x08,             //         REPORT_SIZE (8)
                    0x95, 0x01,             //         REPORT_COUNT (1)
                    0x81, 0x06,             //         INPUT (Var,Rel) -- vertical wheel
                0xc0,                   //       END_COLLECTION (Logical)
                0xa1, 0x02,             //       COLLECTION (Logical)
                    0x85, 0x22,             //         REPORT_ID (0x22, mouse feature)
                    0x09, 0x48,             //         USAGE (Resolution Multiplier)
                    0x75, 0x02,             //         REPORT_SIZE (2)
                    0x95, 0x01,             //         REPORT_COUNT (1)
                    0x15, 0x00,             //         LOGICAL_MIN (0)
                    0x25, 0x01,             //         LOGICAL_MAX (1)
                    0x35, 0x01,             //         PHYSICAL_MIN (1)
                    0x45, 0x10,             //         PHYSICAL_MAX (16)
                    0xb1, 0x02,             //         FEATURE (Var,Abs) -- horizontal resolution multiplier
                    0x35, 0x00,             //         PHYSICAL_MIN (0)
                    0x45, 0x00,             //         PHYSICAL_MAX (0)
                    0x75, 0x04,             //         REPORT_SIZE (4)
                    0xb1, 0x01,             //         FEATURE (Const) -- padding between fields
                    0x85, 0x02,             //         REPORT_ID (0x02, mouse)
                    0x05, 0x0c,             //         USAGE_PAGE (Consumer)
                    0x0a, 0x38, 0x02,       //         USAGE (AC Pan)
                    0x15, 0x81,             //         LOGICAL_MIN (-127)
                    0x25, 0x7f,             //         LOGICAL_MAX (127)
                    0x75, 0x08,             //         REPORT_SIZE (8)
                    0x95, 0x01,             //         REPORT_COUNT (1)
                    0x81, 0x06,             //         INPUT (Var,Rel) -- horizontal wheel / AC Pan
                0xc0,                   //       END_COLLECTION (Logical)
            0xc0,                   //     END_COLLECTION (Physical)
        0xc0,                   //   END_COLLECTION (Logical)
    0xc0,                   // END_COLLECTION (Application)

    // --- Mouse, absolute (report id 0x23) ---
    0x05, 0x01,             // USAGE_PAGE (Generic Desktop)
    0x09, 0x02,             // USAGE (Mouse)
    0xa1, 0x01,             // COLLECTION (Application)
        0x85, 0x23,             //   REPORT_ID (0x23)
        0x09, 0x01,             //   USAGE (Pointer)
        0xa1, 0x00,             //   COLLECTION (Physical)
            0x05, 0x09,             //     USAGE_PAGE (Button)
            0x19, 0x01,             //     USAGE_MIN (1)
            0x29, 0x05,             //     USAGE_MAX (5)
            0x15, 0x00,             //     LOGICAL_MIN (0)
            0x25, 0x01,             //     LOGICAL_MAX (1)
            0x75, 0x01,             //     REPORT_SIZE (1)
            0x95, 0x05,             //     REPORT_COUNT (5)
            0x81, 0x02,             //     INPUT (Var,Abs) -- buttons
            0x75, 0x03,             //     REPORT_SIZE (3)
            0x95, 0x01,             //     REPORT_COUNT (1)
            0x81, 0x01,             //     INPUT (Const) -- button padding
            0x05, 0x01,             //     USAGE_PAGE (Generic Desktop)
            0x09, 0x30,             //     USAGE (X)
            0x75, 0x10,             //     REPORT_SIZE (16)
            0x95, 0x01,             //     REPORT_COUNT (1)
            0x15, 0x00,             //     LOGICAL_MIN (0)
            0x26, 0xff, 0x07,       //     LOGICAL_MAX (2047)
            0x55, 0x0e,             //     UNIT_EXPONENT (-2)
            0x65, 0x13,             //     UNIT (Inch)
            0x35, 0x00,             //     PHYSICAL_MIN (0)
            0x46, 0xf4, 0x01,       //     PHYSICAL_MAX (500)
            0x81, 0x02,             //     INPUT (Var,Abs) -- X
            0x09, 0x31,             //     USAGE (Y)
            0x81, 0x02,             //     INPUT (Var,Abs) -- Y, reuses X's declarations
            0x55, 0x00,             //     UNIT_EXPONENT (0)
            0x65, 0x00,             //     UNIT (0)
            0x35, 0x00,             //     PHYSICAL_MIN (0)
            0x45, 0x00,             //     PHYSICAL_MAX (0)
        0xc0,                   //   END_COLLECTION (Physical)
    0xc0,                   // END_COLLECTION (Application)
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_balanced() {
        let mut depth = 0i32;
        for &b in HID_DESCRIPTOR {
            if b == 0xa1 {
                depth += 1;
            } else if b == 0xc0 {
                depth -= 1;
            }
            assert!(depth >= 0);
        }
        assert_eq!(depth, 0);
    }

    #[test]
    fn every_report_id_used_appears_in_descriptor() {
        for id in [
            report_id::KEYBOARD,
            report_id::SYSTEM_KEYS,
            report_id::HW_KEYS,
            report_id::MEDIA_KEYS,
            report_id::AC_KEYS,
            report_id::MOUSE,
            report_id::MOUSE_FEATURE,
            report_id::MOUSE_ABSOLUTE,
        ] {
            assert!(
                HID_DESCRIPTOR.windows(2).any(|w| w == [0x85, id]),
                "report id {id:#04x} missing REPORT_ID item"
            );
        }
    }
}
