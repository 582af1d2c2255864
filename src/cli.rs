//! Command-line interface.

use clap::Parser;

/// Makes a local Bluetooth adapter impersonate a combo keyboard/pointer.
#[derive(Parser, Debug)]
#[command(name = "bluectrld")]
#[command(author, version, about = "Bluetooth HID device-role daemon", long_about = None)]
pub struct Cli {
    /// HCI device id of the adapter to drive (`hci0` is 0).
    #[arg(long, default_value_t = 0)]
    pub devid: u16,

    /// Overrides the advertised Class-of-Device (24-bit, e.g. 0x050540).
    #[arg(long, value_parser = parse_hex_u32)]
    pub hid_device_class: Option<u32>,

    /// Stays in the foreground instead of forking into the background.
    #[arg(short = 'n', long)]
    pub nodaemon: bool,

    /// Raises the log level to debug regardless of `RUST_LOG`.
    #[arg(long)]
    pub debug: bool,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}
