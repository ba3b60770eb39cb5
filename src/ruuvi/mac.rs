use std::fmt::Write as _;

use anyhow::{Result, bail};
use macaddr::MacAddr6;

/// Parses a MAC in `aa:bb:cc:dd:ee:ff` form, case-insensitively.
///
/// Stricter than `MacAddr6::from_str`, which also accepts dashes and dotted
/// groups.
pub fn parse_mac(s: &str) -> Result<MacAddr6> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');

    for byte in bytes.iter_mut() {
        let Some(part) = parts.next() else {
            bail!("{s} is not a valid MAC");
        };
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("{s} is not a valid MAC");
        }
        *byte = u8::from_str_radix(part, 16)?;
    }

    if parts.next().is_some() {
        bail!("{s} is not a valid MAC");
    }

    Ok(MacAddr6::from(bytes))
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_mac(mac: &MacAddr6) -> String {
    join_mac(mac, ":")
}

/// `aabbccddeeff`, used in topics.
pub fn format_mac_compact(mac: &MacAddr6) -> String {
    join_mac(mac, "")
}

fn join_mac(mac: &MacAddr6, separator: &str) -> String {
    let mut s = String::with_capacity(17);
    for (i, b) in mac.as_bytes().iter().enumerate() {
        if i > 0 {
            s.push_str(separator);
        }
        let _ = write!(s, "{b:02x}");
    }
    s
}
