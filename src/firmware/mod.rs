//! Precompiled TSB firmware images: per-device register maps and the
//! bit-I/O patcher that retargets a base image to a different RxD/TxD pin
//! pair.

mod patcher;

pub use patcher::Firmware;

use std::collections::BTreeMap;

/// Maps a port letter (`'A'..='G'`) to its I/O register address (0..31).
pub type PortMap = BTreeMap<char, u8>;

/// Per-device metadata for one base firmware image: which signature(s) it
/// targets, its PIN/DDR/PORT register addresses per port letter, where in
/// flash it starts, and any trailing TSB configuration bytes.
#[derive(Debug, Clone)]
pub struct FirmwareInfo {
    pub devices: Vec<String>,
    pub signature: (u8, u8, u8),
    pub pin: PortMap,
    pub ddr: PortMap,
    pub port: PortMap,
    pub tsb_start: u32,
    pub tsb_fwconf: Vec<u8>,
}

impl PartialEq for FirmwareInfo {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature && self.pin == other.pin && self.port == other.port
    }
}

impl FirmwareInfo {
    pub fn add_device_names<I: IntoIterator<Item = String>>(&mut self, names: I) {
        for name in names {
            if !self.devices.contains(&name) {
                self.devices.push(name);
            }
        }
    }
}

/// `base + inc` for every port letter in `base`.
pub(crate) fn derive(base: &PortMap, inc: u8) -> PortMap {
    base.iter().map(|(&letter, &addr)| (letter, addr + inc)).collect()
}

/// Whether `map` equals `derive(base, inc)` — used to decide whether DDR or
/// PORT needs to be stored explicitly or can be reconstructed from PIN.
pub(crate) fn is_derived(map: &PortMap, base: &PortMap, inc: u8) -> bool {
    *map == derive(base, inc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_map(pairs: &[(char, u8)]) -> PortMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn derive_adds_the_increment_to_every_entry() {
        let pin = port_map(&[('B', 3), ('D', 5)]);
        assert_eq!(derive(&pin, 1), port_map(&[('B', 4), ('D', 6)]));
        assert_eq!(derive(&pin, 2), port_map(&[('B', 5), ('D', 7)]));
    }

    #[test]
    fn is_derived_detects_the_standard_ddr_port_offsets() {
        let pin = port_map(&[('B', 3)]);
        let ddr = port_map(&[('B', 4)]);
        let port = port_map(&[('B', 6)]);

        assert!(is_derived(&ddr, &pin, 1));
        assert!(!is_derived(&port, &pin, 1));
        assert!(is_derived(&port, &pin, 2));
    }
}
