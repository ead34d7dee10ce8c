//! Content-addressed store of base firmware images and the device variants
//! patched from them.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::firmware::{derive, is_derived, FirmwareInfo, PortMap};
use crate::Error;

/// On-disk representation of a [`FirmwareInfo`], with DDR/PORT elided when
/// they're the standard `PIN+1`/`PIN+2` offsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredInfo {
    devices: Vec<String>,
    signature: (u8, u8, u8),
    pin: PortMap,
    ddr: Option<PortMap>,
    port: Option<PortMap>,
    tsb_start: u32,
    tsb_fwconf: Vec<u8>,
}

impl From<&FirmwareInfo> for StoredInfo {
    fn from(info: &FirmwareInfo) -> Self {
        StoredInfo {
            devices: info.devices.clone(),
            signature: info.signature,
            pin: info.pin.clone(),
            ddr: (!is_derived(&info.ddr, &info.pin, 1)).then(|| info.ddr.clone()),
            port: (!is_derived(&info.port, &info.pin, 2)).then(|| info.port.clone()),
            tsb_start: info.tsb_start,
            tsb_fwconf: info.tsb_fwconf.clone(),
        }
    }
}

impl From<StoredInfo> for FirmwareInfo {
    fn from(stored: StoredInfo) -> Self {
        let ddr = stored.ddr.unwrap_or_else(|| derive(&stored.pin, 1));
        let port = stored.port.unwrap_or_else(|| derive(&stored.pin, 2));
        FirmwareInfo {
            devices: stored.devices,
            signature: stored.signature,
            pin: stored.pin,
            ddr,
            port,
            tsb_start: stored.tsb_start,
            tsb_fwconf: stored.tsb_fwconf,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    base_bindata: Vec<u8>,
    infos: Vec<StoredInfo>,
}

/// A catalog of base firmware images, each shared by one or more device
/// variants distinguished by register address and signature.
#[derive(Default)]
pub struct Catalog {
    path: Option<std::path::PathBuf>,
    records: BTreeMap<String, (Vec<u8>, Vec<FirmwareInfo>)>,
}

impl Catalog {
    /// Loads a catalog from `path`. A missing file yields an empty, usable
    /// catalog and logs a warning rather than failing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();

        if !path.exists() {
            warn!("firmware catalog not found at {:?}, starting empty", path);
            return Ok(Catalog {
                path: Some(path.to_path_buf()),
                records: BTreeMap::new(),
            });
        }

        let mut compressed = Vec::new();
        File::open(path)?.read_to_end(&mut compressed)?;

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut encoded = Vec::new();
        decoder.read_to_end(&mut encoded)?;

        let stored: BTreeMap<String, StoredRecord> =
            bincode::deserialize(&encoded).map_err(|e| Error::CatalogFormat(e.to_string()))?;

        let records = stored
            .into_iter()
            .map(|(md5, rec)| {
                let infos = rec.infos.into_iter().map(FirmwareInfo::from).collect();
                (md5, (rec.base_bindata, infos))
            })
            .collect();

        Ok(Catalog {
            path: Some(path.to_path_buf()),
            records,
        })
    }

    /// Saves the catalog back to the path it was [`load`](Self::load)ed
    /// from.
    pub fn save_loaded(&self) -> Result<(), Error> {
        let path = self
            .path
            .clone()
            .expect("catalog was constructed via Catalog::load");
        self.save(path)
    }

    /// Saves the catalog to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let stored: BTreeMap<String, StoredRecord> = self
            .records
            .iter()
            .map(|(md5, (base, infos))| {
                let infos = infos.iter().map(StoredInfo::from).collect();
                (
                    md5.clone(),
                    StoredRecord {
                        base_bindata: base.clone(),
                        infos,
                    },
                )
            })
            .collect();

        let encoded =
            bincode::serialize(&stored).map_err(|e| Error::CatalogFormat(e.to_string()))?;

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&encoded)?;
        let compressed = encoder.finish()?;

        File::create(path.as_ref())?.write_all(&compressed)?;
        Ok(())
    }

    /// Inserts a firmware image, deduplicating the base binary by MD5 after
    /// stripping a trailing `"TSB" + config` block, and merging device names
    /// into an existing `FirmwareInfo` with the same `(signature, pin, port)`.
    pub fn add_firmware(&mut self, bindata: &[u8], mut info: FirmwareInfo) {
        let (base, fwconf) = strip_tsb_trailer(bindata);
        info.tsb_fwconf = fwconf;

        let md5 = format!("{:x}", md5::compute(base));
        let entry = self
            .records
            .entry(md5)
            .or_insert_with(|| (base.to_vec(), Vec::new()));

        if let Some(existing) = entry.1.iter_mut().find(|existing| **existing == info) {
            existing.add_device_names(info.devices);
        } else {
            entry.1.push(info);
        }
    }

    /// Returns the base image and device info for the first entry whose
    /// `devices` list contains `name`, case-insensitively.
    pub fn get_firmware(&self, name: &str) -> Option<(&[u8], &FirmwareInfo)> {
        let name = name.to_lowercase();
        self.records.values().find_map(|(base, infos)| {
            infos
                .iter()
                .find(|info| info.devices.iter().any(|d| d.to_lowercase() == name))
                .map(|info| (base.as_slice(), info))
        })
    }

    /// Returns every device name registered for a given AVR signature.
    pub fn devices_for_signature(&self, signature: (u8, u8, u8)) -> Vec<String> {
        self.records
            .values()
            .flat_map(|(_, infos)| infos.iter())
            .filter(|info| info.signature == signature)
            .flat_map(|info| info.devices.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(|(_, infos)| infos.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits `bindata` into `(base, config)` at a trailing `"TSB"` marker, the
/// same layout the patcher re-appends on [`Firmware::to_binary`].
///
/// [`Firmware::to_binary`]: crate::firmware::Firmware::to_binary
fn strip_tsb_trailer(bindata: &[u8]) -> (&[u8], Vec<u8>) {
    if let Some(pos) = find_subslice(bindata, b"TSB") {
        (&bindata[..pos], bindata[pos + 3..].to_vec())
    } else {
        (bindata, Vec::new())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(devices: &[&str], signature: (u8, u8, u8)) -> FirmwareInfo {
        FirmwareInfo {
            devices: devices.iter().map(|s| s.to_string()).collect(),
            signature,
            pin: [('B', 3)].into_iter().collect(),
            ddr: [('B', 4)].into_iter().collect(),
            port: [('B', 5)].into_iter().collect(),
            tsb_start: 0,
            tsb_fwconf: Vec::new(),
        }
    }

    #[test]
    fn add_firmware_dedupes_identical_base_images() {
        let mut catalog = Catalog::default();
        catalog.add_firmware(&[0x01, 0x02], info(&["atmega8"], (0x1E, 0x93, 0x07)));
        catalog.add_firmware(&[0x01, 0x02], info(&["atmega8a"], (0x1E, 0x93, 0x07)));

        assert_eq!(catalog.records.len(), 1);
        assert_eq!(catalog.len(), 1);
        let (_, info) = catalog.get_firmware("atmega8a").unwrap();
        assert!(info.devices.contains(&"atmega8".to_string()));
        assert!(info.devices.contains(&"atmega8a".to_string()));
    }

    #[test]
    fn add_firmware_keeps_distinct_pin_assignments_separate() {
        let mut catalog = Catalog::default();
        catalog.add_firmware(&[0x01, 0x02], info(&["devA"], (0x1E, 0x93, 0x07)));

        let mut other = info(&["devB"], (0x1E, 0x93, 0x07));
        other.pin = [('B', 6)].into_iter().collect();
        catalog.add_firmware(&[0x01, 0x02], other);

        assert_eq!(catalog.records.len(), 1);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn strip_tsb_trailer_splits_on_the_marker() {
        let data = b"\x01\x02TSB\xAA\xBB";
        let (base, conf) = strip_tsb_trailer(data);
        assert_eq!(base, b"\x01\x02");
        assert_eq!(conf, vec![0xAA, 0xBB]);
    }

    #[test]
    fn get_firmware_is_case_insensitive() {
        let mut catalog = Catalog::default();
        catalog.add_firmware(&[0x01, 0x02], info(&["ATmega8"], (0x1E, 0x93, 0x07)));
        assert!(catalog.get_firmware("atmega8").is_some());
    }

    #[test]
    fn save_and_load_round_trip_through_compressed_bincode() {
        let mut catalog = Catalog::default();

        // Standard DDR/PORT offsets: elided on save, rederived on load.
        let mut derived = info(&["atmega8"], (0x1E, 0x93, 0x07));
        derived.ddr = [('B', 4)].into_iter().collect();
        derived.port = [('B', 5)].into_iter().collect();
        catalog.add_firmware(&[0x01, 0x02, 0x03, 0x04], derived);

        // Non-standard PORT offset: must be stored explicitly, not elided.
        let mut custom = info(&["attiny85"], (0x1E, 0x93, 0x0B));
        custom.pin = [('D', 3)].into_iter().collect();
        custom.ddr = [('D', 4)].into_iter().collect();
        custom.port = [('D', 9)].into_iter().collect();
        catalog.add_firmware(&[0xAA, 0xBB], custom);

        let path = std::env::temp_dir().join("tsb_catalog_roundtrip_test.bin.gz");
        catalog.save(&path).unwrap();
        let loaded = Catalog::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), catalog.len());

        let (base, info) = loaded.get_firmware("atmega8").unwrap();
        assert_eq!(base, &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(info.ddr, [('B', 4)].into_iter().collect::<PortMap>());
        assert_eq!(info.port, [('B', 5)].into_iter().collect::<PortMap>());

        let (base, info) = loaded.get_firmware("attiny85").unwrap();
        assert_eq!(base, &[0xAA, 0xBB]);
        assert_eq!(info.ddr, [('D', 4)].into_iter().collect::<PortMap>());
        assert_eq!(info.port, [('D', 9)].into_iter().collect::<PortMap>());
    }
}
