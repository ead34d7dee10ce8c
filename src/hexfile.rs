//! Minimal Intel HEX / raw binary file I/O for the CLI layer.
//!
//! Format is picked by file extension (`.hex`/`.ihx` → Intel HEX, anything
//! else → raw binary), mirroring the original loader's format
//! auto-detection.

use std::fs;
use std::path::Path;

use crate::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Format {
    IntelHex,
    Raw,
}

impl Format {
    pub fn detect(path: &Path) -> Format {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihx") => {
                Format::IntelHex
            }
            _ => Format::Raw,
        }
    }
}

/// Reads `path`, returning its contents as a flat byte buffer starting at
/// the lowest address the file defines (Intel HEX files may not start at
/// zero; callers that care about the base address should inspect the
/// records directly instead).
pub fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    match Format::detect(path) {
        Format::Raw => Ok(fs::read(path)?),
        Format::IntelHex => {
            let text = fs::read_to_string(path)?;
            read_ihex(&text)
        }
    }
}

fn read_ihex(text: &str) -> Result<Vec<u8>, Error> {
    let reader = ihex::Reader::new(text);
    let mut base = 0u32;
    let mut data: Vec<(u32, u8)> = Vec::new();

    for record in reader {
        let record = record.map_err(|e| Error::HexFormat(e.to_string()))?;
        match record {
            ihex::Record::Data { offset, value } => {
                for (i, byte) in value.into_iter().enumerate() {
                    data.push((base + offset as u32 + i as u32, byte));
                }
            }
            ihex::Record::ExtendedLinearAddress(high) => {
                base = (high as u32) << 16;
            }
            ihex::Record::ExtendedSegmentAddress(segment) => {
                base = (segment as u32) * 16;
            }
            ihex::Record::EndOfFile => break,
            _ => {}
        }
    }

    if data.is_empty() {
        return Ok(Vec::new());
    }

    let min_addr = data.iter().map(|(addr, _)| *addr).min().unwrap();
    let max_addr = data.iter().map(|(addr, _)| *addr).max().unwrap();
    let mut flat = vec![0xFFu8; (max_addr - min_addr + 1) as usize];
    for (addr, byte) in data {
        flat[(addr - min_addr) as usize] = byte;
    }
    Ok(flat)
}

/// Writes `data` to `path`, starting at `base_addr`, in the format implied
/// by the file extension.
pub fn write_file(path: &Path, base_addr: u32, data: &[u8]) -> Result<(), Error> {
    match Format::detect(path) {
        Format::Raw => {
            fs::write(path, data)?;
            Ok(())
        }
        Format::IntelHex => {
            let mut records = Vec::new();
            for (i, chunk) in data.chunks(16).enumerate() {
                let offset = base_addr as u16 + (i * 16) as u16;
                records.push(ihex::Record::Data {
                    offset,
                    value: chunk.to_vec(),
                });
            }
            records.push(ihex::Record::EndOfFile);

            let text = ihex::create_object_file_representation(&records)
                .map_err(|e| Error::HexFormat(e.to_string()))?;
            fs::write(path, text)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn detect_picks_intel_hex_for_hex_extension() {
        assert_eq!(Format::detect(&PathBuf::from("fw.hex")), Format::IntelHex);
        assert_eq!(Format::detect(&PathBuf::from("fw.HEX")), Format::IntelHex);
    }

    #[test]
    fn detect_falls_back_to_raw() {
        assert_eq!(Format::detect(&PathBuf::from("fw.bin")), Format::Raw);
        assert_eq!(Format::detect(&PathBuf::from("fw")), Format::Raw);
    }
}
