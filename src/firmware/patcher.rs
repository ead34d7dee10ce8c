use super::FirmwareInfo;
use crate::Error;

const AVR_SBI: u8 = 0x9A;
const AVR_CBI: u8 = 0x98;
const AVR_SBIC: u8 = 0x99;
const AVR_SBIS: u8 = 0x9B;

const IO_OPCODES: [u8; 4] = [AVR_SBI, AVR_CBI, AVR_SBIC, AVR_SBIS];

/// A base firmware image plus the device it's authored for, retargetable
/// to a different RxD/TxD pin pair by rewriting its bit-I/O instructions.
pub struct Firmware {
    pub info: FirmwareInfo,
    bindata: Vec<u8>,
    rxd: (char, u8),
    txd: (char, u8),
}

impl Firmware {
    /// `bindata` must have even length (whole 16-bit AVR instructions).
    pub fn new(bindata: Vec<u8>, info: FirmwareInfo) -> Result<Self, Error> {
        if bindata.len() % 2 != 0 {
            return Err(Error::InvalidFirmwareImage(
                "firmware image has odd length".into(),
            ));
        }
        Ok(Firmware {
            info,
            bindata,
            rxd: ('B', 0),
            txd: ('B', 1),
        })
    }

    /// Parses a 4-character `[letter][0-7][letter][0-7]` RxD/TxD spec,
    /// e.g. `"D0D1"`, validating both letters against this image's ports.
    pub fn set_rxtx(&mut self, spec: &str) -> Result<(), Error> {
        let chars: Vec<char> = spec.chars().collect();
        if chars.len() != 4 {
            return Err(Error::InvalidPortSpec(format!(
                "{:?}: expected a 4-character RxD/TxD spec",
                spec
            )));
        }

        let rxd = parse_pin(&self.info, chars[0], chars[1])?;
        let txd = parse_pin(&self.info, chars[2], chars[3])?;

        self.rxd = rxd;
        self.txd = txd;
        Ok(())
    }

    /// Produces the patched binary image: bit-I/O instructions remapped to
    /// the configured RxD/TxD pins, trailing config appended, installer
    /// checksum recomputed if present.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut words: Vec<[u8; 2]> = self
            .bindata
            .chunks_exact(2)
            .map(|w| [w[0], w[1]])
            .collect();

        let new_rxtx = [self.rxd, self.txd];

        for word in words.iter_mut() {
            let op_code = word[1];
            if !IO_OPCODES.contains(&op_code) {
                continue;
            }

            let op_bit = word[0] & 0b0000_0111;
            let op_io = (word[0] & 0b1111_1000) >> 3;
            if op_bit > 1 {
                continue;
            }

            for bank in [&self.info.port, &self.info.pin, &self.info.ddr] {
                if bank.get(&'B') == Some(&op_io) {
                    let (new_port, new_bit) = new_rxtx[op_bit as usize];
                    if let Some(&new_io) = bank.get(&new_port) {
                        word[0] = (new_io << 3) | new_bit;
                    }
                }
            }
        }

        let mut flat: Vec<u8> = words.into_iter().flatten().collect();

        if !self.info.tsb_fwconf.is_empty() {
            flat.extend_from_slice(b"TSB");
            flat.extend_from_slice(&self.info.tsb_fwconf);
        }

        add_installer_checksum(&mut flat);
        flat
    }
}

fn parse_pin(info: &FirmwareInfo, letter: char, digit: char) -> Result<(char, u8), Error> {
    let letter = letter.to_ascii_uppercase();
    if !info.port.contains_key(&letter) {
        return Err(Error::UnsupportedPort(letter));
    }
    let bit = digit
        .to_digit(10)
        .filter(|&d| d < 8)
        .ok_or_else(|| Error::InvalidPortSpec(format!("invalid bit index {:?}", digit)))?;
    Ok((letter, bit as u8))
}

/// Detects and recomputes the TSB installer's first-page checksum.
///
/// The installer's first page is: a relative jump, `0xFFFF` filler words,
/// another relative jump, then a checksum word. Detection scans forward
/// from word index 1 while the word is `0xFFFF`; if it stops within
/// `[8, 128]` an installer is present and `page_size = i + 2` words.
fn add_installer_checksum(data: &mut [u8]) {
    let words = data.len() / 2;
    let mut i = 1;
    while i < 128 && i < words && word_at(data, i) == 0xFFFF {
        i += 1;
    }

    if !(8..=128).contains(&i) || i >= words {
        return;
    }

    let page_size = i + 2; // words
    let page_bytes = page_size * 2;
    if page_bytes > data.len() {
        return;
    }

    let mut checksum: u32 = 0;
    for chunk in data[page_bytes..].chunks(2) {
        checksum += chunk[0] as u32;
        if chunk.len() == 2 {
            checksum += chunk[1] as u32;
        }
    }

    let aligned_words = ((words + page_size - 1) / page_size) * page_size;
    let phantom_words = aligned_words - words;
    checksum += phantom_words as u32 * (0xFFu32 + 0xFFu32);
    checksum &= 0xFFFF;

    let checksum_word_offset = (page_size - 1) * 2;
    data[checksum_word_offset] = (checksum >> 8) as u8;
    data[checksum_word_offset + 1] = checksum as u8;
}

fn word_at(data: &[u8], word_index: usize) -> u16 {
    let offset = word_index * 2;
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn info(pin: &[(char, u8)], ddr: &[(char, u8)], port: &[(char, u8)]) -> FirmwareInfo {
        FirmwareInfo {
            devices: vec!["atmega8".into()],
            signature: (0x1E, 0x93, 0x07),
            pin: pin.iter().copied().collect::<BTreeMap<_, _>>(),
            ddr: ddr.iter().copied().collect::<BTreeMap<_, _>>(),
            port: port.iter().copied().collect::<BTreeMap<_, _>>(),
            tsb_start: 0,
            tsb_fwconf: Vec::new(),
        }
    }

    fn std_info() -> FirmwareInfo {
        info(
            &[('B', 3), ('D', 9)],
            &[('B', 4), ('D', 10)],
            &[('B', 5), ('D', 11)],
        )
    }

    #[test]
    fn set_rxtx_rejects_unsupported_ports() {
        let mut fw = Firmware::new(vec![0; 4], std_info()).unwrap();
        assert!(matches!(
            fw.set_rxtx("X0X1"),
            Err(Error::UnsupportedPort('X'))
        ));
    }

    #[test]
    fn set_rxtx_rejects_malformed_spec() {
        let mut fw = Firmware::new(vec![0; 4], std_info()).unwrap();
        assert!(fw.set_rxtx("D0D").is_err());
    }

    #[test]
    fn to_binary_rewrites_sbi_on_port_b_to_the_new_pin() {
        // SBI PORTB,0 -> op_io=5 (PORT B), op_bit=0
        let word = [(5u8 << 3) | 0, AVR_SBI];
        let mut fw = Firmware::new(word.to_vec(), std_info()).unwrap();
        fw.set_rxtx("D0D1").unwrap();

        let out = fw.to_binary();
        // PORT D address is 11 -> new_op_io=11, bit from D0 -> 0
        assert_eq!(out[0], (11u8 << 3) | 0);
        assert_eq!(out[1], AVR_SBI);
    }

    #[test]
    fn to_binary_leaves_unrelated_opcodes_untouched() {
        let word = [0x00, 0x00]; // NOP
        let fw = Firmware::new(word.to_vec(), std_info()).unwrap();
        assert_eq!(fw.to_binary(), word.to_vec());
    }

    #[test]
    fn installer_checksum_is_detected_and_recomputed() {
        // page_size = i+2 words, choose i=8 so page_size=10 words=20 bytes.
        let mut data = vec![0u8; 20];
        data[0..2].copy_from_slice(&[0x11, 0x22]); // initial rjmp, arbitrary
        for w in 1..8 {
            data[w * 2] = 0xFF;
            data[w * 2 + 1] = 0xFF;
        }
        data[8 * 2] = 0x33; // second rjmp
        data[8 * 2 + 1] = 0x44;
        // checksum word at index 9 left as zero, recomputed below.
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]); // payload after page

        add_installer_checksum(&mut data);

        // 12 words total, page_size=10 -> aligned to 20 words, 8 phantom
        // words of 0xFF+0xFF each, plus the real trailing payload bytes.
        let mut expected: u32 = 0xAA + 0xBB + 0xCC + 0xDD;
        expected += 8 * (0xFF + 0xFF);
        expected &= 0xFFFF;
        assert_eq!(u16::from_be_bytes([data[18], data[19]]), expected as u16);
    }

    #[test]
    fn installer_checksum_is_left_alone_when_absent() {
        let mut data = vec![0x12, 0x34, 0x56, 0x78];
        let before = data.clone();
        add_installer_checksum(&mut data);
        assert_eq!(data, before);
    }
}
