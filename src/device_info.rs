use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::Error;

/// Length in bytes of the TSB info header returned during activation.
pub const INFO_HEADER_SIZE: usize = 16;

/// User-data header fields (`appjump` + `timeout`) preceding the password.
const USER_HEADER_SIZE: usize = 3;

/// `CONFIRM` sentinel, also the required trailing byte of the info header.
pub const CONFIRM: u8 = b'!';
/// `REQUEST` sentinel.
pub const REQUEST: u8 = b'?';

/// Device/firmware identity and memory geometry parsed from the 16-byte
/// activation header, plus the mutable user-data fields (`appjump`,
/// `timeout`, `password`) read from the bootloader's reserved page.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub buildword: u16,
    pub tsbbuild: u32,
    pub tsbstatus: u8,
    pub signature: (u8, u8, u8),
    pub pagesize: u16,
    pub appflash: u32,
    pub flashsize: u32,
    pub eepromsize: u32,
    pub jmpmode: u8,
    pub tinymega: u8,
    pub appjump: u16,
    timeout: u8,
    password: Vec<u8>,
}

impl DeviceInfo {
    /// Parses the 16-byte info header received right after activation.
    pub fn parse_header(header: &[u8]) -> Result<Self, Error> {
        if header.len() != INFO_HEADER_SIZE {
            return Err(Error::BadHeader);
        }
        if &header[0..3] != b"TSB" {
            return Err(Error::BadHeader);
        }
        if header[15] != CONFIRM {
            return Err(Error::BadHeader);
        }

        let mut cursor = Cursor::new(&header[3..]);
        let buildword = cursor.read_u16::<LittleEndian>()?;
        let tsbbuild = decode_build_date(buildword);

        let mut rest = [0u8; 9];
        cursor.read_exact(&mut rest)?;

        let tsbstatus = rest[0];
        let signature = (rest[1], rest[2], rest[3]);
        let pagesize_words = rest[4];
        let pagesize = (pagesize_words as u16) * 2;
        if !matches!(pagesize, 32 | 64 | 128 | 256) {
            return Err(Error::BadPageSize(pagesize));
        }

        let appflash_words = u16::from_le_bytes([rest[5], rest[6]]);
        let appflash = appflash_words as u32 * 2;
        let flashsize = (appflash / 1024 + 1) * 1024;

        let eeprom_minus_one = u16::from_le_bytes([rest[7], rest[8]]);
        let eepromsize = eeprom_minus_one as u32 + 1;

        let (jmpmode, tinymega) = match header[14] {
            0x00 => (0, 0),
            0x0C => (1, 0),
            0xAA => (0, 1),
            other => return Err(Error::InvalidOpcodeSelector(format!(
                "unknown device-family byte {:#04x}",
                other
            ))),
        };

        Ok(DeviceInfo {
            buildword,
            tsbbuild,
            tsbstatus,
            signature,
            pagesize,
            appflash,
            flashsize,
            eepromsize,
            jmpmode,
            tinymega,
            appjump: 0,
            timeout: 255,
            password: Vec::new(),
        })
    }

    /// Parses the user-data page (`appjump`, `timeout`, password) read
    /// separately from the info header.
    pub fn parse_user_data(&mut self, userdata: &[u8]) -> Result<(), Error> {
        if userdata.len() != self.pagesize as usize {
            return Err(Error::PageShort {
                expected: self.pagesize as usize,
                got: userdata.len(),
            });
        }

        let mut cursor = Cursor::new(&userdata[..USER_HEADER_SIZE]);
        self.appjump = cursor.read_u16::<LittleEndian>()?;
        self.timeout = cursor.read_u8()?;

        let password_end = userdata[USER_HEADER_SIZE..]
            .iter()
            .rposition(|&b| b != 0xFF)
            .map(|i| USER_HEADER_SIZE + i + 1)
            .unwrap_or(USER_HEADER_SIZE);
        self.password = userdata[USER_HEADER_SIZE..password_end].to_vec();

        if self.tinymega == 1 {
            // ATmega devices use fuse bits to select the start address.
            self.appjump = 0;
        }

        Ok(())
    }

    /// Serializes `appjump`/`timeout`/`password` back into a `pagesize`-byte
    /// page, padded with `0xFF`.
    pub fn raw_user_data(&self) -> Vec<u8> {
        let mut page = Vec::with_capacity(self.pagesize as usize);
        page.extend_from_slice(&self.appjump.to_le_bytes());
        page.push(self.timeout);
        page.extend_from_slice(&self.password);
        page.resize(self.pagesize as usize, 0xFF);
        page
    }

    pub fn timeout(&self) -> u8 {
        self.timeout
    }

    /// The activation timeout must be in `8..=255`.
    pub fn set_timeout(&mut self, value: u8) -> Result<(), Error> {
        if value < 8 {
            return Err(Error::InvalidTimeout(value));
        }
        self.timeout = value;
        Ok(())
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    /// The password may be at most `pagesize - 3` bytes.
    pub fn set_password(&mut self, value: Vec<u8>) -> Result<(), Error> {
        let max_len = self.pagesize as usize - USER_HEADER_SIZE;
        if value.len() > max_len {
            return Err(Error::PasswordTooLong(value.len()));
        }
        self.password = value;
        Ok(())
    }
}

/// Decodes the header's `buildword` into a `YYYYMMDD`-style decimal date,
/// or the legacy three-byte-derived build number for pre-packed-date builds.
fn decode_build_date(buildword: u16) -> u32 {
    if buildword < 32768 {
        let day = (buildword & 0x1F) as u32;
        let month = ((buildword >> 5) & 0x0F) as u32;
        let year = (buildword >> 9) as u32;
        year * 10000 + month * 100 + day + 20_000_000
    } else {
        buildword as u32 + 65536 + 20_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn it_parses_an_atmega8_header() {
        let header = hex!("54 53 42 44 08 00 1E 93 07 20 00 18 FF 01 00 21");
        let info = DeviceInfo::parse_header(&header).unwrap();

        assert_eq!(info.signature, (0x1E, 0x93, 0x07));
        assert_eq!(info.pagesize, 64);
        assert_eq!(info.appflash, 12288);
        assert_eq!(info.flashsize, 13312);
        assert_eq!(info.eepromsize, 512);
        assert_eq!(info.tinymega, 0);
        assert_eq!(info.jmpmode, 0);
    }

    #[test]
    fn it_rejects_a_bad_magic() {
        let mut header = hex!("54 53 42 44 08 00 1E 93 07 20 00 18 FF 01 00 21");
        header[0] = b'X';
        assert!(matches!(
            DeviceInfo::parse_header(&header),
            Err(Error::BadHeader)
        ));
    }

    #[test]
    fn it_round_trips_user_data() {
        let header = hex!("54 53 42 44 08 00 1E 93 07 20 00 18 FF 01 00 21");
        let mut info = DeviceInfo::parse_header(&header).unwrap();

        let mut page = vec![0xFFu8; info.pagesize as usize];
        page[0..2].copy_from_slice(&0x0000u16.to_le_bytes());
        page[2] = 200;
        page[3..7].copy_from_slice(b"secr");

        info.parse_user_data(&page).unwrap();
        assert_eq!(info.timeout(), 200);
        assert_eq!(info.password(), b"secr");

        let raw = info.raw_user_data();
        assert_eq!(raw.len(), info.pagesize as usize);
        assert_eq!(&raw[0..2], &0x0000u16.to_le_bytes());
        assert_eq!(raw[2], 200);
        assert_eq!(&raw[3..7], b"secr");
        assert!(raw[7..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn it_rejects_timeout_below_minimum() {
        let header = hex!("54 53 42 44 08 00 1E 93 07 20 00 18 FF 01 00 21");
        let mut info = DeviceInfo::parse_header(&header).unwrap();
        assert!(matches!(
            info.set_timeout(7),
            Err(Error::InvalidTimeout(7))
        ));
    }
}
