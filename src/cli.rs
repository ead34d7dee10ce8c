use std::path::PathBuf;

use structopt::StructOpt;

use crate::transport::{ResetLine, ResetMode};

#[derive(StructOpt, Debug)]
pub struct ResetOpts {
    /// Reset via DTR, active at the given logic level (0 or 1)
    #[structopt(long, conflicts_with_all = &["reset-rts", "reset-cmd"])]
    pub reset_dtr: Option<u8>,
    /// Reset via RTS, active at the given logic level (0 or 1)
    #[structopt(long, conflicts_with_all = &["reset-dtr", "reset-cmd"])]
    pub reset_rts: Option<u8>,
    /// Reset by sending an application-level command string instead of
    /// toggling a modem control line
    #[structopt(long, conflicts_with_all = &["reset-dtr", "reset-rts"])]
    pub reset_cmd: Option<String>,
}

impl ResetOpts {
    pub fn to_reset_mode(&self) -> ResetMode {
        if let Some(cmd) = &self.reset_cmd {
            return ResetMode::Command(cmd.clone());
        }
        if let Some(level) = self.reset_rts {
            return ResetMode::Line {
                line: ResetLine::Rts,
                active_high: level != 0,
            };
        }
        let level = self.reset_dtr.unwrap_or(1);
        ResetMode::Line {
            line: ResetLine::Dtr,
            active_high: level != 0,
        }
    }
}

/// Connects to a device running TinySafeBoot and drives it.
#[derive(StructOpt, Debug)]
#[structopt(name = "tsb")]
pub struct TsbOpts {
    /// Serial device to connect to
    pub devicename: String,

    #[structopt(short = "b", long = "baud-rate", default_value = "9600")]
    pub baud_rate: u32,

    /// The bootloader's activation password, if one is set
    #[structopt(short = "p", long = "password", default_value = "")]
    pub password: String,

    #[structopt(flatten)]
    pub reset: ResetOpts,

    /// Print the device info header after activating
    #[structopt(short = "i", long = "info")]
    pub info: bool,

    /// Sets a new activation password
    #[structopt(long = "new-password")]
    pub new_password: Option<String>,

    /// Sets a new activation timeout: either a raw factor (8..255), or
    /// `MS F_CPU_MHZ` to compute one
    #[structopt(long = "change-timeout", min_values = 1, max_values = 2)]
    pub change_timeout: Vec<u32>,

    /// Wipes flash, EEPROM, password and timeout with no login required
    #[structopt(long = "emergency-erase")]
    pub emergency_erase: bool,

    /// Reads application flash to FILENAME
    #[structopt(long = "flash-read")]
    pub flash_read: Option<PathBuf>,
    /// Erases application flash
    #[structopt(long = "flash-erase")]
    pub flash_erase: bool,
    /// Writes FILENAME to application flash
    #[structopt(long = "flash-write")]
    pub flash_write: Option<PathBuf>,
    /// Reads back flash after writing and compares it to FILENAME
    #[structopt(long = "flash-verify")]
    pub flash_verify: bool,

    /// Reads EEPROM to FILENAME
    #[structopt(long = "eeprom-read")]
    pub eeprom_read: Option<PathBuf>,
    /// Erases EEPROM
    #[structopt(long = "eeprom-erase")]
    pub eeprom_erase: bool,
    /// Writes FILENAME to EEPROM
    #[structopt(long = "eeprom-write")]
    pub eeprom_write: Option<PathBuf>,
    /// Reads back EEPROM after writing and compares it to FILENAME
    #[structopt(long = "eeprom-verify")]
    pub eeprom_verify: bool,

    /// Allow writing an image containing an SPM instruction
    #[structopt(short = "f", long = "force")]
    pub force: bool,
}

/// Patches a base TSB firmware image for a given device and RxD/TxD pins.
#[derive(StructOpt, Debug)]
#[structopt(name = "fw")]
pub struct FwOpts {
    /// Device name to look up in the firmware catalog
    #[structopt(short = "d", long = "device")]
    pub device: String,

    /// RxD/TxD pins, e.g. "D0D1"
    #[structopt(short = "p", long = "rxtx")]
    pub rxtx: String,

    /// Output filename; format is picked from its extension
    #[structopt(short = "o", long = "output")]
    pub output: PathBuf,

    /// Path to the firmware catalog file
    #[structopt(long = "catalog", default_value = "tsb_db.bin.gz")]
    pub catalog: PathBuf,

    /// Overwrite OUTPUT if it already exists
    #[structopt(short = "f", long = "force")]
    pub force: bool,
}
