use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while talking to a TinySafeBoot bootloader or working
/// with its firmware images.
#[derive(Error, Debug)]
pub enum Error {
    /// The 16-byte device-info header didn't start with the `"TSB"` magic.
    #[error("device did not return a valid TSB header")]
    BadHeader,

    /// The device reported a page size that isn't a valid power of two, or
    /// is larger than the protocol's maximum of 256 bytes.
    #[error("device reported an invalid page size: {0}")]
    BadPageSize(u16),

    /// A page read from flash or EEPROM came back shorter than the page
    /// size the device advertised.
    #[error("page read returned {got} bytes, expected {expected}")]
    PageShort { expected: usize, got: usize },

    /// The serial stream ended before the expected number of bytes arrived.
    #[error("stream ended after {got} of {expected} expected bytes")]
    TruncatedStream { expected: usize, got: usize },

    /// No response arrived within the read deadline.
    #[error("no response from device within {0:?}")]
    NoResponse(Duration),

    /// The one-wire echo of a sent byte didn't match what was sent.
    #[error("echo mismatch: sent {sent:#04x}, echoed {echoed:#04x}")]
    EchoMismatch { sent: u8, echoed: u8 },

    /// The device replied with a byte that isn't `CONFIRM` or `REQUEST`
    /// where one of those was required.
    #[error("unexpected reply byte: {0:#04x}")]
    UnexpectedReply(u8),

    /// A write would run past the end of flash, EEPROM, or the user-data
    /// page.
    #[error("write of {len} bytes at offset {offset} runs out of space")]
    OutOfSpace { offset: u32, len: usize },

    /// Read-back verification after a write did not match what was sent.
    #[error("verification failed at offset {offset:#06x}")]
    VerifyError { offset: u32 },

    /// Writing the user-data page (timeout/password) failed.
    #[error("writing user data failed: {0}")]
    UserDataWriteError(String),

    /// A flash write was refused because the image contains an `SPM`
    /// instruction and neither `--force` nor a `tinymega` device excuses it.
    #[error("image contains an SPM instruction; pass --force to write it anyway")]
    SpmDetected,

    /// A port letter outside the range the device actually supports was
    /// requested.
    #[error("unsupported port: {0}")]
    UnsupportedPort(char),

    /// An AVR bit-I/O opcode selector (bit index or I/O address) was out of
    /// range while patching a firmware image.
    #[error("invalid opcode selector: {0}")]
    InvalidOpcodeSelector(String),

    /// A firmware image failed to load (e.g. odd byte length).
    #[error("invalid firmware image: {0}")]
    InvalidFirmwareImage(String),

    /// A malformed RxD/TxD pin specification string.
    #[error("invalid port specification: {0}")]
    InvalidPortSpec(String),

    /// A firmware catalog file failed to (de)serialize.
    #[error("firmware catalog format error: {0}")]
    CatalogFormat(String),

    /// An Intel-HEX file failed to parse or serialize.
    #[error("hex file format error: {0}")]
    HexFormat(String),

    /// An activation timeout value outside the bootloader's supported range.
    #[error("invalid timeout value: {0}")]
    InvalidTimeout(u8),

    /// A password longer than the bootloader's user-data page can hold.
    #[error("password of {0} bytes is too long")]
    PasswordTooLong(usize),

    /// Error opening or configuring the serial port.
    #[error("serial port error: {0}")]
    SerialOpenError(#[from] serialport::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
