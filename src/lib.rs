pub mod catalog;
pub mod cli;
pub mod device_info;
mod error;
pub mod firmware;
pub mod hexfile;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod signature;
pub mod transport;

pub use error::Error;
