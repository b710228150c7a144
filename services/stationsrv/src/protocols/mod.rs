//! Device-facing protocols
//!
//! - `nmea`: inbound positioning sentences with GSV reassembly
//! - `ubx`: u-blox binary configuration frames
//! - `unicore`: Unicore text configuration commands
//! - `command`: chip family selection and the JSON command envelope

pub mod command;
pub mod nmea;
pub mod ubx;
pub mod unicore;

pub use command::{ChipConfigRequest, ChipFamily, DeviceCommand};
pub use nmea::{NmeaDecoder, NmeaReport};
