//! # usbtmc-host
//!
//! Host-side USBTMC/USB488 driver built on `rusb`: the 12-byte bulk message
//! framing, tag allocation, a classic blocking read/write path, a pipelined
//! async engine with a bounded in-flight transfer pool, the full USB488
//! control sub-protocol (abort, clear, capabilities, status byte, remote/
//! local, trigger, indicator pulse), and an interrupt-in SRQ dispatcher that
//! fans notifications out to every open handle on a device.
//!
//! ## Example
//!
//! ```rust,no_run
//! use usbtmc_host::UsbtmcClient;
//!
//! const DEVICE_VID: u16 = 0x0000;
//! const DEVICE_PID: u16 = 0x0000;
//!
//! fn main() {
//!     let device = UsbtmcClient::connect((DEVICE_VID, DEVICE_PID)).expect("failed to connect");
//!
//!     device.command("*RST").expect("failed to send command");
//!
//!     let response: String = device.query("*IDN?").expect("failed to query device");
//!     println!("{response}");
//! }
//! ```

mod async_io;
mod client;
mod codec;
mod constants;
mod control;
mod device;
mod error;
mod handle;
mod init;
mod interrupt;
mod sem;
mod sync_io;
mod tag;
mod transport;
mod types;

use rusb::DeviceDescriptor;

pub use client::{Readiness, ReadFlags, UsbtmcClient, WriteFlags};
pub use error::Error;
pub use types::{Capabilities, ClientConfig, DeviceAddr, DeviceId, DeviceInfo, Endpoint, UsbtmcEndpoints};

/// Selects which attached USBTMC device to [`UsbtmcClient::connect`] to.
pub trait DeviceFilter {
    fn apply_filter<T: rusb::UsbContext>(&self, device: &rusb::Device<T>, device_desc: &DeviceDescriptor) -> bool;
}
