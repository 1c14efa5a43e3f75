//! ## Constants
//!
//! Various constants used throughout the project.
//!

#[allow(unused)]
pub mod usb {
    /// The class code for usbtmc
    pub const USBTMC_CLASS_CODE: u8 = 0xFE;
    /// The subclass code for usbtmc
    pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;
    /// Plain USBTMC, no IEEE-488-style control sub-protocol.
    pub const USBTMC_PROTOCOL_CODE: u8 = 0x00;
    /// The protocol code for the USB488 subclass of USBTMC.
    pub const USBTMC_USB488_PROTOCOL_CODE: u8 = 0x01;
}

#[allow(unused)]
pub mod misc {
    use std::time::Duration;

    /// The default timeout duration for control and bulk transfers.
    pub const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(5);
    /// Smallest timeout a caller is allowed to configure.
    pub const MIN_TIMEOUT_MS: u32 = 500;
    /// The size in bytes of a USBTMC header in a bulk transfer
    pub const USBTMC_HEADER_SIZE: usize = 12;
    /// Buffer size we define for the application when chunking the byte-stream API
    pub const APPLICATION_BUFFER_SIZE: u32 = 1024 * 8;
    /// Default I/O buffer size for the classic blocking read/write engine.
    /// Must stay a multiple of 4 and at least `MIN_IO_BUFFER_SIZE`.
    pub const DEFAULT_IO_BUFFER_SIZE: u32 = 2048;
    /// Floor enforced on a configured io buffer size.
    pub const MIN_IO_BUFFER_SIZE: u32 = 512;
    /// Default termination character to use (using NI-VISA default '\n')
    pub const DEFAULT_TERM_CHAR: u8 = b'\n';

    /// Max number of write URBs (or read-ahead buffers) the async engine keeps in flight.
    pub const MAX_URBS_IN_FLIGHT: usize = 16;
    /// Size of one async-engine transfer buffer.
    pub const BULKSIZE: usize = 4096;
    /// Bound on the number of bulk-in reads issued while draining a halted endpoint.
    pub const MAX_READS_TO_CLEAR_BULK_IN: u32 = 100;
}

#[allow(unused)]
pub mod usbtmc_status {
    /// Success
    pub const STATUS_SUCCESS: u8 = 0x01;
    /// The device has received a split transaction CHECK_STATUS request and the request is being processed
    pub const STATUS_PENDING: u8 = 0x02;
    /// Failure for unspecified or undefined reason
    pub const STATUS_FAILED: u8 = 0x80;
    /// The device received an INITIATE_ABORT request, but the request is not in progress
    pub const STATUS_TRANSFER_NOT_IN_PROGRESS: u8 = 0x81;
    /// The device got a CHECK_STATUS request without any INITIATE request being processed
    pub const STATUS_SPLIT_NOT_IN_PROGRESS: u8 = 0x82;
    /// The device got an INIATE request, but another one is already being processed
    pub const STATUS_SPLIT_IN_PROGRESS: u8 = 0x83;
}

#[allow(unused)]
pub mod control_requests {
    pub const INITIATE_ABORT_BULK_OUT: u8 = 1;
    pub const CHECK_ABORT_BULK_OUT_STATUS: u8 = 2;
    pub const INITIATE_ABORT_BULK_IN: u8 = 3;
    pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;
    pub const INITIATE_CLEAR: u8 = 5;
    pub const CHECK_CLEAR_STATUS: u8 = 6;
    pub const GET_CAPABILITIES: u8 = 7;
    pub const INDICATOR_PULSE: u8 = 64;
    pub const READ_STATUS_BYTE: u8 = 128;
    pub const REN_CONTROL: u8 = 160;
    pub const GOTO_LOCAL: u8 = 161;
    pub const LOCAL_LOCKOUT: u8 = 162;
}

#[allow(unused)]
pub mod bulk_msg_id {
    pub const DEVICE_DEPENDENT_MSG_OUT: u8 = 1;
    pub const REQUEST_DEVICE_DEPENDENT_MSG_IN: u8 = 2;
    pub const VENDOR_SPECIFIC_MSG_OUT: u8 = 126;
    pub const REQUEST_VENDOR_SPECIFIC_MSG_IN: u8 = 127;
    pub const DEVICE_DEPENDENT_MSG_IN: u8 = 2;
    pub const VENDOR_SPECIFIC_MSG_IN: u8 = 127;
    pub const TRIGGER: u8 = 128;
}

/// Bit layout of the single-byte USB488 capability field the driver coalesces
/// from the interface and device GET_CAPABILITIES responses.
#[allow(unused)]
pub mod usb488_caps {
    pub const TRIGGER: u8 = 1;
    pub const SIMPLE: u8 = 2;
    pub const CAP_488_DOT_2: u8 = 4;
    pub const DT1: u8 = 16;
    pub const RL1: u8 = 32;
    pub const SR1: u8 = 64;
    pub const FULL_SCPI: u8 = 128;
}

/// (vendor, product) pairs known to only tolerate a single REQUEST_DEV_DEP_MSG_IN
/// per multi-buffer read instead of one request per wMaxPacketSize chunk.
#[allow(unused)]
pub const RIGOL_QUIRK_IDS: &[(u16, u16)] = &[(0x1ab1, 0x0588), (0x1ab1, 0x04b0)];
