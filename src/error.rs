//! ## USBTMC Errors
//!
//! The errors used throughout the crate.
//!

#[allow(unused)]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is not compatible with USBTMC")]
    DeviceIncompatible,
    #[error("specified configuration not found")]
    ConfigurationNotFound,
    #[error("specified interface not found")]
    InterfaceNotFound,
    #[error("specified interface setting not found")]
    InterfaceSettingNotFound,
    #[error("bulk out endpoint not found")]
    BulkOutEndpointNotFound,
    #[error("bulk in endpoint not found")]
    BulkInEndpointNotFound,
    #[error("used incorrect endpoint")]
    IncorrectEndpoint,
    #[error("no transfer in progress")]
    StatusNoTransferInProgress,
    #[error("control request failed")]
    StatusFailure,
    #[error("control request unexpectedly failed")]
    StatusUnexpectedFailure,

    /// An argument was outside the range the device or this driver accepts
    /// (e.g. an io buffer size below `MIN_IO_BUFFER_SIZE`, a zero-length
    /// write request).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation could not be completed within the configured timeout.
    #[error("operation timed out")]
    TimedOut,

    /// A non-blocking call would have had to block to complete.
    #[error("operation would block")]
    WouldBlock,

    /// An in-flight transfer was canceled by `cancel_io`/`cleanup_io` or by
    /// handle teardown before it completed.
    #[error("transfer canceled")]
    Canceled,

    /// The endpoint is halted/stalled and must be cleared before further
    /// transfers will succeed.
    #[error("endpoint halted")]
    Halted,

    /// A response violated protocol framing: bad tag/inverse-tag pair,
    /// unexpected MsgID, or an advertised size that disagreed with the data
    /// actually received.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The requested operation is not permitted by the device's advertised
    /// USB488 capabilities (e.g. REN_CONTROL on a device without SIMPLE).
    #[error("operation not supported by device capabilities")]
    Unsupported,

    /// The device or handle has gone away (surprise removal, or the client
    /// was already closed).
    #[error("device disconnected")]
    Disconnected,

    /// Wraps a lower-level USB transport failure.
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    /// Wraps a response-decoding failure that isn't itself a protocol
    /// violation (e.g. invalid UTF-8 in `query`).
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

impl Error {
    /// Maps a raw USBTMC control-request status byte to an [`Error`], for
    /// call sites that only have the status byte and no further context.
    pub fn from_status_byte(status: u8) -> Error {
        use crate::constants::usbtmc_status::*;
        match status {
            STATUS_TRANSFER_NOT_IN_PROGRESS => Error::StatusNoTransferInProgress,
            STATUS_FAILED => Error::StatusFailure,
            _ => Error::StatusUnexpectedFailure,
        }
    }
}
