//! ## Types
//!
//! The different types used across the crate
//!

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusb::{Context, DeviceHandle, Direction, TransferType};

use crate::constants::misc;
use crate::error::Error;

/// ### Handle
///
/// Alias for a libusb device handle wrapped in an Arc and Mutex.
///
#[derive(Debug, Clone)]
pub struct Handle(Arc<Mutex<DeviceHandle<Context>>>);

impl Handle {
    pub fn new(handle: DeviceHandle<Context>) -> Handle {
        Handle(Arc::new(Mutex::new(handle)))
    }

    pub fn borrow(&self) -> MutexGuard<'_, DeviceHandle<Context>> {
        self.0.lock().unwrap()
    }
}

/// ### Timeout
///
/// Alias for a duration wrapped in an Arc and Mutex.
#[derive(Debug, Clone)]
pub struct Timeout(Arc<Mutex<Duration>>);

impl Timeout {
    pub fn new(duration: Duration) -> Timeout {
        Timeout(Arc::new(Mutex::new(duration)))
    }

    pub fn borrow(&self) -> MutexGuard<'_, Duration> {
        self.0.lock().unwrap()
    }

    pub fn get(&self) -> Duration {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, duration: Duration) {
        *self.0.lock().unwrap() = duration;
    }
}

/// USB device address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    /// USB bus number
    pub bus: u8,
    /// USB device number
    pub device: u8,
}

/// USB device identifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceId {
    /// USB Id Vendor
    pub vendor_id: u16,
    /// USB Id Product
    pub product_id: u16,
}

/// USB device info
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub address: DeviceAddr,
}

/// ### Device Mode
///
/// A collection of the configuration, interface and interface number. Also if the interface has a kernel driver attached.
///
#[derive(Debug, Clone, Default)]
pub struct DeviceMode {
    /// The USB configuration number
    pub config_number: u8,
    /// The interface number specific to the configuration
    pub interface_number: u8,
    /// The setting number specific to the interface
    pub setting_number: u8,
    /// The interface's `bInterfaceProtocol`: `0x00` for plain USBTMC, `0x01`
    /// for the USB488 subclass.
    pub protocol_code: u8,
    /// If the device has a kernel driver. Important for returning control to the OS (on Linux).
    pub has_kernel_driver: bool,
}

impl DeviceMode {
    /// Whether this interface advertises the USB488 subclass protocol.
    pub fn is_usb488(&self) -> bool {
        self.protocol_code == crate::constants::usb::USBTMC_USB488_PROTOCOL_CODE
    }
}

/// ### Endpoint
///
/// Properties of an endpoint.
///
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Address of the endpoint on the interface
    pub address: u8,
    /// The maximal size a packet can have on this endpoint
    pub max_packet_size: u16,
    /// The transfer type of the endpoint (for USBTMC, Bulk or Interrupt)
    pub transfer_type: TransferType,
    /// The direction of the endpoint (for USBTMC, In or Out)
    pub direction: Direction,
    /// Polling interval, meaningful only for the interrupt-in endpoint
    pub interval: u8,
}

/// ### USBTMC Endpoints
///
/// Endpoints specific to the USBTMC spec.
///
#[derive(Clone, Debug)]
pub struct UsbtmcEndpoints {
    /// The mandatory BULK OUT endpoint
    pub bulk_out_ep: Endpoint,
    /// The mandatory BULK IN endpoint
    pub bulk_in_ep: Endpoint,
    /// The optional INTERRUPT IN endpoint, used for SRQ notification
    pub interrupt_ep: Option<Endpoint>,
}

/// ### Capabilities
///
/// The collected capabilities of a USBTMC device, combining the basic
/// USBTMC GET_CAPABILITIES response with the USB488 subclass capability
/// byte coalesced from the interface and device capability fields.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct Capabilities {
    pub bcd_usbtmc_version: u16,
    /// Can accept a control command for pulse
    pub accepts_indicator_pulse_request: bool,
    /// Only sends data to the controller
    pub is_talk_only: bool,
    /// Only accepts data from the controller
    pub is_listen_only: bool,
    /// When returning data, it has a terminator character in the data
    pub supports_bulk_in_term_char: bool,
    /// bcdUSB488 advertised by the device, if the USB488 subclass descriptor
    /// was present
    pub bcd_usb488_version: u16,
    /// Coalesced USB488 capability byte: `(iface_caps & 0x07) | ((dev_caps & 0x0F) << 4)`
    pub usb488_caps: u8,
}

impl Capabilities {
    pub fn supports_trigger(&self) -> bool {
        self.usb488_caps & crate::constants::usb488_caps::TRIGGER != 0
    }

    pub fn is_simple(&self) -> bool {
        self.usb488_caps & crate::constants::usb488_caps::SIMPLE != 0
    }

    pub fn is_488_2(&self) -> bool {
        self.usb488_caps & crate::constants::usb488_caps::CAP_488_DOT_2 != 0
    }

    pub fn supports_remote_local(&self) -> bool {
        self.usb488_caps & crate::constants::usb488_caps::RL1 != 0
    }

    pub fn supports_service_request(&self) -> bool {
        self.usb488_caps & crate::constants::usb488_caps::SR1 != 0
    }
}

/// ### Client configuration
///
/// User-tunable parameters that the original kernel driver exposed through
/// ioctls and sysfs attributes (`USBTMC_IOCTL_SET_TIMEOUT`, the
/// `io_buffer_size`/`auto_abort` sysfs files, `USBTMC_IOCTL_CONFIG_TERMCHAR`,
/// `USBTMC_IOCTL_EOM_ENABLE`).
#[derive(Clone, Copy, Debug)]
pub struct ClientConfig {
    /// Size of the buffer used by the classic blocking read/write path.
    /// Must be a multiple of 4, and at least `MIN_IO_BUFFER_SIZE`.
    pub io_buffer_size: u32,
    /// Whether a short read/write (fewer bytes transferred than the device
    /// reported, or a premature halt) automatically issues an abort.
    pub auto_abort: bool,
    /// Whether outbound messages set the EOM bit on their final transfer.
    pub eom_enable: bool,
    /// Termination character advertised on REQUEST_DEV_DEP_MSG_IN headers,
    /// when enabled and the device supports it.
    pub term_char: u8,
    pub term_char_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            io_buffer_size: misc::DEFAULT_IO_BUFFER_SIZE,
            auto_abort: true,
            eom_enable: true,
            term_char: misc::DEFAULT_TERM_CHAR,
            term_char_enabled: false,
        }
    }
}

impl ClientConfig {
    /// Validates and clamps `io_buffer_size` to a multiple of 4 no smaller
    /// than `MIN_IO_BUFFER_SIZE`, mirroring the bounds the original driver
    /// enforces on its `io_buffer_size` sysfs attribute.
    pub fn set_io_buffer_size(&mut self, size: u32) -> Result<(), Error> {
        if size < misc::MIN_IO_BUFFER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "io_buffer_size must be >= {}",
                misc::MIN_IO_BUFFER_SIZE
            )));
        }
        self.io_buffer_size = size - (size % 4);
        Ok(())
    }
}
