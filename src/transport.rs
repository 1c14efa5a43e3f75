//! ## Transport
//!
//! Thin wrapper over the `rusb` calls shared by the blocking, async and
//! control engines. Centralizes endpoint-direction/type checks and timeout
//! handling the teacher repeated at every call site in
//! `communication::{bulk, control}`.

use std::time::Duration;

use rusb::{Direction, TransferType};

use crate::error::Error;
use crate::types::{Endpoint, Handle};

/// Confirms `endpoint` has the expected direction and transfer type before
/// it is used, the same check the teacher inlines at the top of every bulk
/// helper.
pub fn expect_endpoint(
    endpoint: &Endpoint,
    direction: Direction,
    transfer_type: TransferType,
) -> Result<(), Error> {
    if endpoint.direction != direction || endpoint.transfer_type != transfer_type {
        return Err(Error::IncorrectEndpoint);
    }
    Ok(())
}

/// Writes a single bulk transfer, translating `rusb::Error::Pipe` into
/// [`Error::Halted`] since that's the caller-actionable distinction (a
/// halted endpoint needs `clear_halt`, everything else is a transport
/// failure).
pub fn write_bulk(
    handle: &Handle,
    endpoint: &Endpoint,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, Error> {
    handle
        .borrow()
        .write_bulk(endpoint.address, data, timeout)
        .map_err(map_transfer_error)
}

/// Reads a single bulk transfer into `buffer`, returning the byte count.
pub fn read_bulk(
    handle: &Handle,
    endpoint: &Endpoint,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize, Error> {
    handle
        .borrow()
        .read_bulk(endpoint.address, buffer, timeout)
        .map_err(map_transfer_error)
}

/// Reads an interrupt transfer into `buffer`.
pub fn read_interrupt(
    handle: &Handle,
    endpoint: &Endpoint,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize, Error> {
    handle
        .borrow()
        .read_interrupt(endpoint.address, buffer, timeout)
        .map_err(map_transfer_error)
}

/// Issues a class/interface-recipient IN control transfer (the shape every
/// USBTMC/USB488 control request uses).
pub fn read_control(
    handle: &Handle,
    recipient: rusb::Recipient,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize, Error> {
    let bm_request_type = rusb::request_type(Direction::In, rusb::RequestType::Class, recipient);
    handle
        .borrow()
        .read_control(bm_request_type, b_request, w_value, w_index, buffer, timeout)
        .map_err(map_transfer_error)
}

/// Issues a class/interface-recipient OUT control transfer, used by the raw
/// `CTRL_REQUEST` passthrough and any write-direction class request.
pub fn write_control(
    handle: &Handle,
    recipient: rusb::Recipient,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, Error> {
    let bm_request_type = rusb::request_type(Direction::Out, rusb::RequestType::Class, recipient);
    handle
        .borrow()
        .write_control(bm_request_type, b_request, w_value, w_index, data, timeout)
        .map_err(map_transfer_error)
}

/// Clears a halt/stall condition on `endpoint`.
pub fn clear_halt(handle: &Handle, endpoint: &Endpoint) -> Result<(), Error> {
    handle.borrow().clear_halt(endpoint.address).map_err(map_transfer_error)?;
    Ok(())
}

fn map_transfer_error(err: rusb::Error) -> Error {
    match err {
        rusb::Error::Pipe => Error::Halted,
        rusb::Error::Timeout => Error::TimedOut,
        rusb::Error::NoDevice => Error::Disconnected,
        other => Error::Usb(other),
    }
}
