//! ## USB488 control protocol engine
//!
//! Every class-specific control request the USBTMC/USB488 subclass defines:
//! abort, clear, capability query, status-byte read, remote/local state, the
//! trigger message, indicator pulse, halt set/clear, and a raw passthrough
//! for requests this crate doesn't otherwise model. Adapted from the
//! teacher's `communication::control`, completing its two underscore-
//! prefixed abort stubs and replacing the undefined `CtlBTag` reference in
//! `read_status_byte` with the generalized [`crate::tag::TagCounter`].

use std::time::Duration;

use rusb::Recipient;

use crate::codec;
use crate::constants::{control_requests, misc, usbtmc_status};
use crate::error::Error;
use crate::tag::TagCounter;
use crate::transport;
use crate::types::{Capabilities, Endpoint, Handle};

fn check_status(status: u8) -> Result<(), Error> {
    match status {
        usbtmc_status::STATUS_SUCCESS => Ok(()),
        other => Err(Error::from_status_byte(other)),
    }
}

/// Combines `usbtmc_status::STATUS_PENDING` polling used by the
/// ABORT_BULK_OUT control sequence, bounded at `MAX_READS_TO_CLEAR_BULK_IN`
/// iterations.
fn poll_until_not_pending<F>(mut poll: F) -> Result<Vec<u8>, Error>
where
    F: FnMut() -> Result<Vec<u8>, Error>,
{
    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        let buffer = poll()?;
        match buffer[0] {
            usbtmc_status::STATUS_PENDING => continue,
            usbtmc_status::STATUS_SUCCESS => return Ok(buffer),
            other => {
                log::warn!("abort/clear status poll returned {other:#04x}");
                return Err(Error::from_status_byte(other));
            }
        }
    }
    log::error!("abort/clear sequence did not drain within {} reads", misc::MAX_READS_TO_CLEAR_BULK_IN);
    Err(Error::Protocol(
        "abort/clear sequence did not complete within the retry bound".into(),
    ))
}

/// Reads `bulk_in_ep` at its max-packet-size until a short packet arrives or
/// the shared `drained` counter (carried across every drain call within one
/// abort/clear sequence, matching the original driver's single `n` counter
/// threaded through its goto loops) reaches `MAX_READS_TO_CLEAR_BULK_IN`.
fn drain_bulk_in(handle: &Handle, bulk_in_ep: &Endpoint, drained: &mut u32, timeout: Duration) -> Result<(), Error> {
    let max_size = (bulk_in_ep.max_packet_size as usize).max(1);
    let mut buffer = vec![0u8; max_size];
    let mut actual = max_size;

    while actual == max_size && *drained < misc::MAX_READS_TO_CLEAR_BULK_IN {
        actual = transport::read_bulk(handle, bulk_in_ep, &mut buffer, timeout)?;
        *drained += 1;
    }

    if actual == max_size {
        log::error!("couldn't clear bulk-in device buffer within {} reads", misc::MAX_READS_TO_CLEAR_BULK_IN);
        return Err(Error::Protocol(
            "couldn't drain bulk-in device buffer within the retry bound".into(),
        ));
    }
    Ok(())
}

/// Reads the coalesced USBTMC/USB488 capability set, combining the
/// GET_CAPABILITIES interface and device capability bytes into one
/// `usb488_caps` field: `(iface_caps & 0x07) | ((dev_caps & 0x0F) << 4)`.
pub fn get_capabilities(
    handle: &Handle,
    interface_number: u8,
    is_usb488: bool,
    timeout: Duration,
) -> Result<Capabilities, Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 0x18];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::GET_CAPABILITIES,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;

    check_status(buffer[0])?;

    let bcd_usbtmc_version = u16::from_le_bytes([buffer[2], buffer[3]]);
    let interface_capabilities = buffer[4];
    let device_capabilities = buffer[5];

    let mut caps = Capabilities {
        bcd_usbtmc_version,
        accepts_indicator_pulse_request: interface_capabilities & 0b0000_0100 != 0,
        is_talk_only: interface_capabilities & 0b0000_0010 != 0,
        is_listen_only: interface_capabilities & 0b0000_0001 != 0,
        supports_bulk_in_term_char: device_capabilities & 0b0000_0001 != 0,
        ..Default::default()
    };

    if is_usb488 {
        caps.bcd_usb488_version = u16::from_le_bytes([buffer[12], buffer[13]]);
        let usb488_iface_caps = buffer[14];
        let usb488_dev_caps = buffer[15];
        caps.usb488_caps =
            (usb488_iface_caps & 0x07) | ((usb488_dev_caps & 0x0F) << 4);
    }

    Ok(caps)
}

/// Aborts an in-flight BULK OUT transfer tagged `transfer_tag`, returning
/// the number of bytes the device accepted before aborting.
pub fn abort_bulk_out(
    handle: &Handle,
    bulk_out_ep: &Endpoint,
    transfer_tag: u8,
    timeout: Duration,
) -> Result<usize, Error> {
    let w_value = u16::from_le_bytes([0x00, transfer_tag]);
    let w_index = u16::from_le_bytes([0x00, bulk_out_ep.address]);
    let mut buffer = [0u8; 2];

    transport::read_control(
        handle,
        Recipient::Endpoint,
        control_requests::INITIATE_ABORT_BULK_OUT,
        w_value,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])?;

    let result = poll_until_not_pending(|| {
        let mut buffer = [0u8; 8];
        transport::read_control(
            handle,
            Recipient::Endpoint,
            control_requests::CHECK_ABORT_BULK_OUT_STATUS,
            0x0000,
            w_index,
            &mut buffer,
            timeout,
        )?;
        Ok(buffer.to_vec())
    })?;

    // Per §4.5, a successful abort leaves the bulk-out pipe halted until the
    // host explicitly clears it; unlike abort_bulk_in, the IN side does not
    // do this (matches usbtmc_abort_bulk_out_clear_halt in the original).
    transport::clear_halt(handle, bulk_out_ep)?;

    Ok(u32::from_le_bytes([result[4], result[5], result[6], result[7]]) as usize)
}

/// Aborts an in-flight BULK IN transfer tagged `transfer_tag`, returning the
/// number of bytes the device had already transferred. Per §4.5: a FAILED
/// reply to INITIATE_ABORT_BULK_IN means nothing was in progress and is not
/// an error; any other non-SUCCESS reply is denied. On SUCCESS, the bulk-in
/// FIFO is drained before and, whenever a status poll reports byte1=1,
/// between CHECK_ABORT_BULK_IN_STATUS polls.
pub fn abort_bulk_in(
    handle: &Handle,
    bulk_in_ep: &Endpoint,
    transfer_tag: u8,
    timeout: Duration,
) -> Result<usize, Error> {
    let w_value = u16::from_le_bytes([0x00, transfer_tag]);
    let w_index = u16::from_le_bytes([0x00, 0b1000_0000 | bulk_in_ep.address]);
    let mut buffer = [0u8; 2];

    transport::read_control(
        handle,
        Recipient::Endpoint,
        control_requests::INITIATE_ABORT_BULK_IN,
        w_value,
        w_index,
        &mut buffer,
        timeout,
    )?;

    match buffer[0] {
        usbtmc_status::STATUS_SUCCESS => {}
        usbtmc_status::STATUS_FAILED => return Ok(0),
        other => {
            log::warn!("INITIATE_ABORT_BULK_IN returned {other:#04x}");
            return Err(Error::from_status_byte(other));
        }
    }

    let mut drained = 0u32;
    drain_bulk_in(handle, bulk_in_ep, &mut drained, timeout)?;

    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        let mut status = [0u8; 8];
        transport::read_control(
            handle,
            Recipient::Endpoint,
            control_requests::CHECK_ABORT_BULK_IN_STATUS,
            0x0000,
            w_index,
            &mut status,
            timeout,
        )?;

        match status[0] {
            usbtmc_status::STATUS_SUCCESS => {
                return Ok(u32::from_le_bytes([status[4], status[5], status[6], status[7]]) as usize);
            }
            usbtmc_status::STATUS_PENDING => {
                if status[1] == 1 {
                    drain_bulk_in(handle, bulk_in_ep, &mut drained, timeout)?;
                }
            }
            other => {
                log::warn!("CHECK_ABORT_BULK_IN_STATUS returned {other:#04x}");
                return Err(Error::from_status_byte(other));
            }
        }
    }

    log::error!("abort-bulk-in did not complete within {} status polls", misc::MAX_READS_TO_CLEAR_BULK_IN);
    Err(Error::Protocol(
        "abort-bulk-in sequence did not complete within the retry bound".into(),
    ))
}

/// Clears all input/output buffers on the interface. Callers must first
/// abort/quiesce any in-flight bulk transfers. Drains `bulk_in_ep` whenever
/// a CHECK_CLEAR_STATUS poll reports byte1=1, same as [`abort_bulk_in`].
pub fn clear_buffers(handle: &Handle, bulk_in_ep: &Endpoint, interface_number: u8, timeout: Duration) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::INITIATE_CLEAR,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])?;

    let mut drained = 0u32;

    for _ in 0..misc::MAX_READS_TO_CLEAR_BULK_IN {
        let mut status = [0u8; 2];
        transport::read_control(
            handle,
            Recipient::Interface,
            control_requests::CHECK_CLEAR_STATUS,
            0x0000,
            w_index,
            &mut status,
            timeout,
        )?;

        match status[0] {
            usbtmc_status::STATUS_SUCCESS => return Ok(()),
            usbtmc_status::STATUS_PENDING => {
                if status[1] == 1 {
                    drain_bulk_in(handle, bulk_in_ep, &mut drained, timeout)?;
                }
            }
            other => {
                log::warn!("CHECK_CLEAR_STATUS returned {other:#04x}");
                return Err(Error::from_status_byte(other));
            }
        }
    }

    log::error!("clear sequence did not complete within {} status polls", misc::MAX_READS_TO_CLEAR_BULK_IN);
    Err(Error::Protocol(
        "clear sequence did not complete within the retry bound".into(),
    ))
}

/// Clears a halt/stall on `endpoint` via the standard CLEAR_FEATURE request.
pub fn clear_feature(handle: &Handle, endpoint: &Endpoint) -> Result<(), Error> {
    transport::clear_halt(handle, endpoint)
}

/// Reads the device's IEEE 488 status byte over the control endpoint.
/// `tag` comes from the interrupt tag range, since the USBTMC-USB488
/// subclass spec numbers READ_STATUS_BYTE requests out of the same space as
/// interrupt-in SRQ notifications; the caller allocates it so it can match
/// the eventual interrupt-in acknowledgement against the same value.
pub fn read_status_byte(handle: &Handle, interface_number: u8, tag: u8, timeout: Duration) -> Result<u8, Error> {
    let w_value = tag as u16;
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 3];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::READ_STATUS_BYTE,
        w_value,
        w_index,
        &mut buffer,
        timeout,
    )?;

    check_status(buffer[0])?;
    Ok(buffer[2])
}

/// Sends an INDICATOR_PULSE request, causing a compliant device to blink a
/// status light. Only valid when `Capabilities::accepts_indicator_pulse_request`.
pub fn indicator_pulse(handle: &Handle, interface_number: u8, timeout: Duration) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::INDICATOR_PULSE,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])
}

/// Sets or clears Remote Enable. Gated on `Capabilities::is_simple` by the
/// caller, mirroring `USBTMC488_CAPABILITY_REN_CONTROL` == `SIMPLE`.
pub fn ren_control(
    handle: &Handle,
    interface_number: u8,
    enable: bool,
    timeout: Duration,
) -> Result<(), Error> {
    let w_value = if enable { 1 } else { 0 };
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::REN_CONTROL,
        w_value,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])
}

/// Returns the instrument to local control.
pub fn goto_local(handle: &Handle, interface_number: u8, timeout: Duration) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::GOTO_LOCAL,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])
}

/// Disables the instrument's front-panel controls until the next power
/// cycle or `goto_local`.
pub fn local_lockout(handle: &Handle, interface_number: u8, timeout: Duration) -> Result<(), Error> {
    let w_index = u16::from_le_bytes([interface_number, 0x00]);
    let mut buffer = [0u8; 1];

    transport::read_control(
        handle,
        Recipient::Interface,
        control_requests::LOCAL_LOCKOUT,
        0x0000,
        w_index,
        &mut buffer,
        timeout,
    )?;
    check_status(buffer[0])
}

/// Sends a TRIGGER message over the bulk-out endpoint. Gated by
/// `Capabilities::supports_trigger`.
pub fn trigger(
    handle: &Handle,
    bulk_out_ep: &Endpoint,
    tags: &TagCounter,
    timeout: Duration,
) -> Result<(), Error> {
    let tag = tags.next();
    let mut message = codec::encode_trigger(tag).to_vec();
    codec::pad_to_four(&mut message);
    transport::write_bulk(handle, bulk_out_ep, &message, timeout)?;
    Ok(())
}

/// Issues an arbitrary class/interface-recipient control request, for
/// vendor extensions or USBTMC requests this crate doesn't model directly.
/// Mirrors `USBTMC_IOCTL_CTRL_REQUEST`'s raw passthrough.
pub fn raw_control_request(
    handle: &Handle,
    direction: rusb::Direction,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize, Error> {
    match direction {
        rusb::Direction::In => {
            transport::read_control(handle, Recipient::Interface, b_request, w_value, w_index, buffer, timeout)
        }
        rusb::Direction::Out => {
            transport::write_control(handle, Recipient::Interface, b_request, w_value, w_index, buffer, timeout)
        }
    }
}

/// Deliberately halts the bulk-out endpoint, for conformance testing.
/// Mirrors `USBTMC_IOCTL_SET_OUT_HALT`.
pub fn set_out_halt(handle: &Handle, bulk_out_ep: &Endpoint, timeout: Duration) -> Result<(), Error> {
    set_halt(handle, bulk_out_ep, timeout)
}

/// Deliberately halts the bulk-in endpoint, for conformance testing.
/// Mirrors `USBTMC_IOCTL_SET_IN_HALT`.
pub fn set_in_halt(handle: &Handle, bulk_in_ep: &Endpoint, timeout: Duration) -> Result<(), Error> {
    set_halt(handle, bulk_in_ep, timeout)
}

fn set_halt(handle: &Handle, endpoint: &Endpoint, timeout: Duration) -> Result<(), Error> {
    // SET_FEATURE(ENDPOINT_HALT), standard request, endpoint recipient.
    let bm_request_type = rusb::request_type(
        rusb::Direction::Out,
        rusb::RequestType::Standard,
        Recipient::Endpoint,
    );
    handle
        .borrow()
        .write_control(bm_request_type, 0x03, 0x0000, endpoint.address as u16, &[], timeout)
        .map_err(Error::Usb)?;
    Ok(())
}
