//! ## Synchronous read/write engine
//!
//! The classic blocking byte-stream path: one call in, one call out, no
//! pipelining. Adapted from the teacher's `communication::bulk::{read,
//! write}`, restructured to chunk by the configured `io_buffer_size` (as
//! `usbtmc_read`/`usbtmc_write` chunk by the driver's `io_buffer_size`
//! rather than by an application-level constant), and to honor the Rigol
//! quirk that some devices only tolerate a single
//! REQUEST_DEV_DEP_MSG_IN per multi-buffer read.

use std::time::Duration;

use rusb::{Direction, TransferType};

use crate::codec;
use crate::constants::misc;
use crate::error::Error;
use crate::tag::TagCounter;
use crate::transport;
use crate::types::{Endpoint, Handle};

/// Writes `data` as a single DEV_DEP_MSG_OUT, chunked across bulk-out
/// transfers of at most `io_buffer_size` bytes. Returns the number of
/// payload bytes written (excludes header/padding) and the tag the message
/// was sent under, so a caller can target an auto-abort at it.
pub fn write(
    handle: &Handle,
    tags: &TagCounter,
    data: &[u8],
    bulk_out_ep: &Endpoint,
    io_buffer_size: u32,
    eom_enable: bool,
    timeout: Duration,
) -> Result<(usize, u8), Error> {
    transport::expect_endpoint(bulk_out_ep, Direction::Out, TransferType::Bulk)?;

    if data.len() > u32::MAX as usize {
        return Err(Error::InvalidArgument("write exceeds u32::MAX".into()));
    }

    let tag = tags.next();
    let header = codec::encode_dev_dep_msg_out(tag, data.len() as u32, eom_enable);

    let mut message = Vec::with_capacity(header.len() + data.len());
    message.extend_from_slice(&header);
    message.extend_from_slice(data);
    codec::pad_to_four(&mut message);

    for chunk in message.chunks(io_buffer_size as usize) {
        transport::write_bulk(handle, bulk_out_ep, chunk, timeout)?;
    }

    Ok((data.len(), tag))
}

/// Reads up to `count` bytes of one logical DEV_DEP_MSG_IN response. Mirrors
/// `usbtmc_read`: a Rigol-quirked device gets a single up-front
/// REQUEST_DEV_DEP_MSG_IN for the full `count` and is then drained with
/// plain bulk-in reads (header parsed only from the first buffer); every
/// other device gets a fresh REQUEST_DEV_DEP_MSG_IN per chunk, each capped
/// to `io_buffer_size - 12 - 3` bytes. Returns the payload bytes (header and
/// padding stripped, truncated to `count`) and the last tag used, so a
/// caller can target an auto-abort at it.
pub fn read(
    handle: &Handle,
    tags: &TagCounter,
    bulk_in_ep: &Endpoint,
    bulk_out_ep: &Endpoint,
    io_buffer_size: u32,
    count: usize,
    term_char: Option<u8>,
    rigol_quirk: bool,
    timeout: Duration,
) -> Result<(Vec<u8>, u8), Error> {
    transport::expect_endpoint(bulk_out_ep, Direction::Out, TransferType::Bulk)?;
    transport::expect_endpoint(bulk_in_ep, Direction::In, TransferType::Bulk)?;

    let mut tag = tags.next();
    if count == 0 {
        return Ok((Vec::new(), tag));
    }

    let max_chunk = (io_buffer_size as usize).saturating_sub(misc::USBTMC_HEADER_SIZE + 3).max(1);
    let mut output = Vec::with_capacity(count);
    let mut buffer = vec![0u8; io_buffer_size as usize];

    let mut remaining = count;
    let mut this_part = remaining;
    let mut done = 0usize;

    if rigol_quirk {
        let request = codec::encode_request_dev_dep_msg_in(tag, count as u32, term_char);
        transport::write_bulk(handle, bulk_out_ep, &request, timeout)?;
    }

    while remaining > 0 {
        if !rigol_quirk {
            this_part = remaining.min(max_chunk);
            tag = tags.next();
            let request = codec::encode_request_dev_dep_msg_in(tag, this_part as u32, term_char);
            transport::write_bulk(handle, bulk_out_ep, &request, timeout)?;
        }

        let bytes_read = transport::read_bulk(handle, bulk_in_ep, &mut buffer, timeout)?;

        if done == 0 || !rigol_quirk {
            let header = codec::decode_in_header(&buffer[..bytes_read], tag)?;
            let n_characters = header.transfer_size as usize;
            if n_characters > this_part {
                return Err(Error::Protocol(format!(
                    "device wants to return more data than requested: {n_characters} > {this_part}"
                )));
            }

            let mut actual = bytes_read.saturating_sub(misc::USBTMC_HEADER_SIZE);
            if rigol_quirk {
                if remaining > n_characters {
                    remaining = n_characters;
                }
                actual = actual.min(remaining);
            } else {
                if this_part > n_characters {
                    this_part = n_characters;
                }
                actual = actual.min(this_part);
            }

            output.extend_from_slice(&buffer[misc::USBTMC_HEADER_SIZE..misc::USBTMC_HEADER_SIZE + actual]);
            remaining -= actual;
            done += actual;

            // The EOM bit only terminates the read once the device has
            // actually delivered the n_characters it declared; a device that
            // sets EOM on a short/partial packet still has more to drain.
            if header.eom && actual >= n_characters {
                break;
            }
        } else {
            // Subsequent buffers of a Rigol-quirked multi-buffer read carry
            // no header of their own.
            let actual = bytes_read.min(remaining);
            output.extend_from_slice(&buffer[..actual]);
            remaining -= actual;
            done += actual;
        }

        if rigol_quirk && bytes_read < buffer.len() {
            // A short packet also terminates a Rigol-quirked multi-buffer
            // read even without a fresh header's EOM bit to check.
            break;
        }
    }

    Ok((output, tag))
}
