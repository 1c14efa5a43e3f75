//! ## Bulk header codec
//!
//! Encoding/decoding of the 12-byte USBTMC bulk transfer header, shared by
//! the classic blocking engine and the async engine. Adapted from the
//! teacher's `communication::bulk` header builders, generalized into a
//! decode path with explicit tag/size/MsgID validation (the teacher only
//! ever encodes headers and trusts the device's responses blindly).

use crate::constants::{bulk_msg_id, misc};
use crate::error::Error;

/// Attribute bit set on a DEV_DEP_MSG_OUT/IN header to mark end-of-message.
pub const ATTR_EOM: u8 = 0b0000_0001;
/// Attribute bit on a REQUEST_DEV_DEP_MSG_IN header indicating a term char
/// is present in byte 9.
pub const ATTR_TERM_CHAR_ENABLED: u8 = 0b0000_0010;

/// Pads `data` up to the next multiple of 4 bytes with zero bytes, as
/// required by the USBTMC bulk transfer alignment rule.
pub fn pad_to_four(data: &mut Vec<u8>) {
    let remainder = data.len() % 4;
    if remainder != 0 {
        data.resize(data.len() + (4 - remainder), 0x00);
    }
}

/// Builds a DEV_DEP_MSG_OUT header.
pub fn encode_dev_dep_msg_out(tag: u8, transfer_size: u32, eom: bool) -> [u8; misc::USBTMC_HEADER_SIZE] {
    let mut header = [0u8; misc::USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_OUT;
    header[1] = tag;
    header[2] = !tag;
    header[4..8].copy_from_slice(&transfer_size.to_le_bytes());
    if eom {
        header[8] = ATTR_EOM;
    }
    header
}

/// Builds a REQUEST_DEV_DEP_MSG_IN header.
pub fn encode_request_dev_dep_msg_in(
    tag: u8,
    max_transfer_size: u32,
    term_char: Option<u8>,
) -> [u8; misc::USBTMC_HEADER_SIZE] {
    let mut header = [0u8; misc::USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::REQUEST_DEVICE_DEPENDENT_MSG_IN;
    header[1] = tag;
    header[2] = !tag;
    header[4..8].copy_from_slice(&max_transfer_size.to_le_bytes());
    if let Some(tc) = term_char {
        header[8] = ATTR_TERM_CHAR_ENABLED;
        header[9] = tc;
    }
    header
}

/// Builds a TRIGGER header (USB488, bulk-out only, no response expected).
pub fn encode_trigger(tag: u8) -> [u8; misc::USBTMC_HEADER_SIZE] {
    let mut header = [0u8; misc::USBTMC_HEADER_SIZE];
    header[0] = bulk_msg_id::TRIGGER;
    header[1] = tag;
    header[2] = !tag;
    header
}

/// A parsed DEV_DEP_MSG_IN header.
#[derive(Debug, Clone, Copy)]
pub struct InHeader {
    pub msg_id: u8,
    pub tag: u8,
    pub transfer_size: u32,
    pub eom: bool,
}

/// Parses and validates the 12-byte header of a bulk-in response.
///
/// Checks the tag/inverse-tag pair against `expected_tag` and confirms the
/// MsgID is `DEVICE_DEPENDENT_MSG_IN`. Mirrors the header sanity checks
/// `usbtmc_read` performs in the original driver before trusting the
/// payload length it carries.
pub fn decode_in_header(buffer: &[u8], expected_tag: u8) -> Result<InHeader, Error> {
    if buffer.len() < misc::USBTMC_HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "short header: got {} bytes, need {}",
            buffer.len(),
            misc::USBTMC_HEADER_SIZE
        )));
    }

    let msg_id = buffer[0];
    let tag = buffer[1];
    let inv_tag = buffer[2];

    if msg_id != bulk_msg_id::DEVICE_DEPENDENT_MSG_IN {
        return Err(Error::Protocol(format!("unexpected MsgID {msg_id}")));
    }
    if tag != expected_tag {
        return Err(Error::Protocol(format!(
            "tag mismatch: expected {expected_tag}, got {tag}"
        )));
    }
    if inv_tag != !tag {
        return Err(Error::Protocol("tag/inverse-tag mismatch".into()));
    }

    let transfer_size = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    let eom = buffer[8] & ATTR_EOM != 0;

    Ok(InHeader {
        msg_id,
        tag,
        transfer_size,
        eom,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_to_four_rounds_up() {
        let mut v = vec![1, 2, 3, 4, 5];
        pad_to_four(&mut v);
        assert_eq!(v.len(), 8);
        assert_eq!(&v[5..], &[0, 0, 0]);
    }

    #[test]
    fn pad_to_four_noop_when_aligned() {
        let mut v = vec![1, 2, 3, 4];
        pad_to_four(&mut v);
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn encode_decode_round_trip_on_matching_tag() {
        let mut header = encode_dev_dep_msg_out(5, 100, true).to_vec();
        header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_IN;
        let parsed = decode_in_header(&header, 5).unwrap();
        assert_eq!(parsed.tag, 5);
        assert_eq!(parsed.transfer_size, 100);
        assert!(parsed.eom);
    }

    #[test]
    fn decode_rejects_tag_mismatch() {
        let mut header = encode_dev_dep_msg_out(5, 0, false).to_vec();
        header[0] = bulk_msg_id::DEVICE_DEPENDENT_MSG_IN;
        assert!(decode_in_header(&header, 9).is_err());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let buffer = [0u8; 4];
        assert!(decode_in_header(&buffer, 1).is_err());
    }
}
