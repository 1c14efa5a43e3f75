//! ## Interrupt / SRQ dispatcher
//!
//! A background thread that keeps one interrupt-in transfer outstanding for
//! the lifetime of the connection, classifies each notification as either a
//! service request or a stray status-byte acknowledgement, and fans SRQ out
//! to every open handle. Learned from `examples/original_source/usbtmc.c`'s
//! `usbtmc_interrupt` (no example repo implements an interrupt pipe), and
//! expressed as a `std::thread` loop rather than a completion callback since
//! this crate has no interrupt context to run one in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::device::StatusAckSlot;
use crate::handle::HandleState;
use crate::transport;
use crate::types::{Endpoint, Handle};

/// Interrupt-in notifications are two bytes: `bNotify1` and `bNotify2`.
/// `bNotify1 == 0x81` is a service request (tag 1 is reserved for SRQ by the
/// USBTMC-USB488 subclass spec §4.3.1); `bNotify1 > 0x81` is an
/// acknowledgement of a prior READ_STATUS_BYTE request sent over the
/// interrupt pipe, with the low 7 bits of `bNotify1` carrying the tag that
/// request used. Anything else (`bNotify1 <= 0x80`) is not a valid
/// notification and is dropped.
fn classify(notify1: u8, notify2: u8) -> Option<Notification> {
    if notify1 > 0x81 {
        Some(Notification::StatusByteAck {
            tag: notify1 & 0x7F,
            status_byte: notify2,
        })
    } else if notify1 == 0x81 {
        Some(Notification::ServiceRequest { status_byte: notify2 })
    } else {
        None
    }
}

enum Notification {
    ServiceRequest { status_byte: u8 },
    StatusByteAck { tag: u8, status_byte: u8 },
}

/// Spawns the dispatcher thread. Returns its `JoinHandle`; signal shutdown
/// by setting `stop` and the thread will exit after its current read
/// (bounded by `read_timeout`) completes.
pub fn spawn(
    handle: Handle,
    interrupt_ep: Endpoint,
    handles: Arc<Mutex<Vec<Weak<HandleState>>>>,
    status_ack: Arc<StatusAckSlot>,
    stop: Arc<AtomicBool>,
    read_timeout: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || run(&handle, &interrupt_ep, &handles, &status_ack, &stop, read_timeout))
}

fn run(
    handle: &Handle,
    interrupt_ep: &Endpoint,
    handles: &Arc<Mutex<Vec<Weak<HandleState>>>>,
    status_ack: &StatusAckSlot,
    stop: &AtomicBool,
    read_timeout: Duration,
) {
    let mut buffer = [0u8; 2];

    while !stop.load(Ordering::SeqCst) {
        match transport::read_interrupt(handle, interrupt_ep, &mut buffer, read_timeout) {
            Ok(n) if n >= 2 => match classify(buffer[0], buffer[1]) {
                Some(Notification::ServiceRequest { status_byte }) => {
                    debug!("SRQ asserted, status byte {status_byte:#04x}");
                    broadcast_srq(handles, status_byte);
                }
                Some(Notification::StatusByteAck { tag, status_byte }) => {
                    debug!("status byte ack for tag {tag}: {status_byte:#04x}");
                    status_ack.set(tag, status_byte);
                }
                None => warn!("invalid interrupt-in notification: {:#04x}", buffer[0]),
            },
            Ok(_) => warn!("short interrupt-in transfer, dropping"),
            Err(crate::error::Error::TimedOut) => continue,
            Err(crate::error::Error::Disconnected) => {
                mark_disconnected(handles);
                break;
            }
            Err(err) => {
                warn!("interrupt-in transfer failed: {err}");
                mark_disconnected(handles);
                break;
            }
        }
    }
}

fn broadcast_srq(handles: &Arc<Mutex<Vec<Weak<HandleState>>>>, status_byte: u8) {
    let handles = handles.lock().unwrap();
    for weak in handles.iter() {
        if let Some(state) = weak.upgrade() {
            state.latch_srq(status_byte);
        }
    }
}

fn mark_disconnected(handles: &Arc<Mutex<Vec<Weak<HandleState>>>>) {
    let handles = handles.lock().unwrap();
    for weak in handles.iter() {
        if let Some(state) = weak.upgrade() {
            state.mark_zombie();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_service_request_at_0x81() {
        match classify(0x81, 0x42) {
            Some(Notification::ServiceRequest { status_byte }) => assert_eq!(status_byte, 0x42),
            _ => panic!("expected a service request"),
        }
    }

    #[test]
    fn classifies_status_byte_ack_above_0x81_and_strips_tag() {
        match classify(0x85, 0x99) {
            Some(Notification::StatusByteAck { tag, status_byte }) => {
                assert_eq!(tag, 0x05);
                assert_eq!(status_byte, 0x99);
            }
            _ => panic!("expected a status byte ack"),
        }
    }

    #[test]
    fn drops_notifications_at_or_below_0x80() {
        assert!(classify(0x05, 0x99).is_none());
        assert!(classify(0x80, 0x99).is_none());
    }
}
