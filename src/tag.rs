//! ## Tag counters
//!
//! USBTMC bulk transfers are tagged with a `bTag`/`bTagInverse` pair so the
//! device and host can match a response to its request. The USBTMC-USB488
//! subclass additionally tags interrupt-in notifications, but reserves tag
//! value 1 to mean "service request" rather than a transfer acknowledgement,
//! so the interrupt tag counter wraps over a different range than the bulk
//! one.
//!
//! Both counters share the same wrap-on-overflow behavior as the teacher's
//! original `BTag`, just parameterized by range.

use std::sync::Mutex;

/// A wrapping counter over an inclusive `[low, high]` range.
#[derive(Debug)]
pub struct TagCounter {
    low: u8,
    high: u8,
    current: Mutex<u8>,
}

impl TagCounter {
    fn new(low: u8, high: u8) -> TagCounter {
        TagCounter {
            low,
            high,
            current: Mutex::new(low),
        }
    }

    /// Bulk tag counter, cycling through `[1, 255]` (0 is reserved).
    pub fn bulk() -> TagCounter {
        TagCounter::new(1, 255)
    }

    /// Interrupt tag counter, cycling through `[2, 127]` (1 is reserved for
    /// SRQ notifications per the USBTMC-USB488 subclass spec).
    pub fn interrupt() -> TagCounter {
        TagCounter::new(2, 127)
    }

    /// Returns the next tag value, advancing and wrapping the counter.
    pub fn next(&self) -> u8 {
        let mut current = self.current.lock().unwrap();
        let value = *current;

        *current = if value >= self.high {
            self.low
        } else {
            value + 1
        };

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_tag_wraps_from_255_to_1() {
        let tags = TagCounter::bulk();
        for expected in 1..=255u16 {
            assert_eq!(tags.next(), expected as u8);
        }
        assert_eq!(tags.next(), 1);
    }

    #[test]
    fn interrupt_tag_never_yields_one_and_wraps_from_127_to_2() {
        let tags = TagCounter::interrupt();
        let mut seen_one = false;
        for _ in 0..126 {
            let t = tags.next();
            if t == 1 {
                seen_one = true;
            }
        }
        assert!(!seen_one);
        assert_eq!(tags.next(), 2);
    }
}
