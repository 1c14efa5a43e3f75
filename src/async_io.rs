//! ## Asynchronous read/write engine
//!
//! The original driver pipelines bulk transfers by submitting several URBs
//! ahead of need and reaping their completions out of an anchor, bounding
//! how many writes are outstanding with a counting semaphore
//! (`limit_write_sem`) and letting callers cancel in-flight work by bumping
//! a generation token rather than by truly canceling a libusb transfer (the
//! "arena with index and generation token" resolution for cancellation).
//!
//! `rusb`'s blocking calls have no async submission primitive, so each
//! "URB" here is one spawned thread performing one blocking transfer; the
//! `Semaphore` throttles how many such threads may be outstanding at once,
//! and `Anchor`/`InAnchor` reproduce the kernel driver's submission
//! bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::codec;
use crate::constants::misc;
use crate::error::Error;
use crate::sem::Semaphore;
use crate::tag::TagCounter;
use crate::transport;
use crate::types::{Endpoint, Handle};

/// Tracks the count of submitted-but-not-reaped write transfers. Mirrors
/// `usb_anchor_empty(&data->submitted)`, which `usbtmc_ioctl_write_result`
/// and `usbtmc_draw_down` poll to know whether outstanding writes remain.
#[derive(Default)]
pub struct Anchor {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Anchor {
    pub fn new() -> Anchor {
        Anchor {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    pub fn insert(&self) {
        *self.count.lock().unwrap() += 1;
    }

    pub fn remove(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.condvar.notify_all();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self.count.lock().unwrap() == 0
    }

    /// Blocks until the anchor drains to empty or `timeout` elapses.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while *count != 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.condvar.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if result.timed_out() && *count != 0 {
                return false;
            }
        }
        true
    }
}

/// FIFO queue of completed transfers, handed off from the spawned transfer
/// threads to whichever caller is draining results. Mirrors the kernel
/// driver's `in_anchor`.
pub struct InAnchor<T> {
    queue: Mutex<VecDeque<T>>,
    condvar: Condvar,
}

impl<T> InAnchor<T> {
    pub fn new() -> InAnchor<T> {
        InAnchor {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn push(&self, item: T) {
        self.queue.lock().unwrap().push_back(item);
        self.condvar.notify_one();
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut queue = self.queue.lock().unwrap();
        let deadline = Instant::now() + timeout;
        while queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.condvar.wait_timeout(queue, deadline - now).unwrap();
            queue = guard;
            if result.timed_out() && queue.is_empty() {
                return None;
            }
        }
        queue.pop_front()
    }

    /// Pops the oldest completion if one is already available, without
    /// blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn drain(&self) {
        self.queue.lock().unwrap().clear();
    }
}

/// Outcome of one submitted read transfer.
pub struct ReadCompletion {
    pub epoch: u64,
    pub data: Vec<u8>,
    pub error: Option<Error>,
}

/// Queues `data` as a DEV_DEP_MSG_OUT across one or more `BULKSIZE` chunks,
/// each submitted on its own thread gated by `semaphore`. Returns the number
/// of payload bytes queued. When `nonblocking` is set, exhausting the
/// semaphore without queuing anything returns [`Error::WouldBlock`] instead
/// of blocking, matching `USBTMC_FLAG_ASYNC`.
#[allow(clippy::too_many_arguments)]
pub fn generic_write(
    handle: &Handle,
    bulk_out_ep: &Endpoint,
    tags: &TagCounter,
    semaphore: &Arc<Semaphore>,
    submitted: &Arc<Anchor>,
    out_transfer_size: &Arc<AtomicU64>,
    out_first_error: &Arc<Mutex<Option<Error>>>,
    cancel_epoch: &Arc<AtomicU64>,
    out_error: &Arc<AtomicBool>,
    data: &[u8],
    append: bool,
    eom_enable: bool,
    nonblocking: bool,
    timeout: Duration,
) -> Result<usize, Error> {
    if !append {
        out_transfer_size.store(0, Ordering::SeqCst);
        *out_first_error.lock().unwrap() = None;
        out_error.store(false, Ordering::SeqCst);
    }
    let mut message = Vec::with_capacity(data.len() + misc::USBTMC_HEADER_SIZE);
    if !append {
        let tag = tags.next();
        let header = codec::encode_dev_dep_msg_out(tag, data.len() as u32, eom_enable);
        message.extend_from_slice(&header);
    }
    message.extend_from_slice(data);
    codec::pad_to_four(&mut message);

    let epoch = cancel_epoch.load(Ordering::SeqCst);
    let mut queued = 0usize;

    for chunk in message.chunks(misc::BULKSIZE) {
        let acquired = if nonblocking {
            semaphore.try_acquire()
        } else {
            semaphore.acquire_timeout(timeout)
        };

        if !acquired {
            if queued == 0 {
                return Err(Error::WouldBlock);
            }
            break;
        }

        // A prior chunk's completion already recorded a sticky failure;
        // per spec.md §4.3 step 2, stop queuing more work under it rather
        // than pile additional URBs onto a transfer that's already failing.
        // The actual error is still obtainable from `write_result`, which
        // doesn't get cleared by this check.
        if out_error.load(Ordering::SeqCst) {
            semaphore.release();
            if queued == 0 {
                return Err(Error::Protocol(
                    "a previous write failed; call write_result to inspect it".into(),
                ));
            }
            break;
        }

        submitted.insert();
        queued += chunk.len();

        let handle = handle.clone();
        let bulk_out_ep = bulk_out_ep.clone();
        let semaphore = Arc::clone(semaphore);
        let submitted_anchor = Arc::clone(submitted);
        let out_transfer_size = Arc::clone(out_transfer_size);
        let out_first_error = Arc::clone(out_first_error);
        let cancel_epoch_thread = Arc::clone(cancel_epoch);
        let out_error_thread = Arc::clone(out_error);
        let chunk = chunk.to_vec();

        thread::spawn(move || {
            let result = transport::write_bulk(&handle, &bulk_out_ep, &chunk, timeout);
            let outcome = if cancel_epoch_thread.load(Ordering::SeqCst) != epoch {
                Err(Error::Canceled)
            } else {
                result
            };

            match outcome {
                Ok(bytes) => {
                    out_transfer_size.fetch_add(bytes as u64, Ordering::SeqCst);
                }
                Err(err) => {
                    out_error_thread.store(true, Ordering::SeqCst);
                    let mut first_error = out_first_error.lock().unwrap();
                    if first_error.is_none() {
                        *first_error = Some(err);
                    }
                }
            }

            submitted_anchor.remove();
            semaphore.release();
        });
    }

    Ok(queued)
}

/// Reads the cumulative transferred-byte count recorded so far, surfacing
/// the first error seen (if any), without consuming either. Mirrors
/// `usbtmc_ioctl_write_result`, which just reads `data->out_transfer_size`
/// and leaves it in place for a later caller to read again; both only reset
/// when `generic_write` starts a fresh non-APPEND transfer.
pub fn write_result(
    out_transfer_size: &AtomicU64,
    out_first_error: &Mutex<Option<Error>>,
) -> Result<usize, Error> {
    let total = out_transfer_size.load(Ordering::SeqCst) as usize;
    match out_first_error.lock().unwrap().clone() {
        Some(err) => Err(err),
        None => Ok(total),
    }
}

/// Outcome of draining one chunk from a [`ReadSession`].
pub enum ReadOutcome {
    /// A chunk of payload data, header/padding already stripped.
    Chunk(Vec<u8>),
    /// The logical DEV_DEP_MSG_IN response is complete (EOM or short packet).
    Complete,
    /// Non-blocking poll: nothing has completed yet.
    Pending,
}

/// Spawns one bulk-in transfer against a semaphore permit the caller has
/// already acquired, pushing its outcome onto `in_anchor` when it finishes.
/// Shared by `generic_read`'s initial prefetch and `ReadSession`'s
/// resubmission of buffers beyond the initial `MAX_URBS_IN_FLIGHT` cap.
#[allow(clippy::too_many_arguments)]
fn spawn_read_buffer(
    handle: &Handle,
    bulk_in_ep: &Endpoint,
    semaphore: &Arc<Semaphore>,
    in_anchor: &Arc<InAnchor<ReadCompletion>>,
    cancel_epoch: &Arc<AtomicU64>,
    in_error: &Arc<AtomicBool>,
    epoch: u64,
    timeout: Duration,
) {
    let handle = handle.clone();
    let bulk_in_ep = bulk_in_ep.clone();
    let semaphore = Arc::clone(semaphore);
    let in_anchor = Arc::clone(in_anchor);
    let cancel_epoch_thread = Arc::clone(cancel_epoch);
    let in_error_thread = Arc::clone(in_error);

    thread::spawn(move || {
        let mut buffer = vec![0u8; misc::BULKSIZE];
        let result = transport::read_bulk(&handle, &bulk_in_ep, &mut buffer, timeout);

        let completion = if cancel_epoch_thread.load(Ordering::SeqCst) != epoch {
            ReadCompletion {
                epoch,
                data: Vec::new(),
                error: Some(Error::Canceled),
            }
        } else {
            match result {
                Ok(n) => {
                    buffer.truncate(n);
                    ReadCompletion {
                        epoch,
                        data: buffer,
                        error: None,
                    }
                }
                Err(err) => ReadCompletion {
                    epoch,
                    data: Vec::new(),
                    error: Some(err),
                },
            }
        };

        if completion.error.is_some() {
            in_error_thread.store(true, Ordering::SeqCst);
        }

        in_anchor.push(completion);
        semaphore.release();
    });
}

/// A single prefetched-read transaction: one REQUEST_DEV_DEP_MSG_IN, then
/// chunks handed back as they complete, stripping the header from the first
/// one and detecting end-of-message. Outlives a single `generic_read` call:
/// a non-blocking caller that can't yet satisfy `max_len` stashes this (see
/// `DeviceContext::pending_read`) and resumes the same session on its next
/// poll rather than issuing a duplicate request. Submission is capped at
/// `MAX_URBS_IN_FLIGHT` up front; any remainder is resubmitted here, one
/// buffer at a time, as earlier ones drain.
pub struct ReadSession {
    handle: Handle,
    bulk_in_ep: Endpoint,
    semaphore: Arc<Semaphore>,
    in_anchor: Arc<InAnchor<ReadCompletion>>,
    cancel_epoch: Arc<AtomicU64>,
    in_error: Arc<AtomicBool>,
    epoch: u64,
    transfer_timeout: Duration,
    tag: u8,
    header_consumed: bool,
    eom: bool,
    /// `n_characters` declared by the header of the first chunk; the EOM bit
    /// it also carries only actually terminates the read once this many
    /// bytes have been received (see `next_chunk`).
    n_characters: usize,
    received: usize,
    remaining_to_submit: usize,
}

impl ReadSession {
    /// Returns the next chunk of payload data, `Complete` once the message
    /// is finished, or (with `timeout: None`) `Pending` if nothing has
    /// completed yet. With `Some(timeout)`, blocks up to `timeout` and
    /// fails with [`Error::TimedOut`] instead of returning `Pending`.
    pub fn next_chunk(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome, Error> {
        if self.eom {
            return Ok(ReadOutcome::Complete);
        }

        let completion = match timeout {
            Some(timeout) => match self.in_anchor.pop_timeout(timeout) {
                Some(completion) => completion,
                None => return Err(Error::TimedOut),
            },
            None => match self.in_anchor.try_pop() {
                Some(completion) => completion,
                None => return Ok(ReadOutcome::Pending),
            },
        };

        if let Some(err) = completion.error {
            return Err(err);
        }

        let mut data = completion.data;
        let short_packet = data.len() < misc::BULKSIZE;

        if !self.header_consumed {
            let header = codec::decode_in_header(&data, self.tag)?;
            self.n_characters = header.transfer_size as usize;
            data.drain(..misc::USBTMC_HEADER_SIZE);
            self.header_consumed = true;
            self.received = data.len();
            // The EOM bit only terminates the read once the device has
            // actually delivered the n_characters it declared.
            if header.eom && self.received >= self.n_characters {
                self.eom = true;
            }
        } else {
            self.received += data.len();
            if short_packet {
                self.eom = true;
            }
        }

        if !self.eom && self.remaining_to_submit > 0 {
            let acquired = match timeout {
                Some(timeout) => self.semaphore.acquire_timeout(timeout),
                None => self.semaphore.try_acquire(),
            };
            if acquired {
                spawn_read_buffer(
                    &self.handle,
                    &self.bulk_in_ep,
                    &self.semaphore,
                    &self.in_anchor,
                    &self.cancel_epoch,
                    &self.in_error,
                    self.epoch,
                    self.transfer_timeout,
                );
                self.remaining_to_submit -= 1;
            }
        }

        Ok(ReadOutcome::Chunk(data))
    }

    /// Whether the logical DEV_DEP_MSG_IN response has been fully received.
    pub fn is_complete(&self) -> bool {
        self.eom
    }
}

/// Sends a REQUEST_DEV_DEP_MSG_IN for up to `requested_size` bytes and
/// submits up to `MAX_URBS_IN_FLIGHT` empty-buffered bulk-in transfers to
/// prefetch the response (a message that needs more buffers than that to
/// arrive in full has the remainder resubmitted lazily by the returned
/// [`ReadSession`] as earlier buffers drain, rather than blocking here until
/// a permit frees up).
#[allow(clippy::too_many_arguments)]
pub fn generic_read(
    handle: &Handle,
    bulk_in_ep: &Endpoint,
    bulk_out_ep: &Endpoint,
    tags: &TagCounter,
    semaphore: &Arc<Semaphore>,
    in_anchor: &Arc<InAnchor<ReadCompletion>>,
    cancel_epoch: &Arc<AtomicU64>,
    in_error: &Arc<AtomicBool>,
    requested_size: usize,
    term_char: Option<u8>,
    rigol_quirk: bool,
    nonblocking: bool,
    timeout: Duration,
) -> Result<ReadSession, Error> {
    if requested_size == 0 {
        in_error.store(false, Ordering::SeqCst);
    }
    let tag = tags.next();
    let request = codec::encode_request_dev_dep_msg_in(tag, requested_size as u32, term_char);
    transport::write_bulk(handle, bulk_out_ep, &request, timeout)?;

    let epoch = cancel_epoch.load(Ordering::SeqCst);
    let total_buffers = requested_size.div_ceil(misc::BULKSIZE).max(1);
    let prefetch_now = total_buffers.min(misc::MAX_URBS_IN_FLIGHT);
    let mut submitted = 0usize;

    for n in 0..prefetch_now {
        let acquired = if nonblocking {
            semaphore.try_acquire()
        } else {
            semaphore.acquire_timeout(timeout)
        };

        if !acquired {
            return Err(Error::WouldBlock);
        }

        spawn_read_buffer(handle, bulk_in_ep, semaphore, in_anchor, cancel_epoch, in_error, epoch, timeout);
        submitted += 1;

        // Rigol devices only tolerate a single REQUEST_DEV_DEP_MSG_IN per
        // multi-buffer read; stop prefetching after the first submission
        // and let ReadSession resubmit plain reads for the remainder.
        if rigol_quirk && n == 0 {
            break;
        }
    }

    Ok(ReadSession {
        handle: handle.clone(),
        bulk_in_ep: bulk_in_ep.clone(),
        semaphore: Arc::clone(semaphore),
        in_anchor: Arc::clone(in_anchor),
        cancel_epoch: Arc::clone(cancel_epoch),
        in_error: Arc::clone(in_error),
        epoch,
        transfer_timeout: timeout,
        tag,
        header_consumed: false,
        eom: false,
        n_characters: 0,
        received: 0,
        remaining_to_submit: total_buffers.saturating_sub(submitted),
    })
}

/// Bumps the cancellation epoch so in-flight transfers captured under the
/// previous epoch report [`Error::Canceled`] on completion instead of their
/// true outcome.
pub fn cancel_io(cancel_epoch: &AtomicU64) {
    cancel_epoch.fetch_add(1, Ordering::SeqCst);
}

/// Cancels in-flight I/O and blocks until every submitted write has been
/// reaped, then discards any queued read completions and write results.
/// Mirrors `usbtmc_ioctl_cancel_io` followed by `usbtmc_draw_down`.
#[allow(clippy::too_many_arguments)]
pub fn cleanup_io(
    cancel_epoch: &AtomicU64,
    submitted: &Anchor,
    in_anchor: &InAnchor<ReadCompletion>,
    out_transfer_size: &AtomicU64,
    out_first_error: &Mutex<Option<Error>>,
    out_error: &AtomicBool,
    in_error: &AtomicBool,
    timeout: Duration,
) -> Result<(), Error> {
    cancel_io(cancel_epoch);

    if !submitted.wait_empty(timeout) {
        log::warn!("cleanup_io timed out waiting for outstanding writes to drain");
        return Err(Error::TimedOut);
    }

    in_anchor.drain();
    out_transfer_size.store(0, Ordering::SeqCst);
    *out_first_error.lock().unwrap() = None;
    out_error.store(false, Ordering::SeqCst);
    in_error.store(false, Ordering::SeqCst);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_tracks_in_flight_count() {
        let anchor = Anchor::new();
        assert!(anchor.is_empty());
        anchor.insert();
        anchor.insert();
        assert!(!anchor.is_empty());
        anchor.remove();
        assert!(!anchor.is_empty());
        anchor.remove();
        assert!(anchor.is_empty());
    }

    #[test]
    fn anchor_wait_empty_times_out_when_never_drained() {
        let anchor = Anchor::new();
        anchor.insert();
        assert!(!anchor.wait_empty(Duration::from_millis(20)));
    }

    #[test]
    fn in_anchor_is_fifo() {
        let anchor: InAnchor<u32> = InAnchor::new();
        anchor.push(1);
        anchor.push(2);
        assert_eq!(anchor.pop_timeout(Duration::from_millis(50)), Some(1));
        assert_eq!(anchor.pop_timeout(Duration::from_millis(50)), Some(2));
        assert_eq!(anchor.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn write_result_aggregates_bytes_and_surfaces_first_error() {
        let out_transfer_size = AtomicU64::new(0);
        let out_first_error: Mutex<Option<Error>> = Mutex::new(None);

        out_transfer_size.fetch_add(10, Ordering::SeqCst);
        *out_first_error.lock().unwrap() = Some(Error::Halted);
        // A later completion's error must not displace the first one.
        if out_first_error.lock().unwrap().is_none() {
            *out_first_error.lock().unwrap() = Some(Error::TimedOut);
        }

        match write_result(&out_transfer_size, &out_first_error) {
            Err(Error::Halted) => {}
            other => panic!("expected Halted error, got {other:?}"),
        }
    }

    #[test]
    fn write_result_is_non_destructive() {
        let out_transfer_size = AtomicU64::new(42);
        let out_first_error: Mutex<Option<Error>> = Mutex::new(None);

        assert_eq!(write_result(&out_transfer_size, &out_first_error).unwrap(), 42);
        // Reading write_result again must return the same value, unlike a
        // destructive drain of a completion queue.
        assert_eq!(write_result(&out_transfer_size, &out_first_error).unwrap(), 42);
    }
}
