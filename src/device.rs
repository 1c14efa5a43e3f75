//! ## Device context
//!
//! `DeviceContext` is the shared state behind every open handle on one
//! USBTMC instrument: the claimed `rusb` handle and endpoints, the tag
//! counters, the async engine's anchors/semaphore/cancel epoch, the open
//! handle list the interrupt dispatcher fans SRQ out to, and the
//! zombie/disconnected flag. One `DeviceContext` is shared (via `Arc`)
//! across every [`crate::client::UsbtmcClient`] handle opened on the same
//! device, mirroring `usbtmc_device_data` in
//! `examples/original_source/usbtmc.c`, which is likewise one struct shared
//! by every `usbtmc_file_data` created by `open()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::async_io::{self, Anchor, InAnchor, ReadCompletion, ReadSession};
use crate::constants::misc;
use crate::error::Error;
use crate::handle::HandleState;
use crate::interrupt;
use crate::sem::Semaphore;
use crate::tag::TagCounter;
use crate::types::{Capabilities, ClientConfig, DeviceMode, Handle, Timeout, UsbtmcEndpoints};

/// Shared per-device state, analogous to `usbtmc_device_data`.
pub struct DeviceContext {
    pub handle: Handle,
    pub mode: DeviceMode,
    pub endpoints: UsbtmcEndpoints,
    pub capabilities: Capabilities,
    /// Set when the device's (vendor, product) pair is known to only
    /// tolerate a single REQUEST_DEV_DEP_MSG_IN per multi-buffer read.
    pub rigol_quirk: bool,

    pub config: Mutex<ClientConfig>,
    pub timeout: Timeout,

    pub tags: TagCounter,
    pub interrupt_tags: TagCounter,
    pub last_write_tag: Mutex<Option<u8>>,
    pub last_read_tag: Mutex<Option<u8>>,

    /// Serializes user-initiated operations on this device, the same way
    /// `io_mutex` does in the original driver.
    pub io_mutex: Mutex<()>,

    pub semaphore: Arc<Semaphore>,
    pub submitted: Arc<Anchor>,
    pub in_anchor: Arc<InAnchor<ReadCompletion>>,
    /// Cumulative bytes written across the current (possibly APPEND-chained)
    /// write, read non-destructively by `write_result`. Mirrors
    /// `data->out_transfer_size`, which `usbtmc_ioctl_write_result` reads
    /// without ever zeroing it itself.
    pub out_transfer_size: Arc<AtomicU64>,
    /// The first error seen by a write completion since the last fresh
    /// (non-APPEND) write, surfaced by `write_result` without being
    /// consumed.
    pub out_first_error: Arc<Mutex<Option<Error>>>,
    pub cancel_epoch: Arc<AtomicU64>,
    /// Sticky aggregate `out_status`/`in_status`: set by the first failing
    /// write/read completion, cleared only when a fresh (non-APPEND, or
    /// `max_len=0`) transfer starts. Unlike `out_transfer_size`/`in_anchor`,
    /// reading these does not drain anything, so `readiness()` can report
    /// `error` without racing the caller's own drain of completions.
    pub out_error: Arc<AtomicBool>,
    pub in_error: Arc<AtomicBool>,
    /// An async read transaction a non-blocking `generic_read` couldn't yet
    /// satisfy in full. Holding onto it lets the next poll resume draining
    /// the same tag/anchor state instead of issuing a duplicate
    /// REQUEST_DEV_DEP_MSG_IN.
    pub pending_read: Mutex<Option<ReadSession>>,

    pub handles: Arc<Mutex<Vec<Weak<HandleState>>>>,
    pub zombie: AtomicBool,
    pub status_ack: Arc<StatusAckSlot>,

    interrupt: Mutex<Option<InterruptDispatcher>>,
}

struct InterruptDispatcher {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Latches the most recent READ_STATUS_BYTE acknowledgement seen on the
/// interrupt-in pipe (a notification whose `bNotify1` bit 7 is clear), so
/// `control::read_status_byte` can wait on it the way
/// `usbtmc488_ioctl_read_stb` waits on `data->iin_data_valid`.
#[derive(Default)]
pub struct StatusAckSlot {
    inner: Mutex<Option<(u8, u8)>>,
    condvar: std::sync::Condvar,
}

impl StatusAckSlot {
    pub fn new() -> StatusAckSlot {
        StatusAckSlot::default()
    }

    pub fn set(&self, tag: u8, status_byte: u8) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Some((tag, status_byte));
        self.condvar.notify_all();
    }

    /// Blocks until an acknowledgement arrives or `timeout` elapses,
    /// consuming it if present.
    pub fn wait(&self, timeout: Duration) -> Option<(u8, u8)> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while inner.is_none() {
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, result) = self.condvar.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if result.timed_out() && inner.is_none() {
                return None;
            }
        }
        inner.take()
    }
}

impl DeviceContext {
    pub fn new(
        handle: Handle,
        mode: DeviceMode,
        endpoints: UsbtmcEndpoints,
        capabilities: Capabilities,
        rigol_quirk: bool,
        config: ClientConfig,
        default_timeout: Duration,
    ) -> Arc<DeviceContext> {
        Arc::new(DeviceContext {
            handle,
            mode,
            endpoints,
            capabilities,
            rigol_quirk,
            config: Mutex::new(config),
            timeout: Timeout::new(default_timeout),
            tags: TagCounter::bulk(),
            interrupt_tags: TagCounter::interrupt(),
            last_write_tag: Mutex::new(None),
            last_read_tag: Mutex::new(None),
            io_mutex: Mutex::new(()),
            semaphore: Arc::new(Semaphore::new(misc::MAX_URBS_IN_FLIGHT)),
            submitted: Arc::new(Anchor::new()),
            in_anchor: Arc::new(InAnchor::new()),
            out_transfer_size: Arc::new(AtomicU64::new(0)),
            out_first_error: Arc::new(Mutex::new(None)),
            cancel_epoch: Arc::new(AtomicU64::new(0)),
            out_error: Arc::new(AtomicBool::new(false)),
            in_error: Arc::new(AtomicBool::new(false)),
            pending_read: Mutex::new(None),
            handles: Arc::new(Mutex::new(Vec::new())),
            zombie: AtomicBool::new(false),
            status_ack: Arc::new(StatusAckSlot::new()),
            interrupt: Mutex::new(None),
        })
    }

    /// Fails fast with [`Error::Disconnected`] once the device has gone
    /// away, the same short-circuit every ioctl path takes in the original
    /// driver when `data->zombie` is set.
    pub fn check_zombie(&self) -> Result<(), Error> {
        if self.zombie.load(Ordering::SeqCst) {
            Err(Error::Disconnected)
        } else {
            Ok(())
        }
    }

    pub fn is_usb488(&self) -> bool {
        self.mode.is_usb488()
    }

    /// Registers a freshly created handle in the device's handle list, so
    /// the interrupt dispatcher will fan SRQ notifications out to it.
    pub fn register_handle(self: &Arc<Self>) -> Arc<HandleState> {
        let state = Arc::new(HandleState::new());
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|weak| weak.strong_count() > 0);
        handles.push(Arc::downgrade(&state));
        state
    }

    pub fn unregister_handle(&self, state: &Arc<HandleState>) {
        let target = Arc::as_ptr(state);
        let mut handles = self.handles.lock().unwrap();
        handles.retain(|weak| {
            weak.strong_count() > 0 && weak.upgrade().map(|s| Arc::as_ptr(&s) != target).unwrap_or(false)
        });
    }

    pub fn open_handle_count(&self) -> usize {
        let handles = self.handles.lock().unwrap();
        handles.iter().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Starts the interrupt/SRQ dispatcher thread if the device has an
    /// interrupt-in endpoint and the dispatcher isn't already running.
    /// Idempotent so every handle open can call it unconditionally.
    pub fn ensure_interrupt_dispatcher(self: &Arc<Self>) {
        let Some(endpoint) = self.endpoints.interrupt_ep.clone() else {
            return;
        };

        let mut guard = self.interrupt.lock().unwrap();
        if guard.is_some() {
            return;
        }

        log::debug!("starting interrupt dispatcher on ep {:#04x}", endpoint.address);
        let stop = Arc::new(AtomicBool::new(false));
        let thread = interrupt::spawn(
            self.handle.clone(),
            endpoint,
            Arc::clone(&self.handles),
            Arc::clone(&self.status_ack),
            Arc::clone(&stop),
            Duration::from_millis(500),
        );

        *guard = Some(InterruptDispatcher { stop, thread });
    }

    /// Stops the interrupt dispatcher and joins its thread. Called once the
    /// last handle on this device has closed.
    pub fn shutdown_interrupt_dispatcher(&self) {
        let dispatcher = self.interrupt.lock().unwrap().take();
        if let Some(dispatcher) = dispatcher {
            log::debug!("stopping interrupt dispatcher");
            dispatcher.stop.store(true, Ordering::SeqCst);
            let _ = dispatcher.thread.join();
        }
    }

    /// Drains/cancels all in-flight device-wide I/O and resets aggregate
    /// status, mirroring `usbtmc_draw_down` as invoked from
    /// `usbtmc_flush`: wait up to one second for outstanding writes to
    /// drain naturally, then kill whatever remains.
    pub fn draw_down(&self) {
        if !self.submitted.wait_empty(Duration::from_secs(1)) {
            async_io::cancel_io(&self.cancel_epoch);
            let _ = self.submitted.wait_empty(Duration::from_secs(1));
        }
        self.in_anchor.drain();
        self.out_transfer_size.store(0, Ordering::SeqCst);
        *self.out_first_error.lock().unwrap() = None;
        self.out_error.store(false, Ordering::SeqCst);
        self.in_error.store(false, Ordering::SeqCst);
        *self.pending_read.lock().unwrap() = None;
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("mode", &self.mode)
            .field("endpoints", &self.endpoints)
            .field("capabilities", &self.capabilities)
            .field("zombie", &self.zombie.load(Ordering::SeqCst))
            .finish()
    }
}
