//! Fixed-interval maintenance tick on a dedicated thread.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::{
    any::Any,
    fmt, io,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, error};

/// A periodic maintenance callback.
///
/// Called from the heartbeat thread, so it must not block for long; a slow
/// handler delays every handler after it.
pub trait HeartbeatHandler: Send + Sync {
    fn on_heartbeat(&self);
}

/// Collects handlers and drives them from one background thread.
///
/// Handlers run in registration order on every tick. A handler that panics
/// is logged and skipped for that tick; the others and the timer keep going.
///
/// # Examples
/// ```
/// use spindle_web::{Heartbeat, HeartbeatHandler};
/// use std::{sync::{atomic::{AtomicUsize, Ordering}, Arc}, time::Duration};
///
/// struct Ticks(AtomicUsize);
///
/// impl HeartbeatHandler for Ticks {
///     fn on_heartbeat(&self) {
///         self.0.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let ticks = Arc::new(Ticks(AtomicUsize::new(0)));
/// let mut heartbeat = Heartbeat::new(Duration::from_millis(5));
/// heartbeat.register(ticks.clone());
///
/// let guard = heartbeat.start().unwrap().unwrap();
/// std::thread::sleep(Duration::from_millis(50));
/// drop(guard); // stops and joins the thread
///
/// assert!(ticks.0.load(Ordering::Relaxed) > 0);
/// ```
pub struct Heartbeat {
    interval: Duration,
    handlers: Vec<Arc<dyn HeartbeatHandler>>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            handlers: Vec::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn HeartbeatHandler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Starts the tick thread.
    ///
    /// Returns `Ok(None)` without spawning anything when no handler is
    /// registered.
    ///
    /// # Errors
    /// The OS refused to create the thread.
    pub fn start(self) -> io::Result<Option<HeartbeatGuard>> {
        if self.handlers.is_empty() {
            return Ok(None);
        }

        let (stop, stopped) = channel::bounded::<()>(0);
        let Heartbeat { interval, handlers } = self;

        let thread = thread::Builder::new()
            .name("heartbeat".into())
            .spawn(move || {
                debug!(handlers = handlers.len(), ?interval, "heartbeat started");

                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    tick(&handlers);
                }

                debug!("heartbeat stopped");
            })?;

        Ok(Some(HeartbeatGuard {
            stop: Some(stop),
            thread: Some(thread),
        }))
    }
}

impl fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heartbeat")
            .field("interval", &self.interval)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn tick(handlers: &[Arc<dyn HeartbeatHandler>]) {
    for (index, handler) in handlers.iter().enumerate() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler.on_heartbeat())) {
            error!(handler = index, panic = panic_message(&*panic), "heartbeat handler panicked");
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Keeps the heartbeat thread alive. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct HeartbeatGuard {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatGuard {
    /// Stops the thread and waits for the current tick to finish.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread immediately.
        self.stop.take();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("heartbeat thread terminated abnormally");
            }
        }
    }
}
