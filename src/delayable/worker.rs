//! Host-thread driver for [`DelayableScheduler`].
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  delayable thread                                        │
//!  │  futures_lite::future::block_on(run)                     │
//!  │    loop:                                                 │
//!  │      lock ─▶ on_timer_fire(now) until head in future     │
//!  │      sleep: Timer(head - now)  ─or─  kick.wait()         │
//!  └───────────────▲──────────────────────────────────────────┘
//!                  │ kick
//!   enqueue() ─────┘ (caller thread: lock, enqueue, signal)
//! ```
//!
//! Completion callbacks run on the delayable thread with the scheduler
//! locked; they must not call back into the worker.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{debug, info, warn};

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::msg::{MsgCtx, SendCallback, Transport};
use crate::time::{Clock, MonotonicClock};

use super::{DelayableScheduler, DelayableStats};

const THREAD_NAME: &str = "mesh-delayable";
const STACK_KB: usize = 16;

struct Inner<T> {
    sched: DelayableScheduler,
    transport: T,
}

struct Shared<T> {
    inner: Mutex<CriticalSectionRawMutex, Inner<T>>,
    kick: Signal<CriticalSectionRawMutex, ()>,
    stop: AtomicBool,
    clock: MonotonicClock,
}

/// Owns a scheduler and its transport and fires it on time.
pub struct DelayableWorker<T: Transport + Send + 'static> {
    shared: Arc<Shared<T>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Transport + Send + 'static> DelayableWorker<T> {
    pub fn spawn(sched: DelayableScheduler, transport: T) -> Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner { sched, transport }),
            kick: Signal::new(),
            stop: AtomicBool::new(false),
            clock: MonotonicClock::new(),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(THREAD_NAME.into())
                .stack_size(STACK_KB * 1024)
                .spawn(move || future::block_on(run(&shared)))
                .map_err(|e| {
                    warn!("Delayable: cannot spawn worker thread: {}", e);
                    Error::ResourceExhausted
                })?
        };

        info!("Delayable: worker started");
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Queue `payload` for delayed transmission; see
    /// [`DelayableScheduler::enqueue`].
    pub fn enqueue(
        &self,
        ctx: &MsgCtx,
        payload: &[u8],
        src: Address,
        cb: Option<SendCallback>,
    ) -> Result<()> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(Error::Unavailable);
        }
        self.with_inner(|inner| {
            let now = self.shared.clock.now_ms();
            inner
                .sched
                .enqueue(now, ctx, payload, src, cb, &mut inner.transport)
        })?;
        self.shared.kick.signal(());
        Ok(())
    }

    pub fn suspend(&self) {
        self.with_inner(|inner| inner.sched.suspend());
    }

    pub fn resume(&self) {
        self.with_inner(|inner| inner.sched.resume());
    }

    pub fn pending(&self) -> usize {
        self.with_inner(|inner| inner.sched.pending())
    }

    pub fn stats(&self) -> DelayableStats {
        self.with_inner(|inner| inner.sched.stats())
    }

    /// Run `f` on the owned transport, e.g. to inspect a test double.
    pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_inner(|inner| f(&mut inner.transport))
    }

    /// Stop the thread, then cancel whatever is still queued.
    ///
    /// Returns the number of cancelled messages; later calls return 0.
    pub fn shutdown(&mut self) -> usize {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.kick.signal(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Delayable: worker thread panicked");
            }
            info!("Delayable: worker stopped");
        }
        self.with_inner(|inner| inner.sched.shutdown())
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner<T>) -> R) -> R {
        future::block_on(async {
            let mut inner = self.shared.inner.lock().await;
            f(&mut inner)
        })
    }
}

/// Sends with `ctx.rnd_delay` set go through the delay queue without a
/// completion callback; everything else goes straight to the owned
/// transport.
impl<T: Transport + Send + 'static> Transport for DelayableWorker<T> {
    fn send(&mut self, ctx: &MsgCtx, payload: &[u8], src: Address) -> Result<()> {
        if ctx.rnd_delay {
            return self.enqueue(ctx, payload, src, None);
        }
        self.with_inner(|inner| inner.transport.send(ctx, payload, src))
    }

    fn batching(&self, ctx: &MsgCtx) -> bool {
        self.with_inner(|inner| inner.transport.batching(ctx))
    }
}

impl<T: Transport + Send + 'static> Drop for DelayableWorker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run<T: Transport>(shared: &Shared<T>) {
    while !shared.stop.load(Ordering::Acquire) {
        let next = {
            let mut guard = shared.inner.lock().await;
            let inner = &mut *guard;
            let now = shared.clock.now_ms();
            let mut next = inner.sched.on_timer_fire(now, &mut inner.transport);
            while next.is_some_and(|at| at <= now) {
                next = inner.sched.on_timer_fire(now, &mut inner.transport);
            }
            next
        };

        match next {
            Some(at) => {
                let sleep = Duration::from_millis(at.saturating_sub(shared.clock.now_ms()));
                future::or(shared.kick.wait(), async {
                    async_io_mini::Timer::after(sleep).await;
                })
                .await;
            }
            None => shared.kick.wait().await,
        }
    }
    debug!("Delayable: worker loop exiting");
}
