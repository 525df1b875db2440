//! Graph worker threads.
//!
//! Workers sleep on a [`Parker`] between cycles. The audio thread publishes
//! the cycle's schedule through `running`, bumps the epoch and unparks them;
//! each worker registers in `in_flight` before dereferencing the pointer so
//! the audio thread can wait for every participant to leave before the cycle
//! returns.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::Backoff;

use crate::schedule::Schedule;

#[derive(Debug)]
struct Dispatch {
    running: AtomicPtr<Schedule>,
    in_flight: AtomicUsize,
    epoch: AtomicU64,
    shutdown: AtomicBool,
}

pub(crate) struct WorkerPool {
    shared: Arc<Dispatch>,
    unparkers: Vec<Unparker>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(count: usize) -> io::Result<Self> {
        let shared = Arc::new(Dispatch {
            running: AtomicPtr::new(ptr::null_mut()),
            in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        let mut pool = Self {
            shared,
            unparkers: Vec::with_capacity(count),
            handles: Vec::with_capacity(count),
        };
        for index in 0..count {
            let parker = Parker::new();
            let unparker = parker.unparker().clone();
            let shared = Arc::clone(&pool.shared);
            // On failure `pool` drops here and joins the workers already started.
            let handle = thread::Builder::new()
                .name(format!("patchbay-worker-{index}"))
                .spawn(move || worker_loop(&shared, &parker))?;
            pool.unparkers.push(unparker);
            pool.handles.push(handle);
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Hands `schedule` to the workers. Its cycle must already be begun.
    #[inline]
    pub fn dispatch(&self, schedule: &Schedule) {
        if self.is_empty() {
            return;
        }
        self.shared
            .running
            .store(schedule as *const Schedule as *mut Schedule, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }

    /// Withdraws the running schedule and waits until no worker references it.
    #[inline]
    pub fn retire(&self) {
        if self.is_empty() {
            return;
        }
        self.shared.running.store(ptr::null_mut(), Ordering::SeqCst);
        let backoff = Backoff::new();
        while self.shared.in_flight.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for unparker in &self.unparkers {
            unparker.unpark();
        }
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "graph worker panicked");
            }
        }
    }
}

fn worker_loop(shared: &Dispatch, parker: &Parker) {
    patchbay_rt::enable_ftz_daz();
    let mut seen = 0u64;
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let epoch = shared.epoch.load(Ordering::Acquire);
        if epoch == seen {
            parker.park();
            continue;
        }
        seen = epoch;

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let running = shared.running.load(Ordering::SeqCst);
        if !running.is_null() {
            // SAFETY: the audio thread keeps the schedule alive until
            // `in_flight` drops back to zero after clearing `running`.
            let schedule = unsafe { &*running };
            schedule.work();
        }
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
