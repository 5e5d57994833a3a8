//! Per-view debounce timers.
//!
//! Each view has at most one armed timer. Re-arming aborts the previous
//! task and bumps the generation; a timer that wakes up and finds a
//! different generation in the table has been superseded and does nothing.
//! Tasks hold only a `Weak` reference, so a dropped manager never writes.
//!
//! Store writes are synchronous. On a multi-threaded runtime an elapsed
//! timer writes inside `block_in_place`; on a current-thread runtime the
//! write runs inline.

use std::sync::{Arc, Weak};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Inner, PersistStatus, Shared};

pub(super) struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Inner {
    /// Cancel the view's timer. Returns whether one was armed.
    pub(super) fn cancel_timer(&mut self, view: &str) -> bool {
        match self.timers.remove(view) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(super) fn cancel_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

/// Arm (or re-arm) the debounce timer for `view`.
///
/// Returns `false` when no tokio runtime is available; the caller then
/// writes inline.
pub(super) fn arm(shared: &Arc<Shared>, inner: &mut Inner, view: &str) -> bool {
    let Ok(runtime) = Handle::try_current() else {
        return false;
    };

    inner.cancel_timer(view);
    inner.generation += 1;
    let generation = inner.generation;
    let delay = shared.config.debounce;
    let weak = Arc::downgrade(shared);
    let target = view.to_string();
    let blocking = runtime.runtime_flavor() == RuntimeFlavor::MultiThread;
    let handle = runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        if blocking {
            tokio::task::block_in_place(|| fire(&weak, &target, generation));
        } else {
            fire(&weak, &target, generation);
        }
    });

    inner.timers.insert(view.to_string(), PendingTimer { generation, handle });
    inner
        .status
        .insert(view.to_string(), PersistStatus::PendingWrite);
    debug!(view, generation, delay_ms = delay.as_millis() as u64, "armed debounced write");
    true
}

fn fire(weak: &Weak<Shared>, view: &str, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    shared.with_lock(|inner, events| {
        match inner.timers.get(view) {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!(view, generation, "superseded debounce timer");
                return;
            }
        }
        // Our own entry; the task is finishing, nothing to abort.
        inner.timers.remove(view);
        debug!(view, "debounce elapsed");
        shared.persist(inner, events, &[view]);
    });
}
