//! Single-flight coalescing.
//!
//! [`SingleFlight`] makes concurrent callers of the same expensive
//! operation share one execution. The first caller starts the operation,
//! everyone who arrives while it is running awaits the same handle, and all
//! of them observe the same output. The handle is cleared when the
//! operation finishes, succeeded or not, so the next call starts fresh.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

type Flight<T> = Shared<BoxFuture<'static, T>>;
type Slot<T> = Arc<Mutex<Option<(u64, Flight<T>)>>>;

/// Shared in-flight handle for one kind of operation.
pub struct SingleFlight<T: Clone> {
    slot: Slot<T>,
    generation: AtomicU64,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).is_some()
    }
}

impl<T: Clone> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

/// Clears the slot when the flight it belongs to ends or unwinds.
struct ClearOnDrop<T: Clone> {
    slot: Slot<T>,
    generation: u64,
}

impl<T: Clone> Drop for ClearOnDrop<T> {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|(g, _)| *g == self.generation) {
            slot.take();
        }
    }
}

fn lock<T: Clone>(slot: &Slot<T>) -> MutexGuard<'_, Option<(u64, Flight<T>)>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the running flight, or starts one built by `make`.
    ///
    /// `make` is only called when nothing is in flight.
    pub async fn run<F, Fut>(&self, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some((_, flight)) => flight.clone(),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let guard = ClearOnDrop {
                        slot: Arc::clone(&self.slot),
                        generation,
                    };
                    let work = make();
                    let flight = async move {
                        let _guard = guard;
                        work.await
                    }
                    .boxed()
                    .shared();
                    *slot = Some((generation, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// Awaits the running flight, if any, and returns its output.
    pub async fn wait(&self) -> Option<T> {
        let flight = lock(&self.slot).as_ref().map(|(_, f)| f.clone());
        match flight {
            Some(flight) => Some(flight.await),
            None => None,
        }
    }
}
