// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    sync::{
        Arc,
        Condvar,
        Mutex,
        MutexGuard,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct MonitorInner<T> {
    state: Mutex<T>,
    cond: Condvar,
}

/// A mutex paired with a condition variable. Every public entry point of the owning object holds the lock for the
/// duration of the call and blocking operations wait on the condition variable.
pub struct Monitor<T>(Arc<MonitorInner<T>>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self(Arc::new(MonitorInner {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        // A poisoned lock only means another thread panicked while holding it; the protocol state is still usable.
        match self.0.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Waits until notified or until `deadline`. Returns the guard and false if the deadline elapsed.
    pub fn wait_until<'a>(&'a self, guard: MutexGuard<'a, T>, deadline: Option<Instant>) -> (MutexGuard<'a, T>, bool) {
        match deadline {
            None => match self.0.cond.wait(guard) {
                Ok(guard) => (guard, true),
                Err(poisoned) => (poisoned.into_inner(), true),
            },
            Some(deadline) => {
                let now: Instant = Instant::now();
                if deadline <= now {
                    return (guard, false);
                }
                let timeout: Duration = deadline - now;
                match self.0.cond.wait_timeout(guard, timeout) {
                    Ok((guard, result)) => (guard, !result.timed_out()),
                    Err(poisoned) => {
                        let (guard, result) = poisoned.into_inner();
                        (guard, !result.timed_out())
                    },
                }
            },
        }
    }

    pub fn notify_all(&self) {
        self.0.cond.notify_all();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Clone for Monitor<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
