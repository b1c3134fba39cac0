// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    cmp::{
        Ordering,
        Reverse,
    },
    collections::{
        BinaryHeap,
        HashMap,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handle to a scheduled timer event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerQueueEntry {
    expiry: Instant,
    id: u64,
}

/// Timer service that holds one or more events for future firing. The clock only moves when the owner advances it,
/// so every expiry is deterministic with respect to the instants handed to [TimerService::advance_clock].
pub struct TimerService<E> {
    now: Instant,
    next_id: u64,
    // Use a reverse to get a min heap.
    heap: BinaryHeap<Reverse<TimerQueueEntry>>,
    // Events that are still armed. Cancelled events leave a stale heap entry behind that is skipped when popped.
    armed: HashMap<u64, E>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<E> TimerService<E> {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            next_id: 0,
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Schedules `event` to fire once the clock reaches `expiry`.
    pub fn schedule(&mut self, expiry: Instant, event: E) -> TimerId {
        let id: u64 = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(TimerQueueEntry { expiry, id }));
        self.armed.insert(id, event);
        TimerId(id)
    }

    /// Schedules `event` to fire `delay` after the current time.
    pub fn schedule_after(&mut self, delay: Duration, event: E) -> TimerId {
        let expiry: Instant = self.now + delay;
        self.schedule(expiry, event)
    }

    /// Cancels a pending event. Returns the event if it had not fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        self.armed.remove(&id.0)
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id.0)
    }

    /// Returns the expiry of the earliest armed event.
    pub fn next_expiry(&mut self) -> Option<Instant> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.armed.contains_key(&entry.id) {
                return Some(entry.expiry);
            }
            self.heap.pop();
        }
        None
    }

    /// Moves the clock forward and returns every event whose expiry is due, in expiry order.
    pub fn advance_clock(&mut self, now: Instant) -> Vec<E> {
        assert!(self.now <= now, "timer clock cannot move backwards");

        let mut fired: Vec<E> = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if now < entry.expiry {
                break;
            }
            let id: u64 = entry.id;
            self.heap.pop();
            if let Some(event) = self.armed.remove(&id) {
                fired.push(event);
            }
        }
        self.now = now;
        fired
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.id == other.id
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties on the expiry fire in scheduling order.
        self.expiry.cmp(&other.expiry).then(self.id.cmp(&other.id))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
