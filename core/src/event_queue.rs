//! Blocking FIFO hand-off of [`Event`]s between threads of one worker.

use crate::event::Event;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// An unbounded, thread-safe, insertion-ordered event queue.
///
/// Any number of producers and consumers may share one queue through an
/// `Arc`. Each event is delivered to exactly one consumer.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    available: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` and wake at most one waiting consumer. Never blocks on
    /// anything but the internal lock.
    pub fn add_event(&self, event: Event) {
        self.events.lock().push_back(event);
        self.available.notify_one();
    }

    /// Remove the head event, parking the calling thread until one arrives.
    pub fn wait_event(&self) -> Event {
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.pop_front() {
                return event;
            }
            self.available.wait(&mut events);
        }
    }

    /// Like [`wait_event`](Self::wait_event) but gives up after `timeout`.
    pub fn wait_event_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(event) = events.pop_front() {
                return Some(event);
            }
            if self.available.wait_until(&mut events, deadline).timed_out() {
                return events.pop_front();
            }
        }
    }

    /// Remove the head event without blocking.
    pub fn get_event(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
