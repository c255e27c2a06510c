//! Intra-worker events handed between computation and communication threads.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Kind of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A plain value produced inside the worker
    LocalEvent,
    /// A point-to-point message addressed to this worker
    MessageEvent,
    /// Signals progress of a collective operation
    CollectiveEvent,
}

/// Opaque event payload.
pub type EventBody = Arc<dyn Any + Send + Sync>;

/// A signal passed through an [`EventQueue`](crate::event_queue::EventQueue).
///
/// Events never leave the process, so the body is an arbitrary shared value
/// rather than an encoded buffer.
#[derive(Clone)]
pub struct Event {
    pub event_type: EventType,
    pub op_name: String,
    pub partition_id: i32,
    pub body_len: usize,
    pub body: Option<EventBody>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        op_name: impl Into<String>,
        partition_id: i32,
        body_len: usize,
        body: Option<EventBody>,
    ) -> Self {
        Self {
            event_type,
            op_name: op_name.into(),
            partition_id,
            body_len,
            body,
        }
    }

    /// An event without a body.
    pub fn signal(event_type: EventType, op_name: impl Into<String>, partition_id: i32) -> Self {
        Self::new(event_type, op_name, partition_id, 0, None)
    }

    /// The body downcast to `T`, if present and of that type.
    pub fn body_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.body.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("op_name", &self.op_name)
            .field("partition_id", &self.partition_id)
            .field("body_len", &self.body_len)
            .field("body", &self.body.as_ref().map(|_| "<body>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_downcast() {
        let body: EventBody = Arc::new(vec![1.0f64, 2.0]);
        let event = Event::new(EventType::MessageEvent, "grad", 3, 2, Some(body));
        assert_eq!(event.body_as::<Vec<f64>>().unwrap(), &vec![1.0, 2.0]);
        assert!(event.body_as::<String>().is_none());

        let signal = Event::signal(EventType::LocalEvent, "tick", 0);
        assert!(signal.body_as::<Vec<f64>>().is_none());
        assert_eq!(signal.body_len, 0);
    }
}
