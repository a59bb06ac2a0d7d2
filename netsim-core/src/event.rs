use std::{cmp::Ordering, fmt};

use netsim_common::Time;

use crate::Simulator;

/// Context value of events that do not belong to any node or device.
pub const NO_CONTEXT: u32 = u32::MAX;

/// The result of an event callback. Returning an error aborts [`Simulator::run`].
pub type EventResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A deferred invocation owned by the scheduler.
pub(crate) type Callback = Box<dyn FnOnce(&mut Simulator) -> EventResult>;

/// Opaque handle to a scheduled event.
///
/// Handles are cheap to copy. They can be used to cancel the event or to check whether it
/// already fired, but never give access to the event itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    uid: u64,
    time: Time,
    context: u32,
}

impl EventId {
    pub(crate) const fn new(uid: u64, time: Time, context: u32) -> Self {
        Self { uid, time, context }
    }

    /// Insertion sequence number of the event. Unique for the lifetime of a simulator.
    #[inline]
    pub const fn uid(&self) -> u64 {
        self.uid
    }

    /// Absolute time at which the event fires. Destroy events report [`Time::MAX`].
    #[inline]
    pub const fn time(&self) -> Time {
        self.time
    }

    /// The node or device the event runs on behalf of, or [`NO_CONTEXT`](crate::NO_CONTEXT).
    #[inline]
    pub const fn context(&self) -> u32 {
        self.context
    }
}

/// An entry in the pending-event queue, ordered by `(time, uid)`.
pub(crate) struct ScheduledEvent {
    pub(crate) time: Time,
    pub(crate) uid: u64,
    pub(crate) context: u32,
    pub(crate) callback: Callback,
}

impl ScheduledEvent {
    #[inline]
    pub(crate) fn id(&self) -> EventId {
        EventId::new(self.uid, self.time, self.context)
    }
}

impl fmt::Debug for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("time", &self.time)
            .field("uid", &self.uid)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.uid == other.uid
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    // Uids are handed out in insertion order, so they break ties FIFO.
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.cmp(&other.time).then_with(|| self.uid.cmp(&other.uid))
    }
}
