use std::{cmp::Reverse, collections::BinaryHeap, fmt};

use netsim_common::Time;
use rustc_hash::FxHashSet;

use crate::{
    event::{Callback, EventId, EventResult, ScheduledEvent, NO_CONTEXT},
    Result, SchedulerError, SimError,
};

/// The discrete-event scheduler.
///
/// A [`Simulator`] owns the virtual clock and the queue of pending events. Events fire in
/// non-decreasing time order, and events scheduled for the same instant fire in the order they
/// were inserted, which makes every run of the same program reproducible.
///
/// Execution is single threaded and cooperative: [`Simulator::run`] pops one event at a time and
/// hands the callback a `&mut Simulator`, so callbacks schedule follow-up events reentrantly.
/// "Waiting" is always expressed as scheduling a future event.
///
/// Cancellation is lazy: a cancelled event stays in the queue and is skipped when popped.
///
/// # Example
///
/// ```
/// use netsim_core::{Simulator, Time};
///
/// let mut sim = Simulator::new();
/// sim.schedule(Time::from_micros(10), |sim| {
///     assert_eq!(sim.now(), Time::from_micros(10));
///     Ok(())
/// })
/// .unwrap();
///
/// sim.run().unwrap();
/// ```
pub struct Simulator {
    /// The virtual clock. Only advanced by [`Simulator::run`].
    now: Time,
    /// Context of the event currently being executed.
    context: u32,
    /// Next insertion sequence number, doubling as event uid.
    next_uid: u64,
    queue: BinaryHeap<Reverse<ScheduledEvent>>,
    /// Uids of events (including destroy events) that have neither fired nor been cancelled.
    live: FxHashSet<u64>,
    destroy_events: Vec<(EventId, Callback)>,
    stopped: bool,
    destroyed: bool,
    /// Number of callbacks executed so far.
    executed: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.now)
            .field("context", &self.context)
            .field("pending", &self.pending_events())
            .field("executed", &self.executed)
            .field("stopped", &self.stopped)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl Simulator {
    /// Creates a simulator at [`Time::ZERO`] with an empty queue.
    pub fn new() -> Self {
        Self {
            now: Time::ZERO,
            context: NO_CONTEXT,
            next_uid: 0,
            queue: BinaryHeap::new(),
            live: FxHashSet::default(),
            destroy_events: Vec::new(),
            stopped: false,
            destroyed: false,
            executed: 0,
        }
    }

    /// Returns the current virtual time.
    #[inline]
    pub fn now(&self) -> Time {
        self.now
    }

    /// Returns the context of the event currently executing, or [`NO_CONTEXT`] outside of one.
    #[inline]
    pub fn context(&self) -> u32 {
        self.context
    }

    /// Schedules `f` to run `delay` after the current time, in the current context.
    pub fn schedule<F>(&mut self, delay: Time, f: F) -> Result<EventId, SchedulerError>
    where
        F: FnOnce(&mut Self) -> EventResult + 'static,
    {
        self.schedule_with_context(self.context, delay, f)
    }

    /// Schedules `f` to run `delay` after the current time, on behalf of `context`.
    ///
    /// Fails with [`SchedulerError::InvalidDelay`] if `delay` is negative or if the fire time
    /// does not fit in a [`Time`].
    pub fn schedule_with_context<F>(
        &mut self,
        context: u32,
        delay: Time,
        f: F,
    ) -> Result<EventId, SchedulerError>
    where
        F: FnOnce(&mut Self) -> EventResult + 'static,
    {
        let time = match self.now.checked_add(delay) {
            Some(time) if !delay.is_negative() => time,
            _ => return Err(SchedulerError::InvalidDelay(delay)),
        };

        self.insert(time, context, Box::new(f))
    }

    /// Schedules `f` at the absolute time `time`, which must not be in the past.
    pub fn schedule_at<F>(&mut self, time: Time, f: F) -> Result<EventId, SchedulerError>
    where
        F: FnOnce(&mut Self) -> EventResult + 'static,
    {
        if time < self.now {
            return Err(SchedulerError::InvalidTime { time, now: self.now });
        }

        self.insert(time, self.context, Box::new(f))
    }

    /// Schedules `f` at the current time. It runs after every event already queued for now.
    pub fn schedule_now<F>(&mut self, f: F) -> Result<EventId, SchedulerError>
    where
        F: FnOnce(&mut Self) -> EventResult + 'static,
    {
        self.schedule(Time::ZERO, f)
    }

    /// Schedules `f` to run when the simulator is destroyed, see [`Simulator::destroy`].
    pub fn schedule_destroy<F>(&mut self, f: F) -> Result<EventId, SchedulerError>
    where
        F: FnOnce(&mut Self) -> EventResult + 'static,
    {
        if self.destroyed {
            return Err(SchedulerError::Destroyed);
        }

        let id = EventId::new(self.next_uid(), Time::MAX, self.context);
        self.live.insert(id.uid());
        self.destroy_events.push((id, Box::new(f)));

        Ok(id)
    }

    fn insert(
        &mut self,
        time: Time,
        context: u32,
        callback: Callback,
    ) -> Result<EventId, SchedulerError> {
        if self.destroyed {
            return Err(SchedulerError::Destroyed);
        }

        let uid = self.next_uid();
        let event = ScheduledEvent { time, uid, context, callback };
        let id = event.id();

        tracing::trace!(uid, %time, context, "scheduled event");

        self.live.insert(uid);
        self.queue.push(Reverse(event));

        Ok(id)
    }

    fn next_uid(&mut self) -> u64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Cancels an event. The event stays queued but will be skipped when its time comes.
    ///
    /// Cancelling an event that already fired or was already cancelled is a no-op.
    pub fn cancel(&mut self, id: &EventId) {
        if self.live.remove(&id.uid()) {
            tracing::trace!(uid = id.uid(), time = %id.time(), "cancelled event");
        }
    }

    /// Alias of [`Simulator::cancel`].
    pub fn remove(&mut self, id: &EventId) {
        self.cancel(id);
    }

    /// Returns `true` if the event already fired or was cancelled.
    #[inline]
    pub fn is_expired(&self, id: &EventId) -> bool {
        !self.live.contains(&id.uid())
    }

    /// Returns how long until the event fires, or zero if it is expired.
    pub fn delay_left(&self, id: &EventId) -> Time {
        if self.is_expired(id) {
            Time::ZERO
        } else {
            id.time().saturating_sub_zero(self.now)
        }
    }

    /// Number of events waiting to fire, excluding cancelled ones and destroy events.
    pub fn pending_events(&self) -> usize {
        let destroy = self.destroy_events.iter().filter(|(id, _)| self.live.contains(&id.uid()));
        self.live.len() - destroy.count()
    }

    /// Number of callbacks executed so far.
    #[inline]
    pub fn event_count(&self) -> u64 {
        self.executed
    }

    /// Returns `true` if there is nothing left to run or the last [`Simulator::run`] was stopped.
    pub fn is_finished(&self) -> bool {
        self.stopped || self.pending_events() == 0
    }

    /// Makes [`Simulator::run`] return after the current callback completes.
    pub fn stop(&mut self) {
        tracing::debug!(now = %self.now, "stop requested");
        self.stopped = true;
    }

    /// Stops the run at the absolute time `time`.
    ///
    /// Events queued for `time` before this call still fire; nothing later does. The returned id
    /// can be cancelled to lift the horizon.
    pub fn stop_at(&mut self, time: Time) -> Result<EventId, SchedulerError> {
        self.schedule_at(time, |sim| {
            sim.stop();
            Ok(())
        })
    }

    /// Stops the run `delay` after the current time.
    pub fn stop_after(&mut self, delay: Time) -> Result<EventId, SchedulerError> {
        self.schedule_with_context(NO_CONTEXT, delay, |sim| {
            sim.stop();
            Ok(())
        })
    }

    /// Runs events until the queue is empty or the simulation is stopped.
    ///
    /// A callback returning an error is treated as fatal: the run stops immediately and the error
    /// is returned, wrapped with the time and context of the failing event. The remaining events
    /// stay queued.
    pub fn run(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(SchedulerError::Destroyed.into());
        }

        self.stopped = false;
        let _span = tracing::debug_span!("run", start = %self.now).entered();

        while !self.stopped {
            let Some(Reverse(event)) = self.queue.pop() else {
                break;
            };

            if !self.live.remove(&event.uid) {
                tracing::trace!(uid = event.uid, "skipping cancelled event");
                continue;
            }

            debug_assert!(event.time >= self.now, "event scheduled in the past");
            self.now = event.time;
            self.context = event.context;
            self.executed += 1;

            let (uid, time, context) = (event.uid, event.time, event.context);
            tracing::trace!(uid, %time, context, "firing event");

            if let Err(source) = (event.callback)(self) {
                tracing::error!(uid, %time, context, error = %source, "event failed, aborting run");
                self.context = NO_CONTEXT;
                return Err(SimError::Event { time, context, source });
            }
        }

        self.context = NO_CONTEXT;
        tracing::debug!(now = %self.now, executed = self.executed, "run finished");

        Ok(())
    }

    /// Tears the simulator down.
    ///
    /// Destroy events run first, in insertion order (they may register further destroy events).
    /// Then every pending event is discarded. Afterwards, every scheduling call and
    /// [`Simulator::run`] fail with [`SchedulerError::Destroyed`].
    ///
    /// The first error returned by a destroy event is reported once teardown has completed.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }

        let mut result = Ok(());
        while !self.destroy_events.is_empty() {
            for (id, callback) in std::mem::take(&mut self.destroy_events) {
                if !self.live.remove(&id.uid()) {
                    continue;
                }

                self.context = id.context();
                if let Err(source) = callback(self) {
                    tracing::error!(uid = id.uid(), error = %source, "destroy event failed");
                    if result.is_ok() {
                        result = Err(SimError::Event {
                            time: self.now,
                            context: id.context(),
                            source,
                        });
                    }
                }
            }
        }

        tracing::debug!(now = %self.now, discarded = self.pending_events(), "destroying simulator");

        self.context = NO_CONTEXT;
        self.queue.clear();
        self.live.clear();
        self.destroyed = true;

        result
    }

    /// Returns `true` once [`Simulator::destroy`] has been called.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
