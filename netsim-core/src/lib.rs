//! The discrete-event core of netsim: a virtual clock and an ordered queue of pending events.
//!
//! Components never wait. They schedule callbacks on the [`Simulator`], which fires them in
//! time order, breaking ties in insertion order.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use thiserror::Error;

mod event;
pub use event::{EventId, EventResult, NO_CONTEXT};

mod simulator;
pub use simulator::Simulator;

pub use netsim_common::Time;

/// Errors returned when scheduling events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The delay is negative, or the resulting fire time overflows the clock.
    #[error("invalid delay {0}: events must fire at a representable time, not in the past")]
    InvalidDelay(Time),
    /// The absolute time is before the current time.
    #[error("invalid time {time}: the current simulation time is {now}")]
    InvalidTime {
        /// The requested fire time.
        time: Time,
        /// The simulator's clock at the time of the call.
        now: Time,
    },
    /// The simulator was torn down by [`Simulator::destroy`].
    #[error("simulator destroyed")]
    Destroyed,
}

/// Errors that terminate a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    /// The run could not start or continue.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    /// An event callback returned an error.
    #[error("event at {time} (context {context}) failed: {source}")]
    Event {
        /// When the failing event fired.
        time: Time,
        /// The context it ran in.
        context: u32,
        /// The error returned by the callback.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result alias defaulting to [`SimError`].
pub type Result<T, E = SimError> = std::result::Result<T, E>;
