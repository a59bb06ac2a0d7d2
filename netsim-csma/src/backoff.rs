use netsim_common::Time;
use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

/// Errors from configuring a [`Backoff`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    /// The options describe no valid backoff.
    #[error("invalid backoff parameter: {0}")]
    InvalidParameter(&'static str),
}

/// Configuration of a [`Backoff`]. The defaults are those of classic shared Ethernet models.
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    /// Duration of one backoff slot.
    pub(crate) slot_time: Time,
    /// Lower bound (inclusive) of the slot draw.
    pub(crate) min_slots: u32,
    /// Upper bound (inclusive) of the slot draw, regardless of the exponent.
    pub(crate) max_slots: u32,
    /// Cap on the exponent of the contention window.
    pub(crate) ceiling: u32,
    /// Number of consecutive failed attempts after which the packet is dropped.
    pub(crate) max_retries: u32,
    /// Seed of the random slot draw.
    pub(crate) seed: u64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            slot_time: Time::from_micros(1),
            min_slots: 1,
            max_slots: 1000,
            ceiling: 10,
            max_retries: 1000,
            seed: 1,
        }
    }
}

impl BackoffOptions {
    /// Sets the duration of one backoff slot.
    pub fn slot_time(mut self, slot_time: Time) -> Self {
        self.slot_time = slot_time;
        self
    }

    /// Sets the inclusive `[min, max]` range of the slot draw.
    pub fn slots(mut self, min_slots: u32, max_slots: u32) -> Self {
        self.min_slots = min_slots;
        self.max_slots = max_slots;
        self
    }

    /// Caps the exponent of the contention window at `ceiling` retries.
    pub fn ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Sets how many consecutive busy attempts are tolerated before a packet is dropped.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Seeds the random slot draw.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Truncated binary exponential backoff.
///
/// After `r` consecutive failed attempts the wait is drawn uniformly from
/// `[min_slots, min(2^min(r, ceiling) - 1, max_slots)]` slots. When that upper bound falls below
/// `min_slots` (e.g. `r == 0` with `min_slots > 0`), it is raised to `min_slots`, so the draw
/// always returns exactly `min_slots`.
///
/// The retry counter only changes through [`Backoff::increment_retries`] and [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    slot_time: Time,
    min_slots: u32,
    max_slots: u32,
    ceiling: u32,
    max_retries: u32,
    /// Current number of consecutive retries.
    retries: u32,
    rng: StdRng,
}

impl Backoff {
    /// Validates `options` and creates a backoff with a zero retry count.
    ///
    /// The longest possible wait, `slot_time * max_slots`, must fit in a [`Time`].
    pub fn new(options: &BackoffOptions) -> Result<Self, BackoffError> {
        if options.min_slots > options.max_slots {
            return Err(BackoffError::InvalidParameter("min_slots is greater than max_slots"));
        }

        if options.slot_time.is_negative() {
            return Err(BackoffError::InvalidParameter("slot_time is negative"));
        }

        if options.slot_time.checked_mul(i64::from(options.max_slots)).is_none() {
            return Err(BackoffError::InvalidParameter("slot_time * max_slots overflows"));
        }

        Ok(Self {
            slot_time: options.slot_time,
            min_slots: options.min_slots,
            max_slots: options.max_slots,
            ceiling: options.ceiling,
            max_retries: options.max_retries,
            retries: 0,
            rng: StdRng::seed_from_u64(options.seed),
        })
    }

    /// Returns the inclusive range of slots the next draw picks from.
    pub fn slot_range(&self) -> (u32, u32) {
        let exponent = self.retries.min(self.ceiling);
        let window = 1u64.checked_shl(exponent).map_or(u64::MAX, |w| w - 1);
        let upper = window.min(u64::from(self.max_slots)) as u32;

        (self.min_slots, upper.max(self.min_slots))
    }

    /// Draws a random backoff duration for the current retry count.
    pub fn backoff_time(&mut self) -> Time {
        let (low, high) = self.slot_range();
        let slots = self.rng.gen_range(low..=high);

        tracing::trace!(retries = self.retries, low, high, slots, "drew backoff slots");

        // Bounded by slot_time * max_slots, checked in `new`.
        self.slot_time.saturating_mul(i64::from(slots))
    }

    /// Records one more failed attempt.
    #[inline]
    pub fn increment_retries(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    /// Resets the retry counter, after a successful transmission or a dropped packet.
    #[inline]
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Returns `true` once the retry count has reached the configured maximum.
    #[inline]
    pub fn max_retries_reached(&self) -> bool {
        self.retries >= self.max_retries
    }

    /// Consecutive failed attempts so far.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Duration of one slot.
    #[inline]
    pub fn slot_time(&self) -> Time {
        self.slot_time
    }

    /// Reseeds the slot draw with an independent stream.
    pub fn assign_stream(&mut self, stream: u64) {
        self.rng = StdRng::seed_from_u64(stream);
    }
}
