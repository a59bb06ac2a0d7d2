use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::time::Time;

/// Errors from parsing a [`DataRate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataRateError {
    /// The string is not a number followed by a unit.
    #[error("invalid data rate {0:?}: expected a number followed by a unit such as `10Mbps`")]
    Malformed(String),
    /// The unit is not one of the known bit rate units.
    #[error("unknown data rate unit {0:?}")]
    UnknownUnit(String),
    /// The rate parsed to zero bits per second.
    #[error("data rate must be greater than zero")]
    Zero,
}

/// A link data rate, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate {
    bps: u64,
}

impl DataRate {
    /// A rate of `bps` bits per second.
    #[inline]
    pub const fn from_bps(bps: u64) -> Self {
        Self { bps }
    }

    /// A rate of `kbps` kilobits per second.
    #[inline]
    pub const fn from_kbps(kbps: u64) -> Self {
        Self { bps: kbps * 1_000 }
    }

    /// A rate of `mbps` megabits per second.
    #[inline]
    pub const fn from_mbps(mbps: u64) -> Self {
        Self { bps: mbps * 1_000_000 }
    }

    /// A rate of `gbps` gigabits per second.
    #[inline]
    pub const fn from_gbps(gbps: u64) -> Self {
        Self { bps: gbps * 1_000_000_000 }
    }

    /// Bits per second.
    #[inline]
    pub const fn bps(&self) -> u64 {
        self.bps
    }

    /// Returns the time it takes to serialize `bytes` onto a link running at this rate.
    ///
    /// A zero rate never finishes transmitting, which is represented by [`Time::MAX`].
    pub fn tx_time(&self, bytes: usize) -> Time {
        if self.bps == 0 {
            return Time::MAX;
        }

        let bits = bytes as u128 * 8;
        let nanos = bits * 1_000_000_000 / self.bps as u128;
        Time::from_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

impl Default for DataRate {
    /// 10 Mbit/s, classic shared Ethernet.
    fn default() -> Self {
        Self::from_mbps(10)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.bps)
    }
}

impl FromStr for DataRate {
    type Err = DataRateError;

    /// Parses rates like `"10Mbps"`, `"1.5Gb/s"`, `"64kbps"` or `"9600bps"`.
    ///
    /// Unit prefixes are decimal (`k` = 10^3) and `B` suffixes are bytes per second.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| DataRateError::Malformed(s.to_owned()))?;
        let (value, unit) = s.split_at(split);

        let value: f64 = value.parse().map_err(|_| DataRateError::Malformed(s.to_owned()))?;

        let multiplier = match unit.trim() {
            "bps" | "b/s" => 1.0,
            "Bps" | "B/s" => 8.0,
            "kbps" | "kb/s" | "Kbps" | "Kb/s" => 1e3,
            "kBps" | "kB/s" | "KBps" | "KB/s" => 8e3,
            "Mbps" | "Mb/s" => 1e6,
            "MBps" | "MB/s" => 8e6,
            "Gbps" | "Gb/s" => 1e9,
            "GBps" | "GB/s" => 8e9,
            other => return Err(DataRateError::UnknownUnit(other.to_owned())),
        };

        let bps = (value * multiplier).round() as u64;
        if bps == 0 {
            return Err(DataRateError::Zero);
        }

        Ok(Self::from_bps(bps))
    }
}
