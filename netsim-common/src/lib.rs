//! Value types shared by the netsim crates: virtual [`Time`], link [`DataRate`]s,
//! [`MacAddress`]es and [`Packet`]s.
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod address;
pub use address::MacAddress;

mod packet;
pub use packet::Packet;

mod rate;
pub use rate::{DataRate, DataRateError};

mod time;
pub use time::Time;

/// Sizes and link-layer constants.
#[allow(non_upper_case_globals)]
pub mod constants {
    /// 1024 bytes.
    pub const KiB: u32 = 1024;
    /// 1024 KiB.
    pub const MiB: u32 = 1024 * KiB;
    /// 1024 MiB.
    pub const GiB: u32 = 1024 * MiB;

    /// Default Ethernet MTU, in bytes.
    pub const MTU_ETHERNET: usize = 1500;
    /// Ethernet interframe gap: 96 bit times.
    pub const INTERFRAME_GAP_BYTES: usize = 96 / 8;
}
