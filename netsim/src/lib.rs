//! A deterministic discrete-event simulator for shared-medium (CSMA) networks.
//!
//! This crate re-exports the scheduler from [`netsim_core`], the CSMA link model from
//! [`netsim_csma`] and the shared value types from [`netsim_common`].
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use netsim_common::*;
pub use netsim_core::*;
pub use netsim_csma::*;
