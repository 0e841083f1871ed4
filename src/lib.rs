//! Broadcom NetXtreme II (bnx2 family) Gigabit Ethernet driver core
//!
//! The crate is `no_std` with `alloc`. The host provides the register
//! mapping, PCI configuration access, coherent DMA memory and a microsecond
//! clock through the traits in [`drivers`]; the controller lives in
//! [`drivers::net::ethernet::broadcom::nx2`].
//!
//! Unit tests build against `std` and run on the development host.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod net;
