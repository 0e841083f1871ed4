//! Ethernet controller drivers

pub mod broadcom;
