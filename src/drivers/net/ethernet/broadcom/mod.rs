//! Broadcom Ethernet controllers

pub mod nx2;
