//! Device drivers subsystem
//!
//! Organized by device class:
//! - `clocksource`: Microsecond clock and busy-wait delays
//! - `net`: Network device drivers
//! - `pci`: PCI configuration space access

pub mod clocksource;
pub mod net;
pub mod pci;
