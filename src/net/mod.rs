//! Network-side types
//!
//! Packet buffers, MAC addresses and the smoltcp device adapter.

pub mod device;
pub mod ethernet;
pub mod skbuff;

pub use device::{FrameQueue, Nx2Device};
pub use ethernet::MacAddress;
pub use skbuff::SkBuff;
