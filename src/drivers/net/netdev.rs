//! Network Device Abstraction
//!
//! Two interfaces meet here. [`NetworkDevice`] is what the host driver
//! framework calls on a controller (attach, enable/disable, output, the
//! interrupt entry point). [`NetStack`] is what the controller calls back
//! into: packet allocation and release, frame delivery, link reports and
//! "transmit capacity available" notifications.
//!
//! ## Design Philosophy
//!
//! The controller never owns the network stack. The host passes its stack by
//! `&mut` into every entry point that can produce callbacks, so the driver
//! holds no references into the host beyond the duration of one call.
//!
//! - **Packets are host objects**: anything implementing [`NetPacket`] can be
//!   posted to a ring, provided it can describe itself as DMA segments
//! - **Ownership moves through the rings**: a transmitted packet belongs to
//!   the TX ring until reclaim hands it back through
//!   [`NetStack::release_packet`]
//! - **Stalls return the packet**: a full ring gives the packet back in
//!   [`TxError::Stall`] so the caller can requeue it
//!
//! ## Current Implementations
//!
//! - `Nx2Controller` - Broadcom NetXtreme II (BCM5706/5708/5709/5716)

use crate::net::ethernet::MacAddress;
use alloc::vec::Vec;
use core::fmt;

/// Errors that can occur during network device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Hardware is not present or not responding
    HardwareNotPresent,

    /// Device is not initialized
    NotInitialized,

    /// Hardware error during operation
    HardwareError,

    /// Timeout waiting for the device or its firmware
    Timeout,

    /// Invalid configuration or parameter
    InvalidConfiguration,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::HardwareNotPresent => write!(f, "Hardware not present"),
            NetworkError::NotInitialized => write!(f, "Device not initialized"),
            NetworkError::HardwareError => write!(f, "Hardware error"),
            NetworkError::Timeout => write!(f, "Operation timeout"),
            NetworkError::InvalidConfiguration => write!(f, "Invalid configuration"),
        }
    }
}

/// Why a packet was not queued for transmission
#[derive(Debug, PartialEq, Eq)]
pub enum TxError<P> {
    /// Not enough free descriptors; the packet is handed back for a retry
    Stall(P),

    /// The packet mapped to zero DMA segments and was freed
    Dropped,

    /// The controller is not in the enabled state
    NotEnabled(P),
}

impl<P> TxError<P> {
    /// Recover the packet for requeueing, if the error kept it
    pub fn into_packet(self) -> Option<P> {
        match self {
            TxError::Stall(packet) | TxError::NotEnabled(packet) => Some(packet),
            TxError::Dropped => None,
        }
    }
}

impl<P> fmt::Display for TxError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Stall(_) => write!(f, "transmit ring full"),
            TxError::Dropped => write!(f, "packet has no DMA segments"),
            TxError::NotEnabled(_) => write!(f, "controller not enabled"),
        }
    }
}

// ============================================================================
// Packet Metadata
// ============================================================================

/// IP/TCP/UDP checksum bits, used both for transmit offload demands and
/// for receive validity results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumMask(u8);

impl ChecksumMask {
    pub const NONE: Self = Self(0);
    pub const IP: Self = Self(1 << 0);
    pub const TCP: Self = Self(1 << 1);
    pub const UDP: Self = Self(1 << 2);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for ChecksumMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for ChecksumMask {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Per-packet transmit offload requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOffload {
    /// Checksums the hardware should insert
    pub checksum: ChecksumMask,
    /// 802.1Q tag the hardware should insert
    pub vlan_tag: Option<u16>,
}

/// One device-visible, physically contiguous piece of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub bus_addr: u64,
    pub len: u32,
}

/// Host packet object as seen by the rings
pub trait NetPacket {
    /// Bytes currently in the packet
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// CPU view of the packet bytes
    fn data(&self) -> &[u8];

    /// Append at most `max_segments` device-visible segments covering the
    /// packet to `out`. Mapping may coalesce; an unmappable packet appends
    /// nothing.
    fn dma_segments(&self, max_segments: usize, out: &mut Vec<DmaSegment>);

    /// Drop `head` bytes from the front and keep `len` bytes after them.
    /// Returns false if the packet is shorter than `head + len`.
    fn trim(&mut self, head: usize, len: usize) -> bool;

    /// Offload work requested by the stack for this packet
    fn tx_offload(&self) -> TxOffload {
        TxOffload::default()
    }

    /// Checksums the hardware verified on receive
    fn set_rx_checksum(&mut self, mask: ChecksumMask);
}

// ============================================================================
// Link Reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    None,
    Speed10,
    Speed100,
    Speed1000,
}

impl LinkSpeed {
    pub const fn mbps(self) -> u32 {
        match self {
            LinkSpeed::None => 0,
            LinkSpeed::Speed10 => 10,
            LinkSpeed::Speed100 => 100,
            LinkSpeed::Speed1000 => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexMode {
    None,
    Half,
    Full,
}

/// One selectable medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Medium {
    pub index: usize,
    pub speed: LinkSpeed,
    pub duplex: DuplexMode,
}

/// Link report delivered upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// The link state is known
    pub valid: bool,
    /// Carrier is present
    pub active: bool,
    /// Negotiated medium when active
    pub medium: Option<Medium>,
}

impl LinkStatus {
    pub const fn down() -> Self {
        Self {
            valid: true,
            active: false,
            medium: None,
        }
    }

    pub const fn up(medium: Medium) -> Self {
        Self {
            valid: true,
            active: true,
            medium: Some(medium),
        }
    }
}

// ============================================================================
// Upstream Collaborator
// ============================================================================

/// Callbacks from the controller into the host network stack
pub trait NetStack {
    type Packet: NetPacket;

    /// Allocate a receive buffer of at least `size` bytes
    fn allocate_packet(&mut self, size: usize) -> Option<Self::Packet>;

    /// A transmitted packet completed and is returned to the stack
    fn release_packet(&mut self, packet: Self::Packet) {
        drop(packet);
    }

    /// Queue a received frame; delivery may be deferred until
    /// [`flush_deliveries`](Self::flush_deliveries)
    fn deliver(&mut self, packet: Self::Packet);

    /// Push queued frames up the stack
    fn flush_deliveries(&mut self) {}

    /// Link state changed
    fn link_status(&mut self, status: LinkStatus);

    /// The media this controller can report, published once at bring-up
    fn publish_media(&mut self, _media: &[Medium]) {}

    /// Transmit descriptors were freed; retry stalled output
    fn service_output(&mut self) {}
}

// ============================================================================
// Capability Interface
// ============================================================================

/// Network device abstraction trait
///
/// What the host driver framework calls on a controller.
///
/// # Thread Safety
///
/// `transmit` and `handle_interrupt` take `&self` and may be entered from
/// different execution contexts; implementations serialize shared ring state
/// internally. Lifecycle calls take `&mut self` and are exclusive.
pub trait NetworkDevice<S: NetStack> {
    /// Check if the hardware is present and accessible
    fn is_present(&self) -> bool;

    /// Bring the controller from power-on to accepting traffic
    ///
    /// # Errors
    ///
    /// - `HardwareNotPresent` - Unsupported device or silicon revision
    /// - `Timeout` - Firmware handshake or reset did not complete
    /// - `HardwareError` - Any other bring-up failure
    #[must_use = "init() failure must be handled - device may not be operational"]
    fn init(&mut self, stack: &mut S) -> Result<(), NetworkError>;

    /// Re-enable after [`disable`](Self::disable)
    #[must_use = "enable() failure must be handled - device may not be operational"]
    fn enable(&mut self, stack: &mut S) -> Result<(), NetworkError>;

    /// Stop traffic, keeping DMA allocations for a later `enable`
    fn disable(&mut self, stack: &mut S);

    /// Queue a packet for transmission
    #[must_use = "transmit() failure must be handled - frame may not have been sent"]
    fn transmit(&self, packet: S::Packet) -> Result<(), TxError<S::Packet>>;

    /// Interrupt entry point
    fn handle_interrupt(&self, stack: &mut S);

    /// Get the device's MAC address
    fn mac_address(&self) -> MacAddress;

    /// Get link status (optional, returns false by default)
    fn link_up(&self) -> bool {
        false
    }

    /// Largest frame accepted, excluding FCS
    fn max_packet_size(&self) -> usize;
}
