//! Ethernet station addresses
//!
//! The controller reads its address out of bootcode shared memory as two
//! words and programs it into the EMAC match registers the same way, so the
//! type also knows that packing.

use core::fmt;
use core::str::FromStr;

use smoltcp::wire::EthernetAddress;

/// 48-bit IEEE 802 MAC address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn broadcast() -> Self {
        Self([0xFF; 6])
    }

    pub const fn zero() -> Self {
        Self([0x00; 6])
    }

    /// Unpack the shared-memory layout: bytes 0-1 in the low half of
    /// `upper`, bytes 2-5 in `lower`, most significant first
    pub const fn from_words(upper: u32, lower: u32) -> Self {
        Self([
            (upper >> 8) as u8,
            upper as u8,
            (lower >> 24) as u8,
            (lower >> 16) as u8,
            (lower >> 8) as u8,
            lower as u8,
        ])
    }

    /// Inverse of [`MacAddress::from_words`]
    pub const fn to_words(&self) -> (u32, u32) {
        let b = &self.0;
        (
            ((b[0] as u32) << 8) | b[1] as u32,
            ((b[2] as u32) << 24) | ((b[3] as u32) << 16) | ((b[4] as u32) << 8) | b[5] as u32,
        )
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }

    /// Group bit (bit 0 of the first octet)
    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0x01) != 0
    }

    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Usable as a station address: unicast and not all zeros
    pub fn is_valid_station(&self) -> bool {
        self.is_unicast() && !self.is_zero()
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseMacError;

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected six colon-separated hex octets")
    }
}

/// "B8:27:EB:12:34:56", either case
impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or(ParseMacError)?;
            if part.len() != 2 {
                return Err(ParseMacError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseMacError)?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl From<MacAddress> for EthernetAddress {
    fn from(mac: MacAddress) -> Self {
        EthernetAddress(mac.0)
    }
}
