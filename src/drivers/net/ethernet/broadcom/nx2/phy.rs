//! Copper PHY management
//!
//! The PHY sits behind the EMAC's MDIO master. Every access is one command
//! word in EMAC_MDIO_COMM; the MAC clears START_BUSY when the serial
//! transaction finishes and, for reads, leaves the result in the low 16 bits.
//!
//! Link state comes from the vendor auxiliary status register, which reports
//! the resolved speed and duplex as one 3-bit code.

use super::Nx2Host;
use super::mmio::DeviceRegisters;
use super::regs::*;
use crate::drivers::net::netdev::{DuplexMode, LinkSpeed, LinkStatus, Medium};
use core::fmt;

/// Default PHY address on copper boards
pub const DEFAULT_PHY_ADDR: u32 = 1;

const MDIO_POLLS: u32 = 50;
const MDIO_POLL_US: u64 = 10;
const MDIO_SETTLE_US: u64 = 5;
const RESET_POLLS: u32 = 100;
const RESET_POLL_US: u64 = 10;

// ============================================================================
// PHY Registers
// ============================================================================

pub const MII_CONTROL: u32 = 0x00;
pub const MII_CONTROL_AUTO_NEG_RESTART: u16 = 1 << 9;
pub const MII_CONTROL_AUTO_NEG_ENABLE: u16 = 1 << 12;
pub const MII_CONTROL_RESET: u16 = 1 << 15;

pub const MII_STATUS: u32 = 0x01;
pub const PHY_ID_HIGH: u32 = 0x02;
pub const PHY_ID_LOW: u32 = 0x03;

pub const AUTO_NEG_ADVERT: u32 = 0x04;
pub const AUTO_NEG_ADVERT_802_3: u16 = 1 << 0;
pub const AUTO_NEG_ADVERT_10HD: u16 = 1 << 5;
pub const AUTO_NEG_ADVERT_10FD: u16 = 1 << 6;
pub const AUTO_NEG_ADVERT_100HD: u16 = 1 << 7;
pub const AUTO_NEG_ADVERT_100FD: u16 = 1 << 8;
pub const AUTO_NEG_ADVERT_PAUSE_CAP: u16 = 1 << 10;
pub const AUTO_NEG_ADVERT_PAUSE_ASYM: u16 = 1 << 11;

pub const GIG_CONTROL: u32 = 0x09;
pub const GIG_CONTROL_ADVERT_1000HD: u16 = 1 << 8;
pub const GIG_CONTROL_ADVERT_1000FD: u16 = 1 << 9;

/// Auxiliary control shadow register
pub const AUX_CONTROL: u32 = 0x18;
/// Select the misc control shadow for read
pub const AUX_CONTROL_MISC_READ: u16 = 0x7007;
pub const AUX_CONTROL_MISC_WRITE_EN: u16 = 1 << 15;
pub const AUX_CONTROL_MISC_WIRESPEED: u16 = 1 << 4;
pub const AUX_CONTROL_MISC_AUTO_MDIX: u16 = 1 << 9;

pub const AUX_STATUS: u32 = 0x19;
pub const AUX_STATUS_LINK_UP: u16 = 1 << 2;
pub const AUX_STATUS_SPEED_MASK: u16 = 0x7 << 8;
pub const AUX_STATUS_SPEED_10HD: u16 = 0x1 << 8;
pub const AUX_STATUS_SPEED_10FD: u16 = 0x2 << 8;
pub const AUX_STATUS_SPEED_100HD: u16 = 0x3 << 8;
pub const AUX_STATUS_SPEED_100FD: u16 = 0x5 << 8;
pub const AUX_STATUS_SPEED_1000HD: u16 = 0x6 << 8;
pub const AUX_STATUS_SPEED_1000FD: u16 = 0x7 << 8;

// ============================================================================
// Media
// ============================================================================

pub const MEDIUM_INDEX_AUTO: usize = 0;
pub const MEDIUM_INDEX_10HD: usize = 1;
pub const MEDIUM_INDEX_10FD: usize = 2;
pub const MEDIUM_INDEX_100HD: usize = 3;
pub const MEDIUM_INDEX_100FD: usize = 4;
pub const MEDIUM_INDEX_1000HD: usize = 5;
pub const MEDIUM_INDEX_1000FD: usize = 6;

const fn medium(index: usize, speed: LinkSpeed, duplex: DuplexMode) -> Medium {
    Medium {
        index,
        speed,
        duplex,
    }
}

/// Every medium the controller can report, indexed by `Medium::index`
pub const MEDIA: [Medium; 7] = [
    medium(MEDIUM_INDEX_AUTO, LinkSpeed::None, DuplexMode::None),
    medium(MEDIUM_INDEX_10HD, LinkSpeed::Speed10, DuplexMode::Half),
    medium(MEDIUM_INDEX_10FD, LinkSpeed::Speed10, DuplexMode::Full),
    medium(MEDIUM_INDEX_100HD, LinkSpeed::Speed100, DuplexMode::Half),
    medium(MEDIUM_INDEX_100FD, LinkSpeed::Speed100, DuplexMode::Full),
    medium(MEDIUM_INDEX_1000HD, LinkSpeed::Speed1000, DuplexMode::Half),
    medium(MEDIUM_INDEX_1000FD, LinkSpeed::Speed1000, DuplexMode::Full),
];

/// Resolved PHY state, as last read from the auxiliary status register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyMediaState {
    pub link_up: bool,
    pub speed: LinkSpeed,
    pub duplex: DuplexMode,
    pub medium: Option<Medium>,
}

impl PhyMediaState {
    pub const fn unknown() -> Self {
        Self {
            link_up: false,
            speed: LinkSpeed::None,
            duplex: DuplexMode::None,
            medium: None,
        }
    }

    /// Decode AUX_STATUS. An unrecognized speed code is no link.
    pub fn from_aux_status(aux: u16) -> Self {
        let index = match aux & AUX_STATUS_SPEED_MASK {
            AUX_STATUS_SPEED_10HD => MEDIUM_INDEX_10HD,
            AUX_STATUS_SPEED_10FD => MEDIUM_INDEX_10FD,
            AUX_STATUS_SPEED_100HD => MEDIUM_INDEX_100HD,
            AUX_STATUS_SPEED_100FD => MEDIUM_INDEX_100FD,
            AUX_STATUS_SPEED_1000HD => MEDIUM_INDEX_1000HD,
            AUX_STATUS_SPEED_1000FD => MEDIUM_INDEX_1000FD,
            _ => return Self::unknown(),
        };
        let medium = MEDIA[index];
        Self {
            link_up: (aux & AUX_STATUS_LINK_UP) != 0,
            speed: medium.speed,
            duplex: medium.duplex,
            medium: Some(medium),
        }
    }

    /// What the upstream stack is told
    pub fn link_status(&self) -> LinkStatus {
        match (self.link_up, self.medium) {
            (true, Some(medium)) => LinkStatus::up(medium),
            _ => LinkStatus::down(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyError {
    /// MDIO transaction never completed
    MdioTimeout { reg: u32 },
    /// Control register reset bit never cleared
    ResetTimeout,
}

impl fmt::Display for PhyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhyError::MdioTimeout { reg } => write!(f, "MDIO access to register {:#x} timed out", reg),
            PhyError::ResetTimeout => write!(f, "PHY reset did not complete"),
        }
    }
}

// ============================================================================
// PHY Access
// ============================================================================

/// PHY at one MDIO address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phy {
    addr: u32,
}

impl Phy {
    pub const fn new(addr: u32) -> Self {
        Self { addr: addr & 0x1F }
    }

    pub const fn addr(&self) -> u32 {
        self.addr
    }

    fn command(&self, reg: u32) -> u32 {
        (self.addr << EMAC_MDIO_COMM_PHY_SHIFT)
            | ((reg & 0x1F) << EMAC_MDIO_COMM_REG_SHIFT)
            | EMAC_MDIO_COMM_DISEXT
            | EMAC_MDIO_COMM_START_BUSY
    }

    fn wait_idle<H: Nx2Host>(&self, regs: &DeviceRegisters<H>, reg: u32) -> Result<(), PhyError> {
        for _ in 0..MDIO_POLLS {
            regs.delay_us(MDIO_POLL_US);
            if (regs.read32(EMAC_MDIO_COMM) & EMAC_MDIO_COMM_START_BUSY) == 0 {
                regs.delay_us(MDIO_SETTLE_US);
                return Ok(());
            }
        }
        log::warn!("[NX2] PHY timeout on register {:#x}", reg);
        Err(PhyError::MdioTimeout { reg })
    }

    pub fn read<H: Nx2Host>(&self, regs: &DeviceRegisters<H>, reg: u32) -> Result<u16, PhyError> {
        regs.write32(
            EMAC_MDIO_COMM,
            self.command(reg) | EMAC_MDIO_COMM_COMMAND_READ,
        );
        self.wait_idle(regs, reg)?;
        Ok((regs.read32(EMAC_MDIO_COMM) & EMAC_MDIO_COMM_DATA) as u16)
    }

    pub fn write<H: Nx2Host>(
        &self,
        regs: &DeviceRegisters<H>,
        reg: u32,
        value: u16,
    ) -> Result<(), PhyError> {
        regs.write32(
            EMAC_MDIO_COMM,
            self.command(reg) | EMAC_MDIO_COMM_COMMAND_WRITE | value as u32,
        );
        self.wait_idle(regs, reg)
    }

    /// Read the identifier registers; returns the 32-bit PHY id
    pub fn probe<H: Nx2Host>(&self, regs: &DeviceRegisters<H>) -> Result<u32, PhyError> {
        let high = self.read(regs, PHY_ID_HIGH)?;
        let low = self.read(regs, PHY_ID_LOW)?;
        let id = ((high as u32) << 16) | low as u32;
        log::info!(
            "[NX2] PHY at {} id {:#010x} (OUI {:#08x}, model {:#04x}, rev {})",
            self.addr,
            id,
            oui(id),
            (low >> 4) & 0x3F,
            low & 0xF
        );
        Ok(id)
    }

    pub fn reset<H: Nx2Host>(&self, regs: &DeviceRegisters<H>) -> Result<(), PhyError> {
        self.write(regs, MII_CONTROL, MII_CONTROL_RESET)?;
        for _ in 0..RESET_POLLS {
            regs.delay_us(RESET_POLL_US);
            if (self.read(regs, MII_CONTROL)? & MII_CONTROL_RESET) == 0 {
                return Ok(());
            }
        }
        log::error!("[NX2] PHY reset timed out");
        Err(PhyError::ResetTimeout)
    }

    /// Enable wire-speed downshift and automatic crossover detection
    pub fn enable_auto_mdix<H: Nx2Host>(&self, regs: &DeviceRegisters<H>) -> Result<(), PhyError> {
        self.write(regs, AUX_CONTROL, AUX_CONTROL_MISC_READ)?;
        let misc = self.read(regs, AUX_CONTROL)?;
        self.write(
            regs,
            AUX_CONTROL,
            misc | AUX_CONTROL_MISC_WRITE_EN
                | AUX_CONTROL_MISC_WIRESPEED
                | AUX_CONTROL_MISC_AUTO_MDIX,
        )
    }

    /// Advertise every 10/100/1000 mode and restart negotiation
    pub fn autonegotiate<H: Nx2Host>(
        &self,
        regs: &DeviceRegisters<H>,
        pause: bool,
    ) -> Result<(), PhyError> {
        let mut advert = AUTO_NEG_ADVERT_802_3
            | AUTO_NEG_ADVERT_10HD
            | AUTO_NEG_ADVERT_10FD
            | AUTO_NEG_ADVERT_100HD
            | AUTO_NEG_ADVERT_100FD;
        if pause {
            advert |= AUTO_NEG_ADVERT_PAUSE_CAP | AUTO_NEG_ADVERT_PAUSE_ASYM;
        }
        self.write(regs, AUTO_NEG_ADVERT, advert)?;
        self.write(
            regs,
            GIG_CONTROL,
            GIG_CONTROL_ADVERT_1000HD | GIG_CONTROL_ADVERT_1000FD,
        )?;
        self.write(
            regs,
            MII_CONTROL,
            MII_CONTROL_AUTO_NEG_ENABLE | MII_CONTROL_AUTO_NEG_RESTART,
        )
    }

    pub fn media_state<H: Nx2Host>(
        &self,
        regs: &DeviceRegisters<H>,
    ) -> Result<PhyMediaState, PhyError> {
        Ok(PhyMediaState::from_aux_status(self.read(regs, AUX_STATUS)?))
    }
}

/// Organizationally unique identifier packed in the PHY id
pub fn oui(id: u32) -> u32 {
    // Bits 3-24 of the OUI, split across both registers
    ((id >> 16) << 6) | ((id >> 10) & 0x3F)
}

/// Match the EMAC port width and duplex to the negotiated link
pub fn apply_emac_mode<H: Nx2Host>(regs: &DeviceRegisters<H>, state: &PhyMediaState) {
    if !state.link_up || state.medium.is_none() {
        return;
    }

    let mut mode = regs.read32(EMAC_MODE) & !(EMAC_MODE_PORT | EMAC_MODE_HALF_DUPLEX);
    mode |= match state.speed {
        LinkSpeed::Speed1000 => EMAC_MODE_PORT_GMII,
        _ => EMAC_MODE_PORT_MII,
    };
    if state.duplex == DuplexMode::Half {
        mode |= EMAC_MODE_HALF_DUPLEX;
    }
    regs.write32(EMAC_MODE, mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::net::ethernet::broadcom::nx2::testing::MockNx2;

    fn phy_regs() -> DeviceRegisters<MockNx2> {
        DeviceRegisters::new(MockNx2::new())
    }

    #[test]
    fn test_six_link_codes_decode() {
        let cases = [
            (AUX_STATUS_SPEED_10HD, LinkSpeed::Speed10, DuplexMode::Half),
            (AUX_STATUS_SPEED_10FD, LinkSpeed::Speed10, DuplexMode::Full),
            (AUX_STATUS_SPEED_100HD, LinkSpeed::Speed100, DuplexMode::Half),
            (AUX_STATUS_SPEED_100FD, LinkSpeed::Speed100, DuplexMode::Full),
            (AUX_STATUS_SPEED_1000HD, LinkSpeed::Speed1000, DuplexMode::Half),
            (AUX_STATUS_SPEED_1000FD, LinkSpeed::Speed1000, DuplexMode::Full),
        ];
        for (code, speed, duplex) in cases {
            let state = PhyMediaState::from_aux_status(code | AUX_STATUS_LINK_UP);
            assert!(state.link_up);
            assert_eq!(state.speed, speed);
            assert_eq!(state.duplex, duplex);
            let medium = state.medium.unwrap();
            assert_eq!(MEDIA[medium.index], medium);
            assert_eq!(state.link_status(), LinkStatus::up(medium));
        }
    }

    #[test]
    fn test_other_codes_mean_no_link() {
        for code in [0x0u16, 0x4 << 8] {
            let state = PhyMediaState::from_aux_status(code | AUX_STATUS_LINK_UP);
            assert_eq!(state, PhyMediaState::unknown());
            assert_eq!(state.link_status(), LinkStatus::down());
        }
    }

    #[test]
    fn test_link_down_reports_valid_only() {
        let state = PhyMediaState::from_aux_status(AUX_STATUS_SPEED_1000FD);
        assert!(!state.link_up);
        assert_eq!(state.link_status(), LinkStatus::down());
    }

    #[test]
    fn test_mdio_read_command_word() {
        let regs = phy_regs();
        regs.host().set_phy_reg(AUX_STATUS, 0x0704);

        let phy = Phy::new(DEFAULT_PHY_ADDR);
        assert_eq!(phy.read(&regs, AUX_STATUS).unwrap(), 0x0704);

        let (command, _) = *regs.host().mdio_log().last().unwrap();
        assert_eq!(
            command & !EMAC_MDIO_COMM_DATA,
            (1 << 21) | (0x19 << 16) | EMAC_MDIO_COMM_COMMAND_READ | EMAC_MDIO_COMM_DISEXT
                | EMAC_MDIO_COMM_START_BUSY
        );
    }

    #[test]
    fn test_mdio_timeout_is_bounded() {
        let regs = phy_regs();
        regs.host().stick_bits(EMAC_MDIO_COMM, EMAC_MDIO_COMM_START_BUSY);

        let phy = Phy::new(DEFAULT_PHY_ADDR);
        assert_eq!(
            phy.read(&regs, PHY_ID_HIGH),
            Err(PhyError::MdioTimeout { reg: PHY_ID_HIGH })
        );
        assert_eq!(regs.host().elapsed_us(), MDIO_POLLS as u64 * MDIO_POLL_US);
    }

    #[test]
    fn test_reset_waits_for_self_clear() {
        let regs = phy_regs();
        let phy = Phy::new(DEFAULT_PHY_ADDR);
        phy.reset(&regs).unwrap();
        assert_eq!(regs.host().phy_reg(MII_CONTROL) & MII_CONTROL_RESET, 0);
    }

    #[test]
    fn test_auto_mdix_read_modify_write() {
        let regs = phy_regs();
        let phy = Phy::new(DEFAULT_PHY_ADDR);
        phy.enable_auto_mdix(&regs).unwrap();

        let writes: alloc::vec::Vec<u16> = regs
            .host()
            .phy_writes()
            .into_iter()
            .filter(|(reg, _)| *reg == AUX_CONTROL)
            .map(|(_, value)| value)
            .collect();
        assert_eq!(writes, alloc::vec![0x7007, 0x7007 | 0x8000 | 0x0010 | 0x0200]);
    }

    #[test]
    fn test_autonegotiate_advertises_all_modes() {
        let regs = phy_regs();
        let phy = Phy::new(DEFAULT_PHY_ADDR);
        phy.autonegotiate(&regs, false).unwrap();

        let host = regs.host();
        assert_eq!(host.phy_reg(AUTO_NEG_ADVERT), 0x01E1);
        assert_eq!(host.phy_reg(GIG_CONTROL), 0x0300);
        assert_eq!(host.phy_reg(MII_CONTROL), 0x1200);
    }

    #[test]
    fn test_emac_mode_follows_link() {
        let regs = phy_regs();
        regs.write32(EMAC_MODE, 0x8000_0000 | EMAC_MODE_PORT_MII | EMAC_MODE_HALF_DUPLEX);

        let gig = PhyMediaState::from_aux_status(AUX_STATUS_SPEED_1000FD | AUX_STATUS_LINK_UP);
        apply_emac_mode(&regs, &gig);
        assert_eq!(regs.read32(EMAC_MODE), 0x8000_0000 | EMAC_MODE_PORT_GMII);

        let half = PhyMediaState::from_aux_status(AUX_STATUS_SPEED_10HD | AUX_STATUS_LINK_UP);
        apply_emac_mode(&regs, &half);
        assert_eq!(
            regs.read32(EMAC_MODE),
            0x8000_0000 | EMAC_MODE_PORT_MII | EMAC_MODE_HALF_DUPLEX
        );

        // Link down leaves the MAC alone
        apply_emac_mode(&regs, &PhyMediaState::unknown());
        assert_eq!(
            regs.read32(EMAC_MODE),
            0x8000_0000 | EMAC_MODE_PORT_MII | EMAC_MODE_HALF_DUPLEX
        );
    }

    #[test]
    fn test_oui_extraction() {
        assert_eq!(oui(0x0020_60B0), 0x818);
        assert_eq!(oui(0x0143_BC70), 0x50EF);
    }
}
