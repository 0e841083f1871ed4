//! smoltcp glue for the NX2 controller
//!
//! [`FrameQueue`] is the upstream collaborator the controller calls back
//! into: it hands out receive buffers, holds delivered frames until smoltcp
//! polls for them, and keeps frames the TX ring had no room for.
//! [`Nx2Device`] pairs it with a controller and implements
//! [`smoltcp::phy::Device`].
//!
//! The host calls [`Nx2Device::service`] from its interrupt handler (or a
//! poll loop) before polling the smoltcp interface.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use smoltcp::phy::{self, Device, DeviceCapabilities, Medium as PhyMedium};
use smoltcp::time::Instant;

use crate::drivers::net::ethernet::broadcom::nx2::{ControllerState, Nx2Controller, Nx2Host};
use crate::drivers::net::netdev::{LinkStatus, Medium, NetStack, NetworkError, TxError};
use crate::net::skbuff::SkBuff;

/// Largest frame handed to smoltcp, without FCS
pub const NX2_MTU: usize = 1514;

/// Frames held back after a TX stall before new ones are dropped
const BACKLOG_LIMIT: usize = 64;

/// Upstream side of the controller, backed by heap queues
#[derive(Default)]
pub struct FrameQueue {
    staged: Vec<SkBuff>,
    received: VecDeque<SkBuff>,
    backlog: VecDeque<SkBuff>,
    link: LinkStatus,
    media: Vec<Medium>,
    output_ready: bool,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    pub fn media(&self) -> &[Medium] {
        &self.media
    }

    /// Frames delivered and flushed but not yet consumed
    pub fn pending(&self) -> usize {
        self.received.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn hold(&mut self, frame: SkBuff) {
        if self.backlog.len() < BACKLOG_LIMIT {
            self.backlog.push_back(frame);
        } else {
            log::debug!("[NX2] TX backlog full, frame dropped");
        }
    }
}

impl NetStack for FrameQueue {
    type Packet = SkBuff;

    fn allocate_packet(&mut self, size: usize) -> Option<SkBuff> {
        SkBuff::alloc(size)
            .inspect_err(|err| log::debug!("[NX2] Buffer allocation failed: {}", err))
            .ok()
    }

    fn release_packet(&mut self, _packet: SkBuff) {}

    fn deliver(&mut self, packet: SkBuff) {
        self.staged.push(packet);
    }

    fn flush_deliveries(&mut self) {
        self.received.extend(self.staged.drain(..));
    }

    fn link_status(&mut self, status: LinkStatus) {
        self.link = status;
    }

    fn publish_media(&mut self, media: &[Medium]) {
        self.media = media.to_vec();
    }

    fn service_output(&mut self) {
        self.output_ready = true;
    }
}

/// Controller plus its frame queues, ready for a smoltcp `Interface`
pub struct Nx2Device<'fw, H: Nx2Host> {
    controller: Nx2Controller<'fw, H, SkBuff>,
    queue: FrameQueue,
}

impl<'fw, H: Nx2Host> Nx2Device<'fw, H> {
    pub fn new(controller: Nx2Controller<'fw, H, SkBuff>) -> Self {
        Self {
            controller,
            queue: FrameQueue::new(),
        }
    }

    /// Bring the controller up with the queue as its upstream
    pub fn init(&mut self) -> Result<(), NetworkError> {
        self.controller.initialize(&mut self.queue).map_err(|err| {
            log::error!("[NX2] Bring-up failed: {}", err);
            NetworkError::from(err)
        })
    }

    /// Run the interrupt path, then retry frames held back by a stall
    pub fn service(&mut self) {
        self.controller.service_interrupt(&mut self.queue);
        if core::mem::take(&mut self.queue.output_ready) {
            self.drain_backlog();
        }
    }

    fn drain_backlog(&mut self) {
        while let Some(frame) = self.queue.backlog.pop_front() {
            match self.controller.send(frame) {
                Ok(()) => {}
                Err(TxError::Stall(frame)) => {
                    self.queue.backlog.push_front(frame);
                    break;
                }
                Err(TxError::Dropped) => log::debug!("[NX2] Backlogged frame dropped"),
                Err(TxError::NotEnabled(_)) => {
                    self.queue.backlog.clear();
                    break;
                }
            }
        }
    }

    pub fn controller(&self) -> &Nx2Controller<'fw, H, SkBuff> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Nx2Controller<'fw, H, SkBuff> {
        &mut self.controller
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub fn link_up(&self) -> bool {
        self.queue.link.active
    }

    /// Reset the controller for detach, freeing every buffer
    pub fn shutdown(&mut self) {
        self.queue.backlog.clear();
        self.queue.received.clear();
        self.controller.shutdown(&mut self.queue);
    }
}

impl<'fw, H: Nx2Host> Device for Nx2Device<'fw, H> {
    type RxToken<'a>
        = Nx2RxToken
    where
        Self: 'a;
    type TxToken<'a>
        = Nx2TxToken<'a, 'fw, H>
    where
        Self: 'a;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = self.queue.received.pop_front()?;
        Some((
            Nx2RxToken { frame },
            Nx2TxToken {
                controller: &self.controller,
                queue: &mut self.queue,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if self.controller.state() != ControllerState::Enabled {
            return None;
        }
        Some(Nx2TxToken {
            controller: &self.controller,
            queue: &mut self.queue,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = NX2_MTU;
        caps.medium = PhyMedium::Ethernet;
        caps
    }
}

pub struct Nx2RxToken {
    frame: SkBuff,
}

impl phy::RxToken for Nx2RxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame.data_mut())
    }
}

pub struct Nx2TxToken<'a, 'fw, H: Nx2Host> {
    controller: &'a Nx2Controller<'fw, H, SkBuff>,
    queue: &'a mut FrameQueue,
}

impl<H: Nx2Host> phy::TxToken for Nx2TxToken<'_, '_, H> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = match SkBuff::alloc(len) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("[NX2] {} byte frame not sent: {}", len, err);
                let mut scratch = vec![0u8; len];
                return f(&mut scratch);
            }
        };
        let result = f(frame.data_mut());

        // Keep ordering behind anything already waiting
        if self.queue.backlog_len() > 0 {
            self.queue.hold(frame);
            return result;
        }

        match self.controller.send(frame) {
            Ok(()) => {}
            Err(TxError::Stall(frame)) => self.queue.hold(frame),
            Err(TxError::Dropped) => log::debug!("[NX2] TX frame dropped"),
            Err(TxError::NotEnabled(_)) => log::debug!("[NX2] TX while disabled"),
        }
        result
    }
}
