//! Simulated host on the far end of the link
//!
//! Decodes the device's packets with the same library the device uses and
//! steps through the configured setpoints.

use kestrel_hal::{ErrorCode, LinkTx};
use kestrel_hal_host::MemoryLink;
use kestrel_protocol::packet::{PacketHeader, MAX_PACKET_PAYLOAD};
use kestrel_protocol::{BinaryMessage, Frame, FrameError, Packet};

use crate::config::ControllerSection;
use crate::node::{self, Status, GROUP_CONTROL, MSG_SETPOINT};

/// What the host has seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerStats {
    pub commands_sent: u32,
    pub acks: u32,
    pub status_reports: u32,
    pub unknown: u32,
    /// Bytes skipped while resynchronizing on a corrupt stream
    pub discarded: u32,
    /// Sequence gaps in the device's outgoing packets
    pub gaps: u32,
    pub last_status: Option<Status>,
}

pub struct Peer {
    link: MemoryLink,
    rx: Vec<u8>,
    setpoints: Vec<f32>,
    hold_ms: u32,
    next_setpoint: usize,
    last_command_ms: Option<u32>,
    next_number: u8,
    expected_number: Option<u8>,
    stats: PeerStats,
}

impl Peer {
    pub fn new(link: MemoryLink, config: &ControllerSection) -> Self {
        Self {
            link,
            rx: Vec::new(),
            setpoints: config.setpoints.clone(),
            hold_ms: config.setpoint_hold_ms,
            next_setpoint: 0,
            last_command_ms: None,
            next_number: 0,
            expected_number: None,
            stats: PeerStats::default(),
        }
    }

    pub fn stats(&self) -> PeerStats {
        self.stats
    }

    /// Read everything the device sent, then command if one is due
    pub fn step(&mut self, now_ms: u32) -> Result<(), ErrorCode> {
        self.receive();
        let due = match self.last_command_ms {
            None => true,
            Some(last) => now_ms.wrapping_sub(last) >= self.hold_ms,
        };
        if due && !self.setpoints.is_empty() {
            let setpoint = self.setpoints[self.next_setpoint % self.setpoints.len()];
            self.send_setpoint(setpoint)?;
            self.next_setpoint += 1;
            self.last_command_ms = Some(now_ms);
        }
        Ok(())
    }

    fn send_setpoint(&mut self, setpoint: f32) -> Result<(), ErrorCode> {
        let message = node::setpoint_message(setpoint)?;
        let payload = message.to_buffer()?;
        let packet = Packet::new(self.next_number, &payload)?;
        self.link.transmit_bytes(&packet.to_buffer()?, true)?;
        self.next_number = self.next_number.wrapping_add(1);
        self.stats.commands_sent += 1;
        log::debug!("host sent setpoint {setpoint}");
        Ok(())
    }

    fn receive(&mut self) {
        self.rx.extend(self.link.drain_received());
        let mut offset = 0;
        while offset < self.rx.len() {
            let bytes = &self.rx[offset..];
            if PacketHeader::read(bytes)
                .is_some_and(|h| h.data_byte_count as usize > MAX_PACKET_PAYLOAD)
            {
                offset += 1;
                self.stats.discarded += 1;
                continue;
            }
            match Packet::decode(bytes) {
                Ok((packet, used)) => {
                    let number = packet.number();
                    let message = BinaryMessage::decode(packet.payload());
                    offset += used;
                    self.track_sequence(number);
                    match message {
                        Ok(message) => self.handle(&message),
                        Err(_) => self.stats.unknown += 1,
                    }
                }
                Err(FrameError::Incomplete) => break,
                Err(_) => {
                    offset += 1;
                    self.stats.discarded += 1;
                }
            }
        }
        self.rx.drain(..offset);
    }

    fn track_sequence(&mut self, number: u8) {
        if let Some(expected) = self.expected_number {
            if number != expected {
                self.stats.gaps += 1;
            }
        }
        self.expected_number = Some(number.wrapping_add(1));
    }

    fn handle(&mut self, message: &BinaryMessage) {
        if message.is(GROUP_CONTROL, MSG_SETPOINT) {
            self.stats.acks += 1;
        } else if let Some(status) = Status::from_message(message) {
            self.stats.status_reports += 1;
            self.stats.last_status = Some(status);
        } else {
            self.stats.unknown += 1;
        }
    }
}
