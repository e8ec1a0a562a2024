//! Byte-stream protocol driver
//!
//! [`ComProtocol`] owns a link and the outermost frame handler. Each
//! [`ComProtocol::poll`] drains the link into a receive buffer, lets the
//! handler recognize frames at the front of it, transmits any responses, and
//! discards the bytes each verdict says to discard. Whatever is left is an
//! incomplete frame kept for the next poll.

use kestrel_core::ByteArray;
use kestrel_hal::{ComLink, ErrorCode};

use crate::frame::{Frame, FrameBuffer};
use crate::handler::{FrameHandler, ParseStatus};

/// Bytes moved from the link per receive call
const RX_CHUNK: usize = 64;

/// Counters since the protocol was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProtocolStats {
    pub bytes_received: u32,
    pub frames_found: u32,
    pub frames_invalid: u32,
    pub frames_unsupported: u32,
    /// Bytes dropped because a frame could not fit in the receive buffer
    pub overflows: u32,
    pub frames_sent: u32,
    pub transmit_errors: u32,
}

/// What one poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollSummary {
    pub bytes_received: usize,
    pub found: u32,
    pub invalid: u32,
    pub unsupported: u32,
    pub responses_sent: u32,
}

impl PollSummary {
    /// Check if the poll handled or discarded anything
    pub fn is_idle(&self) -> bool {
        self.found == 0 && self.invalid == 0 && self.unsupported == 0
    }
}

/// Protocol driver over link `L` with outermost handler `H`
///
/// `RX` is the receive buffer size, and the handler is told so: a frame
/// whose header announces more than `RX` bytes is rejected from the header.
/// For frames without a length header, when the buffer is full and still
/// mid-frame the oldest byte is dropped so the stream can resynchronize.
pub struct ComProtocol<L, H, const RX: usize> {
    link: L,
    handler: H,
    rx: ByteArray<RX>,
    tx: FrameBuffer,
    scratch: FrameBuffer,
    stats: ProtocolStats,
}

impl<L: ComLink, H: FrameHandler, const RX: usize> ComProtocol<L, H, RX> {
    pub fn new(link: L, mut handler: H) -> Self {
        handler.limit_frame_len(RX);
        Self {
            link,
            handler,
            rx: ByteArray::new(),
            tx: FrameBuffer::new(),
            scratch: FrameBuffer::new(),
            stats: ProtocolStats::default(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn stats(&self) -> ProtocolStats {
        self.stats
    }

    /// Bytes received but not yet part of a complete frame
    pub fn pending(&self) -> &[u8] {
        self.rx.as_slice()
    }

    /// Give up on any partially received frame
    pub fn reset(&mut self) {
        self.rx.clear();
    }

    /// Receive everything available and handle every complete frame
    pub fn poll(&mut self) -> Result<PollSummary, ErrorCode> {
        let mut summary = PollSummary::default();
        loop {
            let received = self.fill()?;
            summary.bytes_received += received;
            self.parse_buffered(&mut summary);
            if received == 0 || self.link.received_bytes_count() == 0 {
                break;
            }
        }
        Ok(summary)
    }

    /// Move bytes from the link into the receive buffer until either runs dry
    fn fill(&mut self) -> Result<usize, ErrorCode> {
        let mut total = 0;
        let mut chunk = [0u8; RX_CHUNK];
        loop {
            let count = self
                .link
                .received_bytes_count()
                .min(self.rx.free())
                .min(RX_CHUNK);
            if count == 0 {
                break;
            }
            self.link.receive_bytes(&mut chunk[..count])?;
            self.rx.append(&chunk[..count])?;
            total += count;
        }
        self.stats.bytes_received = self.stats.bytes_received.wrapping_add(total as u32);
        Ok(total)
    }

    /// Run parse passes until the buffer is empty or mid-frame
    fn parse_buffered(&mut self, summary: &mut PollSummary) {
        while !self.rx.is_empty() {
            self.tx.clear();
            let result = self.handler.parse_frame(self.rx.as_slice(), &mut self.tx);

            match result.status {
                ParseStatus::FoundFrame => {
                    self.stats.frames_found = self.stats.frames_found.wrapping_add(1);
                    summary.found += 1;
                    if !self.tx.is_empty() && self.transmit_tx() {
                        summary.responses_sent += 1;
                    }
                }
                ParseStatus::MidFrame => {
                    if !self.rx.is_full() {
                        break;
                    }
                    warn!("receive buffer full mid-frame, dropping a byte");
                    self.stats.overflows = self.stats.overflows.wrapping_add(1);
                    self.rx.consume(1);
                    continue;
                }
                ParseStatus::InvalidFrame => {
                    self.stats.frames_invalid = self.stats.frames_invalid.wrapping_add(1);
                    summary.invalid += 1;
                    debug!("invalid frame, discarding {} bytes", result.consumed);
                }
                ParseStatus::UnsupportedFrame => {
                    self.stats.frames_unsupported = self.stats.frames_unsupported.wrapping_add(1);
                    summary.unsupported += 1;
                }
            }

            // Every verdict except mid-frame must make progress
            self.rx.consume(result.consumed.max(1));
        }
    }

    fn transmit_tx(&mut self) -> bool {
        match self.link.transmit_bytes(self.tx.as_slice(), false) {
            Ok(()) => {
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                true
            }
            Err(err) => {
                warn!("response transmit failed: {}", err.as_str());
                self.stats.transmit_errors = self.stats.transmit_errors.wrapping_add(1);
                false
            }
        }
    }

    /// Transmit an unsolicited frame through the outermost layer
    ///
    /// The packet layer, for one, wraps the frame in a packet with the next
    /// sequence number. Waits for the link to finish sending.
    pub fn send<F: Frame + ?Sized>(&mut self, frame: &F) -> Result<(), ErrorCode> {
        self.scratch.clear();
        frame.encode(&mut self.scratch)?;

        self.tx.clear();
        self.handler
            .frame_outgoing(self.scratch.as_slice(), &mut self.tx)?;

        match self.link.transmit_bytes(self.tx.as_slice(), true) {
            Ok(()) => {
                self.stats.frames_sent = self.stats.frames_sent.wrapping_add(1);
                Ok(())
            }
            Err(err) => {
                self.stats.transmit_errors = self.stats.transmit_errors.wrapping_add(1);
                Err(err)
            }
        }
    }
}
