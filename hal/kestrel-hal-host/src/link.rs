//! In-memory byte link
//!
//! Two [`MemoryLink`] ends share a pair of byte queues: whatever one end
//! transmits, the other receives. Used to stand in for a UART in tests and
//! in the simulator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kestrel_hal::{ErrorCode, LinkRx, LinkTx};

/// Default per-direction capacity in bytes
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Pipe {
    bytes: Mutex<VecDeque<u8>>,
    capacity: usize,
}

impl Pipe {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bytes: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One end of an in-memory duplex link
#[derive(Debug, Clone)]
pub struct MemoryLink {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    connected: Arc<AtomicBool>,
}

impl MemoryLink {
    /// Create two connected ends with the default capacity
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create two connected ends, each direction holding up to `capacity` bytes
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let a_to_b = Pipe::new(capacity);
        let b_to_a = Pipe::new(capacity);
        let connected = Arc::new(AtomicBool::new(true));

        let a = Self {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
            connected: connected.clone(),
        };
        let b = Self {
            rx: a_to_b,
            tx: b_to_a,
            connected,
        };
        (a, b)
    }

    /// Create a single end whose transmissions come back to itself
    pub fn loopback() -> Self {
        let pipe = Pipe::new(DEFAULT_CAPACITY);
        Self {
            rx: pipe.clone(),
            tx: pipe,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate unplugging (or re-plugging) the cable for both ends
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Take every byte currently waiting on this end
    pub fn drain_received(&mut self) -> Vec<u8> {
        self.rx.lock().drain(..).collect()
    }

    fn check_connected(&self) -> Result<(), ErrorCode> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ErrorCode::Communication)
        }
    }
}

impl LinkTx for MemoryLink {
    fn transmit_bytes(&mut self, bytes: &[u8], _wait_until_done: bool) -> Result<(), ErrorCode> {
        self.check_connected()?;

        let mut queue = self.tx.lock();
        if queue.len() + bytes.len() > self.tx.capacity {
            #[cfg(feature = "log")]
            log::warn!(
                "memory link full: {} queued, {} more rejected",
                queue.len(),
                bytes.len()
            );
            return Err(ErrorCode::BufferFull);
        }
        queue.extend(bytes.iter().copied());

        #[cfg(feature = "log")]
        log::trace!("memory link TX {} bytes", bytes.len());
        Ok(())
    }
}

impl LinkRx for MemoryLink {
    fn received_bytes_count(&self) -> usize {
        self.rx.lock().len()
    }

    fn receive_bytes(&mut self, out: &mut [u8]) -> Result<(), ErrorCode> {
        self.check_connected()?;

        let mut queue = self.rx.lock();
        let count = out.len();
        if count > queue.len() {
            return Err(ErrorCode::ParameterInvalid);
        }
        for (slot, byte) in out.iter_mut().zip(queue.drain(..count)) {
            *slot = byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_bytes_across() {
        let (mut a, mut b) = MemoryLink::pair();
        a.transmit_bytes(b"PING", true).unwrap();

        assert_eq!(b.received_bytes_count(), 4);
        assert_eq!(a.received_bytes_count(), 0);

        let mut buf = [0u8; 4];
        b.receive_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"PING");
        assert_eq!(b.received_bytes_count(), 0);
    }

    #[test]
    fn test_partial_reads_keep_order() {
        let (mut a, mut b) = MemoryLink::pair();
        a.transmit_bytes(&[1, 2, 3, 4, 5], false).unwrap();

        let mut first = [0u8; 2];
        b.receive_bytes(&mut first).unwrap();
        let mut rest = [0u8; 3];
        b.receive_bytes(&mut rest).unwrap();
        assert_eq!(first, [1, 2]);
        assert_eq!(rest, [3, 4, 5]);
    }

    #[test]
    fn test_receive_more_than_available_fails_without_consuming() {
        let (mut a, mut b) = MemoryLink::pair();
        a.transmit_bytes(&[1, 2], false).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(b.receive_bytes(&mut buf), Err(ErrorCode::ParameterInvalid));
        assert_eq!(b.received_bytes_count(), 2);
    }

    #[test]
    fn test_capacity_limit() {
        let (mut a, _b) = MemoryLink::pair_with_capacity(4);
        a.transmit_bytes(&[0; 3], false).unwrap();
        assert_eq!(a.transmit_bytes(&[0; 2], false), Err(ErrorCode::BufferFull));
        a.transmit_bytes(&[0; 1], false).unwrap();
    }

    #[test]
    fn test_disconnected_link_reports_communication_error() {
        let (mut a, b) = MemoryLink::pair();
        b.set_connected(false);
        assert_eq!(a.transmit_bytes(&[1], false), Err(ErrorCode::Communication));
        b.set_connected(true);
        assert!(a.transmit_bytes(&[1], false).is_ok());
    }

    #[test]
    fn test_loopback() {
        let mut link = MemoryLink::loopback();
        link.transmit_bytes(&[9, 8, 7], false).unwrap();
        assert_eq!(link.drain_received(), vec![9, 8, 7]);
    }
}
