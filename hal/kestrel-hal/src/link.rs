//! Byte-stream transport abstractions
//!
//! A link is anything that moves bytes: a UART, a socket, a simulated
//! channel. The protocol layer only ever sees these traits.

use crate::error::ErrorCode;

/// Transmit half of a link
pub trait LinkTx {
    /// Queue `bytes` for transmission
    ///
    /// With `wait_until_done` set, blocks until the last byte has left the
    /// transmitter. Otherwise the bytes may still be buffered on return.
    fn transmit_bytes(&mut self, bytes: &[u8], wait_until_done: bool) -> Result<(), ErrorCode>;

    /// Block until everything queued so far has been sent
    fn flush(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }
}

/// Receive half of a link
pub trait LinkRx {
    /// Number of received bytes waiting to be read
    fn received_bytes_count(&self) -> usize;

    /// Read exactly `out.len()` received bytes
    ///
    /// Fails with [`ErrorCode::ParameterInvalid`] if fewer bytes are
    /// waiting than requested; nothing is consumed in that case.
    fn receive_bytes(&mut self, out: &mut [u8]) -> Result<(), ErrorCode>;

    /// Read whatever is waiting, up to `out.len()` bytes
    ///
    /// Returns the number of bytes copied.
    fn receive_available(&mut self, out: &mut [u8]) -> Result<usize, ErrorCode> {
        let n = self.received_bytes_count().min(out.len());
        if n == 0 {
            return Ok(0);
        }
        self.receive_bytes(&mut out[..n])?;
        Ok(n)
    }
}

/// Combined link interface
///
/// For transports that provide both directions on one object.
pub trait ComLink: LinkTx + LinkRx {}

// Blanket implementation
impl<T: LinkTx + LinkRx> ComLink for T {}

impl<T: LinkTx + ?Sized> LinkTx for &mut T {
    fn transmit_bytes(&mut self, bytes: &[u8], wait_until_done: bool) -> Result<(), ErrorCode> {
        (**self).transmit_bytes(bytes, wait_until_done)
    }

    fn flush(&mut self) -> Result<(), ErrorCode> {
        (**self).flush()
    }
}

impl<T: LinkRx + ?Sized> LinkRx for &mut T {
    fn received_bytes_count(&self) -> usize {
        (**self).received_bytes_count()
    }

    fn receive_bytes(&mut self, out: &mut [u8]) -> Result<(), ErrorCode> {
        (**self).receive_bytes(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed script of incoming bytes
    struct Script {
        data: [u8; 8],
        pos: usize,
    }

    impl LinkRx for Script {
        fn received_bytes_count(&self) -> usize {
            self.data.len() - self.pos
        }

        fn receive_bytes(&mut self, out: &mut [u8]) -> Result<(), ErrorCode> {
            if out.len() > self.received_bytes_count() {
                return Err(ErrorCode::ParameterInvalid);
            }
            out.copy_from_slice(&self.data[self.pos..self.pos + out.len()]);
            self.pos += out.len();
            Ok(())
        }
    }

    #[test]
    fn test_receive_available_caps_at_waiting_bytes() {
        let mut script = Script {
            data: [1, 2, 3, 4, 5, 6, 7, 8],
            pos: 5,
        };
        let mut buf = [0u8; 16];
        let n = script.receive_available(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[6, 7, 8]);
        assert_eq!(script.received_bytes_count(), 0);
    }

    #[test]
    fn test_receive_available_empty() {
        let mut script = Script {
            data: [0; 8],
            pos: 8,
        };
        let mut buf = [0u8; 4];
        assert_eq!(script.receive_available(&mut buf), Ok(0));
    }

    #[test]
    fn test_receive_bytes_short_read_rejected() {
        let mut script = Script {
            data: [0; 8],
            pos: 6,
        };
        let mut buf = [0u8; 4];
        assert_eq!(
            script.receive_bytes(&mut buf),
            Err(ErrorCode::ParameterInvalid)
        );
        assert_eq!(script.received_bytes_count(), 2);
    }
}
