//! Shared bus both receivers hang off.
//!
//! The physical transfer (I2C or UART) lives behind this trait. Reads are
//! non-blocking in the `nb` style: `WouldBlock` means nothing is pending.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("no acknowledge from address 0x{0:02x}")]
    Nack(u8),
    #[error("no device at address 0x{0:02x}")]
    NoDevice(u8),
    #[error("frame of {len} bytes exceeds buffer of {capacity}")]
    Overflow { len: usize, capacity: usize },
    #[error("bus fault")]
    Bus,
}

pub trait BusTransport {
    /// Address the device and wait for its acknowledge.
    fn probe(&mut self, address: u8) -> Result<(), TransportError>;

    /// Send one complete frame.
    fn write(&mut self, address: u8, frame: &[u8]) -> Result<(), TransportError>;

    /// Receive one complete frame into `buf`, returning its length.
    fn read(&mut self, address: u8, buf: &mut [u8]) -> nb::Result<usize, TransportError>;
}

impl<T: BusTransport + ?Sized> BusTransport for &mut T {
    fn probe(&mut self, address: u8) -> Result<(), TransportError> {
        (**self).probe(address)
    }

    fn write(&mut self, address: u8, frame: &[u8]) -> Result<(), TransportError> {
        (**self).write(address, frame)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> nb::Result<usize, TransportError> {
        (**self).read(address, buf)
    }
}
