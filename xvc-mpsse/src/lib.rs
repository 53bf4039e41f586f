//! # MPSSE JTAG Shift Engine
//!
//! Drives FT2232H-based JTAG adapters (such as the Digilent HS2) through the
//! chip's Multi-Protocol Synchronous Serial Engine, translating XVC-style
//! shift requests — a TMS vector, a TDI vector and a bit count — into a
//! stream of MPSSE opcodes while collecting the TDO bits the chip clocks
//! back.
//!
//! ## Architecture
//!
//! - [`engine::Mpsse`] is the scan planner. It walks a request bit by bit,
//!   tracks the JTAG TAP state, partitions the stream at Shift-DR/Shift-IR
//!   boundaries and chooses between TMS-clocking and data-clocking opcodes.
//! - [`buffer::CommandBuffer`] batches opcodes into large USB writes and
//!   keeps a FIFO of *read observers* describing where every expected
//!   response byte lands in the caller's TDO vector.
//! - [`bits`] holds the LSB-first bit scatter/gather primitives the
//!   observers use.
//! - [`transport::Hs2Transport`] is the D2XX-backed byte endpoint;
//!   [`sim::SimulatedChip`] is a software model of the MPSSE used by the
//!   test suites.
//!
//! The planner and buffer are generic over [`MpsseIo`], so every code path
//! above the USB boundary runs identically against hardware and the
//! simulator.

pub mod bits;
pub mod buffer;
pub mod engine;
pub mod error;
pub mod opcodes;
pub mod sim;
pub mod transport;

pub use engine::Mpsse;
pub use error::MpsseError;
pub use transport::{DeviceSelector, Hs2Transport};

/// Blocking byte endpoint of an MPSSE-capable chip.
///
/// This is the narrow waist between the shift engine and the vendor driver:
/// a transmit path, a receive-queue probe and a receive path. The real
/// implementation wraps a D2XX handle; the test suites substitute
/// [`sim::SimulatedChip`].
pub trait MpsseIo {
    /// Writes the whole buffer. A short write is an error.
    fn write(&mut self, data: &[u8]) -> Result<(), MpsseError>;

    /// Number of response bytes ready to be read without blocking.
    fn rx_available(&mut self) -> Result<usize, MpsseError>;

    /// Reads up to `buf.len()` bytes, returning how many arrived.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MpsseError>;
}
