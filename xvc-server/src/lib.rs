//! # XVC Server Core
//!
//! Everything between the TCP socket and the JTAG cable: the per-connection
//! protocol session, the client-IP session lock, the optional IP whitelist
//! and the single-threaded instance loop that ties them together.
//!
//! ## Architecture
//!
//! One [`server::Instance`] owns one adapter and one listening port for its
//! whole life. At most one connection at a time is promoted to the active
//! [`session::Session`]; everyone else is turned away at accept time. The
//! adapter itself is abstracted as a [`JtagCable`], so the same instance
//! loop runs against MPSSE hardware and against the software chip model the
//! tests use.
//!
//! ## Session stickiness
//!
//! A debugger that hits a breakpoint may drop its TCP connection without
//! intending to give up the adapter. When a lock timeout is configured the
//! instance remembers the client's IP for that long after disconnect and
//! only that IP may reconnect; see [`lock::ClientLock`].

pub mod lock;
pub mod server;
pub mod session;
pub mod whitelist;

pub use server::{Instance, InstanceConfig, InstanceError};
pub use session::{Session, SessionError, SessionStatus};
pub use whitelist::{Verdict, Whitelist, WhitelistMode};

/// A JTAG adapter as the server sees it.
///
/// Backends translate the two operations onto real hardware; the server
/// never looks past this trait. Errors are backend-defined and treated as
/// fatal for both the session and the adapter (the instance exits so its
/// supervisor can reopen the device).
pub trait JtagCable {
    type Error: std::error::Error + Send + 'static;

    /// Applies a TCK period in nanoseconds, returning the period actually
    /// realized. Implementations clamp out-of-range requests.
    fn set_tck_period(&mut self, period_ns: u32) -> Result<u32, Self::Error>;

    /// Clocks `nbits` TMS/TDI pairs, filling `tdo` with the bits read back.
    /// All three vectors are LSB-first and `⌈nbits / 8⌉` bytes long.
    fn scan(
        &mut self,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
        nbits: usize,
    ) -> Result<(), Self::Error>;
}
