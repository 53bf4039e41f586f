//! # XVC Protocol Library
//!
//! Implementation of the [Xilinx Virtual Cable (XVC)](https://github.com/Xilinx/XilinxVirtualCable)
//! 1.0 wire protocol: the three commands a client may issue (`getinfo:`,
//! `settck:` and `shift:`), the server capability banner, and the JTAG TAP
//! controller state table that both the server session and the shift engine
//! track.
//!
//! ## Message Format
//!
//! Every command is an ASCII prefix followed by a binary payload:
//!
//! - **GetInfo**: `getinfo:`
//! - **SetTck**: `settck:<period in ns: u32 LE>`
//! - **Shift**: `shift:<num_bits: u32 LE><TMS vector><TDI vector>`
//! - **Server banner**: `xvcServer_v{version}:<max vector bytes>\n`
//!
//! TMS/TDI/TDO vectors are LSB-first bit vectors stored in `⌈num_bits / 8⌉`
//! bytes: bit *i* of a vector is `byte[i / 8] >> (i % 8) & 1`.
//!
//! ## Usage
//!
//! ```
//! use xvc_protocol::Message;
//!
//! let mut out = Vec::new();
//! Message::GetInfo.write_to(&mut out).expect("writing to a vector cannot fail");
//! assert_eq!(out, b"getinfo:");
//! ```
//!
//! Parse errors are reported through [`error::ProtocolError`].

pub mod codec;
pub mod error;
pub mod protocol;
pub mod tap;

pub use protocol::*;
pub use tap::TapState;
