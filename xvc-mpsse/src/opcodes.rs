//! MPSSE opcodes used by the shift engine (FTDI AN 108).
//!
//! Data is clocked LSB-first, written on the falling TCK edge and sampled on
//! the rising edge, matching what JTAG expects from the controller side.

/// Clock up to 7 TMS bits out of byte bits 0..6, TDI held at bit 7. No read.
pub const CLK_TMS_OUT: u8 = 0x4B;
/// Same TMS layout, but TDO is sampled each clock; one response byte.
pub const CLK_TMS_OUT_READ: u8 = 0x6B;
/// Clock up to 8 TDI bits out (falling edge), sample TDO (rising edge);
/// one response byte, captured bits MSB-justified.
pub const CLK_BITS_OUT_NEG_IN_POS: u8 = 0x3B;
/// Clock whole TDI bytes out, sample TDO; response is one byte per byte.
pub const CLK_BYTES_OUT_NEG_IN_POS: u8 = 0x39;
/// Set value and direction of the low GPIO byte (TCK/TDI/TDO/TMS pins).
pub const SET_GPIO_LOW: u8 = 0x80;
/// Set the 16-bit TCK divisor.
pub const SET_TCK_DIVISOR: u8 = 0x86;
/// Run the 60 MHz core clock undivided (divide-by-5 off).
pub const DISABLE_CLK_DIVIDE_BY_5: u8 = 0x8A;
/// Disconnect the TDI→TDO loopback.
pub const LOOPBACK_OFF: u8 = 0x85;
