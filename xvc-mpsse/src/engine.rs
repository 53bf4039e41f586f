//! The scan planner: turns one `(TMS, TDI, nbits)` request into MPSSE
//! opcodes and gathers the TDO bits the chip returns.
//!
//! A request is walked bit by bit while stepping the TAP state machine. The
//! walk is partitioned into maximal runs during which the TAP stays inside,
//! or outside, a Shift-DR/Shift-IR state:
//!
//! - a *non-shift run* only moves the state machine, so it is emitted as
//!   TMS-clocking opcodes that produce no response;
//! - a *shift run* clocks TDI in and TDO out. Its interior is emitted in
//!   byte mode for throughput, its unaligned edges in bit mode, and its
//!   final bit always as a TMS-read opcode, the one command that can leave
//!   the shift state and capture TDO on the same clock.

use xvc_protocol::TapState;

use crate::{
    bits,
    buffer::{CommandBuffer, ObserverKind},
    opcodes, MpsseError, MpsseIo,
};

/// TCK is derived from the 60 MHz core clock divided by two, then by the
/// programmable divisor.
pub const BASE_CLOCK_HZ: u32 = 30_000_000;
/// Fastest TCK the chip can produce (divisor 1).
pub const MAX_FREQUENCY_HZ: u32 = BASE_CLOCK_HZ;
/// Slowest TCK (divisor 0xFFFF), about 458 Hz.
pub const MIN_FREQUENCY_HZ: u32 = BASE_CLOCK_HZ / 0xFFFF + 1;

/// Response bytes the FT2232H can buffer in one round.
pub const CHIP_RX_CAPACITY: usize = 65_536;

/// One TMS opcode carries up to 7 bits, but the last position doubles as the
/// held value, so runs are packed 6 at a time.
const TMS_BITS_PER_COMMAND: usize = 6;

/// MPSSE shift engine for one adapter.
///
/// Owns the opcode buffer, the remembered TAP state and the level the TDI
/// pin was left at; the endpoint `T` is only touched during flushes.
#[derive(Debug)]
pub struct Mpsse<T> {
    io: T,
    buf: CommandBuffer,
    state: TapState,
    last_tdi: bool,
    chip_rx_cap: usize,
}

impl<T: MpsseIo> Mpsse<T> {
    /// Engine over an already configured endpoint.
    pub fn new(io: T) -> Mpsse<T> {
        Mpsse::with_chip_buffer(io, CHIP_RX_CAPACITY)
    }

    /// Engine with a non-default response-round limit. The test suites use
    /// this to prove chunking does not change results.
    pub fn with_chip_buffer(io: T, chip_rx_cap: usize) -> Mpsse<T> {
        Mpsse {
            io,
            buf: CommandBuffer::new(chip_rx_cap),
            state: TapState::TestLogicReset,
            last_tdi: false,
            chip_rx_cap,
        }
    }

    /// The TAP state after the last completed scan.
    pub fn tap_state(&self) -> TapState {
        self.state
    }

    pub fn io(&self) -> &T {
        &self.io
    }

    /// Programs the TCK divisor for the closest realizable frequency at or
    /// below `frequency_hz` and returns what was realized. Requests outside
    /// the chip's range are clamped into it.
    pub fn set_frequency(&mut self, frequency_hz: u32) -> Result<u32, MpsseError> {
        let hz = frequency_hz.clamp(1, MAX_FREQUENCY_HZ);
        let divisor = BASE_CLOCK_HZ.div_ceil(hz).clamp(1, 0xFFFF);
        let cmd = [
            opcodes::SET_TCK_DIVISOR,
            (divisor & 0xff) as u8,
            (divisor >> 8) as u8,
            opcodes::DISABLE_CLK_DIVIDE_BY_5,
        ];
        self.buf.append(&mut self.io, &mut [], &cmd)?;
        self.buf.flush(&mut self.io, &mut [])?;

        let realized = BASE_CLOCK_HZ / divisor;
        log::info!(
            "TCK: requested {} Hz, realized {} Hz (divisor {})",
            frequency_hz,
            realized,
            divisor
        );
        Ok(realized)
    }

    /// Applies a TCK period in nanoseconds and returns the realized period.
    /// A zero period asks for the fastest clock the chip supports.
    pub fn set_period_ns(&mut self, period_ns: u32) -> Result<u32, MpsseError> {
        let hz = if period_ns == 0 {
            MAX_FREQUENCY_HZ
        } else {
            (1_000_000_000 / period_ns).max(1)
        };
        let realized_hz = self.set_frequency(hz)?;
        Ok(1_000_000_000 / realized_hz)
    }

    /// Clocks `nbits` TMS/TDI pairs into the adapter, filling `tdo` with the
    /// bits read back at matching positions.
    ///
    /// On return the remembered TAP state equals the fold of the TMS bits
    /// over the previous state, and the TDI pin holds the vector's last bit.
    pub fn scan(
        &mut self,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
        nbits: usize,
    ) -> Result<(), MpsseError> {
        if nbits == 0 {
            return Ok(());
        }
        let need = nbits.div_ceil(8);
        for len in [tms.len(), tdi.len(), tdo.len()] {
            if len < need {
                return Err(MpsseError::VectorLength { need, got: len });
            }
        }

        let mut state = self.state;
        let mut first_pending = 0;
        for i in 0..nbits {
            let next = state.step(bits::get(tms, i));
            let in_shift = state.is_shift();
            let entering = !in_shift && next.is_shift();
            let leaving = in_shift && !next.is_shift();
            if entering || leaving || i == nbits - 1 {
                let end = i + 1;
                if in_shift {
                    self.append_shift_run(tdi, tdo, first_pending, end, leaving)?;
                } else {
                    self.append_tms_run(tms, tdo, first_pending, end)?;
                }
                first_pending = end;
            }
            state = next;
        }

        self.buf.flush(&mut self.io, tdo)?;
        self.buf.reset_observers();

        log::trace!("scan of {} bits: {} -> {}", nbits, self.state, state);
        self.state = state;
        Ok(())
    }

    /// Emits a run of pure state movement as TMS-clock opcodes, holding TDI
    /// at its last driven level. No response bytes are produced, but `tdo`
    /// still rides along: a capacity flush here may fire observers queued by
    /// an earlier shift run of the same scan.
    fn append_tms_run(
        &mut self,
        tms: &[u8],
        tdo: &mut [u8],
        from: usize,
        to: usize,
    ) -> Result<(), MpsseError> {
        let mut cur = from;
        while cur < to {
            let take = (to - cur).min(TMS_BITS_PER_COMMAND);
            let mut packed = 0u8;
            for i in 0..take {
                if bits::get(tms, cur + i) {
                    packed |= 1 << i;
                }
            }
            let cmd = [
                opcodes::CLK_TMS_OUT,
                (take - 1) as u8,
                packed | (self.last_tdi as u8) << 7,
            ];
            self.buf.append(&mut self.io, tdo, &cmd)?;
            cur += take;
        }
        Ok(())
    }

    /// Emits a run spent inside Shift-DR/Shift-IR.
    ///
    /// Up to four pieces: leading bits up to the next byte boundary, inner
    /// whole bytes chunked at the chip's response capacity, trailing bits
    /// after the last whole byte, and always the final bit as a TMS-read
    /// opcode so TMS can rise on the same clock that samples TDO. `leaving`
    /// is that final TMS level.
    fn append_shift_run(
        &mut self,
        tdi: &[u8],
        tdo: &mut [u8],
        from: usize,
        to: usize,
        leaving: bool,
    ) -> Result<(), MpsseError> {
        let last = to - 1;
        let regular = last - from; // bits handled before the final one
        let to_boundary = 8 - from % 8;
        let leading = if to_boundary == 8 {
            0
        } else {
            to_boundary.min(regular)
        };
        let leading_only = leading == regular;
        let inner_start = from + leading;
        let inner_end = if leading_only { from } else { last - last % 8 };
        let trailing = if leading_only { 0 } else { last % 8 };
        let total_inner = inner_end.saturating_sub(inner_start) / 8;

        let mut cur = from;

        if leading > 0 {
            let cmd = [
                opcodes::CLK_BITS_OUT_NEG_IN_POS,
                (leading - 1) as u8,
                tdi[from / 8] >> (from % 8),
            ];
            self.buf.append_with_readback(
                &mut self.io,
                tdo,
                &cmd,
                1,
                ObserverKind::Bits {
                    dst_bit: from,
                    nbits: leading,
                },
            )?;
            cur += leading;
        }

        let mut inner_sent = 0;
        while cur < inner_end {
            let chunk = ((inner_end - cur) / 8).min(self.chip_rx_cap);
            let count = chunk - 1;
            let header = [
                opcodes::CLK_BYTES_OUT_NEG_IN_POS,
                (count & 0xff) as u8,
                (count >> 8) as u8,
            ];
            self.buf.append(&mut self.io, tdo, &header)?;

            let payload = &tdi[cur / 8..cur / 8 + chunk];
            let kind = if total_inner > chunk {
                ObserverKind::BulkBytes {
                    dst_byte: inner_start / 8,
                    total: total_inner,
                    copied: inner_sent,
                }
            } else {
                ObserverKind::Bytes { dst_byte: cur / 8 }
            };
            self.buf
                .append_with_readback(&mut self.io, tdo, payload, chunk, kind)?;
            inner_sent += chunk;
            cur += chunk * 8;
        }

        if trailing > 0 && cur < last {
            let cmd = [
                opcodes::CLK_BITS_OUT_NEG_IN_POS,
                (trailing - 1) as u8,
                tdi[inner_end / 8],
            ];
            self.buf.append_with_readback(
                &mut self.io,
                tdo,
                &cmd,
                1,
                ObserverKind::Bits {
                    dst_bit: inner_end,
                    nbits: trailing,
                },
            )?;
            cur += trailing;
        }

        debug_assert_eq!(cur, last);
        let tdi_bit = bits::get(tdi, last);
        let tms_bit = leaving as u8;
        let cmd = [
            opcodes::CLK_TMS_OUT_READ,
            0x00,
            (tdi_bit as u8) << 7 | tms_bit << 1 | tms_bit,
        ];
        self.buf.append_with_readback(
            &mut self.io,
            tdo,
            &cmd,
            1,
            ObserverKind::Bits {
                dst_bit: last,
                nbits: 1,
            },
        )?;
        self.last_tdi = tdi_bit;
        Ok(())
    }
}
