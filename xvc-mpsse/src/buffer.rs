//! Batching of MPSSE opcodes into large USB writes, with read observers
//! scattering the response stream back into a caller-owned TDO vector.

use std::time::{Duration, Instant};

use crate::{bits, MpsseError, MpsseIo};

/// Flush the transmit buffer once it grows past this, even with room left.
const EARLY_FLUSH_TX: usize = 60 * 1024;
/// Budget for the whole response of one flush to arrive.
const READ_TIMEOUT: Duration = Duration::from_millis(500);
/// Spin this many `rx_available` probes before starting to sleep.
const MAX_SPIN: u32 = 1000;
const POLL_SLEEP: Duration = Duration::from_micros(10);

/// How one slice of the response stream lands in the TDO vector.
///
/// Destinations are offsets, not pointers: the TDO vector is borrowed only
/// for the duration of [`CommandBuffer::flush`], which is when observers run.
#[derive(Debug)]
pub enum ObserverKind {
    /// `nbits ≤ 8` MSB-justified bits out of a single bit-mode response byte,
    /// scattered LSB-first starting at TDO bit `dst_bit`.
    Bits { dst_bit: usize, nbits: usize },
    /// A byte-mode response chunk copied verbatim to TDO byte `dst_byte`.
    Bytes { dst_byte: usize },
    /// One chunk of a byte run split across several reads, concatenated into
    /// the aggregated window of `total` bytes starting at TDO byte
    /// `dst_byte`; this chunk continues at offset `copied`.
    BulkBytes {
        dst_byte: usize,
        total: usize,
        copied: usize,
    },
}

#[derive(Debug)]
struct RxObserver {
    rx_offset: usize,
    rx_len: usize,
    kind: ObserverKind,
}

impl RxObserver {
    fn apply(&self, rx: &[u8], tdo: &mut [u8]) {
        let chunk = &rx[self.rx_offset..self.rx_offset + self.rx_len];
        match self.kind {
            ObserverKind::Bits { dst_bit, nbits } => {
                bits::copy_tms_response(tdo, dst_bit, chunk[0], nbits);
            }
            ObserverKind::Bytes { dst_byte } => {
                bits::byte_copy(tdo, dst_byte * 8, chunk, self.rx_len);
            }
            ObserverKind::BulkBytes {
                dst_byte,
                total,
                copied,
            } => {
                debug_assert!(copied + self.rx_len <= total);
                bits::byte_copy(tdo, (dst_byte + copied) * 8, chunk, self.rx_len);
            }
        }
    }
}

/// Append-only opcode buffer paired with the observer FIFO for the response
/// bytes the queued opcodes will produce.
#[derive(Debug)]
pub struct CommandBuffer {
    tx: Vec<u8>,
    tx_cap: usize,
    rx: Vec<u8>,
    rx_cap: usize,
    rx_pending: usize,
    observers: Vec<RxObserver>,
}

impl CommandBuffer {
    /// `rx_cap` is the chip's per-round response limit; the transmit side is
    /// sized at three times that so commands for a full response round fit.
    pub fn new(rx_cap: usize) -> CommandBuffer {
        CommandBuffer {
            tx: Vec::with_capacity(3 * rx_cap),
            tx_cap: 3 * rx_cap,
            rx: Vec::with_capacity(rx_cap),
            rx_cap,
            rx_pending: 0,
            observers: Vec::new(),
        }
    }

    /// Queues opcode bytes that produce no response.
    pub fn append<T: MpsseIo>(
        &mut self,
        io: &mut T,
        tdo: &mut [u8],
        cmd: &[u8],
    ) -> Result<(), MpsseError> {
        self.make_room(io, tdo, cmd.len(), 0)?;
        self.tx.extend_from_slice(cmd);
        Ok(())
    }

    /// Queues opcode bytes, reserves `rx_len` response bytes and registers
    /// the observer that will scatter them.
    pub fn append_with_readback<T: MpsseIo>(
        &mut self,
        io: &mut T,
        tdo: &mut [u8],
        cmd: &[u8],
        rx_len: usize,
        kind: ObserverKind,
    ) -> Result<(), MpsseError> {
        self.make_room(io, tdo, cmd.len(), rx_len)?;
        self.observers.push(RxObserver {
            rx_offset: self.rx_pending,
            rx_len,
            kind,
        });
        self.tx.extend_from_slice(cmd);
        self.rx_pending += rx_len;
        Ok(())
    }

    fn make_room<T: MpsseIo>(
        &mut self,
        io: &mut T,
        tdo: &mut [u8],
        tx_add: usize,
        rx_add: usize,
    ) -> Result<(), MpsseError> {
        if self.tx.len() + tx_add > self.tx_cap
            || self.rx_pending + rx_add > self.rx_cap
            || self.tx.len() >= EARLY_FLUSH_TX
        {
            log::trace!(
                "flush before append: tx={}+{}/{} rx={}+{}/{}",
                self.tx.len(),
                tx_add,
                self.tx_cap,
                self.rx_pending,
                rx_add,
                self.rx_cap
            );
            self.flush(io, tdo)?;
        }
        Ok(())
    }

    /// Writes the queued opcodes in one USB transfer, drains the expected
    /// response bytes and runs every registered observer in FIFO order.
    ///
    /// With no reserved response bytes the receive path is never touched.
    pub fn flush<T: MpsseIo>(&mut self, io: &mut T, tdo: &mut [u8]) -> Result<(), MpsseError> {
        if !self.tx.is_empty() {
            log::trace!("flushing {} opcode bytes", self.tx.len());
            io.write(&self.tx)?;
            self.tx.clear();
        }

        if self.rx_pending > 0 {
            let expected = self.rx_pending;
            self.rx.clear();
            self.rx.resize(expected, 0);

            let start = Instant::now();
            let mut got = 0;
            let mut spins = 0u32;
            while got < expected {
                let avail = io.rx_available()?;
                if avail > 0 {
                    let want = avail.min(expected - got);
                    got += io.read(&mut self.rx[got..got + want])?;
                    spins = 0;
                } else if spins < MAX_SPIN {
                    spins += 1;
                } else if start.elapsed() >= READ_TIMEOUT {
                    log::error!("response stalled: {} of {} bytes", got, expected);
                    return Err(MpsseError::ReadTimeout { got, expected });
                } else {
                    std::thread::sleep(POLL_SLEEP);
                }
            }

            for observer in self.observers.drain(..) {
                observer.apply(&self.rx, tdo);
            }
            self.rx_pending = 0;
        }
        Ok(())
    }

    /// Drops any observers left over from an aborted scan.
    pub fn reset_observers(&mut self) {
        self.observers.clear();
        self.rx_pending = 0;
    }

    #[cfg(test)]
    fn tx_len(&self) -> usize {
        self.tx.len()
    }
}
