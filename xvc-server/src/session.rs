//! One client's protocol session.
//!
//! A session owns its vector buffers, sized once from the negotiated
//! capacity, and tracks its own copy of the TAP state so it can recognize
//! the two bogus state movements some Xilinx tool versions emit and decide
//! when the client is safely parked.

use std::io::{self, ErrorKind, Read, Write};

use xvc_protocol::{error::ProtocolError, TapState, MAX_VECTOR_CAP_BYTES};

use crate::JtagCable;

/// What `pump` observed about the connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionStatus {
    /// The connection is still alive; come back when it is readable again.
    Active,
    /// The client closed the connection between commands.
    Closed,
}

/// Fatal session faults. `Protocol` and `Io` cost the session; `Cable`
/// additionally poisons the adapter.
#[derive(Debug)]
pub enum SessionError<E> {
    Protocol(ProtocolError),
    Cable(E),
    Io(io::Error),
}

impl<E: std::error::Error> std::fmt::Display for SessionError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Protocol(e) => write!(f, "protocol fault: {}", e),
            SessionError::Cable(e) => write!(f, "cable fault: {}", e),
            SessionError::Io(e) => write!(f, "socket fault: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for SessionError<E> {}

impl<E> From<ProtocolError> for SessionError<E> {
    fn from(value: ProtocolError) -> Self {
        SessionError::Protocol(value)
    }
}

impl<E> From<io::Error> for SessionError<E> {
    fn from(value: io::Error) -> Self {
        SessionError::Io(value)
    }
}

pub struct Session {
    tap: TapState,
    seen_tlr: bool,
    vector_cap: usize,
    banner: Vec<u8>,
    /// TMS vector immediately followed by TDI, `2 * vector_cap` bytes.
    vectors: Vec<u8>,
    tdo: Vec<u8>,
    bytes_rx: u64,
    bytes_tx: u64,
    commands: u64,
}

impl Session {
    pub fn new(vector_cap_bytes: usize) -> Session {
        let cap = vector_cap_bytes.clamp(1, MAX_VECTOR_CAP_BYTES as usize);
        Session {
            tap: TapState::TestLogicReset,
            seen_tlr: false,
            vector_cap: cap,
            banner: format!("xvcServer_v1.0:{}\n", cap).into_bytes(),
            vectors: vec![0; 2 * cap],
            tdo: vec![0; cap],
            bytes_rx: 0,
            bytes_tx: 0,
            commands: 0,
        }
    }

    pub fn tap_state(&self) -> TapState {
        self.tap
    }

    pub fn seen_tlr(&self) -> bool {
        self.seen_tlr
    }

    /// `(bytes received, bytes sent, commands handled)`.
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.bytes_rx, self.bytes_tx, self.commands)
    }

    /// Processes commands until the client parks, pauses or disconnects.
    ///
    /// `getinfo` and `settck` hand control back after one response. Shifts
    /// are processed back to back until the TAP rests in Run-Test/Idle with
    /// Test-Logic-Reset behind it, the point at which the client can be
    /// assumed safely disconnectable, so the instance gets a chance to
    /// service its accept queue between batches.
    pub fn pump<S, C>(
        &mut self,
        stream: &mut S,
        cable: &mut C,
        fixed_frequency_hz: Option<u32>,
    ) -> Result<SessionStatus, SessionError<C::Error>>
    where
        S: Read + Write,
        C: JtagCable,
    {
        loop {
            let mut prefix = [0u8; 2];
            match stream.read_exact(&mut prefix) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(SessionStatus::Closed);
                }
                Err(e) => return Err(SessionError::Io(e)),
            }
            self.bytes_rx += 2;

            match &prefix {
                b"ge" => {
                    self.handle_getinfo(stream)?;
                    return Ok(SessionStatus::Active);
                }
                b"se" => {
                    self.handle_settck(stream, cable, fixed_frequency_hz)?;
                    return Ok(SessionStatus::Active);
                }
                b"sh" => {
                    self.handle_shift(stream, cable)?;
                    if self.seen_tlr && self.tap == TapState::RunTestIdle {
                        return Ok(SessionStatus::Active);
                    }
                }
                other => {
                    return Err(SessionError::Protocol(ProtocolError::UnknownPrefix(*other)));
                }
            }
        }
    }

    fn handle_getinfo<S, E>(&mut self, stream: &mut S) -> Result<(), SessionError<E>>
    where
        S: Read + Write,
    {
        self.expect_rest(stream, b"tinfo:")?;
        stream.write_all(&self.banner)?;
        self.bytes_tx += self.banner.len() as u64;
        self.commands += 1;
        log::debug!("getinfo: advertised {} byte vectors", self.vector_cap);
        Ok(())
    }

    fn handle_settck<S, C>(
        &mut self,
        stream: &mut S,
        cable: &mut C,
        fixed_frequency_hz: Option<u32>,
    ) -> Result<(), SessionError<C::Error>>
    where
        S: Read + Write,
        C: JtagCable,
    {
        self.expect_rest(stream, b"ttck:")?;
        let requested = self.read_u32(stream)?;

        // A statically configured frequency wins over whatever the client
        // asks for.
        let period_ns = match fixed_frequency_hz {
            Some(hz) if hz > 0 => 1_000_000_000 / hz,
            _ => requested,
        };
        let realized = cable
            .set_tck_period(period_ns)
            .map_err(SessionError::Cable)?;
        stream.write_all(&realized.to_le_bytes())?;
        self.bytes_tx += 4;
        self.commands += 1;
        log::debug!(
            "settck: requested {} ns, applied {} ns, realized {} ns",
            requested,
            period_ns,
            realized
        );
        Ok(())
    }

    fn handle_shift<S, C>(
        &mut self,
        stream: &mut S,
        cable: &mut C,
    ) -> Result<(), SessionError<C::Error>>
    where
        S: Read + Write,
        C: JtagCable,
    {
        self.expect_rest(stream, b"ift:")?;
        let nbits = self.read_u32(stream)? as usize;
        let nbytes = nbits.div_ceil(8);
        if nbytes > self.vector_cap {
            return Err(SessionError::Protocol(ProtocolError::VectorTooLarge {
                cap: self.vector_cap,
                got: nbytes,
            }));
        }

        stream.read_exact(&mut self.vectors[..2 * nbytes])?;
        self.bytes_rx += 2 * nbytes as u64;
        self.tdo[..nbytes].fill(0);

        // Remembered until the next Capture-DR/IR invalidates the register
        // state a fresh client would rely on.
        self.seen_tlr = (self.seen_tlr || self.tap == TapState::TestLogicReset)
            && self.tap != TapState::CaptureDr
            && self.tap != TapState::CaptureIr;

        if self.is_bogus_movement(nbits) {
            log::debug!("ignoring bogus state movement in {}", self.tap);
        } else if nbits > 0 {
            let (tms, rest) = self.vectors.split_at(nbytes);
            let tdi = &rest[..nbytes];
            for i in 0..nbits {
                self.tap = self.tap.step(tms[i / 8] >> (i % 8) & 1 != 0);
            }
            log::trace!("shift {} bits, TMS {:02x?}", nbits, tms);
            log::trace!("shift {} bits, TDI {:02x?}", nbits, tdi);
            cable
                .scan(tms, tdi, &mut self.tdo[..nbytes], nbits)
                .map_err(SessionError::Cable)?;
            log::trace!("shift {} bits, TDO {:02x?}", nbits, &self.tdo[..nbytes]);
        }

        stream.write_all(&self.tdo[..nbytes])?;
        self.bytes_tx += nbytes as u64;
        self.commands += 1;
        Ok(())
    }

    /// Some impact versions emit a shift that would walk the TAP through
    /// Update into a fresh scan when the session is parked in an Exit1
    /// state, corrupting the very state they try to preserve. The two known
    /// signatures are skipped wholesale: no TAP movement, all-zero TDO.
    fn is_bogus_movement(&self, nbits: usize) -> bool {
        (self.tap == TapState::Exit1Ir && nbits == 5 && self.vectors[0] == 0x17)
            || (self.tap == TapState::Exit1Dr && nbits == 4 && self.vectors[0] == 0x0b)
    }

    fn expect_rest<S, E>(&mut self, stream: &mut S, rest: &[u8]) -> Result<(), SessionError<E>>
    where
        S: Read,
    {
        let mut buf = [0u8; 8];
        let got = &mut buf[..rest.len()];
        stream.read_exact(got)?;
        self.bytes_rx += rest.len() as u64;
        if got != rest {
            return Err(SessionError::Protocol(ProtocolError::MalformedCommand(
                String::from_utf8_lossy(got).to_string(),
            )));
        }
        Ok(())
    }

    fn read_u32<S, E>(&mut self, stream: &mut S) -> Result<u32, SessionError<E>>
    where
        S: Read,
    {
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf)?;
        self.bytes_rx += 4;
        Ok(u32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    /// In-memory stand-in for the client socket.
    struct Wire {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Wire {
        fn new(input: Vec<u8>) -> Wire {
            Wire {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Wire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Wire {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Loopback cable that counts invocations.
    #[derive(Default)]
    struct StubCable {
        scans: usize,
        periods: Vec<u32>,
    }

    impl JtagCable for StubCable {
        type Error = io::Error;

        fn set_tck_period(&mut self, period_ns: u32) -> Result<u32, io::Error> {
            self.periods.push(period_ns);
            Ok(period_ns)
        }

        fn scan(
            &mut self,
            _tms: &[u8],
            tdi: &[u8],
            tdo: &mut [u8],
            nbits: usize,
        ) -> Result<(), io::Error> {
            self.scans += 1;
            tdo[..nbits.div_ceil(8)].copy_from_slice(&tdi[..nbits.div_ceil(8)]);
            Ok(())
        }
    }

    fn shift_bytes(nbits: u32, tms: &[u8], tdi: &[u8]) -> Vec<u8> {
        let mut wire = b"shift:".to_vec();
        wire.extend_from_slice(&nbits.to_le_bytes());
        wire.extend_from_slice(tms);
        wire.extend_from_slice(tdi);
        wire
    }

    #[test]
    fn getinfo_banner() {
        let mut session = Session::new(2048);
        let mut wire = Wire::new(b"getinfo:".to_vec());
        let mut cable = StubCable::default();
        let status = session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(status, SessionStatus::Active);
        assert_eq!(wire.output, b"xvcServer_v1.0:2048\n");
    }

    #[test]
    fn settck_echoes_realized_period() {
        let mut session = Session::new(2048);
        let mut input = b"settck:".to_vec();
        input.extend_from_slice(&1_000_000u32.to_le_bytes());
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();
        session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(cable.periods, vec![1_000_000]);
        assert_eq!(wire.output, 1_000_000u32.to_le_bytes());
    }

    #[test]
    fn settck_static_frequency_wins() {
        let mut session = Session::new(2048);
        let mut input = b"settck:".to_vec();
        input.extend_from_slice(&5u32.to_le_bytes());
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();
        session
            .pump(&mut wire, &mut cable, Some(1_000_000))
            .unwrap();
        // 1 MHz static configuration: the client's 5 ns request is ignored.
        assert_eq!(cable.periods, vec![1_000]);
    }

    #[test]
    fn shift_response_length_and_content() {
        let mut session = Session::new(2048);
        let mut wire = Wire::new(shift_bytes(13, &[0x00, 0x00], &[0xa5, 0x1f]));
        let mut cable = StubCable::default();
        session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(wire.output.len(), 2);
        assert_eq!(wire.output, vec![0xa5, 0x1f]);
        assert_eq!(cable.scans, 1);
    }

    #[test]
    fn oversized_shift_is_fatal() {
        let mut session = Session::new(16);
        let mut wire = Wire::new(shift_bytes(17 * 8, &[0; 17], &[0; 17]));
        let mut cable = StubCable::default();
        match session.pump(&mut wire, &mut cable, None) {
            Err(SessionError::Protocol(ProtocolError::VectorTooLarge { cap, got })) => {
                assert_eq!((cap, got), (16, 17));
            }
            other => panic!("expected VectorTooLarge, got {:?}", other.map(|_| ())),
        }
        assert_eq!(cable.scans, 0);
    }

    #[test]
    fn unknown_prefix_is_fatal() {
        let mut session = Session::new(16);
        let mut wire = Wire::new(b"zz".to_vec());
        let mut cable = StubCable::default();
        assert!(matches!(
            session.pump(&mut wire, &mut cable, None),
            Err(SessionError::Protocol(ProtocolError::UnknownPrefix(_)))
        ));
    }

    #[test]
    fn eof_between_commands_closes_cleanly() {
        let mut session = Session::new(16);
        let mut wire = Wire::new(Vec::new());
        let mut cable = StubCable::default();
        assert_eq!(
            session.pump(&mut wire, &mut cable, None).unwrap(),
            SessionStatus::Closed
        );
    }

    /// The Exit1-DR signature is swallowed: zero TDO, no TAP movement, no
    /// cable traffic.
    #[test]
    fn bogus_movement_is_skipped() {
        let mut session = Session::new(64);
        // Walk to Exit1-DR: TLR ->0 RTI ->1 SelDR ->0 CapDR ->0 ShiftDR ->1 Exit1DR.
        let mut input = shift_bytes(5, &[0b10010], &[0x00]);
        // The bogus movement itself, TDI all ones to make a scan visible.
        input.extend_from_slice(&shift_bytes(4, &[0x0b], &[0x0f]));
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();

        // First pump handles the walk; TAP is not parked so both shifts are
        // consumed in one batch.
        session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(session.tap_state(), TapState::Exit1Dr);
        assert_eq!(cable.scans, 1);
        assert_eq!(wire.output.len(), 2);
        assert_eq!(wire.output[1], 0x00);
    }

    #[test]
    fn exit1_ir_signature_is_skipped() {
        let mut session = Session::new(64);
        // TLR ->0 RTI ->1 SelDR ->1 SelIR ->0 CapIR ->0 ShiftIR ->1 Exit1IR.
        let mut input = shift_bytes(6, &[0b100110], &[0x00]);
        input.extend_from_slice(&shift_bytes(5, &[0x17], &[0x1f]));
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();
        session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(session.tap_state(), TapState::Exit1Ir);
        assert_eq!(cable.scans, 1);
        assert_eq!(wire.output[1], 0x00);
    }

    /// Shifts batch until the TAP parks in Run-Test/Idle after a reset.
    #[test]
    fn seen_tlr_parks_the_batch() {
        let mut session = Session::new(64);
        // Five 1-bits into TLR, then one 0 into RTI.
        let mut input = shift_bytes(6, &[0b011111], &[0x00]);
        // A second command that must not be consumed by the same pump.
        input.extend_from_slice(b"getinfo:");
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();

        let status = session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(status, SessionStatus::Active);
        assert_eq!(session.tap_state(), TapState::RunTestIdle);
        assert!(session.seen_tlr());
        // Only the shift response is out so far.
        assert_eq!(wire.output.len(), 1);

        session.pump(&mut wire, &mut cable, None).unwrap();
        assert!(wire.output.len() > 1);
    }

    #[test]
    fn zero_bit_shift_answers_nothing() {
        let mut session = Session::new(16);
        let mut input = shift_bytes(0, &[], &[]);
        input.extend_from_slice(b"getinfo:");
        let mut wire = Wire::new(input);
        let mut cable = StubCable::default();
        session.pump(&mut wire, &mut cable, None).unwrap();
        assert_eq!(cable.scans, 0);
        // Only the banner from the follow-up command.
        assert_eq!(wire.output, b"xvcServer_v1.0:16\n");
    }
}
