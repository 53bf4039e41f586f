//! End-to-end tests: a live instance on a real socket, backed by the
//! loopback chip model, driven with the protocol client.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use xvc_client::XvcClient;
use xvc_mpsse::sim::SimulatedChip;
use xvc_mpsse::{Mpsse, MpsseError, MpsseIo};
use xvc_protocol::TapState;
use xvc_server::{Instance, InstanceConfig, JtagCable, Whitelist, WhitelistMode};

/// Chip model shared between the instance thread and the test body.
#[derive(Clone, Default)]
struct SharedChip(Arc<Mutex<SimulatedChip>>);

impl SharedChip {
    fn tap_state(&self) -> TapState {
        self.0.lock().unwrap().tap_state()
    }

    fn command_log_len(&self) -> usize {
        self.0.lock().unwrap().command_log().len()
    }
}

impl MpsseIo for SharedChip {
    fn write(&mut self, data: &[u8]) -> Result<(), MpsseError> {
        self.0.lock().unwrap().write(data)
    }

    fn rx_available(&mut self) -> Result<usize, MpsseError> {
        self.0.lock().unwrap().rx_available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MpsseError> {
        self.0.lock().unwrap().read(buf)
    }
}

/// The MPSSE engine exposed to the server the same way the HS2 backend
/// does it.
struct SimCable(Mpsse<SharedChip>);

impl JtagCable for SimCable {
    type Error = MpsseError;

    fn set_tck_period(&mut self, period_ns: u32) -> Result<u32, MpsseError> {
        self.0.set_period_ns(period_ns)
    }

    fn scan(
        &mut self,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
        nbits: usize,
    ) -> Result<(), MpsseError> {
        self.0.scan(tms, tdi, tdo, nbits)
    }
}

struct Fixture {
    port: u16,
    chip: SharedChip,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Fixture {
    fn start(mut config: InstanceConfig) -> Fixture {
        let port = free_port();
        config.port = port;
        config.bind_addr = "127.0.0.1".parse().unwrap();
        config.rw_timeout = Duration::from_secs(2);

        let chip = SharedChip::default();
        let cable = SimCable(Mpsse::new(chip.clone()));
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::spawn(move || {
            let mut instance = Instance::new(cable, config, Whitelist::new(WhitelistMode::Off));
            if let Err(e) = instance.run(&flag) {
                panic!("instance died: {}", e);
            }
        });

        Fixture {
            port,
            chip,
            running,
            handle: Some(handle),
        }
    }

    fn client(&self) -> XvcClient {
        let addr = ("127.0.0.1", self.port);
        for _ in 0..100 {
            if let Ok(mut client) = XvcClient::connect(addr) {
                client.set_timeout(Duration::from_secs(5)).unwrap();
                return client;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("server on port {} never came up", self.port);
    }

    fn raw_connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn lsb_set(buf: &mut [u8], idx: usize) {
    buf[idx / 8] |= 1 << (idx % 8);
}

fn lsb_get(buf: &[u8], idx: usize) -> bool {
    buf[idx / 8] >> (idx % 8) & 1 != 0
}

#[test]
fn getinfo_literal_bytes() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut stream = fixture.raw_connect();
    stream.write_all(b"getinfo:").unwrap();

    let mut banner = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).unwrap();
        banner.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
    }
    assert_eq!(banner, b"xvcServer_v1.0:2048\n");
}

#[test]
fn settck_echoes_realizable_period() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut client = fixture.client();
    // 1 ms period divides the 30 MHz base exactly.
    assert_eq!(client.set_tck(1_000_000).unwrap(), 1_000_000);
    // Period zero clamps to the fastest clock.
    assert_eq!(client.set_tck(0).unwrap(), 33);
}

#[test]
fn single_bit_state_move() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut client = fixture.client();
    // Leave Test-Logic-Reset first, then TMS=1 towards Select-DR-Scan.
    assert_eq!(client.shift(1, &[0x00], &[0x00]).unwrap(), vec![0x00]);
    assert_eq!(client.shift(1, &[0x01], &[0x00]).unwrap(), vec![0x00]);
    assert_eq!(fixture.chip.tap_state(), TapState::SelectDrScan);
}

#[test]
fn loopback_shift_places_tdo_bits() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut client = fixture.client();

    // One request: walk into Shift-DR (4 bits), shift 8 data bits, exiting
    // on the last one.
    let nbits = 12u32;
    let mut tms = [0u8; 2];
    lsb_set(&mut tms, 1); // RTI -> Select-DR
    lsb_set(&mut tms, 11); // last data bit leaves Shift-DR
    let mut tdi = [0u8; 2];
    // 0xA5 into bit positions 4..12.
    tdi[0] = 0x50;
    tdi[1] = 0x0a;

    let tdo = client.shift(nbits, &tms, &tdi).unwrap();
    assert_eq!(tdo.len(), 2);
    // Bits 0..4 ran outside Shift-DR and stay zero; 4..12 loop back.
    assert_eq!(tdo[0], 0x50);
    assert_eq!(tdo[1], 0x0a);
    assert_eq!(fixture.chip.tap_state(), TapState::Exit1Dr);
}

#[test]
fn tap_state_tracks_random_vectors() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut client = fixture.client();

    let mut seed = 0x0bad_cafeu32;
    let mut tms = vec![0u8; 32];
    for byte in tms.iter_mut() {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        *byte = seed as u8;
    }
    let nbits = 250;
    let tdi = vec![0u8; 32];
    client.shift(nbits as u32, &tms, &tdi).unwrap();

    let mut expected = TapState::TestLogicReset;
    for i in 0..nbits {
        expected = expected.step(lsb_get(&tms, i));
    }
    assert_eq!(fixture.chip.tap_state(), expected);
}

#[test]
fn second_connection_is_turned_away() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut first = fixture.client();
    first.get_info().unwrap(); // promote to the active session

    let mut second = fixture.raw_connect();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut buf = [0u8; 1];
    // The server closes the intruder without reading a byte from it.
    assert_eq!(second.read(&mut buf).unwrap(), 0);

    // The original session is unharmed.
    assert_eq!(first.get_info().unwrap().vector_cap_bytes(), 2048);
}

#[test]
fn bogus_exit1_dr_movement_is_ignored() {
    let fixture = Fixture::start(InstanceConfig::default());
    let mut client = fixture.client();

    // Park in Exit1-DR: TLR ->0 RTI ->1 SelDR ->0 CapDR ->0 ShiftDR ->1 Exit1DR.
    client.shift(5, &[0x12], &[0x00]).unwrap();
    assert_eq!(fixture.chip.tap_state(), TapState::Exit1Dr);

    let opcodes_before = fixture.chip.command_log_len();
    let tdo = client.shift(4, &[0x0b], &[0x0f]).unwrap();
    // All-zero response, no TAP movement, no MPSSE traffic.
    assert_eq!(tdo, vec![0x00]);
    assert_eq!(fixture.chip.tap_state(), TapState::Exit1Dr);
    assert_eq!(fixture.chip.command_log_len(), opcodes_before);
}

#[test]
fn oversized_shift_drops_the_session() {
    let mut config = InstanceConfig::default();
    config.vector_cap_bytes = 16;
    let fixture = Fixture::start(config);

    let mut client = fixture.client();
    assert_eq!(client.get_info().unwrap().vector_cap_bytes(), 16);
    drop(client); // free the session slot
    thread::sleep(Duration::from_millis(100));

    let mut stream = fixture.raw_connect();
    // 17 bytes of vector against a 16 byte capacity.
    let mut wire = b"shift:".to_vec();
    wire.extend_from_slice(&(17u32 * 8).to_le_bytes());
    wire.extend_from_slice(&[0u8; 34]);
    stream.write_all(&wire).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    // The server drops the socket without reading the vectors, so either a
    // clean close or a reset is acceptable.
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("expected a closed session, read {} bytes", n),
        Err(e) => assert!(
            matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
            ),
            "unexpected error {}",
            e
        ),
    }
}

#[test]
fn fixed_frequency_overrides_settck() {
    let mut config = InstanceConfig::default();
    config.fixed_frequency_hz = Some(1_000_000);
    let fixture = Fixture::start(config);
    let mut client = fixture.client();
    // Client asks for 5 ns; the configured 1 MHz (1000 ns) wins.
    assert_eq!(client.set_tck(5).unwrap(), 1_000);
}
