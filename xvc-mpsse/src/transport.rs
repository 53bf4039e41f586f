//! D2XX-backed byte endpoint for FT2232H adapters.
//!
//! Wraps a `libftd2xx` handle behind [`MpsseIo`] and owns the one-time MPSSE
//! bring-up sequence. The Digilent HS2 wires TCK/TDI/TDO/TMS to ADBUS0..3 of
//! channel A, which is what the GPIO preamble below configures.

use std::{fmt::Display, thread, time::Duration};

use libftd2xx::{list_devices, BitMode, Ftdi, FtdiCommon};

use crate::{opcodes, MpsseError, MpsseIo};

/// USB transfer size requested from the driver.
const USB_TRANSFER_SIZE: u32 = 65_536;
/// Driver-level read/write timeouts.
const DRIVER_TIMEOUT: Duration = Duration::from_secs(5);
/// Divisor programmed before the first `set_frequency` call (~1 MHz).
const INITIAL_DIVISOR: u16 = 29;
/// ADBUS value: TMS high, TDI low, TCK low.
const GPIO_VALUE: u8 = 0x08;
/// ADBUS direction: TCK, TDI, TMS outputs; TDO input.
const GPIO_DIRECTION: u8 = 0x0b;

/// How an instance names the one adapter it owns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceSelector {
    /// D2XX serial number, e.g. `210249A85F3E`.
    Serial(String),
    /// Position in the driver's enumeration order.
    Index(u32),
    /// USB bus and device address. Parsed and carried for completeness, but
    /// the D2XX driver offers no portable open-by-location, so opening by it
    /// is reported as unsupported.
    Location { bus: u8, addr: u8 },
}

impl Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSelector::Serial(sn) => write!(f, "serial {}", sn),
            DeviceSelector::Index(i) => write!(f, "index {}", i),
            DeviceSelector::Location { bus, addr } => write!(f, "bus {}:{}", bus, addr),
        }
    }
}

/// Exclusive handle on one HS2 adapter.
#[derive(Debug)]
pub struct Hs2Transport {
    ft: Ftdi,
}

impl Hs2Transport {
    /// Opens the first device matching `selector`.
    pub fn open(selector: &DeviceSelector) -> Result<Hs2Transport, MpsseError> {
        let devices =
            list_devices().map_err(|s| MpsseError::driver("FT_CreateDeviceInfoList", s))?;
        if devices.is_empty() {
            return Err(MpsseError::NoDevice(selector.to_string()));
        }
        log::info!("found {} FTDI device(s)", devices.len());
        for dev in &devices {
            log::debug!(
                "  {} ({}), type {:?}",
                dev.serial_number,
                dev.description,
                dev.device_type
            );
        }

        let ft = match selector {
            DeviceSelector::Serial(sn) => Ftdi::with_serial_number(sn),
            DeviceSelector::Index(i) => Ftdi::with_index(*i as i32),
            DeviceSelector::Location { .. } => {
                return Err(MpsseError::UnsupportedSelector(selector.to_string()));
            }
        }
        .map_err(|s| MpsseError::driver("FT_OpenEx", s))?;

        Ok(Hs2Transport { ft })
    }

    /// Puts the chip into MPSSE mode and drives the JTAG preamble.
    ///
    /// Ends with TCK=0, TDI=0, TMS=1, TDO as input and the clock near 1 MHz;
    /// the caller is expected to program the real frequency next.
    pub fn configure_mpsse(&mut self, latency: Duration) -> Result<(), MpsseError> {
        // Bring-up hiccups before the bit-mode switch are survivable; warn
        // and continue the way the vendor examples do.
        if let Err(s) = self.ft.reset() {
            log::warn!("FT_ResetDevice failed: {:?}", s);
        }
        if let Err(e) = self.purge() {
            log::warn!("{}", e);
        }
        if let Err(s) = self.ft.set_usb_parameters(USB_TRANSFER_SIZE) {
            log::warn!("FT_SetUSBParameters failed: {:?}", s);
        }
        if let Err(s) = self.ft.set_chars(0, false, 0, false) {
            log::warn!("FT_SetChars failed: {:?}", s);
        }
        if let Err(s) = self.ft.set_timeouts(DRIVER_TIMEOUT, DRIVER_TIMEOUT) {
            log::warn!("FT_SetTimeouts failed: {:?}", s);
        }
        if let Err(s) = self.ft.set_latency_timer(latency) {
            log::warn!("FT_SetLatencyTimer failed: {:?}", s);
        }
        if let Err(s) = self.ft.set_bit_mode(0x00, BitMode::Reset) {
            log::warn!("FT_SetBitMode reset failed: {:?}", s);
        }
        thread::sleep(Duration::from_millis(10));

        self.ft
            .set_bit_mode(0x00, BitMode::Mpsse)
            .map_err(|s| MpsseError::driver("FT_SetBitMode", s))?;
        thread::sleep(Duration::from_millis(50));
        self.drain_residue();

        let preamble = [
            opcodes::LOOPBACK_OFF,
            opcodes::SET_TCK_DIVISOR,
            (INITIAL_DIVISOR & 0xff) as u8,
            (INITIAL_DIVISOR >> 8) as u8,
            opcodes::DISABLE_CLK_DIVIDE_BY_5,
            opcodes::SET_GPIO_LOW,
            GPIO_VALUE,
            GPIO_DIRECTION,
        ];
        self.write(&preamble)?;
        thread::sleep(Duration::from_millis(10));
        self.drain_residue();

        log::info!("MPSSE configured");
        Ok(())
    }

    /// Discards both FIFO directions on the chip.
    pub fn purge(&mut self) -> Result<(), MpsseError> {
        self.ft
            .purge_all()
            .map_err(|s| MpsseError::driver("FT_Purge", s))
    }

    /// Throws away whatever the chip queued, e.g. bad-command markers from
    /// the mode switch.
    fn drain_residue(&mut self) {
        let mut junk = [0u8; 256];
        while let Ok(n) = self.ft.queue_status() {
            if n == 0 {
                break;
            }
            let take = (n as usize).min(junk.len());
            match self.ft.read(&mut junk[..take]) {
                Ok(0) | Err(_) => break,
                Ok(read) => log::debug!("drained {} residual bytes", read),
            }
        }
    }
}

impl MpsseIo for Hs2Transport {
    fn write(&mut self, data: &[u8]) -> Result<(), MpsseError> {
        let wrote = self
            .ft
            .write(data)
            .map_err(|s| MpsseError::driver("FT_Write", s))?;
        if wrote != data.len() {
            return Err(MpsseError::PartialWrite {
                wrote,
                requested: data.len(),
            });
        }
        Ok(())
    }

    fn rx_available(&mut self) -> Result<usize, MpsseError> {
        self.ft
            .queue_status()
            .map(|n| n as usize)
            .map_err(|s| MpsseError::driver("FT_GetQueueStatus", s))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MpsseError> {
        self.ft
            .read(buf)
            .map_err(|s| MpsseError::driver("FT_Read", s))
    }
}

impl Drop for Hs2Transport {
    fn drop(&mut self) {
        let _ = self.ft.set_bit_mode(0x00, BitMode::Reset);
        let _ = self.ft.close();
    }
}
