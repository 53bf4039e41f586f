//! Glue between the server's cable trait and the MPSSE engine.

use std::time::Duration;

use xvc_mpsse::{DeviceSelector, Hs2Transport, Mpsse, MpsseError};
use xvc_server::JtagCable;

/// An opened, configured HS2 adapter.
pub struct Hs2Cable {
    engine: Mpsse<Hs2Transport>,
}

impl Hs2Cable {
    /// Opens the adapter, brings up MPSSE mode and programs the initial
    /// TCK frequency.
    pub fn open(
        selector: &DeviceSelector,
        latency: Duration,
        initial_frequency_hz: u32,
    ) -> Result<Hs2Cable, MpsseError> {
        let mut transport = Hs2Transport::open(selector)?;
        transport.configure_mpsse(latency)?;
        let mut engine = Mpsse::new(transport);
        let realized = engine.set_frequency(initial_frequency_hz)?;
        log::info!("adapter ready at {} Hz", realized);
        Ok(Hs2Cable { engine })
    }
}

impl JtagCable for Hs2Cable {
    type Error = MpsseError;

    fn set_tck_period(&mut self, period_ns: u32) -> Result<u32, MpsseError> {
        self.engine.set_period_ns(period_ns)
    }

    fn scan(
        &mut self,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
        nbits: usize,
    ) -> Result<(), MpsseError> {
        self.engine.scan(tms, tdi, tdo, nbits)
    }
}
