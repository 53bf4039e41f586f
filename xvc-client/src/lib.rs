//! # XVC Client
//!
//! Small blocking client for XVC 1.0 servers. It exists for tooling and for
//! the server integration tests, which drive a live instance through a real
//! socket with it.
//!
//! ```ignore
//! use xvc_client::XvcClient;
//!
//! let mut client = XvcClient::connect("127.0.0.1:2542")?;
//! let info = client.get_info()?;
//! println!("server speaks v{} with {} byte vectors",
//!          info.version(), info.vector_cap_bytes());
//!
//! let realized = client.set_tck(100)?; // ask for 10 MHz
//! let tdo = client.shift(8, &[0x00], &[0xa5])?;
//! ```

use std::{
    io::{self, Read},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use xvc_protocol::{error::ProtocolError, Message, XvcInfo};

/// One connection to an XVC server.
pub struct XvcClient {
    stream: TcpStream,
}

impl XvcClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<XvcClient> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(XvcClient { stream })
    }

    /// Applies a read/write deadline to every subsequent operation.
    pub fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))
    }

    /// Queries the server banner.
    pub fn get_info(&mut self) -> Result<XvcInfo, ProtocolError> {
        Message::GetInfo.write_to(&mut self.stream)?;
        XvcInfo::from_reader(&mut self.stream)
    }

    /// Requests a TCK period in nanoseconds; returns what the server
    /// realized.
    pub fn set_tck(&mut self, period_ns: u32) -> io::Result<u32> {
        Message::SetTck { period_ns }.write_to(&mut self.stream)?;
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Shifts `num_bits` TMS/TDI pairs and returns the TDO vector.
    ///
    /// `tms` and `tdi` must each hold `⌈num_bits / 8⌉` bytes.
    pub fn shift(&mut self, num_bits: u32, tms: &[u8], tdi: &[u8]) -> io::Result<Vec<u8>> {
        Message::Shift {
            num_bits,
            tms: tms.into(),
            tdi: tdi.into(),
        }
        .write_to(&mut self.stream)?;
        let mut tdo = vec![0u8; num_bits.div_ceil(8) as usize];
        self.stream.read_exact(&mut tdo)?;
        Ok(tdo)
    }
}
