//! Stream encoding and decoding of protocol messages.
use std::io::{self, BufRead, BufReader, Read, Write};

use crate::{
    error::ProtocolError,
    protocol::{Message, Version, XvcInfo},
};

const BANNER_PREFIX: &[u8] = b"xvcServer_v";

impl XvcInfo {
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(
            writer,
            "xvcServer_v{}:{}",
            self.version(),
            self.vector_cap_bytes()
        )
    }

    /// Parses the `xvcServer_v{version}:{cap}\n` banner a server sends in
    /// response to `getinfo:`.
    pub fn from_reader(reader: &mut impl Read) -> Result<XvcInfo, ProtocolError> {
        let mut banner = Vec::with_capacity(32);
        BufReader::with_capacity(32, reader).read_until(b'\n', &mut banner)?;
        let line = banner.trim_ascii_end();

        let rest = line.strip_prefix(BANNER_PREFIX).ok_or_else(|| {
            ProtocolError::MalformedInfo(format!(
                "missing '{}' prefix",
                String::from_utf8_lossy(BANNER_PREFIX)
            ))
        })?;
        let colon = rest
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| ProtocolError::MalformedInfo("missing ':' separator".to_string()))?;
        let (version_text, cap_text) = rest.split_at(colon);

        let version = match version_text {
            b"1.0" => Version::V1_0,
            other => {
                return Err(ProtocolError::UnsupportedVersion(
                    String::from_utf8_lossy(other).to_string(),
                ));
            }
        };
        let cap = std::str::from_utf8(&cap_text[1..])?.parse::<u32>()?;

        Ok(XvcInfo::new(version, cap))
    }
}

impl Message {
    const GET_INFO: &'static [u8] = b"getinfo:";
    const SET_TCK: &'static [u8] = b"settck:";
    const SHIFT: &'static [u8] = b"shift:";

    /// Reads one command, dispatching on its first two bytes the way the
    /// reference server does (`ge`, `se`, `sh`).
    ///
    /// `cap_bytes` bounds `⌈num_bits / 8⌉` of a shift; a larger request is
    /// rejected without reading its vectors.
    pub fn from_reader(reader: &mut impl Read, cap_bytes: usize) -> Result<Message, ProtocolError> {
        let mut prefix = [0u8; 2];
        reader.read_exact(&mut prefix)?;
        match &prefix {
            b"ge" => {
                expect_rest(reader, &Self::GET_INFO[2..])?;
                Ok(Message::GetInfo)
            }
            b"se" => {
                expect_rest(reader, &Self::SET_TCK[2..])?;
                Ok(Message::SetTck {
                    period_ns: read_u32_le(reader)?,
                })
            }
            b"sh" => {
                expect_rest(reader, &Self::SHIFT[2..])?;
                let num_bits = read_u32_le(reader)?;
                let num_bytes = num_bits.div_ceil(8) as usize;
                if num_bytes > cap_bytes {
                    return Err(ProtocolError::VectorTooLarge {
                        cap: cap_bytes,
                        got: num_bytes,
                    });
                }
                let mut tms = vec![0u8; num_bytes].into_boxed_slice();
                reader.read_exact(&mut tms)?;
                let mut tdi = vec![0u8; num_bytes].into_boxed_slice();
                reader.read_exact(&mut tdi)?;
                Ok(Message::Shift { num_bits, tms, tdi })
            }
            other => Err(ProtocolError::UnknownPrefix(*other)),
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Message::GetInfo => writer.write_all(Self::GET_INFO),
            Message::SetTck { period_ns } => {
                writer.write_all(Self::SET_TCK)?;
                writer.write_all(&period_ns.to_le_bytes())
            }
            Message::Shift { num_bits, tms, tdi } => {
                writer.write_all(Self::SHIFT)?;
                writer.write_all(&num_bits.to_le_bytes())?;
                writer.write_all(tms)?;
                writer.write_all(tdi)
            }
        }
    }
}

/// Consumes the remainder of a command name after the two dispatch bytes.
fn expect_rest(reader: &mut impl Read, rest: &[u8]) -> Result<(), ProtocolError> {
    let mut buf = [0u8; 8];
    let got = &mut buf[..rest.len()];
    reader.read_exact(got)?;
    if got != rest {
        return Err(ProtocolError::MalformedCommand(
            String::from_utf8_lossy(got).to_string(),
        ));
    }
    Ok(())
}

fn read_u32_le(reader: &mut impl Read) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ProtocolError;
    use std::io::Cursor;

    const CAP: usize = 2048;

    #[test]
    fn banner_round_trip() {
        let mut out = Vec::new();
        XvcInfo::default().write_to(&mut out).unwrap();
        assert_eq!(out, b"xvcServer_v1.0:2048\n");

        let parsed = XvcInfo::from_reader(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed, XvcInfo::default());
    }

    #[test]
    fn banner_rejects_alien_version() {
        let mut data = Cursor::new(b"xvcServer_v2.1:64\n".to_vec());
        match XvcInfo::from_reader(&mut data) {
            Err(ProtocolError::UnsupportedVersion(v)) => assert_eq!(v, "2.1"),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn read_getinfo() {
        let mut data = Cursor::new(b"getinfo:".to_vec());
        assert_eq!(Message::from_reader(&mut data, CAP).unwrap(), Message::GetInfo);
    }

    #[test]
    fn read_settck() {
        let mut data = b"settck:".to_vec();
        data.extend_from_slice(&1_000_000u32.to_le_bytes());
        let msg = Message::from_reader(&mut Cursor::new(data), CAP).unwrap();
        assert_eq!(
            msg,
            Message::SetTck {
                period_ns: 1_000_000
            }
        );
    }

    #[test]
    fn shift_round_trip() {
        let tms = vec![0x0b, 0x01].into_boxed_slice();
        let tdi = vec![0xa5, 0x00].into_boxed_slice();
        let msg = Message::Shift {
            num_bits: 13,
            tms: tms.clone(),
            tdi: tdi.clone(),
        };

        let mut wire = Vec::new();
        msg.write_to(&mut wire).unwrap();
        let mut expected = b"shift:".to_vec();
        expected.extend_from_slice(&13u32.to_le_bytes());
        expected.extend_from_slice(&tms);
        expected.extend_from_slice(&tdi);
        assert_eq!(wire, expected);

        let back = Message::from_reader(&mut Cursor::new(wire), CAP).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn shift_over_capacity() {
        let mut data = b"shift:".to_vec();
        data.extend_from_slice(&((CAP as u32 + 1) * 8).to_le_bytes());
        match Message::from_reader(&mut Cursor::new(data), CAP) {
            Err(ProtocolError::VectorTooLarge { cap, got }) => {
                assert_eq!(cap, CAP);
                assert_eq!(got, CAP + 1);
            }
            other => panic!("expected VectorTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn unknown_prefix_is_fatal() {
        let mut data = Cursor::new(b"xy".to_vec());
        match Message::from_reader(&mut data, CAP) {
            Err(ProtocolError::UnknownPrefix(p)) => assert_eq!(&p, b"xy"),
            other => panic!("expected UnknownPrefix, got {:?}", other),
        }
    }

    #[test]
    fn mangled_command_name() {
        let mut data = Cursor::new(b"geXinfo:".to_vec());
        assert!(matches!(
            Message::from_reader(&mut data, CAP),
            Err(ProtocolError::MalformedCommand(_))
        ));
    }
}
