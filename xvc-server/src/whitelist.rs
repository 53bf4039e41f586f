//! IPv4 allow/block filtering applied at accept time.
//!
//! Entries are single addresses or CIDR prefixes. Block entries always win
//! over allow entries. Peers matching nothing are decided by the mode:
//! allowed outright (`Off`), allowed but logged (`Permissive`) or rejected
//! (`Strict`). IPv6 peers pass unfiltered; the lock path is IPv4-only and
//! so is the filter.

use std::{error::Error, fmt::Display, net::IpAddr, net::Ipv4Addr};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WhitelistMode {
    Off,
    Permissive,
    Strict,
}

/// Outcome of checking one peer address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Allowed,
    /// Allowed by permissive mode, but worth a log line.
    Logged,
    Blocked,
}

#[derive(Clone, Debug)]
struct Entry {
    net: u32,
    mask: u32,
    block: bool,
    text: String,
}

#[derive(Debug)]
pub struct Whitelist {
    mode: WhitelistMode,
    entries: Vec<Entry>,
}

/// An entry that could not be parsed as `a.b.c.d` or `a.b.c.d/prefix`.
#[derive(Debug)]
pub struct CidrError(String);

impl Display for CidrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid IP or CIDR '{}'", self.0)
    }
}

impl Error for CidrError {}

impl Whitelist {
    pub fn new(mode: WhitelistMode) -> Whitelist {
        Whitelist {
            mode,
            entries: Vec::new(),
        }
    }

    pub fn mode(&self) -> WhitelistMode {
        self.mode
    }

    /// Adds an allow (or, with `block`, a block) entry.
    pub fn add(&mut self, cidr: &str, block: bool) -> Result<(), CidrError> {
        let (addr_text, prefix) = match cidr.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix.parse().map_err(|_| CidrError(cidr.to_string()))?;
                (addr, prefix)
            }
            None => (cidr, 32),
        };
        if prefix > 32 {
            return Err(CidrError(cidr.to_string()));
        }
        let addr: Ipv4Addr = addr_text.parse().map_err(|_| CidrError(cidr.to_string()))?;
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        log::debug!("whitelist entry {} (block={})", cidr, block);
        self.entries.push(Entry {
            net: u32::from(addr) & mask,
            mask,
            block,
            text: cidr.to_string(),
        });
        Ok(())
    }

    pub fn check(&self, peer: IpAddr) -> Verdict {
        let IpAddr::V4(v4) = peer else {
            return Verdict::Allowed;
        };
        if self.mode == WhitelistMode::Off {
            return Verdict::Allowed;
        }
        let ip = u32::from(v4);

        for entry in self.entries.iter().filter(|e| e.block) {
            if ip & entry.mask == entry.net {
                log::debug!("{} matches block entry {}", v4, entry.text);
                return Verdict::Blocked;
            }
        }
        if self
            .entries
            .iter()
            .any(|e| !e.block && ip & e.mask == e.net)
        {
            return Verdict::Allowed;
        }
        match self.mode {
            WhitelistMode::Strict => Verdict::Blocked,
            _ => Verdict::Logged,
        }
    }
}
