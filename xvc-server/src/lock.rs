//! Client-IP stickiness for one adapter instance.
//!
//! While a lock is held, only the remembered IP may start a session; the
//! lock is refreshed every time that client's session ends, so a paused
//! debugger can reconnect within the timeout without being displaced by a
//! scanning peer. A zero timeout disables locking entirely.

use std::net::IpAddr;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ClientLock {
    timeout: Duration,
    locked_ip: Option<IpAddr>,
    lock_until: Option<Instant>,
}

impl ClientLock {
    pub fn new(timeout: Duration) -> ClientLock {
        ClientLock {
            timeout,
            locked_ip: None,
            lock_until: None,
        }
    }

    /// Whether `peer` may start a session at `now`. An expired lock is
    /// cleared by whoever observes it.
    pub fn admits(&mut self, peer: IpAddr, now: Instant) -> bool {
        self.expire(now);
        match self.locked_ip {
            None => true,
            Some(ip) => ip == peer,
        }
    }

    /// Called when a session sends its first byte: an idle, unlocked
    /// instance binds itself to that client.
    pub fn arm(&mut self, peer: IpAddr, now: Instant) {
        if self.timeout.is_zero() || self.locked_ip.is_some() {
            return;
        }
        log::info!(
            "locking instance to client {} for {:?}",
            peer,
            self.timeout
        );
        self.locked_ip = Some(peer);
        self.lock_until = Some(now + self.timeout);
    }

    /// Called when a session ends: the departing client keeps the adapter
    /// reserved for one more timeout window.
    pub fn refresh(&mut self, peer: IpAddr, now: Instant) {
        if self.timeout.is_zero() {
            return;
        }
        log::debug!("lock refreshed for {} ({:?})", peer, self.timeout);
        self.locked_ip = Some(peer);
        self.lock_until = Some(now + self.timeout);
    }

    pub fn locked_ip(&self) -> Option<IpAddr> {
        self.locked_ip
    }

    fn expire(&mut self, now: Instant) {
        if let Some(until) = self.lock_until {
            if now >= until {
                if let Some(ip) = self.locked_ip {
                    log::info!("lock for {} expired", ip);
                }
                self.locked_ip = None;
                self.lock_until = None;
            }
        }
    }
}
