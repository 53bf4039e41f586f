//! The per-adapter instance: one listener, one cable, at most one session.
//!
//! The loop is a plain `poll(2)` over the listening socket and, when
//! present, the active session's socket, with a one second timeout so the
//! shutdown flag is observed promptly. Connections that lose the accept
//! policy are closed on the spot; the winner becomes the foreground session
//! until it dies.

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use xvc_protocol::DEFAULT_VECTOR_CAP_BYTES;

use crate::lock::ClientLock;
use crate::session::{Session, SessionError, SessionStatus};
use crate::whitelist::{Verdict, Whitelist};
use crate::JtagCable;

const POLL_INTERVAL_MS: u16 = 1000;

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Largest `⌈num_bits / 8⌉` accepted per shift; clamped by the session.
    pub vector_cap_bytes: usize,
    /// When set, `settck` requests are overridden with this frequency.
    pub fixed_frequency_hz: Option<u32>,
    /// Zero disables the client-IP lock.
    pub client_lock_timeout: Duration,
    /// Socket read/write timeout for the active session.
    pub rw_timeout: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 2542,
            vector_cap_bytes: DEFAULT_VECTOR_CAP_BYTES as usize,
            fixed_frequency_hz: None,
            client_lock_timeout: Duration::ZERO,
            rw_timeout: Duration::from_secs(30),
        }
    }
}

/// Why an instance stopped.
#[derive(Debug)]
pub enum InstanceError<E> {
    Bind { port: u16, source: io::Error },
    Poll(io::Error),
    /// The adapter failed mid-session; it needs a reopen before reuse.
    Cable(E),
}

impl<E: std::error::Error> std::fmt::Display for InstanceError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceError::Bind { port, source } => {
                write!(f, "cannot bind port {}: {}", port, source)
            }
            InstanceError::Poll(e) => write!(f, "poll failed: {}", e),
            InstanceError::Cable(e) => write!(f, "cable fault: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for InstanceError<E> {}

struct ActiveSession {
    stream: TcpStream,
    peer: SocketAddr,
    session: Session,
    /// Whether the first byte has been seen and the lock armed.
    armed: bool,
}

/// One adapter, one port, one debugger at a time.
pub struct Instance<C: JtagCable> {
    cable: C,
    config: InstanceConfig,
    whitelist: Whitelist,
    lock: ClientLock,
    active: Option<ActiveSession>,
}

impl<C: JtagCable> Instance<C> {
    pub fn new(cable: C, config: InstanceConfig, whitelist: Whitelist) -> Instance<C> {
        let lock = ClientLock::new(config.client_lock_timeout);
        Instance {
            cable,
            config,
            whitelist,
            lock,
            active: None,
        }
    }

    /// Serves until `running` drops or the adapter faults.
    pub fn run(&mut self, running: &AtomicBool) -> Result<(), InstanceError<C::Error>> {
        let listener = TcpListener::bind((self.config.bind_addr, self.config.port)).map_err(
            |source| InstanceError::Bind {
                port: self.config.port,
                source,
            },
        )?;
        listener
            .set_nonblocking(true)
            .map_err(InstanceError::Poll)?;
        log::info!("listening on {}:{}", self.config.bind_addr, self.config.port);

        while running.load(Ordering::SeqCst) {
            let (accept_ready, session_ready) = {
                let mut fds = [
                    PollFd::new(listener.as_fd(), PollFlags::POLLIN),
                    PollFd::new(listener.as_fd(), PollFlags::empty()),
                ];
                if let Some(active) = &self.active {
                    fds[1] = PollFd::new(active.stream.as_fd(), PollFlags::POLLIN);
                }
                match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                    Err(Errno::EINTR) => (false, false),
                    Err(e) => {
                        return Err(InstanceError::Poll(io::Error::from_raw_os_error(e as i32)));
                    }
                    Ok(0) => (false, false),
                    Ok(_) => {
                        let ready = |fd: &PollFd| {
                            fd.revents().is_some_and(|r| {
                                r.intersects(
                                    PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP,
                                )
                            })
                        };
                        (ready(&fds[0]), self.active.is_some() && ready(&fds[1]))
                    }
                }
            };

            if accept_ready {
                self.accept_pending(&listener);
            }
            if session_ready {
                self.pump_session()?;
            }
        }

        log::info!("instance on port {} stopping", self.config.port);
        Ok(())
    }

    fn accept_pending(&mut self, listener: &TcpListener) {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => self.consider(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Applies the accept policy; dropping `stream` rejects the peer.
    fn consider(&mut self, stream: TcpStream, peer: SocketAddr) {
        match self.whitelist.check(peer.ip()) {
            Verdict::Blocked => {
                log::warn!("connection from {} blocked by whitelist", peer);
                return;
            }
            Verdict::Logged => log::warn!("unlisted peer {} allowed (permissive)", peer),
            Verdict::Allowed => {}
        }
        if self.active.is_some() {
            log::warn!("rejecting {}: a session is already active", peer);
            return;
        }
        if !self.lock.admits(peer.ip(), Instant::now()) {
            log::warn!(
                "rejecting {}: instance is locked to {:?}",
                peer,
                self.lock.locked_ip()
            );
            return;
        }

        let _ = stream.set_nodelay(true);
        let _ = stream.set_read_timeout(Some(self.config.rw_timeout));
        let _ = stream.set_write_timeout(Some(self.config.rw_timeout));
        log::info!("session accepted from {}", peer);
        self.active = Some(ActiveSession {
            stream,
            peer,
            session: Session::new(self.config.vector_cap_bytes),
            armed: false,
        });
    }

    fn pump_session(&mut self) -> Result<(), InstanceError<C::Error>> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if !active.armed {
            active.armed = true;
            self.lock.arm(active.peer.ip(), Instant::now());
        }

        let config_fixed = self.config.fixed_frequency_hz;
        match active
            .session
            .pump(&mut active.stream, &mut self.cable, config_fixed)
        {
            Ok(SessionStatus::Active) => Ok(()),
            Ok(SessionStatus::Closed) => {
                self.finish_session("client disconnected");
                Ok(())
            }
            Err(SessionError::Cable(e)) => {
                self.finish_session("cable fault");
                Err(InstanceError::Cable(e))
            }
            Err(e) => {
                log::error!("session failed: {}", e);
                self.finish_session("session error");
                Ok(())
            }
        }
    }

    fn finish_session(&mut self, why: &str) {
        if let Some(active) = self.active.take() {
            let (rx, tx, commands) = active.session.stats();
            log::info!(
                "session from {} over ({}): rx={} tx={} commands={}",
                active.peer,
                why,
                rx,
                tx,
                commands
            );
            self.lock.refresh(active.peer.ip(), Instant::now());
        }
    }
}
