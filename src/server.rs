//! Server session manager: accepts stream connections, echoes both
//! transports, and reaps dead or idle sessions.
//!
//! All relay work is event-driven; the periodic scan only sweeps the
//! session table. A session marked dead stays in the table until the next
//! scan removes it, and an idle session is first closed and marked, then
//! removed one scan later.

use std::io::{self, Read, Write};
use std::net::{self, SocketAddr};
use std::time::Duration;

use log::{debug, error, info};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};

use crate::epoch::Epoch;

const LISTENER_TOKEN: Token = Token(0);
const DATAGRAM_TOKEN: Token = Token(1);
// Session tokens are slot indices offset past the fixed tokens.
const SESSION_TOKEN_BASE: usize = 2;

const SCAN_INTERVAL_MS: u64 = 1_000;

const IDLE_TIMEOUT_DEFAULT_MS: u64 = 60_000;
const IDLE_TIMEOUT_MIN_MS: u64 = 100;

const EVENT_CAPACITY: usize = 256;
const RECV_BUFFER_SIZE: usize = 65_536;

/// Configuration for a [`Server`] object.
#[derive(Clone)]
pub struct Config {
    /// Milliseconds without inbound data after which a session is
    /// force-closed.
    ///
    /// Minimum value: 100 \
    /// Default value: 60,000
    pub idle_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_ms: IDLE_TIMEOUT_DEFAULT_MS,
        }
    }
}

impl Config {
    fn validate(&self) {
        assert!(
            self.idle_timeout_ms >= IDLE_TIMEOUT_MIN_MS,
            "invalid server configuration: idle_timeout_ms < {}",
            IDLE_TIMEOUT_MIN_MS
        );
    }
}

// One accepted stream connection. The session exclusively owns its socket;
// the session table exclusively owns the session.
struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    last_alive: u64,
    dead: bool,
}

impl Session {
    fn close(&mut self) {
        let _ = self.stream.shutdown(net::Shutdown::Both);
        self.dead = true;
    }
}

/// A dualping server.
pub struct Server {
    config: Config,
    epoch: Epoch,
    poll: Poll,

    listener: TcpListener,
    datagram: UdpSocket,

    // Index-stable slot arena; a session's slot doubles as its poll token,
    // and vacated slots are reused by later accepts.
    sessions: Vec<Option<Session>>,

    next_scan_time: u64,

    recv_buffer: Box<[u8]>,
}

impl Server {
    /// Equivalent to calling [`Server::bind_with_config`] with default
    /// configuration.
    pub fn bind(bind_addr: SocketAddr) -> io::Result<Self> {
        Self::bind_with_config(bind_addr, Default::default())
    }

    /// Binds the stream listener at the provided address and the datagram
    /// socket at the same address and port. Errors encountered during
    /// socket initialization are forwarded to the caller.
    pub fn bind_with_config(bind_addr: SocketAddr, config: Config) -> io::Result<Self> {
        config.validate();

        let epoch = Epoch::new();
        let poll = Poll::new()?;

        let mut listener = TcpListener::bind(bind_addr)?;
        // Port 0 resolves at bind time; the datagram socket must share the
        // resolved port, not the requested one.
        let local_addr = listener.local_addr()?;
        let mut datagram = UdpSocket::bind(local_addr)?;

        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        poll.registry()
            .register(&mut datagram, DATAGRAM_TOKEN, Interest::READABLE)?;

        Ok(Self {
            config,
            epoch,
            poll,
            listener,
            datagram,
            sessions: Vec::new(),
            next_scan_time: 0,
            recv_buffer: vec![0; RECV_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    /// Returns the local address shared by both transports.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns the number of live sessions in the table.
    ///
    /// *Note*: Dead sessions linger until the next scan removes them.
    pub fn session_count(&self) -> usize {
        self.sessions.iter().flatten().count()
    }

    /// Drives the poll loop until a listener-level fault occurs. Such a
    /// fault is fatal: a server that cannot accept new work has no useful
    /// degraded mode, so the error is returned for the process to exit on.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        loop {
            self.step(&mut events)?;
        }
    }

    fn step(&mut self, events: &mut Events) -> io::Result<()> {
        let now = self.epoch.time_now_ms();

        if now >= self.next_scan_time {
            self.scan_sessions(now);
            while self.next_scan_time <= now {
                self.next_scan_time += SCAN_INTERVAL_MS;
            }
        }

        let now = self.epoch.time_now_ms();
        let timeout = Duration::from_millis(self.next_scan_time.saturating_sub(now));

        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.on_listener_readable()?,
                DATAGRAM_TOKEN => self.on_datagram_readable()?,
                Token(token) => self.on_session_readable(token - SESSION_TOKEN_BASE),
            }
        }

        Ok(())
    }

    fn on_listener_readable(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.accept_session(stream, peer),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("server stream socket error: {}", err);
                    return Err(err);
                }
            }
        }
    }

    fn accept_session(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let slot = match self.sessions.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                self.sessions.push(None);
                self.sessions.len() - 1
            }
        };

        let token = Token(SESSION_TOKEN_BASE + slot);
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            error!("failed to register session socket: {}", err);
            return;
        }

        self.sessions[slot] = Some(Session {
            stream,
            peer,
            last_alive: self.epoch.time_now_ms(),
            dead: false,
        });

        info!(
            "accept session from {}, current session count {}",
            peer,
            self.session_count()
        );
    }

    fn on_session_readable(&mut self, slot: usize) {
        let now = self.epoch.time_now_ms();

        let Some(session) = self.sessions.get_mut(slot).and_then(Option::as_mut) else {
            // A wakeup for a slot the scan has already vacated.
            return;
        };

        if session.dead {
            return;
        }

        loop {
            match session.stream.read(&mut self.recv_buffer) {
                Ok(0) => {
                    error!("remote {} close socket", session.peer);
                    session.close();
                    return;
                }
                Ok(n) => {
                    session.last_alive = now;

                    match session.stream.write(&self.recv_buffer[..n]) {
                        Ok(_) => {}
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            // Echo offers no buffering beyond the socket's.
                        }
                        Err(err) => {
                            error!("socket {} error: {}", session.peer, err);
                            session.close();
                            return;
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("socket {} error: {}", session.peer, err);
                    session.close();
                    return;
                }
            }
        }
    }

    fn on_datagram_readable(&mut self) -> io::Result<()> {
        loop {
            match self.datagram.recv_from(&mut self.recv_buffer) {
                Ok((n, from)) => {
                    // Pure echo; no session state for datagrams at all.
                    let _ = self.datagram.send_to(&self.recv_buffer[..n], from);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("server datagram socket error: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Removes sessions that died since the last scan and closes sessions
    /// idle past the threshold; those are removed on the scan after.
    fn scan_sessions(&mut self, now: u64) {
        for slot in 0..self.sessions.len() {
            let Some(session) = self.sessions[slot].as_mut() else {
                continue;
            };

            if session.dead {
                let mut session = self.sessions[slot].take().unwrap();
                let _ = self.poll.registry().deregister(&mut session.stream);
                continue;
            }

            if session.last_alive + self.config.idle_timeout_ms <= now {
                debug!("session {} idle, closing", session.peer);
                session.close();
            }
        }
    }
}
