//! Client orchestrator: keeps one probe stream alive per transport and
//! turns the pingers' output into periodic reports.
//!
//! A single mio poll drives everything. The 100 ms tick (expressed as the
//! poll timeout) advances the stream reconnect machine, asks both pingers
//! for due probes and flushes the once-a-minute report; readiness events
//! deliver connect results and echoes in between ticks. Within one tick the
//! reconnect check always precedes probe emission, which always precedes
//! the report flush, so a probe emitted in the tick that crosses the report
//! deadline still lands in the period being reported.

use std::io::{self, Read, Write};
use std::net::{self, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, error, info, warn};
use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};

use crate::epoch::Epoch;
use crate::packet::{self, ProbePacket};
use crate::pinger::Pinger;
use crate::report::{ReportRow, ReportSink};

const STREAM_TOKEN: Token = Token(0);
const DATAGRAM_TOKEN: Token = Token(1);

const TICK_INTERVAL_MS: u64 = 100;
const RECONNECT_DELAY_MS: u64 = 10_000;
const REPORT_INTERVAL_MS: u64 = 60_000;

const PROBE_INTERVAL_DEFAULT_MS: u64 = 1_000;
const PROBE_TIMEOUT_DEFAULT_MS: u64 = 10_000;

const EVENT_CAPACITY: usize = 64;
const RECV_BUFFER_SIZE: usize = 2048;

/// Configuration for a [`Client`] object.
#[derive(Clone)]
pub struct Config {
    /// Address the server listens on, for both transports.
    pub server_addr: SocketAddr,

    /// Milliseconds between probes on each transport.
    ///
    /// Default value: 1,000
    pub probe_interval_ms: u64,

    /// Milliseconds after which an unacknowledged probe counts as lost.
    ///
    /// Must be at least `probe_interval_ms`. \
    /// Default value: 10,000
    pub probe_timeout_ms: u64,

    /// Path of the rolling statistics report file. `None` disables the
    /// report sink; the operational log is written either way.
    pub report_path: Option<PathBuf>,
}

impl Config {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            probe_interval_ms: PROBE_INTERVAL_DEFAULT_MS,
            probe_timeout_ms: PROBE_TIMEOUT_DEFAULT_MS,
            report_path: None,
        }
    }

    fn validate(&self) {
        assert!(
            self.probe_interval_ms > 0,
            "invalid client configuration: probe_interval_ms == 0"
        );
        assert!(
            self.probe_timeout_ms >= self.probe_interval_ms,
            "invalid client configuration: probe_timeout_ms < probe_interval_ms"
        );
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StreamState {
    NotConnected,
    Connecting,
    Connected,
}

/// A dualping client.
pub struct Client {
    config: Config,
    epoch: Epoch,
    poll: Poll,

    // The stream socket is owned-and-replaceable: once it has errored or
    // seen EOF it is discarded, and a fresh socket is created for the next
    // connect attempt.
    stream: Option<TcpStream>,
    stream_state: StreamState,
    stream_acc: Vec<u8>,
    next_retry_time: u64,

    datagram: UdpSocket,

    stream_pinger: Pinger,
    datagram_pinger: Pinger,

    next_tick_time: u64,
    next_report_time: u64,
    report_sink: Option<ReportSink>,

    recv_buffer: Box<[u8]>,
}

fn bind_datagram_socket(server_addr: &SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr: SocketAddr = if server_addr.is_ipv4() {
        (net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (net::Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(bind_addr)?;
    socket.connect(*server_addr)?;

    Ok(socket)
}

impl Client {
    /// Binds the datagram socket and opens the report sink if one is
    /// configured. No connect attempt is made until [`Client::run`]; the
    /// first tick issues it immediately.
    pub fn new(config: Config) -> io::Result<Self> {
        config.validate();

        let epoch = Epoch::new();
        let poll = Poll::new()?;

        let mut datagram = bind_datagram_socket(&config.server_addr)?;
        poll.registry()
            .register(&mut datagram, DATAGRAM_TOKEN, Interest::READABLE)?;

        let report_sink = match &config.report_path {
            Some(path) => Some(ReportSink::open(path.clone())?),
            None => None,
        };

        let stream_pinger = Pinger::new(config.probe_interval_ms, config.probe_timeout_ms);
        let datagram_pinger = Pinger::new(config.probe_interval_ms, config.probe_timeout_ms);

        Ok(Self {
            config,
            epoch,
            poll,
            stream: None,
            stream_state: StreamState::NotConnected,
            stream_acc: Vec::new(),
            next_retry_time: 0,
            datagram,
            stream_pinger,
            datagram_pinger,
            next_tick_time: 0,
            next_report_time: REPORT_INTERVAL_MS,
            report_sink,
            recv_buffer: vec![0; RECV_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    /// Returns the server address this client probes.
    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    /// Drives the poll loop forever. Only reactor-level faults escape;
    /// per-connection and per-packet faults are handled in place.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        loop {
            self.step(&mut events)?;
        }
    }

    fn step(&mut self, events: &mut Events) -> io::Result<()> {
        let now = self.epoch.time_now_ms();

        if now >= self.next_tick_time {
            self.on_tick(now);
            while self.next_tick_time <= now {
                self.next_tick_time += TICK_INTERVAL_MS;
            }
        }

        let now = self.epoch.time_now_ms();
        let timeout = Duration::from_millis(self.next_tick_time.saturating_sub(now));

        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        for event in events.iter() {
            match event.token() {
                STREAM_TOKEN => self.on_stream_event(event.is_readable()),
                DATAGRAM_TOKEN => self.on_datagram_readable(),
                _ => {}
            }
        }

        Ok(())
    }

    fn on_tick(&mut self, now: u64) {
        if self.stream_state == StreamState::NotConnected && now >= self.next_retry_time {
            self.start_connect();
        }

        let stream_probe = self.stream_pinger.update(now);
        let datagram_probe = self.datagram_pinger.update(now);

        // A stream probe generated while disconnected is dropped, not
        // queued; it still counts toward the period's totals.
        if let Some(probe) = stream_probe {
            if self.stream_state == StreamState::Connected {
                self.write_stream_probe(&probe, now);
            }
        }

        if let Some(probe) = datagram_probe {
            self.send_datagram_probe(&probe);
        }

        if now >= self.next_report_time {
            self.flush_report(now);
        }
    }

    fn start_connect(&mut self) {
        debug!("connecting to {}", self.config.server_addr);

        match TcpStream::connect(self.config.server_addr) {
            Ok(mut stream) => {
                let registered = self.poll.registry().register(
                    &mut stream,
                    STREAM_TOKEN,
                    Interest::READABLE | Interest::WRITABLE,
                );

                match registered {
                    Ok(()) => {
                        self.stream = Some(stream);
                        self.stream_state = StreamState::Connecting;
                    }
                    Err(err) => {
                        error!("failed to register stream socket: {}", err);
                        self.next_retry_time = self.epoch.time_now_ms() + RECONNECT_DELAY_MS;
                    }
                }
            }
            Err(err) => {
                error!("connect failed, {}", err);
                self.next_retry_time = self.epoch.time_now_ms() + RECONNECT_DELAY_MS;
            }
        }
    }

    fn on_stream_event(&mut self, readable: bool) {
        match self.stream_state {
            StreamState::Connecting => self.finish_connect(),
            StreamState::Connected => {
                if readable {
                    self.on_stream_readable();
                }
            }
            // A wakeup for a socket already discarded by an earlier event.
            StreamState::NotConnected => {}
        }
    }

    /// Resolves a pending connect attempt once the socket signals
    /// readiness. A connect in flight reports `NotConnected` from
    /// `peer_addr` and stays pending.
    fn finish_connect(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };

        let result = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Err(err),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotConnected => return,
                Err(err) => Err(err),
            },
        };

        match result {
            Ok(()) => {
                info!("ping server connected");
                self.stream_state = StreamState::Connected;
                // Statistics restart cleanly on every new connection.
                self.stream_pinger.reset();
            }
            Err(err) => {
                error!("connect failed, {}", err);
                let now = self.epoch.time_now_ms();
                self.discard_stream(now);
            }
        }
    }

    /// Drops the stream socket (a faulted socket is never reused) and
    /// schedules the next connect attempt one backoff delay out.
    fn discard_stream(&mut self, now: u64) {
        if let Some(mut stream) = self.stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }

        self.stream_acc.clear();
        self.stream_state = StreamState::NotConnected;
        self.next_retry_time = now + RECONNECT_DELAY_MS;
    }

    fn on_stream_readable(&mut self) {
        enum Outcome {
            Drained,
            Eof,
            Fault(io::Error),
        }

        let mut outcome = Outcome::Drained;

        {
            let Some(stream) = self.stream.as_mut() else {
                return;
            };

            loop {
                match stream.read(&mut self.recv_buffer) {
                    Ok(0) => {
                        outcome = Outcome::Eof;
                        break;
                    }
                    Ok(n) => self.stream_acc.extend_from_slice(&self.recv_buffer[..n]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        outcome = Outcome::Fault(err);
                        break;
                    }
                }
            }
        }

        // Echoes that arrived ahead of a fault still count.
        self.drain_stream_frames();

        let now = self.epoch.time_now_ms();
        match outcome {
            Outcome::Drained => {}
            Outcome::Eof => {
                error!("stream socket: remote EOF");
                self.discard_stream(now);
            }
            Outcome::Fault(err) => {
                error!("stream socket error: {}", err);
                self.discard_stream(now);
            }
        }
    }

    /// Consumes whole frames from the stream accumulation buffer. An
    /// undecodable frame is logged and discarded; the buffer then advances
    /// one whole frame, nothing more.
    fn drain_stream_frames(&mut self) {
        while self.stream_acc.len() >= packet::PACKET_SIZE {
            let now = self.epoch.time_now_ms();

            match ProbePacket::read(&self.stream_acc[..packet::PACKET_SIZE]) {
                Some(probe) => self.stream_pinger.recv(&probe, now),
                None => warn!("stream echo did not decode, dropping frame"),
            }

            self.stream_acc.drain(..packet::PACKET_SIZE);
        }
    }

    fn write_stream_probe(&mut self, probe: &ProbePacket, now: u64) {
        let mut frame = [0u8; packet::PACKET_SIZE];
        probe.write(&mut frame);

        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        match stream.write(&frame) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                // No send queueing; the probe will count as lost.
                debug!("stream write would block, probe dropped");
            }
            Err(err) => {
                error!("stream socket error: {}", err);
                self.discard_stream(now);
            }
        }
    }

    fn send_datagram_probe(&mut self, probe: &ProbePacket) {
        let mut frame = [0u8; packet::PACKET_SIZE];
        probe.write(&mut frame);

        match self.datagram.send(&frame) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => {
                error!("datagram socket error: {}", err);
                self.recreate_datagram_socket();
            }
        }
    }

    fn on_datagram_readable(&mut self) {
        loop {
            match self.datagram.recv(&mut self.recv_buffer) {
                Ok(n) => {
                    let now = self.epoch.time_now_ms();
                    match ProbePacket::read(&self.recv_buffer[..n]) {
                        Some(probe) => self.datagram_pinger.recv(&probe, now),
                        None => warn!("datagram echo did not decode, dropping"),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("datagram socket error: {}", err);
                    self.recreate_datagram_socket();
                    break;
                }
            }
        }
    }

    /// The datagram pinger is not reset here; there is no connection to
    /// restart, only a socket to replace.
    fn recreate_datagram_socket(&mut self) {
        let _ = self.poll.registry().deregister(&mut self.datagram);

        let replaced = bind_datagram_socket(&self.config.server_addr).and_then(|mut socket| {
            self.poll
                .registry()
                .register(&mut socket, DATAGRAM_TOKEN, Interest::READABLE)?;
            Ok(socket)
        });

        match replaced {
            Ok(socket) => self.datagram = socket,
            Err(err) => error!("failed to recreate datagram socket: {}", err),
        }
    }

    fn flush_report(&mut self, now: u64) {
        self.next_report_time = now + REPORT_INTERVAL_MS;

        let stream_stat = self.stream_pinger.get_statistic();
        let datagram_stat = self.datagram_pinger.get_statistic();

        let rows = [
            ReportRow::new("TCP", &stream_stat),
            ReportRow::new("UDP", &datagram_stat),
        ];

        for row in rows {
            info!(
                "{} PING, packet loss {}/{} ({:.2}%), avg {:.2}ms, max {}ms, min {}ms",
                row.label,
                row.lost,
                row.total,
                row.loss_percent,
                f64::from(row.avg_latency_ms),
                row.max_latency_ms,
                row.min_latency_ms,
            );

            if let Some(sink) = self.report_sink.as_mut() {
                if let Err(err) = sink.write_line(&row.sink_line()) {
                    warn!("failed to write report line: {}", err);
                }
            }
        }

        self.stream_pinger.reset();
        self.datagram_pinger.reset();
    }
}
