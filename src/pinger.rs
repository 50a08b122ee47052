//! Per-transport probe stream accounting.
//!
//! A `Pinger` decides when the next probe is due, tracks outstanding probes
//! in an ordered window, consumes echoes, and produces aggregate loss and
//! latency figures. It performs no I/O and reads no clock of its own: every
//! operation takes the caller's current tick, so the same code drives both
//! transports and runs deterministically under test.

use std::collections::VecDeque;

use crate::packet::ProbePacket;

/// Aggregate snapshot for one reporting period.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PingStatistic {
    /// Probes emitted.
    pub total_packet: u32,
    /// Probes confirmed timed out without an echo.
    pub packet_lost: u32,
    /// Echoed probes contributing latency samples.
    pub available_packet: u32,
    /// Sum of round-trip millis over the available samples.
    pub latency_total: u32,
    pub max_latency: u32,
    pub min_latency: u32,
}

/// Measurement engine for one transport.
pub struct Pinger {
    interval: u64,
    timeout: u64,

    next_send_time: u64,
    next_seq: u32,
    // Acknowledged flags for outstanding probes, oldest first. A slot's age
    // is its distance from the back times the probe interval.
    window: VecDeque<bool>,

    total_packet: u32,
    packet_lost: u32,
    available_packet: u32,
    latency_total: u32,
    max_latency: u32,
    min_latency: u32,
}

impl Pinger {
    /// `interval` and `timeout` are in milliseconds and immutable for the
    /// pinger's lifetime. `timeout` must be at least `interval` for the
    /// window math to be meaningful.
    pub fn new(interval: u64, timeout: u64) -> Self {
        assert!(interval > 0, "probe interval must be nonzero");
        assert!(timeout >= interval, "probe timeout must be >= interval");

        Self {
            interval,
            timeout,
            next_send_time: 0,
            next_seq: 0,
            window: VecDeque::new(),
            total_packet: 0,
            packet_lost: 0,
            available_packet: 0,
            latency_total: 0,
            max_latency: 0,
            min_latency: u32::MAX,
        }
    }

    /// Emits the next probe if it is due, trimming timed-out window slots
    /// first. Calls before the deadline are no-ops, and at most one probe is
    /// produced per call no matter how far past the deadline `now` is; the
    /// caller must poll at a cadence finer than the probe interval.
    pub fn update(&mut self, now: u64) -> Option<ProbePacket> {
        if now < self.next_send_time {
            return None;
        }

        while !self.window.is_empty() && self.window.len() as u64 * self.interval >= self.timeout {
            if self.window.pop_front() == Some(false) {
                self.packet_lost += 1;
            }
        }

        let packet = ProbePacket {
            seq: self.next_seq,
            send_time: now,
        };
        self.next_seq = self.next_seq.wrapping_add(1);

        self.window.push_back(false);

        self.total_packet += 1;
        self.next_send_time = now + self.interval;

        Some(packet)
    }

    /// Consumes an echoed probe, using the caller's receipt time `now` for
    /// the round-trip sample. Echoes for sequence numbers outside the window
    /// (stale, duplicate or never sent) and for already-acknowledged slots
    /// are ignored.
    pub fn recv(&mut self, packet: &ProbePacket, now: u64) {
        // Wrapping subtraction keeps this correct across the u32 seq wrap.
        let in_flight = self.next_seq.wrapping_sub(packet.seq) as usize;
        if in_flight == 0 || in_flight > self.window.len() {
            return;
        }

        let offset = self.window.len() - in_flight;
        if self.window[offset] {
            return;
        }

        let elapsed = now.wrapping_sub(packet.send_time) as u32;

        self.window[offset] = true;
        self.available_packet += 1;
        self.latency_total += elapsed;
        self.max_latency = self.max_latency.max(elapsed);
        self.min_latency = self.min_latency.min(elapsed);
    }

    /// Snapshot of the running counters. Max and min read as zero while no
    /// sample has arrived, so the sentinel never leaks into a report.
    pub fn get_statistic(&self) -> PingStatistic {
        PingStatistic {
            total_packet: self.total_packet,
            packet_lost: self.packet_lost,
            available_packet: self.available_packet,
            latency_total: self.latency_total,
            max_latency: if self.available_packet == 0 {
                0
            } else {
                self.max_latency
            },
            min_latency: if self.available_packet == 0 {
                0
            } else {
                self.min_latency
            },
        }
    }

    /// Restarts the statistics window. Sequence numbers and send cadence
    /// continue where they were; only the counters and the outstanding
    /// window are cleared.
    pub fn reset(&mut self) {
        self.window.clear();

        self.total_packet = 0;
        self.packet_lost = 0;
        self.available_packet = 0;
        self.latency_total = 0;
        self.max_latency = 0;
        self.min_latency = u32::MAX;
    }
}
