//! Statistics report derivation and the rolling report file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::pinger::PingStatistic;

// Size cap per report file; on overflow the file rolls to `<path>.1`.
const REPORT_FILE_LEN_MAX: u64 = 1024 * 1024;

/// One transport's derived figures for a reporting period.
pub struct ReportRow {
    pub label: &'static str,
    pub lost: u32,
    pub total: u32,
    pub loss_percent: f64,
    pub avg_latency_ms: u32,
    pub max_latency_ms: u32,
    pub min_latency_ms: u32,
}

impl ReportRow {
    pub fn new(label: &'static str, stat: &PingStatistic) -> Self {
        let total = stat.packet_lost + stat.available_packet;

        let loss_percent = if total == 0 {
            0.0
        } else {
            100.0 * f64::from(stat.packet_lost) / f64::from(total)
        };

        let avg_latency_ms = if stat.available_packet == 0 {
            0
        } else {
            stat.latency_total / stat.available_packet
        };

        Self {
            label,
            lost: stat.packet_lost,
            total,
            loss_percent,
            avg_latency_ms,
            max_latency_ms: stat.max_latency,
            min_latency_ms: stat.min_latency,
        }
    }

    /// Pipe-delimited machine line, one per transport per period.
    pub fn sink_line(&self) -> String {
        format!(
            "{}|{}|{}|{:.2}%|{:.2}|{}|{}",
            self.label,
            self.lost,
            self.total,
            self.loss_percent,
            f64::from(self.avg_latency_ms),
            self.max_latency_ms,
            self.min_latency_ms,
        )
    }
}

/// Append-only report file with size-based rollover.
///
/// When a line would push the file past the cap, the current file is renamed
/// to `<path>.1` (replacing any previous rollover) and a fresh file is
/// started, so at most two files exist at once.
pub struct ReportSink {
    path: PathBuf,
    file: File,
    written: u64,
    len_max: u64,
}

impl ReportSink {
    pub fn open(path: PathBuf) -> io::Result<Self> {
        Self::open_with_len_max(path, REPORT_FILE_LEN_MAX)
    }

    fn open_with_len_max(path: PathBuf, len_max: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            file,
            written,
            len_max,
        })
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.written + line.len() as u64 + 1 > self.len_max {
            self.rotate()?;
        }

        writeln!(self.file, "{}", line)?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        let mut rolled = self.path.clone().into_os_string();
        rolled.push(".1");
        fs::rename(&self.path, rolled)?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinger::PingStatistic;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("dualping-report-{}-{}", std::process::id(), name));
        path
    }

    #[test]
    fn derives_loss_percentage() {
        let stat = PingStatistic {
            total_packet: 10,
            packet_lost: 2,
            available_packet: 8,
            latency_total: 96,
            max_latency: 20,
            min_latency: 5,
        };

        let row = ReportRow::new("TCP", &stat);
        assert_eq!(row.total, 10);
        assert_eq!(row.loss_percent, 20.0);
        assert_eq!(row.avg_latency_ms, 12);
        assert_eq!(row.sink_line(), "TCP|2|10|20.00%|12.00|20|5");
    }

    #[test]
    fn zero_denominators_do_not_fault() {
        let row = ReportRow::new("UDP", &PingStatistic::default());
        assert_eq!(row.loss_percent, 0.0);
        assert_eq!(row.avg_latency_ms, 0);
        assert_eq!(row.sink_line(), "UDP|0|0|0.00%|0.00|0|0");
    }

    #[test]
    fn average_uses_integer_division() {
        let stat = PingStatistic {
            total_packet: 3,
            packet_lost: 0,
            available_packet: 3,
            latency_total: 10,
            max_latency: 5,
            min_latency: 2,
        };

        let row = ReportRow::new("UDP", &stat);
        assert_eq!(row.avg_latency_ms, 3);
        assert_eq!(row.sink_line(), "UDP|0|3|0.00%|3.00|5|2");
    }

    #[test]
    fn sink_rolls_over_by_size() {
        let path = temp_path("rollover");
        let rolled = {
            let mut p = path.clone().into_os_string();
            p.push(".1");
            PathBuf::from(p)
        };
        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(&rolled);

        let mut sink = ReportSink::open_with_len_max(path.clone(), 64).unwrap();
        let line = "TCP|0|60|0.00%|12.00|20|5";

        sink.write_line(line).unwrap();
        sink.write_line(line).unwrap();
        assert!(!rolled.exists());

        // A third line would exceed the cap and forces the roll.
        sink.write_line(line).unwrap();
        assert!(rolled.exists());

        let current = fs::read_to_string(&path).unwrap();
        assert_eq!(current, format!("{}\n", line));
        let previous = fs::read_to_string(&rolled).unwrap();
        assert_eq!(previous, format!("{}\n{}\n", line, line));

        let _ = fs::remove_file(&path);
        let _ = fs::remove_file(&rolled);
    }
}
