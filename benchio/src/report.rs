//! Reduces phase responses into latency and throughput statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use serde::Serialize;
use yansi::Paint;

use crate::executor::Response;

/// Percentiles printed in reports, from highest to lowest.
pub const REPORTED_PERCENTILES: [u8; 7] = [100, 99, 90, 75, 50, 25, 0];

/// The kind of operation performed in a phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Operation {
    /// Object uploads.
    Write,
    /// Object downloads.
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => f.write_str("Write"),
            Operation::Read => f.write_str("Read"),
        }
    }
}

/// Collects the responses of one phase.
#[derive(Debug)]
pub struct Aggregator {
    operation: Operation,
    object_size: u64,
    start: Instant,
    bytes_transmitted: u64,
    error_count: u64,
    latencies: Vec<f64>,
}

impl Aggregator {
    /// Starts the phase clock for `expected` responses of `operation`.
    pub fn new(operation: Operation, object_size: u64, expected: u64) -> Self {
        Self {
            operation,
            object_size,
            start: Instant::now(),
            bytes_transmitted: 0,
            error_count: 0,
            latencies: Vec::with_capacity(usize::try_from(expected).unwrap_or_default()),
        }
    }

    /// Records one response. Failed responses only count towards the error total.
    pub fn record(&mut self, response: &Response) {
        if response.error.is_some() {
            self.error_count += 1;
        } else {
            self.bytes_transmitted += self.object_size;
            self.latencies.push(response.duration.as_secs_f64());
        }
    }

    /// Responses recorded so far.
    pub fn recorded(&self) -> u64 {
        self.error_count + self.latencies.len() as u64
    }

    /// Bytes of successful operations recorded so far.
    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted
    }

    /// Time since the phase started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the phase clock and sorts the latencies.
    pub fn finish(mut self) -> Report {
        let total_duration = self.start.elapsed();
        self.latencies.sort_unstable_by(f64::total_cmp);

        Report {
            operation: self.operation,
            bytes_transmitted: self.bytes_transmitted,
            error_count: self.error_count,
            latencies: self.latencies,
            total_duration,
        }
    }
}

/// The statistics of one completed phase.
#[derive(Clone, Debug)]
pub struct Report {
    /// The operation performed in the phase.
    pub operation: Operation,
    /// Bytes moved by successful operations.
    pub bytes_transmitted: u64,
    /// Operations that failed.
    pub error_count: u64,
    /// Latencies of successful operations in seconds, sorted ascending.
    pub latencies: Vec<f64>,
    /// Wall-clock time of the whole phase.
    pub total_duration: Duration,
}

impl Report {
    /// Operations recorded in the phase, failed or not.
    pub fn operations(&self) -> u64 {
        self.latencies.len() as u64 + self.error_count
    }

    /// The nearest-rank-below latency percentile, or `None` without successful operations.
    ///
    /// `p` selects index `floor(p / 100 * count)`; `p >= 100` selects the maximum and `p <= 0`
    /// the minimum. There is no interpolation between neighbors.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let last = self.latencies.len().checked_sub(1)?;
        let index = if p >= 100.0 {
            last
        } else if p > 0.0 {
            ((p / 100.0 * self.latencies.len() as f64) as usize).min(last)
        } else {
            0
        };

        Some(self.latencies[index])
    }

    /// Throughput over the whole phase in bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transmitted as f64 / secs
        } else {
            0.0
        }
    }

    /// Successful operations per second over the whole phase.
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.latencies.len() as f64 / secs
        } else {
            0.0
        }
    }

    /// A serializable digest without the raw latency list.
    pub fn summary(&self) -> PhaseSummary {
        let percentiles = REPORTED_PERCENTILES
            .iter()
            .filter_map(|&p| Some((format!("p{p}"), self.percentile(p.into())?)))
            .collect();

        PhaseSummary {
            operation: self.operation,
            operations: self.operations(),
            bytes_transmitted: self.bytes_transmitted,
            error_count: self.error_count,
            total_duration: self.total_duration,
            throughput: self.throughput(),
            ops_per_second: self.ops_per_second(),
            percentiles,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.operation;
        let mib = self.bytes_transmitted as f64 / (1024.0 * 1024.0);

        writeln!(
            f,
            "{} {} {}",
            "Results Summary for".bold(),
            op.bold().blue(),
            "Operation(s)".bold()
        )?;
        writeln!(f, "Total Transferred: {mib:0.3} MB")?;
        writeln!(
            f,
            "Total Throughput:  {:0.2} MB/s ({:.2}/s)",
            self.throughput() / (1024.0 * 1024.0),
            ByteSize::b(self.throughput() as u64)
        )?;
        writeln!(
            f,
            "Total Duration:    {:0.3} s",
            self.total_duration.as_secs_f64()
        )?;
        if self.error_count > 0 {
            writeln!(
                f,
                "Number of Errors:  {}",
                self.error_count.bold().red()
            )?;
        } else {
            writeln!(f, "Number of Errors:  0")?;
        }

        if self.latencies.is_empty() {
            return Ok(());
        }

        writeln!(f, "------------------------------------")?;
        for p in REPORTED_PERCENTILES {
            let label = match p {
                100 => "Max:      ".to_owned(),
                0 => "Min:      ".to_owned(),
                p => format!("{p}th %ile:"),
            };
            if let Some(latency) = self.percentile(p.into()) {
                writeln!(f, "{op} times {label} {latency:0.3} s")?;
            }
        }

        Ok(())
    }
}

/// The serialized form of a [`Report`].
#[derive(Clone, Debug, Serialize)]
pub struct PhaseSummary {
    /// The operation performed in the phase.
    pub operation: Operation,
    /// Operations recorded, failed or not.
    pub operations: u64,
    /// Bytes moved by successful operations.
    pub bytes_transmitted: u64,
    /// Operations that failed.
    pub error_count: u64,
    /// Wall-clock time of the whole phase.
    #[serde(with = "humantime_serde")]
    pub total_duration: Duration,
    /// Bytes per second over the whole phase.
    pub throughput: f64,
    /// Successful operations per second.
    pub ops_per_second: f64,
    /// Latency percentiles in seconds keyed as `p50`, `p99`, etc.
    pub percentiles: BTreeMap<String, f64>,
}
