/// Utility functions and helpers
///
/// Per-client request accounting, formatting helpers for logs and
/// command-line output, and test logger setup.

use std::fmt::Write;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{ModbusError, ModbusResult};

/// Outcome and latency counters for the requests of one client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Failed requests whose response window expired
    pub timed_out_requests: u64,
    pub total_duration: Duration,
    /// Fastest successful request
    pub min_duration: Option<Duration>,
    /// Slowest successful request
    pub max_duration: Option<Duration>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one finished request
    pub fn record<T>(&mut self, outcome: &ModbusResult<T>, duration: Duration) {
        self.total_requests += 1;
        self.total_duration += duration;

        match outcome {
            Ok(_) => {
                self.successful_requests += 1;
                self.min_duration = Some(self.min_duration.map_or(duration, |min| min.min(duration)));
                self.max_duration = Some(self.max_duration.map_or(duration, |max| max.max(duration)));
            }
            Err(ModbusError::Timeout { .. }) => {
                self.failed_requests += 1;
                self.timed_out_requests += 1;
            }
            Err(_) => self.failed_requests += 1,
        }
    }

    /// Mean duration over all recorded requests
    pub fn average_duration(&self) -> Option<Duration> {
        u32::try_from(self.total_requests)
            .ok()
            .and_then(|count| self.total_duration.checked_div(count))
    }

    /// Get success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

/// Wall-clock timer around one request
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn start(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        trace!("Starting {}", operation_name);
        Self {
            start: Instant::now(),
            operation_name,
        }
    }

    /// Stop the timer and return duration
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        trace!("{} finished in {:?}", self.operation_name, duration);
        duration
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format bytes as space-separated uppercase hex pairs
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 3);
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02X}", byte);
        }
        out
    }

    /// Format register values as hex; unparsed (`-1`) values print as `????`
    pub fn registers_to_hex(registers: &[i32]) -> String {
        registers
            .iter()
            .map(|&r| u16::try_from(r).map_or_else(|_| "????".to_string(), |r| format!("{:04X}", r)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        match duration.as_millis() {
            ms @ 0..=999 => format!("{}ms", ms),
            1_000..=59_999 => format!("{:.2}s", duration.as_secs_f64()),
            ms => format!("{}m {:.1}s", ms / 60_000, (ms % 60_000) as f64 / 1000.0),
        }
    }

    /// Format a client's metrics as a small tree
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        let or_na = |duration: Option<Duration>| duration.map_or_else(|| "N/A".to_string(), format_duration);
        format!(
            "Requests: {}\n\
             ├─ Successful: {} ({:.1}%)\n\
             ├─ Failed: {} ({} timed out)\n\
             ├─ Average: {}\n\
             └─ Fastest / slowest: {} / {}",
            metrics.total_requests,
            metrics.successful_requests,
            metrics.success_rate(),
            metrics.failed_requests,
            metrics.timed_out_requests,
            or_na(metrics.average_duration()),
            or_na(metrics.min_duration),
            or_na(metrics.max_duration),
        )
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_outcomes() {
        let mut metrics = PerformanceMetrics::new();
        assert_eq!(metrics.average_duration(), None);

        metrics.record(&Ok(()), Duration::from_millis(100));
        metrics.record(&Ok(()), Duration::from_millis(200));
        metrics.record::<()>(&Err(ModbusError::timeout("read response", 150)), Duration::from_millis(150));
        metrics.record::<()>(&Err(ModbusError::protocol("invalid request")), Duration::from_millis(150));

        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.successful_requests, 2);
        assert_eq!(metrics.failed_requests, 2);
        assert_eq!(metrics.timed_out_requests, 1);
        assert_eq!(metrics.average_duration(), Some(Duration::from_millis(150)));
        assert_eq!(metrics.min_duration, Some(Duration::from_millis(100)));
        assert_eq!(metrics.max_duration, Some(Duration::from_millis(200)));
        assert_eq!(metrics.success_rate(), 50.0);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format::bytes_to_hex(&[0x01, 0x03, 0x10, 0xFF]), "01 03 10 FF");
        assert_eq!(format::bytes_to_hex(&[]), "");
        assert_eq!(format::registers_to_hex(&[0x1234, -1, 0xAA]), "1234 ???? 00AA");
        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format::format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format::format_duration(Duration::from_millis(61_500)), "1m 1.5s");
    }

    #[test]
    fn test_format_metrics() {
        let mut metrics = PerformanceMetrics::new();
        assert!(format::format_metrics(&metrics).contains("Fastest / slowest: N/A / N/A"));

        metrics.record(&Ok(()), Duration::from_millis(20));
        let table = format::format_metrics(&metrics);
        assert!(table.starts_with("Requests: 1"));
        assert!(table.contains("Successful: 1 (100.0%)"));
        assert!(table.contains("Failed: 0 (0 timed out)"));
    }

    #[test]
    fn test_timer_reports_elapsed() {
        logging::init_test_logger();
        let timer = OperationTimer::start("noop");
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.stop() >= Duration::from_millis(2));
    }
}
