//! Process memory (RSS) sampling and pressure classification.
//!
//! Reads `/proc/self/status` on Linux (zero-cost, no unsafe) and returns a
//! classified pressure level. The chunk driver (§4.7) samples this once per
//! chunk to drive its memory-pressure check (§4.6): 80% of budget is a
//! warning, 90% triggers early hibernation.

/// Bytes per MiB.
const MIB: u64 = 1024 * 1024;

/// Memory pressure levels relative to a caller-supplied budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    /// RSS below the warning threshold — normal operation.
    Ok,
    /// RSS above the warning threshold — log, but keep running.
    Warning,
    /// RSS above the critical threshold — evict/hibernate.
    Critical,
    /// RSS above the fatal threshold — abort the run.
    Fatal,
}

impl MemoryPressure {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Fatal => 3,
        }
    }

    #[must_use]
    pub const fn from_u64(v: u64) -> Self {
        match v {
            1 => Self::Warning,
            2 => Self::Critical,
            3 => Self::Fatal,
            _ => Self::Ok,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

/// Snapshot of process memory state at a point in time.
#[derive(Debug, Clone)]
pub struct MemorySample {
    /// Resident Set Size in bytes (physical RAM used by this process).
    pub rss_bytes: Option<u64>,
    /// Classified pressure level based on the supplied thresholds.
    pub pressure: MemoryPressure,
    /// Best-effort error if RSS could not be read.
    pub error: Option<String>,
}

/// Absolute RSS thresholds (in MB) used to classify pressure.
/// A threshold of 0 disables that level.
#[derive(Debug, Clone, Copy)]
pub struct MemoryThresholds {
    pub warning_mb: u64,
    pub critical_mb: u64,
    pub fatal_mb: u64,
}

impl MemoryThresholds {
    /// Thresholds expressed as 80%/90%/100% of a declared memory budget,
    /// matching the driver's memory-pressure check (§4.6).
    #[must_use]
    pub fn from_budget_bytes(budget_bytes: u64) -> Self {
        let budget_mb = budget_bytes / MIB;
        Self {
            warning_mb: budget_mb * 80 / 100,
            critical_mb: budget_mb * 90 / 100,
            fatal_mb: budget_mb,
        }
    }
}

/// Classify memory pressure from RSS bytes and threshold MBs.
#[must_use]
pub const fn classify_pressure(rss_bytes: u64, thresholds: MemoryThresholds) -> MemoryPressure {
    let fatal = thresholds.fatal_mb.saturating_mul(MIB);
    let critical = thresholds.critical_mb.saturating_mul(MIB);
    let warning = thresholds.warning_mb.saturating_mul(MIB);

    if fatal > 0 && rss_bytes > fatal {
        MemoryPressure::Fatal
    } else if critical > 0 && rss_bytes > critical {
        MemoryPressure::Critical
    } else if warning > 0 && rss_bytes > warning {
        MemoryPressure::Warning
    } else {
        MemoryPressure::Ok
    }
}

/// Read current process RSS from `/proc/self/status` (Linux).
///
/// Parses the `VmRSS:` line and converts kB to bytes.
/// Returns an error string on non-Linux platforms or if the file cannot be
/// parsed.
pub fn read_rss_bytes() -> Result<u64, String> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status")
            .map_err(|e| format!("read /proc/self/status: {e}"))?;

        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let trimmed = rest.trim();
                // Format: "123456 kB"
                let kb_str = trimmed
                    .strip_suffix("kB")
                    .or_else(|| trimmed.strip_suffix("KB"))
                    .unwrap_or(trimmed)
                    .trim();
                let kb: u64 = kb_str
                    .parse()
                    .map_err(|e| format!("parse VmRSS '{kb_str}': {e}"))?;
                return Ok(kb * 1024);
            }
        }
        Err("VmRSS line not found in /proc/self/status".to_string())
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err("RSS reading not implemented on this platform".to_string())
    }
}

/// Sample current process memory usage and classify pressure against
/// `thresholds`.
#[must_use]
pub fn sample_memory(thresholds: MemoryThresholds) -> MemorySample {
    match read_rss_bytes() {
        Ok(rss_bytes) => {
            let pressure = classify_pressure(rss_bytes, thresholds);
            MemorySample {
                rss_bytes: Some(rss_bytes),
                pressure,
                error: None,
            }
        }
        Err(e) => MemorySample {
            rss_bytes: None,
            pressure: MemoryPressure::Ok,
            error: Some(e),
        },
    }
}
