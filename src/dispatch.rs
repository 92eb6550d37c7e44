use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tokio::time;

use crate::engine::RawScan;
use crate::error::{EngineError, ScanError};
use crate::pool::EngineHandle;

/// Argument string that turns on OS fingerprinting; it needs root.
pub const OS_DETECTION: &str = "-O";

/// Scan behaviour a caller can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScanMode {
    #[default]
    Fast,
    Version,
    Full,
    Os,
    Exploits,
}

impl ScanMode {
    pub const ALL: [ScanMode; 5] = [
        ScanMode::Fast,
        ScanMode::Version,
        ScanMode::Full,
        ScanMode::Os,
        ScanMode::Exploits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Fast => "fast",
            ScanMode::Version => "version",
            ScanMode::Full => "full",
            ScanMode::Os => "os",
            ScanMode::Exploits => "exploits",
        }
    }

    /// Engine arguments for this mode.
    pub fn arguments(&self) -> &'static str {
        match self {
            ScanMode::Fast => "-F",
            ScanMode::Version => "-sV",
            ScanMode::Full => "-p-",
            ScanMode::Os => OS_DETECTION,
            ScanMode::Exploits => "-sV --script=vulscan/vulscan.nse",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or(ScanError::InvalidScanType)
    }
}

/// Engine arguments for a scan type given by name.
pub fn resolve_arguments(scan_type: &str) -> Result<&'static str, ScanError> {
    Ok(scan_type.parse::<ScanMode>()?.arguments())
}

/// Whether the engine must run with elevated privileges for `arguments`.
pub fn requires_elevation(arguments: &str) -> bool {
    arguments == OS_DETECTION
}

/// Run one scan on `handle`, bounded by `timeout`.
///
/// Waits for the handle if another scan is running on it. The engine call is
/// dropped on timeout, which also kills a spawned engine process.
pub async fn dispatch(
    handle: &EngineHandle,
    target: &str,
    mode: ScanMode,
    timeout: Duration,
) -> Result<RawScan, ScanError> {
    let arguments = mode.arguments();
    let elevated = requires_elevation(arguments);

    let mut engine = handle.lock().await;
    tracing::info!(worker = %handle.worker(), target, mode = %mode, elevated, "starting scan");
    let start = Instant::now();

    let raw = match time::timeout(timeout, engine.scan(target, arguments, elevated)).await {
        Ok(res) => res?,
        Err(_) => return Err(EngineError::Timeout(timeout).into()),
    };

    tracing::info!(
        worker = %handle.worker(),
        target,
        mode = %mode,
        hosts = raw.hosts.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "scan finished"
    );
    Ok(raw)
}

/// Same as [`dispatch`] with the scan type given by name.
pub async fn dispatch_named(
    handle: &EngineHandle,
    target: &str,
    scan_type: &str,
    timeout: Duration,
) -> Result<RawScan, ScanError> {
    let mode = scan_type.parse::<ScanMode>()?;
    dispatch(handle, target, mode, timeout).await
}
