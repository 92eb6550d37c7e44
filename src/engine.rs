//! Interface to the external scan engine and the raw shape of what it reports.
use async_trait::async_trait;

use crate::error::EngineError;

/// A stateful connection to the external scanner.
///
/// `scan` takes `&mut self`: a handle runs one scan at a time and may keep
/// whatever it learns between runs.
#[async_trait]
pub trait ScanEngine: Send {
    async fn scan(
        &mut self,
        target: &str,
        arguments: &str,
        elevated: bool,
    ) -> Result<RawScan, EngineError>;
}

/// Builds fresh engines for the pool.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ScanEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn ScanEngine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn ScanEngine>, EngineError> {
        self()
    }
}

/// Everything the engine found in one run, in the order it reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScan {
    pub hosts: Vec<RawHost>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHost {
    pub address: String,
    pub state: String,
    pub protocols: Vec<RawProtocol>,
    /// Script outputs attached to the host, host-level first, then per port.
    pub scripts: Vec<RawScript>,
    /// `None` when the engine did not attempt OS detection for this host.
    pub os_matches: Option<Vec<RawOsMatch>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProtocol {
    pub name: String,
    pub ports: Vec<RawPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPort {
    pub port: u16,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawScript {
    pub id: String,
    pub output: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOsMatch {
    pub name: String,
    pub accuracy: String,
}

impl RawHost {
    /// Protocol block for `name`, created at the end if it is not there yet.
    pub fn protocol_mut(&mut self, name: &str) -> &mut RawProtocol {
        let idx = match self.protocols.iter().position(|p| p.name == name) {
            Some(idx) => idx,
            None => {
                self.protocols.push(RawProtocol {
                    name: name.to_string(),
                    ports: Vec::new(),
                });
                self.protocols.len() - 1
            }
        };
        &mut self.protocols[idx]
    }
}
