//! Turns raw engine output into the stable [`ScanResult`] schema.
use crate::engine::{RawHost, RawPort, RawProtocol, RawScan, RawScript};
use crate::types::{HostResult, OsMatch, PortResult, ProtocolResult, ScanResult};

/// Pulls vulnerability descriptions out of free-text script output.
///
/// Script output has no fixed format, so implementations are heuristics tied
/// to a particular script set.
pub trait VulnerabilityParser: Send + Sync {
    fn extract(&self, scripts: &[RawScript]) -> Vec<String>;
}

/// Reads the line-per-finding output of the `vulscan` NSE script.
#[derive(Debug, Clone, Copy, Default)]
pub struct VulscanParser;

impl VulscanParser {
    const SCRIPT_MARKER: &'static str = "vulscan";
    const SEPARATOR: &'static str = "----";
}

impl VulnerabilityParser for VulscanParser {
    fn extract(&self, scripts: &[RawScript]) -> Vec<String> {
        scripts
            .iter()
            .filter(|s| s.id.to_lowercase().contains(Self::SCRIPT_MARKER))
            .flat_map(|s| s.output.split('\n'))
            .filter(|line| !line.trim().is_empty() && !line.starts_with(Self::SEPARATOR))
            .map(|line| line.trim().to_string())
            .collect()
    }
}

pub struct Normalizer {
    vulnerabilities: Box<dyn VulnerabilityParser>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(VulscanParser)
    }
}

impl Normalizer {
    pub fn new(parser: impl VulnerabilityParser + 'static) -> Self {
        Self {
            vulnerabilities: Box::new(parser),
        }
    }

    pub fn normalize(&self, raw: RawScan, target: &str) -> ScanResult {
        ScanResult {
            target: target.to_string(),
            hosts: raw.hosts.into_iter().map(|h| self.host(h)).collect(),
        }
    }

    fn host(&self, host: RawHost) -> HostResult {
        let vulnerabilities = self.vulnerabilities.extract(&host.scripts);
        let mut protocols: Vec<_> = host.protocols.into_iter().map(protocol).collect();
        // Ordered by name so the layout does not depend on which port came first.
        protocols.sort_by(|a, b| a.name.cmp(&b.name));
        HostResult {
            ip: host.address,
            state: host.state,
            protocols,
            vulnerabilities: (!vulnerabilities.is_empty()).then_some(vulnerabilities),
            os_detection: host.os_matches.map(|matches| {
                matches
                    .into_iter()
                    .map(|m| OsMatch {
                        name: m.name,
                        accuracy: m.accuracy,
                    })
                    .collect()
            }),
        }
    }
}

fn protocol(proto: RawProtocol) -> ProtocolResult {
    ProtocolResult {
        name: proto.name,
        ports: proto.ports.into_iter().map(port).collect(),
    }
}

fn port(port: RawPort) -> PortResult {
    PortResult {
        port: port.port,
        state: port.state,
        service: port.service,
        // An empty version string means "not detected".
        version: port.version.filter(|v| !v.is_empty()),
    }
}
