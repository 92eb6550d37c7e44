//! [`ScanEngine`] backed by the `nmap` command line tool.
//!
//! Each run spawns `nmap -oX - <arguments> <target>` and decodes the XML
//! report from stdout. Elevated runs are prefixed with a configurable program,
//! `sudo -n` by default, so a missing sudo rule fails fast instead of waiting
//! on a password prompt.
//!
//! A plain run is killed when its future is dropped (timeout). An elevated run
//! gets SIGTERM instead: SIGKILL would only reach the elevation wrapper and
//! leave the root-owned nmap running, while sudo relays SIGTERM to it.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::engine::{EngineFactory, RawHost, RawOsMatch, RawPort, RawScan, RawScript, ScanEngine};
use crate::error::EngineError;

pub struct NmapEngine {
    binary: PathBuf,
    elevate_with: Vec<String>,
    last_command_line: Option<String>,
    scans_run: u64,
}

impl NmapEngine {
    /// Locate `program` (a path, or a name looked up on `PATH`).
    pub fn new(program: &str, elevate_with: Vec<String>) -> Result<Self, EngineError> {
        let binary = locate(program).ok_or_else(|| EngineError::NotFound(program.to_string()))?;
        Ok(Self {
            binary,
            elevate_with,
            last_command_line: None,
            scans_run: 0,
        })
    }

    /// Command line of the most recent scan, if any.
    pub fn last_command_line(&self) -> Option<&str> {
        self.last_command_line.as_deref()
    }

    pub fn scans_run(&self) -> u64 {
        self.scans_run
    }

    /// Full argv for one run.
    pub fn command_args(&self, target: &str, arguments: &str, elevated: bool) -> Vec<String> {
        let mut argv = Vec::new();
        if elevated {
            argv.extend(self.elevate_with.iter().cloned());
        }
        argv.push(self.binary.display().to_string());
        argv.extend(["-oX".to_string(), "-".to_string()]);
        argv.extend(arguments.split_whitespace().map(str::to_string));
        argv.push(target.to_string());
        argv
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn scan(
        &mut self,
        target: &str,
        arguments: &str,
        elevated: bool,
    ) -> Result<RawScan, EngineError> {
        // nmap would read a leading hyphen as another option.
        if target.starts_with('-') {
            return Err(EngineError::Failed {
                status: "refused".into(),
                stderr: format!("target may not start with '-': {target}"),
            });
        }

        let argv = self.command_args(target, arguments, elevated);
        let command_line = argv.join(" ");
        tracing::debug!(command = %command_line, "spawning nmap");
        self.last_command_line = Some(command_line);
        self.scans_run += 1;

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(!elevated)
            .spawn()?;
        let terminate = TerminateOnDrop {
            pid: if elevated { child.id() } else { None },
        };
        let output = child.wait_with_output().await?;
        terminate.disarm();

        tracing::debug!(
            scans_run = self.scans_run(),
            command = self.last_command_line().unwrap_or_default(),
            status = %output.status,
            "nmap exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::Failed {
                status: output.status.to_string(),
                stderr: if stderr.is_empty() {
                    "no error output".into()
                } else {
                    stderr
                },
            });
        }

        parse_report(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Sends SIGTERM to a still-running elevated nmap when the scan is abandoned.
struct TerminateOnDrop {
    pid: Option<u32>,
}

impl TerminateOnDrop {
    fn disarm(mut self) {
        self.pid = None;
    }
}

impl Drop for TerminateOnDrop {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        tracing::debug!(pid, "terminating abandoned elevated nmap run");
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
}

/// Builds [`NmapEngine`]s for the pool.
#[derive(Debug, Clone)]
pub struct NmapFactory {
    pub program: String,
    pub elevate_with: Vec<String>,
}

impl NmapFactory {
    /// `elevate_with` is split on whitespace; an empty string runs elevated
    /// scans without a prefix.
    pub fn new(program: impl Into<String>, elevate_with: &str) -> Self {
        Self {
            program: program.into(),
            elevate_with: elevate_with.split_whitespace().map(str::to_string).collect(),
        }
    }
}

impl EngineFactory for NmapFactory {
    fn create(&self) -> Result<Box<dyn ScanEngine>, EngineError> {
        Ok(Box::new(NmapEngine::new(
            &self.program,
            self.elevate_with.clone(),
        )?))
    }
}

fn locate(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Decode an nmap XML report (`-oX`) into the raw scan model.
///
/// Hosts keep report order. Ports are grouped per protocol in order of first
/// appearance. Host scripts come before port scripts.
pub fn parse_report(xml: &str) -> Result<RawScan, EngineError> {
    let run: NmapRun =
        quick_xml::de::from_str(xml).map_err(|e| EngineError::Parse(e.to_string()))?;

    let mut hosts = Vec::with_capacity(run.hosts.len());
    for host in run.hosts {
        let Some(address) = host.primary_address() else {
            tracing::debug!("skipping host without address in nmap report");
            continue;
        };

        let mut raw = RawHost {
            address,
            state: host.status.map(|s| s.state).unwrap_or_default(),
            ..RawHost::default()
        };

        if let Some(hostscript) = host.hostscript {
            raw.scripts.extend(hostscript.scripts.into_iter().map(XmlScript::into_raw));
        }

        for port in host.ports.map(|p| p.ports).unwrap_or_default() {
            raw.scripts.extend(port.scripts.into_iter().map(XmlScript::into_raw));
            let (service, version) = match port.service {
                Some(s) => (s.name, s.version),
                None => (None, None),
            };
            raw.protocol_mut(&port.protocol).ports.push(RawPort {
                port: port.portid,
                state: port.state.state,
                service,
                version,
            });
        }

        raw.os_matches = host.os.map(|os| {
            os.matches
                .into_iter()
                .map(|m| RawOsMatch {
                    name: m.name,
                    accuracy: m.accuracy,
                })
                .collect()
        });

        hosts.push(raw);
    }

    Ok(RawScan { hosts })
}

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<XmlHost>,
}

#[derive(Debug, Deserialize)]
struct XmlHost {
    status: Option<XmlStatus>,
    #[serde(rename = "address", default)]
    addresses: Vec<XmlAddress>,
    ports: Option<XmlPorts>,
    os: Option<XmlOs>,
    hostscript: Option<XmlHostScript>,
}

impl XmlHost {
    fn primary_address(&self) -> Option<String> {
        self.addresses
            .iter()
            .find(|a| a.addrtype == "ipv4" || a.addrtype == "ipv6")
            .or_else(|| self.addresses.first())
            .map(|a| a.addr.clone())
    }
}

#[derive(Debug, Deserialize)]
struct XmlStatus {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct XmlAddress {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype", default)]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct XmlPorts {
    #[serde(rename = "port", default)]
    ports: Vec<XmlPort>,
}

#[derive(Debug, Deserialize)]
struct XmlPort {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: u16,
    state: XmlPortState,
    service: Option<XmlService>,
    #[serde(rename = "script", default)]
    scripts: Vec<XmlScript>,
}

#[derive(Debug, Deserialize)]
struct XmlPortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct XmlService {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlScript {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@output", default)]
    output: String,
}

impl XmlScript {
    fn into_raw(self) -> RawScript {
        RawScript {
            id: self.id,
            output: self.output,
        }
    }
}

#[derive(Debug, Deserialize)]
struct XmlOs {
    #[serde(rename = "osmatch", default)]
    matches: Vec<XmlOsMatch>,
}

#[derive(Debug, Deserialize)]
struct XmlOsMatch {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@accuracy", default)]
    accuracy: String,
}

#[derive(Debug, Deserialize)]
struct XmlHostScript {
    #[serde(rename = "script", default)]
    scripts: Vec<XmlScript>,
}
