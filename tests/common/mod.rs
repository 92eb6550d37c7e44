#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nmap_gate::engine::{RawHost, RawPort, RawScan, ScanEngine};
use nmap_gate::error::EngineError;

/// One recorded call to a stub engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub engine: usize,
    pub target: String,
    pub arguments: String,
    pub elevated: bool,
}

pub enum Behavior {
    Report(RawScan),
    Fail(String),
    Sleep(Duration),
}

/// Scan engine that records calls and answers with a canned behaviour.
pub struct StubEngine {
    pub id: usize,
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub behavior: Arc<Behavior>,
}

#[async_trait]
impl ScanEngine for StubEngine {
    async fn scan(
        &mut self,
        target: &str,
        arguments: &str,
        elevated: bool,
    ) -> Result<RawScan, EngineError> {
        self.calls.lock().unwrap().push(Call {
            engine: self.id,
            target: target.to_string(),
            arguments: arguments.to_string(),
            elevated,
        });
        match self.behavior.as_ref() {
            Behavior::Report(raw) => Ok(raw.clone()),
            Behavior::Fail(msg) => Err(EngineError::Failed {
                status: "exit status: 1".into(),
                stderr: msg.clone(),
            }),
            Behavior::Sleep(d) => {
                tokio::time::sleep(*d).await;
                Ok(RawScan::default())
            }
        }
    }
}

/// Factory closure producing numbered stub engines sharing one call log.
pub fn stub_factory(
    behavior: Behavior,
) -> (
    impl Fn() -> Result<Box<dyn ScanEngine>, EngineError> + Send + Sync + 'static,
    Arc<Mutex<Vec<Call>>>,
    Arc<AtomicUsize>,
) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let created = Arc::new(AtomicUsize::new(0));
    let behavior = Arc::new(behavior);
    let (c, n) = (calls.clone(), created.clone());
    let factory = move || -> Result<Box<dyn ScanEngine>, EngineError> {
        let id = n.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubEngine {
            id,
            calls: c.clone(),
            behavior: behavior.clone(),
        }))
    };
    (factory, calls, created)
}

/// One up host with 80/tcp open running http.
pub fn localhost_http() -> RawScan {
    let mut host = RawHost {
        address: "127.0.0.1".into(),
        state: "up".into(),
        ..RawHost::default()
    };
    host.protocol_mut("tcp").ports.push(RawPort {
        port: 80,
        state: "open".into(),
        service: Some("http".into()),
        version: None,
    });
    RawScan { hosts: vec![host] }
}
