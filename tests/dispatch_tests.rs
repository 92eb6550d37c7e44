mod common;

use std::time::Duration;

use common::{localhost_http, stub_factory, Behavior};
use nmap_gate::dispatch::{self, requires_elevation, resolve_arguments, ScanMode};
use nmap_gate::error::{EngineError, ScanError};
use nmap_gate::pool::{EnginePool, WorkerId};

#[test]
fn fixed_argument_table() {
    assert_eq!(resolve_arguments("fast").unwrap(), "-F");
    assert_eq!(resolve_arguments("version").unwrap(), "-sV");
    assert_eq!(resolve_arguments("full").unwrap(), "-p-");
    assert_eq!(resolve_arguments("os").unwrap(), "-O");
    assert_eq!(
        resolve_arguments("exploits").unwrap(),
        "-sV --script=vulscan/vulscan.nse"
    );
}

#[test]
fn unknown_scan_types_rejected() {
    for s in ["stealth", "", "FAST", " fast", "Os"] {
        assert!(matches!(
            resolve_arguments(s),
            Err(ScanError::InvalidScanType)
        ));
    }
}

#[test]
fn only_os_detection_elevates() {
    for mode in ScanMode::ALL {
        assert_eq!(
            requires_elevation(mode.arguments()),
            mode == ScanMode::Os,
            "{mode}"
        );
    }
    // Equal by value, not by where the string came from.
    let built = String::from("-") + "O";
    assert!(requires_elevation(&built));
}

#[tokio::test]
async fn os_scan_is_invoked_elevated() {
    let (factory, calls, _) = stub_factory(Behavior::Report(localhost_http()));
    let pool = EnginePool::new(factory);
    let handle = pool.acquire(WorkerId(0)).unwrap();

    dispatch::dispatch_named(&handle, "127.0.0.1", "os", Duration::from_secs(5))
        .await
        .unwrap();
    dispatch::dispatch_named(&handle, "127.0.0.1", "version", Duration::from_secs(5))
        .await
        .unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].arguments, "-O");
    assert!(calls[0].elevated);
    assert_eq!(calls[1].arguments, "-sV");
    assert!(!calls[1].elevated);
}

#[tokio::test]
async fn invalid_scan_type_never_reaches_engine() {
    let (factory, calls, _) = stub_factory(Behavior::Report(localhost_http()));
    let pool = EnginePool::new(factory);
    let handle = pool.acquire(WorkerId(0)).unwrap();

    let err = dispatch::dispatch_named(&handle, "127.0.0.1", "ping", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidScanType));
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn engine_failure_passes_message_through() {
    let (factory, _, _) = stub_factory(Behavior::Fail(
        "You requested a scan type which requires root privileges.".into(),
    ));
    let pool = EnginePool::new(factory);
    let handle = pool.acquire(WorkerId(0)).unwrap();

    let err = dispatch::dispatch(&handle, "127.0.0.1", ScanMode::Os, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("requires root privileges"));
}

#[tokio::test]
async fn slow_scan_times_out() {
    let (factory, _, _) = stub_factory(Behavior::Sleep(Duration::from_secs(30)));
    let pool = EnginePool::new(factory);
    let handle = pool.acquire(WorkerId(0)).unwrap();

    let err = dispatch::dispatch(&handle, "127.0.0.1", ScanMode::Full, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ScanError::Engine(EngineError::Timeout(d)) if d == Duration::from_millis(50)
    ));
}
