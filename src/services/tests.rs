use super::*;
use crate::config::{ReadinessProbe, Role, ServiceConfig};
use crate::error::ClusterError;
use crate::service::{ReadySignal, Service};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn process_config(name: &str, command: &str, args: &[&str], readiness: ReadinessProbe) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        roles: vec![Role::Node],
        command: command.to_string(),
        args: args.iter().map(|arg| arg.to_string()).collect(),
        env: Vec::new(),
        readiness,
        stop_timeout_seconds: 2,
    }
}

fn tracked_signal() -> (ReadySignal, Arc<AtomicBool>) {
    let flag = Arc::new(AtomicBool::new(false));
    let signal = {
        let flag = Arc::clone(&flag);
        ReadySignal::new(move || flag.store(true, Ordering::SeqCst))
    };
    (signal, flag)
}

#[tokio::test]
async fn test_process_becomes_ready_and_stops_on_cancel() {
    let service = Arc::new(ProcessService::new(process_config(
        "sleeper",
        "sleep",
        &["30"],
        ReadinessProbe::Immediate,
    )));
    let (signal, ready) = tracked_signal();
    let ctx = CancellationToken::new();

    let handle = {
        let service = Arc::clone(&service);
        let ctx = ctx.clone();
        tokio::spawn(async move { service.run(ctx, signal).await })
    };

    timeout(Duration::from_secs(5), async {
        while !ready.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("process should become ready");

    ctx.cancel();
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("SIGTERM should stop the process")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_process_exiting_during_startup_is_an_error() {
    let service = ProcessService::new(process_config(
        "broken",
        "false",
        &[],
        ReadinessProbe::Delay { millis: 5_000 },
    ));
    let (signal, ready) = tracked_signal();

    let err = timeout(
        Duration::from_secs(5),
        service.run(CancellationToken::new(), signal),
    )
    .await
    .expect("startup failure should be reported before the probe delay")
    .unwrap_err();

    assert!(!ready.load(Ordering::SeqCst));
    assert!(err.to_string().contains("exited during startup"));
}

#[tokio::test]
async fn test_missing_executable_fails_to_spawn() {
    let service = ProcessService::new(process_config(
        "ghost",
        "/nonexistent/bin/ghost",
        &[],
        ReadinessProbe::Immediate,
    ));
    let (signal, ready) = tracked_signal();

    let err = service
        .run(CancellationToken::new(), signal)
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Service { .. }));
    assert_eq!(err.failed_service(), Some("ghost"));
    assert!(!ready.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_non_zero_exit_after_ready_is_a_runtime_error() {
    let service = ProcessService::new(process_config(
        "flaky",
        "sh",
        &["-c", "sleep 0.2; exit 3"],
        ReadinessProbe::Immediate,
    ));
    let (signal, ready) = tracked_signal();

    let err = timeout(
        Duration::from_secs(5),
        service.run(CancellationToken::new(), signal),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(ready.load(Ordering::SeqCst));
    assert!(err.to_string().contains("process exited with"));
}

#[tokio::test]
async fn test_tcp_probe_waits_for_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let retry = RetryConfig {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        exponential_backoff: true,
    };
    let service = Arc::new(ProcessService::with_retry(
        process_config("etcd", "sleep", &["30"], ReadinessProbe::Tcp { address: address.clone() }),
        retry,
    ));
    assert_eq!(service.config().readiness, ReadinessProbe::Tcp { address });
    let (signal, ready) = tracked_signal();
    let ctx = CancellationToken::new();
    let handle = {
        let service = Arc::clone(&service);
        let ctx = ctx.clone();
        tokio::spawn(async move { service.run(ctx, signal).await })
    };

    timeout(Duration::from_secs(5), async {
        while !ready.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("tcp probe should pass against a live listener");

    ctx.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_file_probe_cancelled_before_ready() {
    let dir = tempfile::tempdir().unwrap();
    let service = ProcessService::new(process_config(
        "kustomizer",
        "sleep",
        &["30"],
        ReadinessProbe::File {
            path: dir.path().join("never-created"),
        },
    ));
    let (signal, ready) = tracked_signal();
    let ctx = CancellationToken::new();

    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.cancel();
        })
    };

    let result = timeout(Duration::from_secs(5), service.run(ctx, signal))
        .await
        .expect("cancellation should interrupt the probe");
    canceller.await.unwrap();

    assert!(result.is_ok());
    assert!(!ready.load(Ordering::SeqCst));
    assert_eq!(service.name(), "kustomizer");
}

#[tokio::test]
async fn test_process_ignoring_sigterm_is_killed_after_stop_timeout() {
    let mut config = process_config(
        "stubborn",
        "sh",
        &["-c", "trap '' TERM; exec sleep 30"],
        ReadinessProbe::Delay { millis: 200 },
    );
    config.stop_timeout_seconds = 1;
    let service = ProcessService::new(config);
    let (signal, ready) = tracked_signal();
    let ctx = CancellationToken::new();

    let canceller = {
        let ctx = ctx.clone();
        let ready = Arc::clone(&ready);
        tokio::spawn(async move {
            while !ready.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            ctx.cancel();
        })
    };

    let err = timeout(Duration::from_secs(10), service.run(ctx, signal))
        .await
        .expect("SIGKILL should end the process")
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, ClusterError::Service { .. }));
    assert!(err.to_string().contains("stop timeout"));
}
