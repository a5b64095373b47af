#![cfg(unix)]
// Raises SIGINT in this test process, so it lives in its own test binary.

use async_trait::async_trait;
use futures::StreamExt;
use mcp_manager::health::{HealthProbe, ProbeContext, ProbeOutcome, ProbeSpec};
use mcp_manager::server::MonitorOptions;
use mcp_manager::{ManagerConfig, McpManager, ServerConfig};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::time::Duration;

struct SlowProbe;

#[async_trait]
impl HealthProbe for SlowProbe {
    async fn check(&self, _ctx: &ProbeContext<'_>) -> ProbeOutcome {
        tokio::time::sleep(Duration::from_millis(600)).await;
        ProbeOutcome::healthy("slow but fine")
    }
}

#[tokio::test]
async fn test_interrupt_during_a_tick_ends_the_stream_after_it() {
    let dir = tempfile::tempdir().unwrap();
    let manager = McpManager::new(ManagerConfig::with_home(dir.path())).unwrap();
    manager.add_server(ServerConfig::new("alpha", "cat")).unwrap();
    manager
        .health()
        .register(
            ProbeSpec::new("slow", "takes most of a second", Duration::from_secs(2)),
            Arc::new(SlowProbe),
        )
        .unwrap();

    let options = MonitorOptions {
        interval: Duration::from_millis(20),
        probes: Some(vec!["slow".to_string()]),
        ..MonitorOptions::default()
    };
    let ticks = manager.monitor(options).take(5);

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        kill(Pid::this(), Signal::SIGINT).unwrap();
    });

    let ticks: Vec<_> = tokio::time::timeout(Duration::from_secs(10), ticks.collect())
        .await
        .expect("monitor did not finish");

    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].sequence, 1);
    assert_eq!(ticks[0].alerts().count(), 0);
}
