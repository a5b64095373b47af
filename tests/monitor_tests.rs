use futures::StreamExt;
use mcp_manager::health::probes::{LOG_ERRORS, PROCESS_RUNNING};
use mcp_manager::server::{MonitorOptions, TickOutcome};
use mcp_manager::{HealthStatus, ManagerConfig, McpManager, ServerConfig};
use std::time::{Duration, Instant};

fn manager(home: &std::path::Path) -> McpManager {
    let manager = McpManager::new(ManagerConfig::with_home(home)).unwrap();
    manager.add_server(ServerConfig::new("alpha", "cat")).unwrap();
    manager.add_server(ServerConfig::new("beta", "cat")).unwrap();
    manager.add_server(ServerConfig::new("idle", "cat")).unwrap();
    manager.set_enabled("idle", false).unwrap();
    manager
}

#[tokio::test]
async fn test_ticks_are_numbered_and_spaced() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    let options = MonitorOptions {
        interval: Duration::from_millis(50),
        probes: Some(vec![LOG_ERRORS.to_string()]),
        ..MonitorOptions::default()
    };

    let started = Instant::now();
    let ticks: Vec<_> = manager.monitor(options).take(3).collect().await;

    assert_eq!(
        ticks.iter().map(|t| t.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(started.elapsed() >= Duration::from_millis(100));

    // Disabled servers are left out when no names are given
    let names: Vec<&str> = ticks[0].servers.iter().map(|s| s.server.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(ticks[0].alerts().count(), 0);
}

#[tokio::test]
async fn test_failing_server_only_marks_its_own_entry() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    let options = MonitorOptions {
        names: Some(vec!["alpha".to_string(), "ghost".to_string()]),
        interval: Duration::from_millis(10),
        threshold: 0.8,
        probes: Some(vec![PROCESS_RUNNING.to_string()]),
    };

    let tick = manager.monitor(options).next().await.unwrap();

    assert_eq!(tick.servers.len(), 2);
    match &tick.servers[0].outcome {
        TickOutcome::Checked(report) => {
            assert_eq!(report.status, HealthStatus::Unhealthy);
            assert!(report.below_threshold);
            assert_eq!(report.failing, vec![PROCESS_RUNNING]);
        }
        other => panic!("expected a report for alpha, got {:?}", other),
    }
    match &tick.servers[1].outcome {
        TickOutcome::Failed { message } => assert!(message.contains("ghost")),
        other => panic!("expected ghost to fail, got {:?}", other),
    }
    assert_eq!(tick.alerts().count(), 2);

    let json = serde_json::to_value(&tick).unwrap();
    assert_eq!(json["servers"][0]["outcome"]["result"], "checked");
    assert_eq!(json["servers"][1]["outcome"]["result"], "failed");
}

#[tokio::test]
async fn test_monitor_checks_are_summarized_without_details() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    let options = MonitorOptions {
        names: Some(vec!["beta".to_string()]),
        interval: Duration::from_millis(10),
        probes: Some(vec![LOG_ERRORS.to_string()]),
        ..MonitorOptions::default()
    };
    let _ = manager.monitor(options).take(2).collect::<Vec<_>>().await;

    let summary = manager.health_summary("beta").unwrap();
    assert_eq!(summary.checks, 2);
    assert_eq!(summary.healthy, 2);
    assert_eq!(summary.last_status, HealthStatus::Healthy);
}
