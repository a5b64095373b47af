use anyhow::Context;
use futures::StreamExt;
use mcp_manager::health::HealthCheckOptions;
use mcp_manager::server::{MonitorOptions, StartOptions, TickOutcome};
use mcp_manager::{ManagerConfig, McpManager, ServerConfig};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

// Usage: cargo run --example supervise -- <name> <command> [args...]
// Without arguments a `cat` server named "echo" is supervised.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to a file so they do not interleave with the demo output.
    // Set RUST_LOG=mcp_manager=debug to see every lifecycle step.
    let file_appender = tracing_appender::rolling::never(std::env::temp_dir(), "mcp-manager-demo.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(writer)
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "echo".to_string());
    let command = args.next().unwrap_or_else(|| "cat".to_string());
    let rest: Vec<String> = args.collect();

    let manager = McpManager::new(ManagerConfig::from_env())?;
    manager.install_shutdown_hook();

    if manager.registry().find_server(&name)?.is_none() {
        manager.add_server(ServerConfig::new(&name, &command).with_args(rest))?;
        println!("Registered '{}'", name);
    }

    let handle = manager
        .start(&name, StartOptions::default())
        .await
        .with_context(|| format!("starting '{}'", name))?;
    println!("'{}' runs as pid {} ({})", name, handle.pid, handle.command.join(" "));

    let report = manager.check_health(&name, HealthCheckOptions::default()).await?;
    println!("\n=== Health: {} (score {:.2}) ===", report.status, report.score);
    for check in &report.checks {
        println!("- {:<22} {:<9} {}", check.probe, check.status, check.message);
    }

    println!("\n=== Monitoring (3 ticks, Ctrl-C stops) ===");
    let options = MonitorOptions {
        names: Some(vec![name.clone()]),
        interval: Duration::from_secs(1),
        ..MonitorOptions::default()
    };
    let mut ticks = manager.monitor(options).take(3);
    while let Some(tick) = ticks.next().await {
        for server in &tick.servers {
            match &server.outcome {
                TickOutcome::Checked(report) => println!(
                    "#{} {}: {} {:.2} failing={:?}",
                    tick.sequence, server.server, report.status, report.score, report.failing
                ),
                TickOutcome::Failed { message } => {
                    println!("#{} {}: check failed: {}", tick.sequence, server.server, message)
                }
            }
        }
    }

    if let Some(summary) = manager.health_summary(&name) {
        println!(
            "\n{} checks, average score {:.2}, last status {}",
            summary.checks, summary.average_score, summary.last_status
        );
    }

    manager.stop(&name, false, None).await?;
    println!("Stopped '{}'", name);

    for event in manager.events().all_events(None)? {
        println!("{} {:?} pid={:?}", event.timestamp, event.event, event.pid);
    }

    Ok(())
}
