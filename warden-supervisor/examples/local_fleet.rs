//! Local fleet example
//!
//! Supervises three in-process workers through the in-memory registry. The
//! `flaky` worker crashes every eighth heartbeat; watch the monitor notice and
//! restart it. Press Ctrl-C to shut everything down.
//!
//! Configuration is read from `warden.toml` / `WARDEN_*` variables, e.g.
//! `WARDEN_LIFECYCLE__HEALTH_CHECK_INTERVAL=5s`.

use std::sync::Arc;
use std::time::Duration;
use warden_core::agent::AgentStatus;
use warden_core::config::WardenConfig;
use warden_supervisor::{InMemoryRegistry, LifecycleEventKind, LifecycleManager, LoggingHook};

const WORKERS: [(&str, &str); 3] = [
    ("indexer", "Document indexer"),
    ("summarizer", "Summarizer"),
    ("flaky", "Flaky crawler"),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,warden_supervisor=debug")
            }),
        )
        .init();

    let config = WardenConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Falling back to default configuration");
        WardenConfig::default()
    });
    let heartbeat_every =
        (config.lifecycle.health_check_interval / 2).max(Duration::from_millis(100));

    let registry = Arc::new(InMemoryRegistry::new());
    for (id, name) in WORKERS {
        registry.register(id, name).await;
    }

    let manager = Arc::new(LifecycleManager::new(config.lifecycle, registry.clone())?);
    for kind in LifecycleEventKind::ALL {
        manager.on(kind, Arc::new(LoggingHook)).await;
    }

    let discovered = manager.initialize().await?;
    println!("Supervising {} agents (Ctrl-C to stop)\n", discovered);

    for (id, _) in WORKERS {
        if !manager.start_agent(id, None, true).await {
            tracing::error!(agent_id = id, "Initial start failed");
        }
    }

    // Workers report in; the flaky one periodically crashes
    let heartbeats = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_every);
            let mut tick: u64 = 0;
            loop {
                ticker.tick().await;
                tick += 1;

                for (id, _) in WORKERS {
                    if let Err(e) = registry.heartbeat(id).await {
                        tracing::warn!(agent_id = id, error = %e, "Heartbeat rejected");
                    }
                }

                if tick % 8 == 0 {
                    println!("flaky: simulated crash");
                    if let Err(e) = registry.set_status("flaky", AgentStatus::Failed).await {
                        tracing::warn!(agent_id = "flaky", error = %e, "Crash simulation failed");
                    }
                }
            }
        })
    };

    let reporter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(15)).await;
                let mut info: Vec<_> =
                    manager.get_all_lifecycle_info().await.into_iter().collect();
                info.sort_by(|a, b| a.0.cmp(&b.0));

                println!(
                    "\n{:<12} {:<10} {:>7} {:>9} {:>9}",
                    "agent", "state", "starts", "restarts", "failures"
                );
                for (id, agent) in info {
                    println!(
                        "{:<12} {:<10} {:>7} {:>9} {:>9}",
                        id,
                        agent.state.as_str(),
                        agent.metrics.start_count,
                        agent.metrics.restart_count,
                        agent.metrics.failure_count
                    );
                }
                println!();
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    heartbeats.abort();
    reporter.abort();

    let report = manager.shutdown().await?;
    println!("Stopped {}/{} agents", report.stopped, report.total);

    Ok(())
}
