//! Alert engine demo binary.
//!
//! Wires the engine to the crate's in-memory reference collaborators
//! (`InMemoryEventBus`, `InMemoryStore`, `InMemoryChannelDirectory`) and
//! either replays events read as JSON lines from stdin or emits a small
//! built-in demo sequence, so the pipeline can be exercised without a real
//! bus/store/dispatcher deployment.
//!
//! # Usage
//!
//! ```bash
//! # Built-in demo events against a couple of seeded rules
//! cargo run
//!
//! # Replay real events: one JSON object per line, e.g.
//! # {"type": "router.disconnected", "source": "poller", "data": {"device_id": "rtr-1"}}
//! cargo run -- --stdin
//!
//! # Load rule definitions from a JSON file instead of the built-in set
//! cargo run -- --rules rules.json
//! ```

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sairen_os::bus::{EventBus, InMemoryEventBus};
use sairen_os::clock::SystemClock;
use sairen_os::config::EngineConfig;
use sairen_os::digest::DigestService;
use sairen_os::dispatcher::{Dispatcher, NoopDispatcher};
use sairen_os::engine::{AlertEngine, EngineSettings};
use sairen_os::model::{Condition, DigestConfig, DigestMode, Event, Operator, QuietHoursConfig, Rule, Severity};
use sairen_os::scheduler::{DigestScheduler, InMemoryChannelDirectory};
use sairen_os::store::{AlertStore, InMemoryStore};

#[derive(Parser, Debug)]
#[command(name = "alert-engine")]
#[command(about = "Alert engine decision pipeline demo")]
#[command(version)]
struct CliArgs {
    /// Read events as JSON lines from stdin instead of running the
    /// built-in demo sequence.
    #[arg(long)]
    stdin: bool,

    /// Load rule definitions from a JSON file (array of `Rule`) instead
    /// of the built-in seeded set.
    #[arg(long, value_name = "PATH")]
    rules: Option<String>,
}

fn seeded_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: "router-offline".into(),
            event_type: "router.disconnected".into(),
            severity: Severity::Critical,
            conditions: serde_json::to_value(Vec::<Condition>::new())
                .expect("empty condition list always serializes"),
            throttle_config: Some(serde_json::json!({
                "max_alerts": 3,
                "period_seconds": 300,
                "group_by_field": "device_id",
            })),
            quiet_hours_config: Some(serde_json::json!({
                "start_time": "22:00",
                "end_time": "07:00",
                "timezone": "UTC",
                "bypass_critical": true,
                "days_of_week": [],
            })),
            channels: vec!["ops-email".into()],
            enabled: true,
            name: "Router offline".into(),
            description: Some("A router stopped responding to polls.".into()),
        },
        Rule {
            id: "cpu-high".into(),
            event_type: "cpu.high".into(),
            severity: Severity::Warning,
            conditions: serde_json::to_value(vec![Condition {
                field: "usage_percent".into(),
                operator: Operator::GreaterThan,
                value: "90".into(),
            }])
            .expect("condition list always serializes"),
            throttle_config: Some(serde_json::json!({
                "max_alerts": 5,
                "period_seconds": 60,
                "group_by_field": "device_id",
            })),
            quiet_hours_config: None,
            channels: vec!["ops-webhook".into()],
            enabled: true,
            name: "High CPU usage".into(),
            description: None,
        },
    ]
}

fn demo_events() -> Vec<Event> {
    vec![
        Event::new(
            "router.disconnected",
            "poller",
            serde_json::json!({"device_id": "rtr-12"}),
        ),
        Event::new(
            "cpu.high",
            "poller",
            serde_json::json!({"device_id": "host-7", "usage_percent": 97}),
        ),
        Event::new(
            "cpu.high",
            "poller",
            serde_json::json!({"device_id": "host-7", "usage_percent": 40}),
        ),
    ]
}

fn load_rules(path: &str) -> Result<Vec<Rule>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading rules file {path}"))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing rules file {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = EngineConfig::load();

    info!("alert engine starting, rule cache / throttle / storm / quiet-hours / digest pipeline");

    let clock = Arc::new(SystemClock);
    let bus = Arc::new(InMemoryEventBus::new());
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = Arc::new(NoopDispatcher);

    let rules = match args.rules.as_deref() {
        Some(path) => load_rules(path)?,
        None => seeded_rules(),
    };
    for rule in rules {
        store.put_rule(rule);
    }

    let directory = Arc::new(InMemoryChannelDirectory::new());
    directory.register(
        "ops-email",
        DigestConfig {
            mode: DigestMode::Hourly,
            schedule: Some("0".into()),
            timezone: "UTC".into(),
            bypass_critical: true,
            send_empty: false,
            severities: vec![],
        },
        None::<QuietHoursConfig>,
        "email",
    );

    let digest_service = Arc::new(DigestService::new(
        clock.clone(),
        store.clone() as Arc<dyn AlertStore>,
        dispatcher.clone() as Arc<dyn Dispatcher>,
        bus.clone() as Arc<dyn EventBus>,
    ));
    let scheduler = DigestScheduler::new(clock.clone(), digest_service.clone(), directory.clone());

    let engine = Arc::new(
        AlertEngine::new(
            clock,
            EngineSettings::from(&config),
            bus.clone() as Arc<dyn EventBus>,
            store.clone() as Arc<dyn AlertStore>,
            dispatcher as Arc<dyn Dispatcher>,
        )
        .with_digest(digest_service, directory.clone()),
    );
    engine.start().await;
    scheduler.schedule_next("ops-email").await;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received Ctrl+C, shutting down");
        shutdown_signal.cancel();
    });

    if args.stdin {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("reading stdin")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    bus.publish(event).await;
                }
                Err(e) => tracing::warn!(error = %e, line, "skipping malformed event line"),
            }
        }
    } else {
        for event in demo_events() {
            bus.publish(event).await;
        }
        info!(
            alert_count = store.alerts_snapshot().len(),
            "demo events processed"
        );
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
            () = shutdown.cancelled() => {}
        }
    }

    scheduler.stop().await;
    engine.stop().await;
    info!("alert engine shutdown complete");
    Ok(())
}
