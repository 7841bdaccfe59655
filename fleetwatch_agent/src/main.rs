//! Entry point for fleetwatch_agent. Parses args, wires the monitor service to the data
//! processor, and prints a performance report on exit.

mod collector;
mod sink;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use fleetwatch::clock::system_clock;
use fleetwatch::{
    Config, CycleOutcome, DataProcessor, MetricMonitor, MetricSource, MonitorService,
    RandomSource, TimeRange,
};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::info;

use collector::{link_bytes_per_sec, SysinfoSource};
use sink::JsonLines;

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
});

#[derive(Debug, Default, PartialEq)]
struct ParsedArgs {
    config: Option<PathBuf>,
    demo: bool,
    monitor_interval_ms: Option<u64>,
    buffer_interval_ms: Option<u64>,
    report: TimeRange,
    cycles: Option<u64>,
    help: bool,
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--config PATH|-c PATH] [--demo] [--monitor-interval-ms N] [--buffer-interval-ms N] [--report 1h|24h|7d] [--cycles N]"
    )
}

fn parse_num(flag: &str, v: Option<String>) -> Result<u64, String> {
    let v = v.ok_or_else(|| format!("{flag} requires a value"))?;
    v.parse::<u64>()
        .map_err(|_| format!("{flag} expects a number, got '{v}'"))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "fleetwatch_agent".into());
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        // --flag=value is accepted for every flag that takes a value
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = || inline.clone().or_else(|| it.next());
        match flag.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--demo" => parsed.demo = true,
            "--config" | "-c" => {
                parsed.config = Some(PathBuf::from(
                    value().ok_or_else(|| format!("{flag} requires a value"))?,
                ))
            }
            "--monitor-interval-ms" => {
                parsed.monitor_interval_ms = Some(parse_num(&flag, value())?)
            }
            "--buffer-interval-ms" => parsed.buffer_interval_ms = Some(parse_num(&flag, value())?),
            "--cycles" => parsed.cycles = Some(parse_num(&flag, value())?),
            "--report" => {
                let v = value().ok_or_else(|| format!("{flag} requires a value"))?;
                parsed.report = TimeRange::parse_or_default(&v);
            }
            _ => return Err(format!("Unexpected argument '{arg}'. {}", usage(&prog))),
        }
    }
    Ok(parsed)
}

fn env_ms(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

// File (or defaults), then environment, then CLI flags
fn load_config(args: &ParsedArgs) -> anyhow::Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(ms) = env_ms("FLEETWATCH_MONITOR_INTERVAL_MS") {
        cfg.monitor.tick_interval_ms = ms;
    }
    if let Some(ms) = env_ms("FLEETWATCH_BUFFER_INTERVAL_MS") {
        cfg.buffer.tick_interval_ms = ms;
    }
    if let Some(ms) = args.monitor_interval_ms {
        cfg.monitor.tick_interval_ms = ms;
    }
    if let Some(ms) = args.buffer_interval_ms {
        cfg.buffer.tick_interval_ms = ms;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

// One buffer sample per collection cycle
fn cycle_fields(outcome: &CycleOutcome) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("host".into(), json!(HOSTNAME.as_str()));
    m.insert("cycle".into(), json!(outcome.cycle));
    for r in &outcome.readings {
        m.insert(r.metric.as_str().into(), json!(r.value));
    }
    m.insert("alerts".into(), json!(outcome.alerts_raised));
    m
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = env::args().collect::<Vec<_>>();
    let prog = args.first().cloned().unwrap_or_else(|| "fleetwatch_agent".into());
    let parsed = parse_args(args).map_err(anyhow::Error::msg)?;
    if parsed.help {
        println!("{}", usage(&prog));
        return Ok(());
    }

    // stdout carries samples and the report; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_config(&parsed)?;
    let clock = system_clock();

    let processor = Arc::new(DataProcessor::new(&cfg.buffer, clock.clone()));
    processor.subscribe(Arc::new(JsonLines::stdout()));

    let source: Box<dyn MetricSource> = if parsed.demo {
        Box::new(RandomSource::new())
    } else {
        Box::new(SysinfoSource::new(link_bytes_per_sec()))
    };
    let monitor = MetricMonitor::new(&cfg.monitor, clock);

    let (done_tx, mut done_rx) = watch::channel(false);
    let hook = {
        let processor = Arc::clone(&processor);
        let limit = parsed.cycles;
        Box::new(move |outcome: &CycleOutcome| {
            processor.add_data(cycle_fields(outcome));
            if limit.is_some_and(|n| outcome.cycle >= n) {
                let _ = done_tx.send(true);
            }
        })
    };
    let (service, handle) = MonitorService::new(monitor, source, cfg.monitor.tick_interval());
    let service_task = tokio::spawn(service.with_cycle_hook(hook).run());

    handle.start_monitoring()?;
    processor.start_processing();
    info!(
        host = HOSTNAME.as_str(),
        demo = parsed.demo,
        monitor_interval = ?cfg.monitor.tick_interval(),
        buffer_interval = ?cfg.buffer.tick_interval(),
        "fleetwatch agent running"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
        _ = done_rx.changed() => info!("cycle limit reached, shutting down"),
    }

    handle.stop_monitoring()?;
    // the report shares stdout with the sample lines
    processor.stop_and_wait().await;

    let report = handle.performance_report(parsed.report).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    handle.shutdown()?;
    service_task.await.context("monitor service task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch::monitor::Reading;
    use fleetwatch::Metric;

    fn parse(args: &[&str]) -> Result<ParsedArgs, String> {
        parse_args(
            std::iter::once("fleetwatch_agent")
                .chain(args.iter().copied())
                .map(String::from),
        )
    }

    #[test]
    fn defaults_when_no_flags() {
        let p = parse(&[]).unwrap();
        assert_eq!(p, ParsedArgs::default());
        assert_eq!(p.report, TimeRange::OneDay);
    }

    #[test]
    fn long_short_and_assign_forms() {
        let p = parse(&["-c", "/tmp/a.json", "--cycles=3", "--monitor-interval-ms", "20"]).unwrap();
        assert_eq!(p.config, Some(PathBuf::from("/tmp/a.json")));
        assert_eq!(p.cycles, Some(3));
        assert_eq!(p.monitor_interval_ms, Some(20));

        let p = parse(&["--config=/tmp/b.json", "--buffer-interval-ms=5", "--demo"]).unwrap();
        assert_eq!(p.config, Some(PathBuf::from("/tmp/b.json")));
        assert_eq!(p.buffer_interval_ms, Some(5));
        assert!(p.demo);
    }

    #[test]
    fn report_range_falls_back_to_default() {
        assert_eq!(parse(&["--report", "7d"]).unwrap().report, TimeRange::SevenDays);
        assert_eq!(parse(&["--report=1y"]).unwrap().report, TimeRange::OneDay);
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse(&["--cycles", "many"]).unwrap_err().contains("--cycles"));
        assert!(parse(&["--cycles"]).unwrap_err().contains("requires a value"));
        assert!(parse(&["--bogus"]).unwrap_err().contains("Usage:"));
    }

    #[test]
    fn cycle_fields_carry_readings_and_alerts() {
        let outcome = CycleOutcome {
            cycle: 7,
            at: chrono::Utc::now(),
            readings: vec![
                Reading { metric: Metric::Cpu, value: 91.0 },
                Reading { metric: Metric::Storage, value: 40.0 },
            ],
            skipped: vec![],
            alerts_raised: vec![12],
        };
        let f = cycle_fields(&outcome);
        assert_eq!(f["cycle"], 7);
        assert_eq!(f["cpu"], 91.0);
        assert_eq!(f["storage"], 40.0);
        assert!(!f.contains_key("memory"));
        assert_eq!(f["alerts"], json!([12]));
    }
}
