//! End-to-end: monitor cycles feed the data processor, subscribers see the latest cycle.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use fleetwatch::config::Config;
use fleetwatch::{
    CollectError, CycleOutcome, DataProcessor, ManualClock, Metric, MetricMonitor,
    MonitorService, Sample, SubscriberResult, TimeRange,
};
use serde_json::{json, Map, Value};

#[tokio::test(start_paused = true)]
async fn monitor_cycles_flow_to_subscribers() {
    let cfg = Config::default();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));

    let processor = Arc::new(DataProcessor::new(&cfg.buffer, clock.clone()));
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        processor.subscribe(Arc::new(move |s: &Sample| -> SubscriberResult {
            seen.lock().unwrap().push(s.fields["cycle"].clone());
            Ok(())
        }));
    }
    processor.subscribe(Arc::new(|_: &Sample| -> SubscriberResult {
        Err("dashboard disconnected".into())
    }));

    // cpu climbs 10 points per cycle from 60
    let mut cpu = 50.0;
    let source = move |m: Metric| -> Result<f64, CollectError> {
        match m {
            Metric::Cpu => {
                cpu += 10.0;
                Ok(cpu)
            }
            _ => Ok(20.0),
        }
    };
    let monitor = MetricMonitor::new(&cfg.monitor, clock.clone());
    let hook = {
        let processor = Arc::clone(&processor);
        let clock = clock.clone();
        Box::new(move |o: &CycleOutcome| {
            let mut fields = Map::new();
            fields.insert("cycle".into(), json!(o.cycle));
            processor.add_data(fields);
            clock.advance(chrono::Duration::seconds(5));
        })
    };
    let (service, handle) =
        MonitorService::new(monitor, Box::new(source), cfg.monitor.tick_interval());
    let task = tokio::spawn(service.with_cycle_hook(hook).run());

    handle.start_monitoring().unwrap();
    assert!(processor.start_processing());

    // monitor ticks at 5s, 10s, 15s; the processor every second
    tokio::time::sleep(Duration::from_millis(16_500)).await;
    handle.stop_monitoring().unwrap();
    processor.stop_processing();

    let seen = seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert_eq!(seen.last(), Some(&json!(3)));
    // coalescing: the newest cycle is redelivered until a newer one arrives
    assert!(seen.windows(2).all(|w| w[0].as_u64() <= w[1].as_u64()));

    let stats = processor.statistics();
    assert_eq!(stats.buffer_size, 3);
    assert_eq!(stats.subscriber_count, 2);
    assert!(!stats.is_processing);

    // cpu read 60, 70, 80; none is above the 80 threshold
    let status = handle.system_status().await.unwrap();
    assert_eq!(status.metrics[&Metric::Cpu].current, 80.0);
    assert_eq!(status.active_alerts, 0);

    let report = handle.performance_report(TimeRange::OneHour).await.unwrap();
    let cpu = report.metrics[&Metric::Cpu];
    assert_eq!(cpu.data_points, 3);
    assert_eq!(cpu.average, 70.0);
    assert!(report.recommendations.is_empty());

    handle.shutdown().unwrap();
    task.await.unwrap();
}
