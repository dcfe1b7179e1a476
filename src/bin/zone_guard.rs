//! zone_guard - replay a detection stream through the zone intrusion pipeline
//!
//! Reads one JSON object per line (`{"timestamp": ..., "detections": [...]}`),
//! tracks objects, evaluates the configured zones and appends every event to
//! the CSV event log before alerting.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufReader, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zone_guard::config::{AlertType, ZoneGuardConfig};
use zone_guard::storage::read_csv_events;
use zone_guard::{
    AlertDispatcher, ConsoleAlerter, CsvEventLog, DisabledAlerter, EventSink, MqttAlerter,
    Pipeline, QueuedAlerter, ReplaySource, SqliteEventLog, ZoneRegistry,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "zone_guard",
    about = "Track detections and log zone entries, exits and movement"
)]
struct Args {
    /// JSON config file (defaults to $ZONE_GUARD_CONFIG, then built-in defaults)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Detection stream, one JSON frame per line ("-" for stdin)
    #[arg(long, value_name = "PATH", default_value = "-")]
    input: String,

    /// Zones file (overrides config)
    #[arg(long, value_name = "PATH")]
    zones: Option<PathBuf>,

    /// Event log (overrides config)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Start a new event log instead of appending
    #[arg(long)]
    fresh_log: bool,

    /// Check configuration, zones and event log, then exit
    #[arg(long)]
    check: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        ZoneGuardConfig::load(args.config.as_deref())?
    };
    if let Some(zones) = args.zones.clone() {
        cfg.zones_file = zones;
    }
    if let Some(log_file) = args.log_file.clone() {
        cfg.log_file = log_file;
    }

    if args.check {
        return system_check(&cfg);
    }

    let zones = {
        let _stage = ui.stage("Load zones");
        ZoneRegistry::load_file(&cfg.zones_file)?
    };
    if zones.is_empty() {
        log::warn!(
            "no zones defined in {}; no events will be produced",
            cfg.zones_file.display()
        );
    }

    let sink = {
        let _stage = ui.stage("Open event log");
        build_sink(&cfg, args.fresh_log)?
    };

    let mut source: ReplaySource = if args.input == "-" {
        ReplaySource::from_reader("stdin", BufReader::new(std::io::stdin()))
    } else {
        ReplaySource::open(Path::new(&args.input))?
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = Pipeline::new(cfg.pipeline_config(), zones, sink);
    let progress = ui.frames(&args.input);
    let log_events = cfg.effective_alert_type() != AlertType::Console;
    let result = pipeline.run_with(&mut source, &stop, |stats, events| {
        if log_events {
            for ev in events {
                log::info!("{}", ev.summary());
            }
        }
        progress.update(stats.frames, stats.events);
    });
    let (_, stats) = pipeline.finish();
    progress.finish(stats.frames, stats.events);
    result?;

    for (kind, count) in &stats.by_kind {
        println!("{kind}: {count}");
    }
    if stats.interrupted {
        log::info!("interrupted; event log is complete up to the last processed frame");
    }
    Ok(())
}

fn build_sink(cfg: &ZoneGuardConfig, fresh_log: bool) -> Result<EventSink> {
    let csv = if fresh_log {
        CsvEventLog::create(&cfg.log_file)?
    } else {
        CsvEventLog::open(&cfg.log_file)?
    };
    let mut sink = EventSink::new(Box::new(csv));
    if let Some(db) = cfg.event_db.as_deref() {
        sink.add_store(Box::new(SqliteEventLog::open(db)?));
    }
    log::info!("event log: {}", sink.stores().join(", "));

    let dispatcher: Box<dyn AlertDispatcher> = match cfg.effective_alert_type() {
        AlertType::Console => Box::new(ConsoleAlerter),
        AlertType::Mqtt => Box::new(QueuedAlerter::new(
            Box::new(MqttAlerter::connect(&cfg.mqtt)?),
            cfg.alert_queue_capacity,
        )),
        AlertType::None => Box::new(DisabledAlerter),
    };
    Ok(sink.with_dispatcher(dispatcher))
}

fn system_check(cfg: &ZoneGuardConfig) -> Result<()> {
    println!("zone_guard system check");
    println!();
    println!("confidence threshold: {}", cfg.confidence_threshold);
    println!(
        "tracking: distance <= {} px, drop after {} missed frame(s)",
        cfg.tracking_distance_threshold, cfg.max_disappeared_frames
    );
    let classes: Vec<String> = cfg
        .detection_classes
        .iter()
        .map(|(name, id)| format!("{name}={id}"))
        .collect();
    println!("classes: {}", classes.join(", "));
    println!(
        "video source: {}",
        cfg.video_source.as_deref().unwrap_or("(not set)")
    );
    println!("model: {}", cfg.model_path.as_deref().unwrap_or("(not set)"));
    println!("alerts: {:?}", cfg.effective_alert_type());

    let mut failures = 0;

    match ZoneRegistry::load_file(&cfg.zones_file) {
        Ok(zones) => println!(
            "[OK]   zones: {} ({})",
            zones.len(),
            zones.names().join(", ")
        ),
        Err(e) => {
            failures += 1;
            println!("[FAIL] zones {}: {:#}", cfg.zones_file.display(), e);
        }
    }

    if cfg.log_file.exists() {
        match read_csv_events(&cfg.log_file) {
            Ok(events) => println!(
                "[OK]   event log {}: {} event(s)",
                cfg.log_file.display(),
                events.len()
            ),
            Err(e) => {
                failures += 1;
                println!("[FAIL] event log {}: {:#}", cfg.log_file.display(), e);
            }
        }
    } else {
        println!(
            "[OK]   event log {} will be created",
            cfg.log_file.display()
        );
    }

    if let Some(db) = cfg.event_db.as_deref() {
        match SqliteEventLog::open(db).and_then(|store| store.count()) {
            Ok(count) => println!("[OK]   event db {}: {} event(s)", db, count),
            Err(e) => {
                failures += 1;
                println!("[FAIL] event db {}: {:#}", db, e);
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("system check failed ({} problem(s))", failures));
    }
    println!();
    println!("system check passed");
    Ok(())
}
