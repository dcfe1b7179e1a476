//! event_log - show the tail of a CSV event log with per-zone counts

use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;

use zone_guard::config::ZoneGuardConfig;
use zone_guard::storage::read_csv_events;

#[derive(Parser, Debug)]
#[command(name = "event_log", about = "Show recent zone events and totals")]
struct Args {
    /// Event log to read (defaults to log_file from the config)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// JSON config file (defaults to $ZONE_GUARD_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of most recent events to print
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: usize,

    /// Only show events for this zone
    #[arg(long)]
    zone: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let log_file = match args.log_file {
        Some(path) => path,
        None => ZoneGuardConfig::load(args.config.as_deref())?.log_file,
    };

    let events: Vec<_> = read_csv_events(&log_file)?
        .into_iter()
        .filter(|ev| args.zone.as_deref().map_or(true, |zone| ev.zone == zone))
        .collect();

    println!("{}: {} event(s)", log_file.display(), events.len());
    println!();
    let skip = events.len().saturating_sub(args.limit);
    for ev in &events[skip..] {
        println!("{}", ev.summary());
    }

    let mut totals: BTreeMap<(&str, String), u64> = BTreeMap::new();
    for ev in &events {
        *totals.entry((ev.zone.as_str(), ev.kind.to_string())).or_insert(0) += 1;
    }
    if !totals.is_empty() {
        println!();
        println!("=== Totals ===");
        for ((zone, kind), count) in totals {
            println!("{zone:<20} {kind:<8} {count}");
        }
    }
    Ok(())
}
