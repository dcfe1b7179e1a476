//! log_verify - check the hash chain of the SQLite event mirror
//!
//! Every row links to the previous entry hash, so an edited, reordered or
//! deleted event breaks verification at that row.

use anyhow::{anyhow, Result};
use clap::Parser;
use rusqlite::Connection;
use std::io::IsTerminal;

use zone_guard::verify;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "log_verify", about = "Verify event database integrity (hash chain)")]
struct Args {
    /// Path to the event SQLite DB
    #[arg(long, default_value = "events.db")]
    db: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);
    if !std::path::Path::new(&args.db).exists() {
        return Err(anyhow!("event database {} does not exist", args.db));
    }
    let conn = {
        let _stage = ui.stage("Open database");
        Connection::open(&args.db)?
    };

    println!("log_verify: checking {}", args.db);
    println!();

    let report = {
        let _stage = ui.stage("Verify event chain");
        verify::verify_events_with(&conn, |id, ev, hash| {
            if args.verbose {
                println!("  [{}] {} {}", id, &hex::encode(hash)[..16], ev.summary());
            }
        })?
    };

    println!("events verified: {}", report.entries);
    println!("chain head: {}", hex::encode(report.head));
    println!();
    println!("OK: event chain intact");
    Ok(())
}
