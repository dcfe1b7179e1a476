use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{format_timestamp, hash_entry, parse_timestamp, Event, GENESIS_HASH};

/// Column order of the event log. Consumers parse by this header, so it must not change.
pub const CSV_HEADER: [&str; 6] = ["Timestamp", "ObjectID", "Zone", "Event", "Class", "Confidence"];

/// Append-only event store.
///
/// Stores never reorder, rewrite or drop events. A failed append is reported to
/// the caller; the pipeline treats it as fatal.
pub trait EventLogStore {
    fn describe(&self) -> String;

    fn append_event(&mut self, ev: &Event) -> Result<()>;
}

// -------------------- CSV log --------------------

/// The system-of-record event log: one CSV row per event, flushed and synced
/// to disk per append.
pub struct CsvEventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvEventLog {
    /// Open for appending. An existing non-empty log must carry the expected
    /// header; a missing or empty one is initialised with it. A log whose last
    /// row lacks a line terminator is terminated before the first append.
    pub fn open(path: &Path) -> Result<Self> {
        let existing_len = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(anyhow!("failed to stat event log {}: {}", path.display(), e));
            }
        };
        let mut needs_terminator = false;
        if existing_len > 0 {
            let mut existing = File::open(path)?;
            existing.seek(SeekFrom::End(-1))?;
            let mut last = [0u8; 1];
            existing.read_exact(&mut last)?;
            needs_terminator = last[0] != b'\n';
            existing.rewind()?;

            let mut first = String::new();
            BufReader::new(existing).read_line(&mut first)?;
            let header = first.trim_end_matches(['\r', '\n']);
            if header != CSV_HEADER.join(",") {
                return Err(anyhow!(
                    "event log {} has unexpected header {:?}",
                    path.display(),
                    header
                ));
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        let mut log = Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        };
        if existing_len == 0 {
            log.write_line(&CSV_HEADER.join(","))?;
        } else if needs_terminator {
            log::warn!(
                "event log {} does not end with a newline; terminating last row",
                path.display()
            );
            log.write_line("")?;
        }
        Ok(log)
    }

    /// Start a fresh log, discarding whatever was at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        File::create(path)
            .with_context(|| format!("failed to create event log {}", path.display()))?;
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl EventLogStore for CsvEventLog {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn append_event(&mut self, ev: &Event) -> Result<()> {
        let line = format_record(ev);
        self.write_line(&line)
            .with_context(|| format!("failed to append to event log {}", self.path.display()))
    }
}

pub fn format_record(ev: &Event) -> String {
    let fields = [
        format_timestamp(&ev.timestamp),
        ev.object_id.to_string(),
        ev.zone.clone(),
        ev.kind.to_string(),
        ev.class_name.clone(),
        format!("{:.3}", ev.confidence),
    ];
    fields
        .iter()
        .map(|field| csv_escape(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records. Quoted fields may contain commas, doubled quotes
/// and newlines.
pub fn parse_csv(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(anyhow!("unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Read every event from a CSV event log, in log order.
pub fn read_csv_events(path: &Path) -> Result<Vec<Event>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read event log {}", path.display()))?;
    let mut records = parse_csv(&content)?.into_iter();
    match records.next() {
        Some(header) if header == CSV_HEADER => {}
        Some(header) => {
            return Err(anyhow!(
                "event log {} has unexpected header {:?}",
                path.display(),
                header
            ))
        }
        None => return Ok(Vec::new()),
    }
    records
        .enumerate()
        .map(|(idx, record)| {
            event_from_record(&record)
                .with_context(|| format!("{}: record {}", path.display(), idx + 1))
        })
        .collect()
}

fn event_from_record(record: &[String]) -> Result<Event> {
    let [timestamp, object_id, zone, kind, class_name, confidence] = record else {
        return Err(anyhow!(
            "expected {} fields, found {}",
            CSV_HEADER.len(),
            record.len()
        ));
    };
    Ok(Event {
        timestamp: parse_timestamp(timestamp)?,
        object_id: object_id
            .parse()
            .map_err(|_| anyhow!("invalid ObjectID {:?}", object_id))?,
        zone: zone.clone(),
        kind: kind.parse()?,
        class_name: class_name.clone(),
        confidence: confidence
            .parse()
            .map_err(|_| anyhow!("invalid Confidence {:?}", confidence))?,
    })
}

// -------------------- In-memory log --------------------

/// Event store kept in memory. Clones share the same buffer, so a test can keep
/// one handle while the sink owns another.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLogStore for InMemoryEventLog {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn append_event(&mut self, ev: &Event) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("in-memory event log lock poisoned"))?
            .push(ev.clone());
        Ok(())
    }
}

// -------------------- SQLite log --------------------

/// Hash-chained event mirror in SQLite.
///
/// Each row stores the JSON payload, the previous entry hash and
/// `sha256(prev_hash || payload)`, so edits or deletions break the chain.
/// See `verify::verify_event_chain`.
pub struct SqliteEventLog {
    db_path: String,
    conn: Connection,
}

impl SqliteEventLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open event database {}", db_path))?;
        let mut store = Self {
            db_path: db_path.to_string(),
            conn,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zone_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              recorded_at TEXT NOT NULL,
              object_id INTEGER NOT NULL,
              zone TEXT NOT NULL,
              kind TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              prev_hash BLOB NOT NULL,
              entry_hash BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_zone_events_zone ON zone_events(zone);
            "#,
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn chain_head(&self) -> Result<[u8; 32]> {
        let head: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT entry_hash FROM zone_events ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match head {
            Some(bytes) => {
                if bytes.len() != 32 {
                    return Err(anyhow!("corrupt event log: entry_hash size"));
                }
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(out)
            }
            None => Ok(GENESIS_HASH),
        }
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM zone_events", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Oldest-first events, at most `limit`.
    pub fn read_events(&self, limit: usize) -> Result<Vec<Event>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM zone_events ORDER BY id ASC LIMIT ?1")?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }
}

impl EventLogStore for SqliteEventLog {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.db_path)
    }

    fn append_event(&mut self, ev: &Event) -> Result<()> {
        let object_id = i64::try_from(ev.object_id)
            .map_err(|_| anyhow!("object id exceeds i64 range"))?;
        let prev_hash = self.chain_head()?;
        let payload_json = serde_json::to_string(ev)?;
        let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());

        self.conn.execute(
            r#"
            INSERT INTO zone_events(recorded_at, object_id, zone, kind, payload_json, prev_hash, entry_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                format_timestamp(&ev.timestamp),
                object_id,
                ev.zone,
                ev.kind.as_str(),
                payload_json,
                prev_hash.to_vec(),
                entry_hash.to_vec()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventKind;
    use tempfile::tempdir;

    fn event(object_id: u64, zone: &str, kind: EventKind) -> Event {
        Event {
            timestamp: parse_timestamp("2024-05-01 12:00:00").unwrap(),
            object_id,
            zone: zone.to_string(),
            kind,
            class_name: "person".to_string(),
            confidence: 0.87,
        }
    }

    #[test]
    fn new_log_starts_with_header_and_appends_rows() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        let mut log = CsvEventLog::open(&path)?;
        log.append_event(&event(1, "Gate", EventKind::Entered))?;
        log.append_event(&event(1, "Gate", EventKind::Moved))?;

        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "Timestamp,ObjectID,Zone,Event,Class,Confidence");
        assert_eq!(lines[1], "2024-05-01 12:00:00,1,Gate,Entered,person,0.870");
        assert_eq!(lines[2], "2024-05-01 12:00:00,1,Gate,Moved,person,0.870");
        Ok(())
    }

    #[test]
    fn reopening_appends_without_second_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        CsvEventLog::open(&path)?.append_event(&event(1, "Gate", EventKind::Entered))?;
        CsvEventLog::open(&path)?.append_event(&event(1, "Gate", EventKind::Exited))?;

        let events = read_csv_events(&path)?;
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Entered, EventKind::Exited]);
        Ok(())
    }

    #[test]
    fn unterminated_last_row_is_not_merged_with_next_append() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        std::fs::write(
            &path,
            "Timestamp,ObjectID,Zone,Event,Class,Confidence\n2024-05-01 12:00:00,1,Gate,Entered,person,0.900",
        )?;
        CsvEventLog::open(&path)?.append_event(&event(1, "Gate", EventKind::Moved))?;

        let events = read_csv_events(&path)?;
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Entered, EventKind::Moved]);
        assert!(std::fs::read_to_string(&path)?.ends_with("person,0.870\n"));
        Ok(())
    }

    #[test]
    fn header_only_log_without_newline_gets_terminated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        std::fs::write(&path, "Timestamp,ObjectID,Zone,Event,Class,Confidence")?;
        CsvEventLog::open(&path)?.append_event(&event(2, "Gate", EventKind::Entered))?;
        let events = read_csv_events(&path)?;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_id, 2);
        Ok(())
    }

    #[test]
    fn create_discards_previous_log() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        CsvEventLog::open(&path)?.append_event(&event(1, "Gate", EventKind::Entered))?;
        CsvEventLog::create(&path)?;
        assert!(read_csv_events(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn foreign_header_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        std::fs::write(&path, "when,who\n")?;
        assert!(CsvEventLog::open(&path).is_err());
        Ok(())
    }

    #[test]
    fn zone_names_with_separators_are_quoted_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("logs.csv");
        let mut log = CsvEventLog::open(&path)?;
        let ev = event(3, "Dock \"B\", north", EventKind::Entered);
        log.append_event(&ev)?;

        let content = std::fs::read_to_string(&path)?;
        assert!(content.contains("\"Dock \"\"B\"\", north\""));
        let back = read_csv_events(&path)?;
        assert_eq!(back[0].zone, ev.zone);
        assert_eq!(back[0].object_id, 3);
        Ok(())
    }

    #[test]
    fn parse_csv_handles_quoted_newlines() -> Result<()> {
        let records = parse_csv("a,\"b\nc\",d\r\ne,f")?;
        assert_eq!(
            records,
            vec![
                vec!["a".to_string(), "b\nc".to_string(), "d".to_string()],
                vec!["e".to_string(), "f".to_string()],
            ]
        );
        assert!(parse_csv("\"open").is_err());
        Ok(())
    }

    #[test]
    fn in_memory_clones_share_events() -> Result<()> {
        let log = InMemoryEventLog::new();
        let mut handle = log.clone();
        handle.append_event(&event(1, "Gate", EventKind::Entered))?;
        assert_eq!(log.len(), 1);
        Ok(())
    }

    #[test]
    fn sqlite_log_chains_entries() -> Result<()> {
        let mut store = SqliteEventLog::open(":memory:")?;
        assert_eq!(store.chain_head()?, GENESIS_HASH);
        store.append_event(&event(1, "Gate", EventKind::Entered))?;
        let first = store.chain_head()?;
        store.append_event(&event(1, "Gate", EventKind::Exited))?;
        assert_ne!(store.chain_head()?, first);
        assert_eq!(store.count()?, 2);
        let events = store.read_events(10)?;
        assert_eq!(events[1].kind, EventKind::Exited);
        Ok(())
    }
}
