use anyhow::{anyhow, Result};
use rusqlite::{Connection, Row};

use crate::{hash_entry, Event, GENESIS_HASH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub entries: u64,
    /// Hash of the last verified entry, or the genesis hash for an empty log.
    pub head: [u8; 32],
}

pub fn verify_event_chain(conn: &Connection) -> Result<ChainReport> {
    verify_events_with(conn, |_, _, _| {})
}

/// Walk the SQLite event mirror oldest-first, checking chain linkage, entry
/// hashes and that the indexed columns agree with the payload.
pub fn verify_events_with<F>(conn: &Connection, mut on_event: F) -> Result<ChainReport>
where
    F: FnMut(i64, &Event, [u8; 32]),
{
    let mut stmt = conn.prepare(
        "SELECT id, object_id, zone, kind, payload_json, prev_hash, entry_hash FROM zone_events ORDER BY id ASC",
    )?;

    let mut rows = stmt.query([])?;
    let mut expected_prev: [u8; 32] = GENESIS_HASH;
    let mut count = 0u64;

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let object_id: i64 = row.get(1)?;
        let zone: String = row.get(2)?;
        let kind: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let prev_hash = blob32(row, 5)?;
        let entry_hash = blob32(row, 6)?;

        if prev_hash != expected_prev {
            return Err(anyhow!(
                "integrity check failed at id {}: prev_hash={}, expected_prev={}",
                id,
                hex::encode(prev_hash),
                hex::encode(expected_prev)
            ));
        }

        let computed = hash_entry(&expected_prev, payload.as_bytes());
        if computed != entry_hash {
            return Err(anyhow!(
                "integrity check failed at id {}: computed_hash={}, stored_hash={}",
                id,
                hex::encode(computed),
                hex::encode(entry_hash)
            ));
        }

        let event: Event = serde_json::from_str(&payload)
            .map_err(|e| anyhow!("integrity check failed at id {}: bad payload: {}", id, e))?;
        if i64::try_from(event.object_id).ok() != Some(object_id)
            || event.zone != zone
            || event.kind.as_str() != kind
        {
            return Err(anyhow!(
                "integrity check failed at id {}: columns (object_id={}, zone={}, kind={}) disagree with payload",
                id,
                object_id,
                zone,
                kind
            ));
        }

        on_event(id, &event, entry_hash);

        expected_prev = entry_hash;
        count += 1;
    }

    Ok(ChainReport {
        entries: count,
        head: expected_prev,
    })
}

fn blob32(row: &Row<'_>, idx: usize) -> Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(idx)?;
    if bytes.len() != 32 {
        return Err(anyhow!("expected 32-byte blob at col {}", idx));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
