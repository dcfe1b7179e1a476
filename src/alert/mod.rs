//! Alert dispatch.
//!
//! Alerts are best effort: the sink logs and swallows dispatcher errors, and
//! nothing here may block the per-frame pipeline for long. Dispatchers that do
//! I/O should be wrapped in a [`QueuedAlerter`].

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use crate::{Event, EventKind};

mod mqtt;

pub use mqtt::{MqttAlertConfig, MqttAlerter};

pub trait AlertDispatcher: Send {
    fn name(&self) -> &str;

    fn notify(&mut self, ev: &Event) -> Result<()>;

    /// Flush and release resources. Called once when the run ends.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes alerts to the process log.
#[derive(Debug, Default)]
pub struct ConsoleAlerter;

impl AlertDispatcher for ConsoleAlerter {
    fn name(&self) -> &str {
        "console"
    }

    fn notify(&mut self, ev: &Event) -> Result<()> {
        match ev.kind {
            EventKind::Entered => log::warn!(
                "ALERT: Object {} entered {} ({}, {:.2})",
                ev.object_id,
                ev.zone,
                ev.class_name,
                ev.confidence
            ),
            EventKind::Exited => log::info!(
                "Object {} ({}) exited {}",
                ev.object_id,
                ev.class_name,
                ev.zone
            ),
            EventKind::Moved => log::debug!("Object {} moved in {}", ev.object_id, ev.zone),
        }
        Ok(())
    }
}

/// Accepts and discards every alert.
#[derive(Debug, Default)]
pub struct DisabledAlerter;

impl AlertDispatcher for DisabledAlerter {
    fn name(&self) -> &str {
        "none"
    }

    fn notify(&mut self, _ev: &Event) -> Result<()> {
        Ok(())
    }
}

/// Runs another dispatcher on a worker thread behind a bounded queue.
///
/// `notify` never blocks: when the queue is full the alert is dropped and
/// counted.
pub struct QueuedAlerter {
    name: String,
    sender: Option<SyncSender<Event>>,
    worker: Option<JoinHandle<()>>,
    dropped: u64,
}

impl QueuedAlerter {
    pub fn new(mut inner: Box<dyn AlertDispatcher>, capacity: usize) -> Self {
        let name = format!("queued:{}", inner.name());
        let (sender, receiver) = mpsc::sync_channel::<Event>(capacity);
        let worker = std::thread::spawn(move || {
            for ev in receiver {
                if let Err(e) = inner.notify(&ev) {
                    log::warn!("alert dispatch via {} failed: {}", inner.name(), e);
                }
            }
            if let Err(e) = inner.shutdown() {
                log::warn!("alert dispatcher {} shutdown failed: {}", inner.name(), e);
            }
        });
        Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            dropped: 0,
        }
    }

    /// Alerts discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl AlertDispatcher for QueuedAlerter {
    fn name(&self) -> &str {
        &self.name
    }

    fn notify(&mut self, ev: &Event) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("alert queue already shut down"))?;
        match sender.try_send(ev.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::warn!(
                    "alert queue full; dropped alert for object {} in {}",
                    ev.object_id,
                    ev.zone
                );
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("alert worker has stopped")),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("alert worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for QueuedAlerter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_timestamp;
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex};

    fn event(object_id: u64) -> Event {
        Event {
            timestamp: parse_timestamp("2024-05-01 12:00:00").unwrap(),
            object_id,
            zone: "Gate".to_string(),
            kind: EventKind::Entered,
            class_name: "person".to_string(),
            confidence: 0.9,
        }
    }

    struct Recording {
        seen: Arc<Mutex<Vec<u64>>>,
        gate: Option<Receiver<()>>,
    }

    impl AlertDispatcher for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn notify(&mut self, ev: &Event) -> Result<()> {
            if let Some(gate) = &self.gate {
                // Blocks until the test drops the sender.
                let _ = gate.recv();
            }
            self.seen.lock().unwrap().push(ev.object_id);
            Ok(())
        }
    }

    #[test]
    fn queued_alerter_delivers_in_order() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut queued = QueuedAlerter::new(
            Box::new(Recording {
                seen: seen.clone(),
                gate: None,
            }),
            8,
        );
        for id in 1..=3 {
            queued.notify(&event(id))?;
        }
        queued.shutdown()?;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(queued.dropped(), 0);
        Ok(())
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = mpsc::channel();
        let mut queued = QueuedAlerter::new(
            Box::new(Recording {
                seen: seen.clone(),
                gate: Some(gate),
            }),
            1,
        );
        for id in 1..=4 {
            queued.notify(&event(id))?;
        }
        // One alert may be held by the worker and one by the queue.
        let dropped = queued.dropped();
        assert!((2..=3).contains(&dropped), "dropped {}", dropped);

        drop(release);
        queued.shutdown()?;
        assert_eq!(seen.lock().unwrap().len() as u64, 4 - dropped);
        Ok(())
    }

    #[test]
    fn notify_after_shutdown_is_an_error() -> Result<()> {
        let mut queued = QueuedAlerter::new(Box::new(DisabledAlerter), 1);
        queued.shutdown()?;
        assert!(queued.notify(&event(1)).is_err());
        Ok(())
    }
}
