use anyhow::Result;
use std::fmt;

use crate::alert::AlertDispatcher;
use crate::storage::EventLogStore;
use crate::Event;

/// An event could not be appended to the event log. Fatal to the run.
#[derive(Debug)]
pub struct SinkError {
    store: String,
    object_id: u64,
    zone: String,
    reason: String,
}

impl SinkError {
    pub fn store(&self) -> &str {
        &self.store
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event log {} rejected event for object {} in {}: {}",
            self.store, self.object_id, self.zone, self.reason
        )
    }
}

impl std::error::Error for SinkError {}

/// Durable event log plus best-effort alerting.
///
/// Every configured store receives every event in emission order. Alerts are
/// separate: a dispatcher failure is logged and never reaches the caller.
pub struct EventSink {
    stores: Vec<Box<dyn EventLogStore>>,
    dispatcher: Option<Box<dyn AlertDispatcher>>,
}

impl EventSink {
    pub fn new(store: Box<dyn EventLogStore>) -> Self {
        Self {
            stores: vec![store],
            dispatcher: None,
        }
    }

    pub fn add_store(&mut self, store: Box<dyn EventLogStore>) {
        self.stores.push(store);
    }

    pub fn with_dispatcher(mut self, dispatcher: Box<dyn AlertDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn stores(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.describe()).collect()
    }

    pub fn record(&mut self, ev: &Event) -> Result<()> {
        for store in self.stores.iter_mut() {
            store.append_event(ev).map_err(|e| SinkError {
                store: store.describe(),
                object_id: ev.object_id,
                zone: ev.zone.clone(),
                reason: format!("{:#}", e),
            })?;
        }
        Ok(())
    }

    pub fn notify(&mut self, ev: &Event) {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return;
        };
        if let Err(e) = dispatcher.notify(ev) {
            log::warn!("alert dispatch via {} failed: {}", dispatcher.name(), e);
        }
    }

    /// Stop the dispatcher, waiting for queued alerts.
    pub fn close(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.shutdown() {
                log::warn!("alert dispatcher {} shutdown failed: {}", dispatcher.name(), e);
            }
        }
    }
}

impl Drop for EventSink {
    fn drop(&mut self) {
        self.close();
    }
}
