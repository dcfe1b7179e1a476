//! Zone intrusion state machine.
//!
//! Membership is a boolean per (object id, zone name), defaulting to outside.
//! Per frame and per pair:
//!
//! | was     | is      | event     |
//! |---------|---------|-----------|
//! | outside | inside  | `Entered` |
//! | inside  | outside | `Exited`  |
//! | inside  | inside  | `Moved`   |
//! | outside | outside | none      |
//!
//! `Moved` is an in-zone heartbeat, not a general position update, so objects
//! roaming outside every zone never reach the log.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tracker::TrackedObject;
use crate::zone::ZoneRegistry;
use crate::{Event, EventKind};

/// What happens to an object's memberships when the tracker drops it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisappearPolicy {
    /// Discard membership without emitting anything.
    #[default]
    Silent,
    /// Emit `Exited` for every zone the object was inside when it was dropped.
    EmitExited,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MembershipState {
    inside: BTreeMap<(u64, String), bool>,
}

impl MembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self, object_id: u64, zone: &str) -> bool {
        self.inside
            .get(&(object_id, zone.to_string()))
            .copied()
            .unwrap_or(false)
    }

    /// Number of (object, zone) records held.
    pub fn len(&self) -> usize {
        self.inside.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inside.is_empty()
    }

    pub fn has_object(&self, object_id: u64) -> bool {
        self.inside.keys().any(|(id, _)| *id == object_id)
    }

    /// Drop every record for `object_id`; returns the zones it was inside.
    pub fn forget(&mut self, object_id: u64) -> Vec<String> {
        let mut was_inside = Vec::new();
        self.inside.retain(|(id, zone), inside| {
            if *id != object_id {
                return true;
            }
            if *inside {
                was_inside.push(zone.clone());
            }
            false
        });
        was_inside
    }

    /// Evaluate every object against every zone, in the given object order and
    /// registry zone order.
    pub fn evaluate(
        &mut self,
        objects: &[TrackedObject],
        zones: &ZoneRegistry,
        now: NaiveDateTime,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        for obj in objects {
            for zone in zones.iter() {
                let is_inside = zone.contains(obj.centroid);
                let key = (obj.id, zone.name.clone());
                let was_inside = self.inside.get(&key).copied().unwrap_or(false);
                let kind = match (was_inside, is_inside) {
                    (false, true) => Some(EventKind::Entered),
                    (true, false) => Some(EventKind::Exited),
                    (true, true) => Some(EventKind::Moved),
                    (false, false) => None,
                };
                self.inside.insert(key, is_inside);
                if let Some(kind) = kind {
                    events.push(Event {
                        timestamp: now,
                        object_id: obj.id,
                        zone: zone.name.clone(),
                        kind,
                        class_name: obj.class_name.clone(),
                        confidence: obj.confidence,
                    });
                }
            }
        }
        events
    }
}

/// Disappearance policy bundled with membership state.
#[derive(Clone, Debug, Default)]
pub struct IntrusionEngine {
    policy: DisappearPolicy,
    membership: MembershipState,
}

impl IntrusionEngine {
    pub fn new(policy: DisappearPolicy) -> Self {
        Self {
            policy,
            membership: MembershipState::new(),
        }
    }

    pub fn with_state(policy: DisappearPolicy, membership: MembershipState) -> Self {
        Self { policy, membership }
    }

    pub fn policy(&self) -> DisappearPolicy {
        self.policy
    }

    pub fn membership(&self) -> &MembershipState {
        &self.membership
    }

    pub fn into_state(self) -> MembershipState {
        self.membership
    }

    pub fn evaluate(
        &mut self,
        objects: &[TrackedObject],
        zones: &ZoneRegistry,
        now: NaiveDateTime,
    ) -> Vec<Event> {
        self.membership.evaluate(objects, zones, now)
    }

    /// Discard membership for an object the tracker dropped.
    pub fn forget(
        &mut self,
        removed: &TrackedObject,
        zones: &ZoneRegistry,
        now: NaiveDateTime,
    ) -> Vec<Event> {
        forget_object(&mut self.membership, self.policy, removed, zones, now)
    }
}

pub(crate) fn forget_object(
    membership: &mut MembershipState,
    policy: DisappearPolicy,
    removed: &TrackedObject,
    zones: &ZoneRegistry,
    now: NaiveDateTime,
) -> Vec<Event> {
    let was_inside = membership.forget(removed.id);
    if policy == DisappearPolicy::Silent || was_inside.is_empty() {
        return Vec::new();
    }
    zones
        .iter()
        .filter(|zone| was_inside.contains(&zone.name))
        .map(|zone| Event {
            timestamp: now,
            object_id: removed.id,
            zone: zone.name.clone(),
            kind: EventKind::Exited,
            class_name: removed.class_name.clone(),
            confidence: removed.confidence,
        })
        .collect()
}
