//! Tracked radar object store
//!
//! Keeps the most recent object per slot, derives distance and bearing,
//! tracks the nearest object and evicts stale entries. Slot count is small
//! and bounded, so nearest/count are recomputed with a full scan after every
//! accepted update rather than maintained incrementally.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::types::Timestamp;

/// Position magnitude limit for a valid object (position units)
pub const MAX_ABS_POSITION: f64 = 1000.0;

/// Bounded object history capacity
const HISTORY_CAPACITY: usize = 1000;

/// A single tracked radar object
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackedObject {
    /// Slot index (1..N)
    pub slot: u8,
    /// Relative position X in meters
    pub rel_pos_x: f64,
    /// Relative position Y in meters
    pub rel_pos_y: f64,
    /// Relative velocity X in m/s
    pub rel_vel_x: f64,
    /// Relative acceleration X in m/s^2
    pub rel_acc_x: f64,
    /// Last update time in seconds
    pub timestamp: Timestamp,
    /// Euclidean distance in meters (derived)
    pub distance: f64,
    /// Bearing atan2(Y, X) in degrees (derived, 0 at the origin)
    pub bearing: f64,
}

impl TrackedObject {
    pub fn new(
        slot: u8,
        rel_pos_x: f64,
        rel_pos_y: f64,
        rel_vel_x: f64,
        rel_acc_x: f64,
        timestamp: Timestamp,
    ) -> Self {
        let distance = rel_pos_x.hypot(rel_pos_y);
        let bearing = if rel_pos_x == 0.0 && rel_pos_y == 0.0 {
            0.0
        } else {
            rel_pos_y.atan2(rel_pos_x).to_degrees()
        };
        Self {
            slot,
            rel_pos_x,
            rel_pos_y,
            rel_vel_x,
            rel_acc_x,
            timestamp,
            distance,
            bearing,
        }
    }

    /// Validity invariant: distance strictly positive, position within
    /// +-1000 units on both axes.
    pub fn is_valid(&self) -> bool {
        self.distance > 0.0
            && self.rel_pos_x.abs() <= MAX_ABS_POSITION
            && self.rel_pos_y.abs() <= MAX_ABS_POSITION
    }
}

/// Snapshot summary of the store
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StoreSummary {
    pub object_count: usize,
    /// Distance of the nearest object; infinity when the store is empty
    pub nearest_distance: f64,
    pub nearest_slot: Option<u8>,
    pub last_update: Timestamp,
}

/// The tracked-object store
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<u8, TrackedObject>,
    history: VecDeque<TrackedObject>,
    nearest: Option<TrackedObject>,
    object_count: usize,
    last_update: Timestamp,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update one slot. Returns false (and changes nothing) when the
    /// resulting object fails the validity invariant.
    pub fn update(
        &mut self,
        slot: u8,
        rel_pos_x: f64,
        rel_pos_y: f64,
        rel_vel_x: f64,
        rel_acc_x: f64,
        timestamp: Timestamp,
    ) -> bool {
        let object = TrackedObject::new(slot, rel_pos_x, rel_pos_y, rel_vel_x, rel_acc_x, timestamp);
        if !object.is_valid() {
            log::debug!("rejected invalid object for slot {}", slot);
            return false;
        }

        self.objects.insert(slot, object);
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(object);
        self.last_update = timestamp;
        self.rescan();
        true
    }

    /// Remove every slot older than `max_age` seconds relative to `now`,
    /// then recompute nearest/count. Idempotent when nothing is stale.
    pub fn evict(&mut self, max_age: f64, now: Timestamp) {
        let before = self.objects.len();
        self.objects.retain(|_, obj| now - obj.timestamp <= max_age);
        if self.objects.len() != before {
            log::debug!("evicted {} stale objects", before - self.objects.len());
            self.rescan();
        }
    }

    /// Full scan over current slots for nearest object and live count
    fn rescan(&mut self) {
        self.object_count = self.objects.len();
        self.nearest = self
            .objects
            .values()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .copied();
    }

    /// Object currently stored under a slot
    pub fn get(&self, slot: u8) -> Option<TrackedObject> {
        self.objects.get(&slot).copied()
    }

    /// All currently valid objects, order unspecified
    pub fn all_objects(&self) -> Vec<TrackedObject> {
        self.objects.values().filter(|o| o.is_valid()).copied().collect()
    }

    /// Objects with distance within [min, max]
    pub fn objects_in_distance_range(&self, min: f64, max: f64) -> Vec<TrackedObject> {
        self.objects
            .values()
            .filter(|o| o.is_valid() && o.distance >= min && o.distance <= max)
            .copied()
            .collect()
    }

    /// Objects with bearing within [min, max] degrees
    pub fn objects_in_bearing_range(&self, min: f64, max: f64) -> Vec<TrackedObject> {
        self.objects
            .values()
            .filter(|o| o.is_valid() && o.bearing >= min && o.bearing <= max)
            .copied()
            .collect()
    }

    /// Objects with relative X velocity within [min, max]
    pub fn objects_by_velocity(&self, min: f64, max: f64) -> Vec<TrackedObject> {
        self.objects
            .values()
            .filter(|o| o.is_valid() && o.rel_vel_x >= min && o.rel_vel_x <= max)
            .copied()
            .collect()
    }

    /// Nearest object, if any
    pub fn nearest(&self) -> Option<TrackedObject> {
        self.nearest
    }

    /// Number of live slots
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Copy-on-read summary for external consumers
    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            object_count: self.object_count,
            nearest_distance: self.nearest.map_or(f64::INFINITY, |o| o.distance),
            nearest_slot: self.nearest.map(|o| o.slot),
            last_update: self.last_update,
        }
    }
}
