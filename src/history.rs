//! Bounded trail of recent ISS positions, newest first.
//!
//! Lives only in memory; every boot starts with an empty trail.

use crate::PixelPoint;
use std::collections::VecDeque;

/// Default number of positions kept, matching the original device.
pub const MAX_LOCATION_HISTORY: usize = 10;

#[derive(Clone, Debug)]
pub struct HistoryRing {
    points: VecDeque<PixelPoint>,
    capacity: usize,
}

impl HistoryRing {
    /// A zero capacity is raised to one so the current position always fits.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `point` as the newest entry, evicting the oldest when full.
    pub fn push(&mut self, point: PixelPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_back();
        }
        self.points.push_front(point);
    }

    /// Newest first. Renderers draw every point the same way, so order is
    /// informational only.
    pub fn iter(&self) -> impl Iterator<Item = &PixelPoint> + '_ {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<PixelPoint> {
        self.points.front().copied()
    }

    /// Everything except the newest point.
    pub fn trail(&self) -> impl Iterator<Item = &PixelPoint> + '_ {
        self.points.iter().skip(1)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(MAX_LOCATION_HISTORY)
    }
}
