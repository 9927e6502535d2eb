use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::detect::lock;
use crate::telemetry::TelemetrySample;

/// Fixed-capacity FIFO of one entity's most recent samples.
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TimeSeriesWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest once over capacity.
    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }
}

pub type SharedWindow = Arc<Mutex<TimeSeriesWindow>>;

/// Windows for every monitored entity.
///
/// The map lock is held only to find or create an entry; callers then lock
/// the entity's own window, so different entities never contend.
#[derive(Debug)]
pub struct WindowRegistry {
    windows: Mutex<HashMap<String, SharedWindow>>,
    capacity: usize,
}

impl WindowRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn window(&self, entity_id: &str) -> SharedWindow {
        let mut windows = lock(&self.windows);
        windows
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TimeSeriesWindow::new(self.capacity))))
            .clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.windows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.windows).keys().cloned().collect();
        ids.sort();
        ids
    }
}
