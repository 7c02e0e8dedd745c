// src/pipeline/event_bus.rs
//
// Notable engine transitions, queued for the driver to report. Keeps
// user-facing logging out of the per-tick analysis code.

use super::session::SessionState;
use crate::analysis::DistanceStatus;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum GuidanceEvent {
    DetectorReady,
    DetectorUnavailable(String),
    SessionChanged {
        from: SessionState,
        to: SessionState,
    },
    VehicleAcquired {
        frame_id: u64,
    },
    VehicleLost {
        frame_id: u64,
    },
    DistanceChanged {
        frame_id: u64,
        status: DistanceStatus,
    },
    SpeedWarning {
        frame_id: u64,
        speed_px_per_s: f32,
    },
    DamageRegionsFound {
        frame_id: u64,
        count: usize,
    },
    CoverageComplete {
        frame_id: u64,
    },
    StaleDetectionDiscarded {
        epoch: u64,
        seq: u64,
    },
}

/// Bounded queue of engine events. When full, the oldest event is dropped.
pub struct EventBus {
    queue: VecDeque<GuidanceEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: GuidanceEvent) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 100 == 0 {
                warn!(
                    "Guidance events not drained, {} dropped so far (capacity {})",
                    self.dropped, self.capacity
                );
            }
        }
        self.queue.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<GuidanceEvent> {
        self.queue.drain(..).collect()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
