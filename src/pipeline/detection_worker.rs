// src/pipeline/detection_worker.rs
//
// Background worker that owns the object detector.
//
// The tick loop never calls the detector directly. It hands frames to the
// worker over a capacity-1 channel and picks up completions from an
// unbounded channel at the start of the next tick. A full request channel
// means the detector is still busy; the tick skips the request instead of
// waiting.

use super::metrics::PipelineMetrics;
use crate::analysis::DetectionCompletion;
use crate::types::{Frame, ModelConfig};
use crate::vehicle_detection::{build_detector, ObjectDetector};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub epoch: u64,
    pub seq: u64,
    pub frame: Arc<Frame>,
}

#[derive(Debug, Clone)]
pub enum DetectorEvent {
    Ready,
    Failed(String),
    Completed(DetectionCompletion),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Busy,
    Closed,
}

/// Tick-loop side of the worker.
pub struct DetectorHandle {
    request_tx: mpsc::Sender<DetectionRequest>,
    event_rx: mpsc::UnboundedReceiver<DetectorEvent>,
    worker: Option<JoinHandle<()>>,
}

impl DetectorHandle {
    /// Wire a handle to existing channels. The caller plays the worker.
    #[cfg(test)]
    pub fn from_channels(
        request_tx: mpsc::Sender<DetectionRequest>,
        event_rx: mpsc::UnboundedReceiver<DetectorEvent>,
    ) -> Self {
        Self {
            request_tx,
            event_rx,
            worker: None,
        }
    }

    /// Queue a request if the worker slot is free. `build` only runs once a
    /// slot is reserved, so a busy worker costs no frame copy.
    pub fn submit(&self, build: impl FnOnce() -> DetectionRequest) -> SubmitOutcome {
        match self.request_tx.try_reserve() {
            Ok(permit) => {
                permit.send(build());
                SubmitOutcome::Queued
            }
            Err(TrySendError::Full(())) => SubmitOutcome::Busy,
            Err(TrySendError::Closed(())) => SubmitOutcome::Closed,
        }
    }

    /// Everything the worker has reported since the last call. Never blocks.
    pub fn drain_events(&mut self) -> Vec<DetectorEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Close the request channel and wait for the worker to exit.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            request_tx, worker, ..
        } = self;
        drop(request_tx);
        if let Some(worker) = worker {
            worker.await?;
        }
        Ok(())
    }
}

/// Start the worker on the blocking pool. The detector is built inside the
/// worker so model loading never stalls the tick loop; the outcome arrives
/// as a `Ready` or `Failed` event.
pub fn spawn_detection_worker(config: ModelConfig, metrics: PipelineMetrics) -> DetectorHandle {
    let (request_tx, request_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let worker = tokio::task::spawn_blocking(move || {
        let detector = match build_detector(&config) {
            Ok(detector) => {
                info!("✓ Detector '{}' loaded", detector.name());
                let _ = event_tx.send(DetectorEvent::Ready);
                detector
            }
            Err(e) => {
                error!("Detector failed to initialize: {:#}", e);
                let _ = event_tx.send(DetectorEvent::Failed(format!("{:#}", e)));
                return;
            }
        };
        run_detection_loop(detector, request_rx, event_tx, metrics);
    });

    DetectorHandle {
        request_tx,
        event_rx,
        worker: Some(worker),
    }
}

fn run_detection_loop(
    mut detector: Box<dyn ObjectDetector>,
    mut request_rx: mpsc::Receiver<DetectionRequest>,
    event_tx: mpsc::UnboundedSender<DetectorEvent>,
    metrics: PipelineMetrics,
) {
    while let Some(request) = request_rx.blocking_recv() {
        let start = Instant::now();
        let outcome = detector
            .detect(&request.frame)
            .map_err(|e| format!("{:#}", e));
        metrics.set_timing(&metrics.detector_time_us, start.elapsed().as_micros() as u64);
        if outcome.is_err() {
            metrics.inc(&metrics.detector_errors);
        }

        debug!(
            "Detection seq={} epoch={} finished in {:.1}ms",
            request.seq,
            request.epoch,
            start.elapsed().as_secs_f64() * 1000.0
        );

        let completion = DetectionCompletion {
            epoch: request.epoch,
            seq: request.seq,
            observed_at_ms: request.frame.timestamp_ms,
            outcome,
        };
        if event_tx.send(DetectorEvent::Completed(completion)).is_err() {
            break;
        }
    }
    debug!("Detection worker stopped");
}
