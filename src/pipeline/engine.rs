// src/pipeline/engine.rs
//
// Guidance engine: one call to `tick` per displayed frame.
//
// Tick order:
//   1. Apply whatever the detection worker reported since the last tick
//   2. Request a new detection if the scheduler says so (never waits)
//   3. Read the current vehicle box from the cache (staleness rules apply)
//   4. Distance zone and speed proxy from that box
//   5. Damage invalidation, and a scan on scan ticks
//   6. Coverage while recording
//   7. Emit an immutable GuidanceFrame
//
// Every tick uses the frame's own timestamp; the clock is never resampled
// mid-tick. User actions are plain method calls between ticks.

use super::detection_worker::{DetectionRequest, DetectorEvent, DetectorHandle, SubmitOutcome};
use super::event_bus::{EventBus, GuidanceEvent};
use super::guidance::{status_message, GuidanceFrame};
use super::metrics::PipelineMetrics;
use super::session::{SessionMachine, SessionState, TransitionError};
use crate::analysis::detector_cache::ApplyOutcome;
use crate::analysis::inference_scheduler::SchedulerStats;
use crate::analysis::{
    CoverageTracker, DamageScanner, DetectionScheduler, DistanceStatus, MotionEstimator, TrackState,
    VehicleDetectorCache,
};
use crate::geometry::BoundingBox;
use crate::recorder::{MediaBlob, MediaRecorder};
use crate::types::{Config, Frame};
use crate::upload_client::InspectionResult;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const MAX_PENDING_EVENTS: usize = 256;

pub struct GuidanceEngine {
    session: SessionMachine,
    detector: DetectorHandle,
    cache: VehicleDetectorCache,
    track: TrackState,
    scheduler: DetectionScheduler,
    motion: MotionEstimator,
    coverage: CoverageTracker,
    damage: DamageScanner,
    recorder: MediaRecorder,
    events: EventBus,
    metrics: PipelineMetrics,

    frame_id: u64,
    last_tick_ms: Option<f64>,
    /// Box shown on the most recent tick; gates Previewing → Recording
    last_vehicle_box: Option<BoundingBox>,
    last_distance: DistanceStatus,
    advisory: Option<String>,
    coverage_announced: bool,
}

impl GuidanceEngine {
    pub fn new(config: &Config, detector: DetectorHandle, metrics: PipelineMetrics) -> Self {
        Self {
            session: SessionMachine::new(),
            detector,
            cache: VehicleDetectorCache::new(&config.detection),
            track: TrackState::default(),
            scheduler: DetectionScheduler::new(&config.detection, &config.damage),
            motion: MotionEstimator::new(&config.guidance),
            coverage: CoverageTracker::new(config.guidance.coverage_duration_s),
            damage: DamageScanner::new(config.damage.clone()),
            recorder: MediaRecorder::new(&config.recording),
            events: EventBus::new(MAX_PENDING_EVENTS),
            metrics,
            frame_id: 0,
            last_tick_ms: None,
            last_vehicle_box: None,
            last_distance: DistanceStatus::NoVehicle,
            advisory: None,
            coverage_announced: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SessionMachine {
        &self.session
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.get_stats()
    }

    pub fn drain_events(&mut self) -> Vec<GuidanceEvent> {
        self.events.drain()
    }

    /// Events lost because the driver fell behind draining them.
    pub fn events_dropped(&self) -> u64 {
        self.events.dropped()
    }

    /// Consume the detector handle, e.g. to shut the worker down.
    pub fn into_detector(self) -> DetectorHandle {
        self.detector
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    pub fn tick(&mut self, frame: &Frame) -> GuidanceFrame {
        self.frame_id += 1;
        let now_ms = frame.timestamp_ms;
        self.last_tick_ms = Some(now_ms);
        self.metrics.inc(&self.metrics.total_ticks);

        self.process_detector_events();

        let state = self.session.state();
        if !state.is_capturing() {
            self.set_vehicle_box(None);
            let mut out = GuidanceFrame::inactive(self.frame_id, now_ms, state, self.coverage.percent());
            out.advisory = self.advisory.clone();
            return out;
        }
        let is_recording = state == SessionState::Recording;

        if self.scheduler.should_detect(is_recording) {
            self.request_detection(frame);
        }

        let vehicle = self
            .cache
            .current_box(&mut self.track, frame.width, frame.height, now_ms, is_recording);
        self.set_vehicle_box(vehicle);
        if vehicle.is_some() {
            self.metrics.inc(&self.metrics.ticks_with_vehicle);
        }

        let distance = self.motion.classify_distance(vehicle.as_ref(), frame.width);
        if distance != self.last_distance {
            self.events.publish(GuidanceEvent::DistanceChanged {
                frame_id: self.frame_id,
                status: distance,
            });
            self.last_distance = distance;
        }

        let reading = self.motion.update(&mut self.track, vehicle.as_ref(), now_ms);
        if reading.too_fast {
            self.metrics.inc(&self.metrics.speed_warnings);
            self.events.publish(GuidanceEvent::SpeedWarning {
                frame_id: self.frame_id,
                speed_px_per_s: reading.speed_px_per_s.unwrap_or_default(),
            });
        }

        self.update_damage(frame, vehicle.as_ref(), is_recording);

        if is_recording {
            self.coverage.update(now_ms);
            if self.coverage.is_complete() && !self.coverage_announced {
                self.coverage_announced = true;
                self.events.publish(GuidanceEvent::CoverageComplete {
                    frame_id: self.frame_id,
                });
            }
            if let Err(e) = self.recorder.push(frame) {
                warn!("Recorder dropped frame {}: {:#}", self.frame_id, e);
            }
        }

        GuidanceFrame {
            frame_id: self.frame_id,
            timestamp_ms: now_ms,
            session_state: state,
            vehicle_box: vehicle,
            distance_status: distance,
            distance_message: distance.message().to_string(),
            speed_warning: reading.too_fast,
            speed_px_per_s: reading.speed_px_per_s,
            coverage_percent: self.coverage.percent(),
            damage_regions: self.damage.regions().to_vec(),
            status_message: status_message(state, distance, reading.too_fast),
            advisory: self.advisory.clone(),
        }
    }

    fn process_detector_events(&mut self) {
        for event in self.detector.drain_events() {
            match event {
                DetectorEvent::Ready => {
                    self.cache.mark_ready();
                    self.events.publish(GuidanceEvent::DetectorReady);
                }
                DetectorEvent::Failed(reason) => self.detector_unavailable(reason),
                DetectorEvent::Completed(completion) => {
                    let (epoch, seq) = (completion.epoch, completion.seq);
                    match self.cache.apply(&mut self.track, completion) {
                        ApplyOutcome::StaleEpoch | ApplyOutcome::Superseded => {
                            self.metrics.inc(&self.metrics.detections_discarded);
                            self.events
                                .publish(GuidanceEvent::StaleDetectionDiscarded { epoch, seq });
                        }
                        ApplyOutcome::Updated(sample) => {
                            self.metrics.inc(&self.metrics.detections_applied);
                            debug!(
                                "Tracking {} (score {:.2}) from seq {}",
                                sample.class.as_str(),
                                sample.score,
                                seq
                            );
                        }
                        ApplyOutcome::Missed | ApplyOutcome::Cleared => {
                            self.metrics.inc(&self.metrics.detections_applied);
                        }
                    }
                }
            }
        }
    }

    fn detector_unavailable(&mut self, reason: String) {
        if self.cache.mark_failed(reason.clone()) {
            self.advisory = Some(format!(
                "Vehicle detection unavailable, using a fixed guide box ({})",
                reason
            ));
            self.events.publish(GuidanceEvent::DetectorUnavailable(reason));
        }
    }

    fn request_detection(&mut self, frame: &Frame) {
        // Nothing to ask until the worker has a detector
        if self.cache.is_fallback_active() {
            return;
        }

        let cache = &mut self.cache;
        let outcome = self.detector.submit(|| DetectionRequest {
            epoch: cache.epoch(),
            seq: cache.next_request_seq(),
            frame: Arc::new(frame.clone()),
        });
        match outcome {
            SubmitOutcome::Queued => {
                self.metrics.inc(&self.metrics.detections_requested);
            }
            SubmitOutcome::Busy => {
                debug!("Detector busy, retrying next tick");
                self.metrics.inc(&self.metrics.detections_skipped_busy);
                self.scheduler.defer_detection();
            }
            SubmitOutcome::Closed => {
                self.detector_unavailable("detection worker stopped".to_string());
            }
        }
    }

    fn update_damage(&mut self, frame: &Frame, vehicle: Option<&BoundingBox>, is_recording: bool) {
        if !self.damage.is_enabled() {
            return;
        }

        // The placeholder box is not a vehicle; scanning it would flag background
        let scan_target = vehicle.filter(|_| !self.cache.is_fallback_active());
        self.damage.observe_vehicle(scan_target);

        let due = self.scheduler.should_scan(is_recording);
        let Some(bbox) = scan_target else {
            return;
        };
        if !due {
            return;
        }

        let start = Instant::now();
        let found = self.damage.scan(frame, bbox).len();
        self.metrics
            .set_timing(&self.metrics.damage_scan_time_us, start.elapsed().as_micros() as u64);
        self.metrics.inc(&self.metrics.damage_scans);
        if found > 0 {
            self.events.publish(GuidanceEvent::DamageRegionsFound {
                frame_id: self.frame_id,
                count: found,
            });
        }
    }

    fn set_vehicle_box(&mut self, vehicle: Option<BoundingBox>) {
        match (self.last_vehicle_box.is_some(), vehicle.is_some()) {
            (false, true) => self.events.publish(GuidanceEvent::VehicleAcquired {
                frame_id: self.frame_id,
            }),
            (true, false) => self.events.publish(GuidanceEvent::VehicleLost {
                frame_id: self.frame_id,
            }),
            _ => {}
        }
        self.last_vehicle_box = vehicle;
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    fn announce(&mut self, from: SessionState) {
        let to = self.session.state();
        self.events.publish(GuidanceEvent::SessionChanged { from, to });
    }

    /// Fresh capture state for a new epoch.
    fn begin_capture(&mut self, epoch: u64) {
        self.cache.begin_epoch(epoch);
        self.track.reset();
        self.damage.reset();
        self.scheduler.reset();
        self.coverage.reset();
        self.coverage_announced = false;
        self.last_vehicle_box = None;
        self.last_distance = DistanceStatus::NoVehicle;
    }

    /// Idle → Previewing. Call only once the capture source is open.
    pub fn start_camera(&mut self) -> Result<(), TransitionError> {
        let from = self.session.state();
        let epoch = self.session.start_camera()?;
        self.begin_capture(epoch);
        self.announce(from);
        Ok(())
    }

    /// Previewing → Recording, refused unless the shown box is fresh enough
    /// to survive the recording staleness gate.
    pub fn start_recording(&mut self) -> Result<(), TransitionError> {
        let from = self.session.state();
        let now_ms = self.last_tick_ms.unwrap_or(0.0);
        let vehicle_ready =
            self.last_vehicle_box.is_some() && self.cache.is_fresh_for_recording(&self.track, now_ms);
        if let Err(e) = self.session.start_recording(vehicle_ready) {
            debug!("Recording not started: {}", e);
            return Err(e);
        }

        // Next tick requests a fresh detection regardless of cadence
        self.scheduler.reset();
        self.coverage.start(self.last_tick_ms.unwrap_or(0.0));
        self.coverage_announced = false;
        self.recorder.start();
        self.announce(from);
        Ok(())
    }

    /// Recording → Uploading. Returns the recorded media, which now belongs
    /// to the caller.
    pub fn stop_recording(&mut self) -> Result<Option<MediaBlob>, TransitionError> {
        let from = self.session.state();
        let epoch = self.session.stop_recording()?;
        self.cache.begin_epoch(epoch);
        self.coverage.stop();
        self.damage.reset();
        self.last_vehicle_box = None;
        let blob = self.recorder.finish();
        if blob.is_none() {
            warn!("Recording stopped with no frames captured");
        }
        self.announce(from);
        Ok(blob)
    }

    pub fn upload_succeeded(&mut self, result: InspectionResult) -> Result<(), TransitionError> {
        let from = self.session.state();
        self.session.upload_succeeded(result)?;
        self.metrics.inc(&self.metrics.upload_successes);
        self.announce(from);
        Ok(())
    }

    pub fn upload_failed(&mut self, error: String) -> Result<(), TransitionError> {
        let from = self.session.state();
        self.session.upload_failed(error)?;
        self.metrics.inc(&self.metrics.upload_failures);
        self.announce(from);
        Ok(())
    }

    /// Failed → Previewing
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        let from = self.session.state();
        let epoch = self.session.retry()?;
        self.begin_capture(epoch);
        self.announce(from);
        Ok(())
    }

    /// Complete / Failed → Idle
    pub fn restart(&mut self) -> Result<(), TransitionError> {
        let from = self.session.state();
        let epoch = self.session.restart()?;
        self.begin_capture(epoch);
        self.recorder.discard();
        info!("Session restarted");
        self.announce(from);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DetectionCompletion;
    use crate::vehicle_detection::DetectorCandidate;
    use tokio::sync::mpsc;

    const W: usize = 320;
    const H: usize = 240;

    /// Engine wired to channels the test drives by hand.
    struct Harness {
        engine: GuidanceEngine,
        metrics: PipelineMetrics,
        requests: mpsc::Receiver<DetectionRequest>,
        events: mpsc::UnboundedSender<DetectorEvent>,
        t_ms: f64,
    }

    impl Harness {
        fn new() -> Self {
            let mut config = Config::default();
            config.recording.frame_stride = 10;
            Self::with_config(config)
        }

        fn with_config(config: Config) -> Self {
            let (request_tx, requests) = mpsc::channel(1);
            let (events, event_rx) = mpsc::unbounded_channel();
            let handle = DetectorHandle::from_channels(request_tx, event_rx);
            let metrics = PipelineMetrics::new();
            Self {
                engine: GuidanceEngine::new(&config, handle, metrics.clone()),
                metrics,
                requests,
                events,
                t_ms: 0.0,
            }
        }

        fn ready() -> Self {
            let mut h = Self::new();
            h.events.send(DetectorEvent::Ready).unwrap();
            h
        }

        fn tick(&mut self) -> GuidanceFrame {
            let frame = Frame::filled(W, H, [120, 120, 120], self.t_ms);
            self.t_ms += 100.0;
            self.engine.tick(&frame)
        }

        /// Like `tick`, with a bright 20px scratch at row 110, x 90..110.
        fn tick_scratched(&mut self) -> GuidanceFrame {
            let mut frame = Frame::filled(W, H, [120, 120, 120], self.t_ms);
            for x in 90..110 {
                let idx = (110 * W + x) * 3;
                frame.data[idx..idx + 3].copy_from_slice(&[250, 250, 250]);
            }
            self.t_ms += 100.0;
            self.engine.tick(&frame)
        }

        fn take_request(&mut self) -> Option<DetectionRequest> {
            self.requests.try_recv().ok()
        }

        fn complete(&self, request: &DetectionRequest, candidates: Vec<DetectorCandidate>) {
            self.events
                .send(DetectorEvent::Completed(DetectionCompletion {
                    epoch: request.epoch,
                    seq: request.seq,
                    observed_at_ms: request.frame.timestamp_ms,
                    outcome: Ok(candidates),
                }))
                .unwrap();
        }
    }

    fn car(x: f32, width: f32) -> DetectorCandidate {
        DetectorCandidate::new("car", BoundingBox::new(x, 60.0, width, 120.0), 0.9)
    }

    #[test]
    fn test_fallback_box_while_initializing() {
        let mut h = Harness::new();
        h.engine.start_camera().unwrap();

        let out = h.tick();
        let bbox = out.vehicle_box.unwrap();
        assert_eq!(bbox.x, 32.0);
        assert_eq!(bbox.width, 256.0);
        assert_eq!(out.distance_status, DistanceStatus::Ok);
        assert!(h.take_request().is_none(), "no requests before the detector is ready");
    }

    #[test]
    fn test_recording_refused_without_vehicle() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();

        let out = h.tick();
        assert_eq!(out.distance_status, DistanceStatus::NoVehicle);
        assert_eq!(out.status_message, "Detecting vehicle...");
        assert_eq!(
            h.engine.start_recording(),
            Err(TransitionError::VehicleNotDetected)
        );
        assert_eq!(h.engine.state(), SessionState::Previewing);
    }

    #[test]
    fn test_detection_flows_into_guidance() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();

        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);

        let out = h.tick();
        let bbox = out.vehicle_box.unwrap();
        assert_eq!(bbox.width, 220.0);
        // 220 / 320 = 0.69
        assert_eq!(out.distance_status, DistanceStatus::Ok);
        assert_eq!(h.metrics.summary().detections_applied, 1);

        h.engine.start_recording().unwrap();
        assert_eq!(h.engine.state(), SessionState::Recording);
    }

    #[test]
    fn test_recording_refused_on_stale_preview_box() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();
        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);

        // Detector stalls; preview keeps showing the t=0 box
        let mut out = h.tick();
        while out.timestamp_ms < 1600.0 {
            let _ = h.take_request();
            out = h.tick();
        }
        assert!(out.vehicle_box.is_some());

        assert_eq!(
            h.engine.start_recording(),
            Err(TransitionError::VehicleNotDetected)
        );
        assert_eq!(h.engine.state(), SessionState::Previewing);

        // A fresh answer unlocks recording again
        let mut next = None;
        while next.is_none() {
            h.tick();
            next = h.take_request();
        }
        h.complete(&next.unwrap(), vec![car(40.0, 220.0)]);
        h.tick();
        assert!(h.engine.start_recording().is_ok());
    }

    #[test]
    fn test_recording_forces_immediate_detection() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();
        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);
        h.tick();
        assert!(h.take_request().is_none(), "mid-interval, nothing requested");

        h.engine.start_recording().unwrap();
        h.tick();
        assert!(h.take_request().is_some());
    }

    #[test]
    fn test_busy_detector_defers_request() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();

        // Tick 1 fills the slot; the worker never takes it
        for _ in 0..7 {
            h.tick();
        }
        let summary = h.metrics.summary();
        assert_eq!(summary.detections_requested, 1);
        assert_eq!(summary.detections_skipped_busy, 1);

        // Deferred slot is retried on the very next tick
        h.tick();
        assert_eq!(h.metrics.summary().detections_skipped_busy, 2);
    }

    #[test]
    fn test_previous_session_results_discarded() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();
        h.tick();
        let first = h.take_request().unwrap();
        h.complete(&first, vec![car(40.0, 220.0)]);
        h.tick();
        h.engine.start_recording().unwrap();
        h.tick();
        let in_flight = h.take_request().unwrap();

        h.engine.stop_recording().unwrap();
        h.engine.upload_failed("HTTP 500".to_string()).unwrap();
        h.engine.retry().unwrap();

        // Late completion from the recording epoch lands in the retry session
        h.complete(&in_flight, vec![car(40.0, 220.0)]);
        let out = h.tick();
        assert!(out.vehicle_box.is_none());
        assert_eq!(h.metrics.summary().detections_discarded, 1);
        assert!(h
            .engine
            .drain_events()
            .iter()
            .any(|e| matches!(e, GuidanceEvent::StaleDetectionDiscarded { .. })));
    }

    #[test]
    fn test_retry_after_failed_upload_records_again() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();
        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);
        h.tick();
        h.engine.start_recording().unwrap();
        h.tick();
        assert!(h.engine.stop_recording().unwrap().is_some());
        h.engine.upload_failed("HTTP 503".to_string()).unwrap();
        assert_eq!(h.engine.session().last_error(), Some("HTTP 503"));

        h.engine.retry().unwrap();
        assert_eq!(h.engine.state(), SessionState::Previewing);
        assert_eq!(h.engine.session().last_error(), None);

        // Fresh session: no box until the detector answers again
        let _ = h.take_request();
        let out = h.tick();
        assert!(out.vehicle_box.is_none());
        assert_eq!(out.coverage_percent, 0.0);
        assert_eq!(h.engine.start_recording(), Err(TransitionError::VehicleNotDetected));

        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);
        h.tick();
        h.engine.start_recording().unwrap();
        h.tick();
        let blob = h.engine.stop_recording().unwrap().unwrap();
        assert_eq!(blob.frames.len(), 1);
        h.engine.upload_succeeded(InspectionResult::default()).unwrap();
        assert_eq!(h.engine.state(), SessionState::Complete);
    }

    #[test]
    fn test_detector_failure_raises_advisory_once() {
        let mut h = Harness::new();
        h.engine.start_camera().unwrap();
        h.events.send(DetectorEvent::Failed("model missing".to_string())).unwrap();
        h.events.send(DetectorEvent::Failed("model missing".to_string())).unwrap();

        let out = h.tick();
        assert!(out.advisory.unwrap().contains("model missing"));
        assert!(out.vehicle_box.is_some(), "fallback box keeps guidance usable");

        let unavailable = h
            .engine
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, GuidanceEvent::DetectorUnavailable(_)))
            .count();
        assert_eq!(unavailable, 1);
    }

    #[test]
    fn test_speed_warning_on_fast_pan() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();

        h.tick();
        let r1 = h.take_request().unwrap();
        h.complete(&r1, vec![car(0.0, 200.0)]);
        let out = h.tick();
        assert!(!out.speed_warning);

        // Skip to the next detection tick, then jump the box 100px
        for _ in 0..5 {
            h.tick();
        }
        let r2 = h.take_request().unwrap();
        h.complete(&r2, vec![car(100.0, 200.0)]);
        let out = h.tick();
        // 100px over 100ms
        assert!(out.speed_warning);
        assert!((out.speed_px_per_s.unwrap() - 1000.0).abs() < 0.5);

        let out = h.tick();
        assert!(!out.speed_warning, "warning reflects only the latest delta");
    }

    #[test]
    fn test_damage_regions_on_scan_cadence() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();

        // Tick 1 uses the scan slot before any box exists
        h.tick_scratched();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);

        // Preview scan interval is 6 * 3 ticks
        for _ in 2..19 {
            let _ = h.take_request();
            let out = h.tick_scratched();
            assert!(out.vehicle_box.is_some());
            assert!(out.damage_regions.is_empty());
        }

        let out = h.tick_scratched();
        assert_eq!(out.frame_id, 19);
        assert_eq!(out.damage_regions.len(), 1);
        assert_eq!(out.damage_regions[0].bbox, BoundingBox::new(80.0, 100.0, 40.0, 40.0));
        assert_eq!(h.metrics.summary().damage_scans, 1);

        // Box jumps 60px: regions go before the next scan
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(100.0, 220.0)]);
        let out = h.tick_scratched();
        assert_eq!(out.vehicle_box.unwrap().x, 100.0);
        assert!(out.damage_regions.is_empty());
    }

    #[test]
    fn test_fallback_box_never_scanned() {
        let mut h = Harness::new();
        h.engine.start_camera().unwrap();

        for _ in 0..20 {
            let out = h.tick_scratched();
            assert!(out.vehicle_box.is_some());
            assert!(out.damage_regions.is_empty());
        }
        assert_eq!(h.metrics.summary().damage_scans, 0);
    }

    #[test]
    fn test_stale_box_dropped_while_recording() {
        let mut h = Harness::ready();
        h.engine.start_camera().unwrap();
        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);
        h.tick();
        h.engine.start_recording().unwrap();

        // Detector stops answering; box observed at t=0
        let mut last = None;
        for _ in 0..16 {
            let _ = h.take_request();
            last = Some(h.tick());
        }
        let out = last.unwrap();
        // Frame at 1700ms, sample from 0ms
        assert!(out.timestamp_ms > 1500.0);
        assert!(out.vehicle_box.is_none());
        assert_eq!(out.distance_status, DistanceStatus::NoVehicle);
    }

    #[test]
    fn test_full_session_with_coverage() {
        let mut config = Config::default();
        config.guidance.coverage_duration_s = 1.0;
        config.recording.frame_stride = 4;
        let mut h = Harness::with_config(config);
        h.events.send(DetectorEvent::Ready).unwrap();

        h.engine.start_camera().unwrap();
        h.tick();
        let request = h.take_request().unwrap();
        h.complete(&request, vec![car(40.0, 220.0)]);
        h.tick();
        h.engine.start_recording().unwrap();

        let mut coverage = Vec::new();
        for _ in 0..12 {
            // Keep the detector answering so the box stays fresh
            if let Some(r) = h.take_request() {
                h.complete(&r, vec![car(40.0, 220.0)]);
            }
            coverage.push(h.tick().coverage_percent);
        }
        assert!(coverage.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*coverage.last().unwrap(), 100.0);

        let blob = h.engine.stop_recording().unwrap().unwrap();
        assert_eq!(blob.frames.len(), 3);
        assert_eq!(h.engine.state(), SessionState::Uploading);

        let out = h.tick();
        assert_eq!(out.coverage_percent, 100.0, "frozen after stop");
        assert!(out.vehicle_box.is_none());

        h.engine.upload_succeeded(InspectionResult::default()).unwrap();
        h.engine.restart().unwrap();
        assert_eq!(h.engine.state(), SessionState::Idle);
        assert_eq!(h.tick().coverage_percent, 0.0);
    }
}
