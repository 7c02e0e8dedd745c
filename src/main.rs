// src/main.rs

mod analysis;
mod capture;
mod config;
mod geometry;
mod pipeline;
mod recorder;
mod types;
mod upload_client;
mod vehicle_detection;

use anyhow::Result;
use capture::FrameSource;
use pipeline::{spawn_detection_worker, GuidanceEngine, GuidanceEvent, GuidanceFrame, PipelineMetrics, SessionState};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::{Config, SessionConfig};
use upload_client::InspectionClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Vehicle walk-around capture starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Distance zones: too_close>{:.2}, too_far<{:.2}, max speed {:.0} px/s, full coverage {:.0}s",
        config.guidance.too_close_ratio,
        config.guidance.too_far_ratio,
        config.guidance.max_speed_px_per_s,
        config.guidance.coverage_duration_s
    );

    let metrics = PipelineMetrics::new();
    let detector = spawn_detection_worker(config.model.clone(), metrics.clone());
    let mut engine = GuidanceEngine::new(&config, detector, metrics.clone());

    let mut source = match capture::open_source(&config.capture) {
        Ok(source) => source,
        Err(e) => {
            error!("Camera unavailable, session stays idle: {:#}", e);
            engine.into_detector().shutdown().await?;
            return Err(e);
        }
    };
    info!("📷 Capture source: {}", source.describe());

    let client = InspectionClient::new(config.upload.api_url.clone(), config.upload.timeout_secs)?;
    info!("📡 Inspection API: {}", client.endpoint());

    engine.start_camera()?;
    let mut retries_left = config.session.upload_retries;

    loop {
        let blob = run_capture(&mut engine, source.as_mut(), &config).await?;
        if engine.state() != SessionState::Uploading {
            break;
        }

        upload_recording(&mut engine, &client, blob).await?;
        report_events(engine.drain_events());

        if engine.state() != SessionState::Failed || retries_left == 0 {
            break;
        }
        retries_left -= 1;
        warn!(
            "🔁 Upload failed, back to preview for another recording ({} retries left)",
            retries_left
        );
        engine.retry()?;
    }

    report_outcome(&engine);

    let summary = metrics.summary();
    info!("\n========================================");
    info!("  Ticks: {} ({:.1}/s)", summary.total_ticks, summary.ticks_per_second);
    info!(
        "  Ticks with vehicle: {} ({:.1}%)",
        summary.ticks_with_vehicle,
        100.0 * summary.ticks_with_vehicle as f64 / summary.total_ticks.max(1) as f64
    );
    info!(
        "  Detections: {} requested, {} applied, {} discarded, {} skipped (busy)",
        summary.detections_requested,
        summary.detections_applied,
        summary.detections_discarded,
        summary.detections_skipped_busy
    );
    info!("  Damage scans: {}", summary.damage_scans);
    info!("  Speed warnings: {}", summary.speed_warnings);
    if engine.events_dropped() > 0 {
        warn!("  Guidance events dropped: {}", engine.events_dropped());
    }
    let sched = engine.scheduler_stats();
    debug!(
        "Scheduler: {} frames, {} detection slots ({:.1}%), {} scan slots",
        sched.total_frames,
        sched.detection_requests,
        sched.detection_frequency * 100.0,
        sched.damage_scans
    );
    debug!("Metrics: {}", serde_json::to_string(&summary)?);
    info!("========================================");

    engine.into_detector().shutdown().await?;
    Ok(())
}

async fn upload_recording(
    engine: &mut GuidanceEngine,
    client: &InspectionClient,
    blob: Option<recorder::MediaBlob>,
) -> Result<()> {
    let Some(blob) = blob else {
        engine.upload_failed("recording contained no frames".to_string())?;
        return Ok(());
    };
    match client.submit(blob).await {
        Ok(result) => engine.upload_succeeded(result)?,
        Err(e) => engine.upload_failed(format!("{:#}", e))?,
    }
    Ok(())
}

/// Tick every frame from the source, starting and stopping the recording
/// per the session settings. Returns the recorded media once recording
/// stops.
async fn run_capture(
    engine: &mut GuidanceEngine,
    source: &mut dyn FrameSource,
    config: &Config,
) -> Result<Option<recorder::MediaBlob>> {
    let mut pacer = (config.capture.realtime && config.capture.fps > 0.0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / config.capture.fps));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    });
    let mut last_status = String::new();

    while let Some(frame) = source.next_frame()? {
        if let Some(pacer) = pacer.as_mut() {
            pacer.tick().await;
        }

        let guidance = engine.tick(&frame);
        log_guidance(&guidance, &mut last_status);
        report_events(engine.drain_events());

        if let Some(blob) = apply_session_policy(engine, &guidance, &config.session)? {
            return Ok(Some(blob));
        }
    }

    info!("Capture source ended");
    match engine.state() {
        SessionState::Recording => Ok(engine.stop_recording()?),
        state => {
            warn!("Source ended while {}, nothing to upload", state.as_str());
            Ok(None)
        }
    }
}

/// Automatic user actions. Returns the media when recording was stopped.
fn apply_session_policy(
    engine: &mut GuidanceEngine,
    guidance: &GuidanceFrame,
    session: &SessionConfig,
) -> Result<Option<recorder::MediaBlob>> {
    match guidance.session_state {
        SessionState::Previewing if session.auto_record && guidance.has_vehicle() => {
            engine.start_recording()?;
        }
        SessionState::Recording if session.stop_at_full_coverage && guidance.coverage_percent >= 100.0 => {
            info!("🎬 Full coverage reached, stopping recording");
            return Ok(engine.stop_recording()?);
        }
        _ => {}
    }
    Ok(None)
}

fn log_guidance(guidance: &GuidanceFrame, last_status: &mut String) {
    if guidance.status_message != *last_status {
        info!(
            "[{}] {} (coverage {:.0}%)",
            guidance.session_state.as_str(),
            guidance.status_message,
            guidance.coverage_percent
        );
        last_status.clone_from(&guidance.status_message);
    }

    debug!(
        "Frame {} @ {:.0}ms: box={:?} distance={} speed={:?} damage={}",
        guidance.frame_id,
        guidance.timestamp_ms,
        guidance.vehicle_box,
        guidance.distance_status.as_str(),
        guidance.speed_px_per_s,
        guidance.damage_regions.len()
    );
}

fn report_events(events: Vec<GuidanceEvent>) {
    for event in events {
        match event {
            GuidanceEvent::DetectorReady => info!("✓ Vehicle detector ready"),
            GuidanceEvent::DetectorUnavailable(reason) => {
                warn!("⚠️  Vehicle detector unavailable, using fixed guide box: {}", reason)
            }
            GuidanceEvent::SessionChanged { from, to } => {
                debug!("Session {} → {}", from.as_str(), to.as_str())
            }
            GuidanceEvent::VehicleAcquired { frame_id } => info!("🚙 Vehicle in view (frame {})", frame_id),
            GuidanceEvent::VehicleLost { frame_id } => debug!("Vehicle lost (frame {})", frame_id),
            GuidanceEvent::DistanceChanged { frame_id, status } => {
                debug!("Distance {} (frame {})", status.as_str(), frame_id)
            }
            GuidanceEvent::SpeedWarning {
                frame_id,
                speed_px_per_s,
            } => warn!("Moving too fast: {:.0} px/s (frame {})", speed_px_per_s, frame_id),
            GuidanceEvent::DamageRegionsFound { frame_id, count } => {
                debug!("{} possible damage region(s) (frame {})", count, frame_id)
            }
            GuidanceEvent::CoverageComplete { frame_id } => info!("✅ Walk-around coverage complete (frame {})", frame_id),
            GuidanceEvent::StaleDetectionDiscarded { epoch, seq } => {
                debug!("Discarded detection seq={} from epoch {}", seq, epoch)
            }
        }
    }
}

fn report_outcome(engine: &GuidanceEngine) {
    match engine.state() {
        SessionState::Complete => {
            if let Some(result) = engine.session().result() {
                info!("✅ Inspection complete: {} damage(s) reported", result.damages.len());
                match serde_json::to_string_pretty(result) {
                    Ok(json) => info!("{}", json),
                    Err(e) => warn!("Could not serialize inspection result: {}", e),
                }
            }
        }
        SessionState::Failed => {
            error!(
                "Inspection failed: {}",
                engine.session().last_error().unwrap_or("unknown error")
            );
            info!("No retries left (session.upload_retries); run again to start a new inspection");
        }
        state => info!("Session ended in {}", state.as_str()),
    }
}
